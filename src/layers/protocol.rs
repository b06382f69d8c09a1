use crate::errors::TusError;
use crate::models::const_val::{H_METHOD_OVERRIDE, H_TUS_RESUMABLE, TUS_VERSION, header_name};
use axum::extract::Request;
use axum::http::{HeaderValue, Method};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

/// Applies `X-HTTP-Method-Override` before routing. The header is consumed,
/// so the verb is rewritten at most once.
pub async fn method_override(mut req: Request, next: Next) -> Response {
    if let Some(value) = req.headers_mut().remove(H_METHOD_OVERRIDE)
        && let Ok(method) = Method::from_bytes(value.as_bytes())
    {
        *req.method_mut() = method;
    }
    next.run(req).await
}

/// Demands `Tus-Resumable: 1.0.0` on every method except OPTIONS and GET, and
/// stamps the header onto every response, error paths included.
pub async fn require_tus_version(req: Request, next: Next) -> Response {
    let exempt = req.method() == Method::OPTIONS || req.method() == Method::GET;
    let declared = req
        .headers()
        .get(H_TUS_RESUMABLE)
        .and_then(|v| v.to_str().ok());
    let mut res = if exempt || declared == Some(TUS_VERSION) {
        next.run(req).await
    } else {
        TusError::UnsupportedVersion.into_response()
    };
    res.headers_mut()
        .insert(header_name(H_TUS_RESUMABLE), HeaderValue::from_static(TUS_VERSION));
    res
}
