use crate::models::const_val::{
    CORS_ALLOW_HEADERS, CORS_ALLOW_METHODS, CORS_EXPOSE_HEADERS, CORS_MAX_AGE,
};
use crate::services::states::TuskerState;
use axum::extract::{Request, State};
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    ACCESS_CONTROL_EXPOSE_HEADERS, ACCESS_CONTROL_MAX_AGE, ORIGIN,
};
use axum::http::{HeaderValue, Method};
use axum::middleware::Next;
use axum::response::Response;
use std::sync::Arc;

/// Reflects an allow-listed `Origin` back to the client. OPTIONS answers get
/// the preflight trio, every other method the expose list.
pub async fn reflect_allowed_origin(
    State(state): State<Arc<TuskerState>>,
    req: Request,
    next: Next,
) -> Response {
    let origin = req.headers().get(ORIGIN).cloned();
    let method = req.method().clone();
    let mut res = next.run(req).await;
    let Some(origin) = origin else {
        return res;
    };
    let allowed = origin
        .to_str()
        .map(|o| state.config.upload.request_origins.iter().any(|a| a == o))
        .unwrap_or(false);
    if !allowed {
        return res;
    }
    let headers = res.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    if method == Method::OPTIONS {
        headers.insert(ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static(CORS_ALLOW_METHODS));
        headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static(CORS_ALLOW_HEADERS));
        headers.insert(ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static(CORS_MAX_AGE));
    } else {
        headers.insert(
            ACCESS_CONTROL_EXPOSE_HEADERS,
            HeaderValue::from_static(CORS_EXPOSE_HEADERS),
        );
    }
    res
}
