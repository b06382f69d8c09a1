use crate::layers::{cors, protocol};
use crate::routers::upload::{
    create_upload, download_upload, head_upload, patch_upload, server_options, terminate_upload,
};
use crate::services::states::TuskerState;
use axum::Router;
use axum::http::{HeaderName, Request};
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{get, post};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, RequestId, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::info_span;

mod upload;

pub fn router(state: Arc<TuskerState>) -> Router {
    let trace_header = HeaderName::from_static("x-request-id");
    let routes = Router::new()
        .route("/", post(create_upload).options(server_options))
        .route(
            "/{uid}",
            get(download_upload)
                .head(head_upload)
                .patch(patch_upload)
                .delete(terminate_upload)
                .options(server_options),
        )
        .with_state(state.clone());
    routes.layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::new(trace_header.clone(), MakeRequestUuid))
            .layer(TraceLayer::new_for_http().make_span_with(|req: &Request<_>| {
                let rid = req
                    .extensions()
                    .get::<RequestId>()
                    .and_then(|r| r.header_value().to_str().ok())
                    .unwrap_or("-");
                info_span!(
                    "http.request",
                    request_id = %rid,
                    method = %req.method(),
                    uri = %req.uri(),
                )
            }))
            .layer(PropagateRequestIdLayer::new(trace_header))
            .layer(from_fn_with_state(state.clone(), cors::reflect_allowed_origin))
            .layer(from_fn(protocol::method_override))
            .layer(from_fn(protocol::require_tus_version))
            .concurrency_limit(state.config.common.concurrency_limit),
    )
}
