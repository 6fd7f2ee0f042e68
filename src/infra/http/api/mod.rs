pub mod error;
pub mod extract;
pub mod handlers;
pub mod models;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

use crate::infra::http::HttpState;

/// Multipart framing on top of the archive itself.
const MULTIPART_OVERHEAD_BYTES: u64 = 64 * 1024;

pub fn build_api_router(upload_limit_bytes: u64) -> Router<HttpState> {
    let body_limit = usize::try_from(upload_limit_bytes.saturating_add(MULTIPART_OVERHEAD_BYTES))
        .unwrap_or(usize::MAX);

    Router::new()
        .route("/demo/deploy", post(handlers::deploy_demo))
        .route(
            "/demo/{slug}",
            get(handlers::get_demo)
                .patch(handlers::update_demo)
                .delete(handlers::delete_demo),
        )
        .route("/demo/{slug}/access-log", get(handlers::demo_access_log))
        .route(
            "/demo-upload",
            post(handlers::upload_demo).layer(DefaultBodyLimit::max(body_limit)),
        )
}
