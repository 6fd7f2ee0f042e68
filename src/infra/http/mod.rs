pub mod api;
mod middleware;
mod public;
mod rate_limit;

pub use api::build_api_router;
pub use public::build_public_router;
pub use rate_limit::PasswordRateLimiter;

use std::net::IpAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    middleware as axum_middleware,
    response::{IntoResponse, Response},
    routing::get,
};

use crate::application::auth::AuthService;
use crate::application::demos::DemoService;
use crate::application::error::ErrorReport;
use crate::application::repos::{HealthRepo, RepoError};
use crate::application::viewer::DemoViewer;

#[derive(Clone)]
pub struct HttpState {
    pub auth: Arc<AuthService>,
    pub demos: Arc<DemoService>,
    pub viewer: Arc<DemoViewer>,
    pub health: Arc<dyn HealthRepo>,
    pub password_limiter: Arc<PasswordRateLimiter>,
    pub session_cookie: Arc<str>,
    pub trusted_proxies: Arc<[IpAddr]>,
    pub upload_limit_bytes: u64,
}

/// Assemble every route behind the shared request-context, principal and
/// response-logging layers.
pub fn build_router(state: HttpState) -> Router {
    let upload_limit_bytes = state.upload_limit_bytes;

    Router::new()
        .route("/_health/db", get(db_health))
        .merge(build_api_router(upload_limit_bytes))
        .merge(build_public_router())
        .layer(axum_middleware::from_fn(middleware::log_responses))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::resolve_principal,
        ))
        .layer(axum_middleware::from_fn(middleware::set_request_context))
        .with_state(state)
}

async fn db_health(State(state): State<HttpState>) -> Response {
    db_health_response(state.health.ping().await)
}

fn db_health_response(result: Result<(), RepoError>) -> Response {
    match result {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            let mut response = StatusCode::SERVICE_UNAVAILABLE.into_response();
            ErrorReport::from_error(
                "infra::http::db_health",
                StatusCode::SERVICE_UNAVAILABLE,
                &err,
            )
            .attach(&mut response);
            response
        }
    }
}
