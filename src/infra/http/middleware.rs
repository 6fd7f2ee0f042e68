use std::time::Instant;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, header},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::application::{auth::Principal, error::ErrorReport};

use super::HttpState;

#[derive(Clone)]
pub struct RequestContext {
    pub request_id: String,
}

pub async fn set_request_context(mut request: Request<Body>, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let ctx = RequestContext {
        request_id: request_id.clone(),
    };
    request.extensions_mut().insert(ctx.clone());

    let mut response = next.run(request).await;
    response.extensions_mut().insert(ctx);
    response
}

/// Resolve the caller once per request: session cookie first, then an
/// `Authorization: Bearer` token when the cookie is missing or unusable. If
/// neither resolves the request stays anonymous; the route's extractor
/// decides whether that is acceptable.
pub async fn resolve_principal(
    State(state): State<HttpState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let candidates = [
        session_cookie(request.headers(), &state.session_cookie),
        bearer_token(request.headers().get(header::AUTHORIZATION)),
    ];

    for token in candidates.into_iter().flatten() {
        match state.auth.authenticate(&token).await {
            Ok(principal) => {
                request.extensions_mut().insert(principal);
                break;
            }
            Err(err) => {
                debug!(
                    target = "vetrina::http::auth",
                    error = %err,
                    "ignoring unusable credentials"
                );
            }
        }
    }

    next.run(request).await
}

/// Emit one event per failed request, carrying the `ErrorReport` the handler
/// attached. Successful requests are not logged here.
pub async fn log_responses(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();
    let user = request
        .extensions()
        .get::<Principal>()
        .map(|principal| principal.email.clone())
        .unwrap_or_default();
    let request_id = request
        .extensions()
        .get::<RequestContext>()
        .map(|ctx| ctx.request_id.clone())
        .unwrap_or_default();

    let mut response = next.run(request).await;
    let status = response.status();
    if !(status.is_client_error() || status.is_server_error()) {
        return response;
    }

    let elapsed_ms = started.elapsed().as_millis() as u64;
    let report = response
        .extensions_mut()
        .remove::<ErrorReport>()
        .unwrap_or_else(|| ErrorReport::from_message("unknown", status, "no diagnostic available"));

    if status.is_server_error() {
        error!(
            target = "vetrina::http::response",
            status = status.as_u16(),
            %method,
            %path,
            elapsed_ms,
            source = report.source,
            detail = report.headline(),
            chain = ?report.chain,
            %request_id,
            %user,
            "request failed",
        );
    } else {
        warn!(
            target = "vetrina::http::response",
            status = status.as_u16(),
            %method,
            %path,
            elapsed_ms,
            source = report.source,
            detail = report.headline(),
            %request_id,
            %user,
            "request rejected",
        );
    }

    response
}

fn session_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    CookieJar::from_headers(headers)
        .get(name)
        .map(|cookie| cookie.value().to_string())
        .filter(|value| !value.is_empty())
}

fn bearer_token(header: Option<&axum::http::HeaderValue>) -> Option<String> {
    let raw = header?.to_str().ok()?;
    let bearer = raw.strip_prefix("Bearer ")?;
    Some(bearer.trim().to_string())
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn bearer_token_requires_scheme() {
        let value = HeaderValue::from_static("Bearer vt_abc_def");
        assert_eq!(bearer_token(Some(&value)).as_deref(), Some("vt_abc_def"));

        let value = HeaderValue::from_static("Basic dXNlcjpwYXNz");
        assert!(bearer_token(Some(&value)).is_none());
        assert!(bearer_token(None).is_none());
    }

    #[test]
    fn session_cookie_is_read_by_name() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; vetrina_session=vt_p_s"),
        );
        assert_eq!(
            session_cookie(&headers, "vetrina_session").as_deref(),
            Some("vt_p_s")
        );
        assert!(session_cookie(&headers, "other").is_none());
    }
}
