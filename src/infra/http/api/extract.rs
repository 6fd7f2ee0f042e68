//! Caller requirements as extractors.
//!
//! These read the [`Principal`] placed in the request extensions by
//! `resolve_principal` and run before any body extractor, so a caller without
//! the right role is refused before the payload is looked at.

use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::{header, request::Parts};

use crate::application::auth::Principal;
use crate::infra::http::HttpState;

use super::error::ApiError;

/// The caller, if any credentials resolved.
pub struct MaybeUser(pub Option<Principal>);

/// Any authenticated caller; 401 otherwise.
pub struct RequireUser(pub Principal);

/// An administrator; 401 for anonymous callers, 403 for everyone else.
pub struct RequireAdmin(pub Principal);

impl<S> FromRequestParts<S> for MaybeUser
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(parts.extensions.get::<Principal>().cloned()))
    }
}

impl<S> FromRequestParts<S> for RequireUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Principal>()
            .cloned()
            .map(Self)
            .ok_or_else(ApiError::unauthorized)
    }
}

impl<S> FromRequestParts<S> for RequireAdmin
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let principal = parts
            .extensions
            .get::<Principal>()
            .cloned()
            .ok_or_else(ApiError::unauthorized)?;
        if !principal.is_admin {
            return Err(ApiError::forbidden());
        }
        Ok(Self(principal))
    }
}

/// Client address and user agent for access logging and rate limiting.
///
/// The address is the socket peer. `X-Forwarded-For` is only consulted when
/// that peer is one of `server.trusted_proxies`.
#[derive(Debug, Clone, Default)]
pub struct ClientMeta {
    pub addr: Option<String>,
    pub user_agent: Option<String>,
}

impl ClientMeta {
    /// Key used for per-client throttling.
    pub fn throttle_key(&self) -> &str {
        self.addr.as_deref().unwrap_or("unknown")
    }
}

impl FromRequestParts<HttpState> for ClientMeta {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &HttpState,
    ) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        let forwarded = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok());
        let addr = client_addr(peer, forwarded, &state.trusted_proxies).map(|ip| ip.to_string());
        let user_agent = parts
            .headers
            .get(header::USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.chars().take(512).collect());

        Ok(Self { addr, user_agent })
    }
}

/// Walk `X-Forwarded-For` from the right while hops belong to trusted
/// proxies. The first untrusted hop is the client.
fn client_addr(
    peer: Option<IpAddr>,
    forwarded_for: Option<&str>,
    trusted: &[IpAddr],
) -> Option<IpAddr> {
    let peer = peer?;
    if !trusted.contains(&peer) {
        return Some(peer);
    }

    let mut client = peer;
    for hop in forwarded_for.unwrap_or_default().rsplit(',') {
        let Ok(addr) = hop.trim().parse::<IpAddr>() else {
            break;
        };
        client = addr;
        if !trusted.contains(&addr) {
            break;
        }
    }
    Some(client)
}
