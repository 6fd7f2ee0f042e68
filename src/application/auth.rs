//! Session token issuing and resolution.
//!
//! Every request is resolved once: the session cookie is consulted first and
//! the `Authorization: Bearer` header second. Handlers only ever see the
//! resulting [`Principal`].

use std::sync::Arc;

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use crate::application::repos::{CreateSessionParams, ProfilesRepo, RepoError, SessionsRepo};
use crate::domain::entities::{ProfileRecord, SessionRecord};
use crate::domain::types::UserRole;

const TOKEN_PREFIX: &str = "vt";
const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid session token")]
    Invalid,
    #[error("session expired")]
    Expired,
    #[error("session revoked")]
    Revoked,
    #[error("profile for session no longer exists")]
    UnknownProfile,
    #[error(transparent)]
    Repo(#[from] RepoError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: Uuid,
    pub email: String,
    pub role: UserRole,
    pub is_admin: bool,
    pub session_prefix: String,
}

impl Principal {
    /// Label written to audit rows and log lines.
    pub fn actor_label(&self) -> String {
        format!("user:{}:{}", self.user_id, self.email)
    }
}

#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub profile: ProfileRecord,
    pub session: SessionRecord,
    pub token: String,
}

#[derive(Clone)]
pub struct AuthService {
    sessions: Arc<dyn SessionsRepo>,
    profiles: Arc<dyn ProfilesRepo>,
    admin_emails: Arc<Vec<String>>,
}

impl AuthService {
    pub fn new(
        sessions: Arc<dyn SessionsRepo>,
        profiles: Arc<dyn ProfilesRepo>,
        admin_emails: &[String],
    ) -> Self {
        let admin_emails = admin_emails
            .iter()
            .map(|email| email.trim().to_ascii_lowercase())
            .filter(|email| !email.is_empty())
            .collect();
        Self {
            sessions,
            profiles,
            admin_emails: Arc::new(admin_emails),
        }
    }

    /// Admin when the profile role says so or the email is on the configured list.
    pub fn is_admin(&self, profile: &ProfileRecord) -> bool {
        profile.role == UserRole::Admin
            || self
                .admin_emails
                .iter()
                .any(|email| email.eq_ignore_ascii_case(profile.email.trim()))
    }

    pub async fn issue(
        &self,
        email: &str,
        role: UserRole,
        ttl: Option<Duration>,
    ) -> Result<IssuedSession, AuthError> {
        let profile = self
            .profiles
            .upsert_profile(&email.trim().to_ascii_lowercase(), role)
            .await?;

        let prefix = Self::generate_prefix();
        let secret = Self::generate_secret();
        let token = format!("{TOKEN_PREFIX}_{prefix}_{secret}");

        let session = self
            .sessions
            .create_session(CreateSessionParams {
                user_id: profile.id,
                prefix,
                hashed_secret: Self::hash_secret(&secret),
                expires_at: ttl.map(|ttl| OffsetDateTime::now_utc() + ttl),
            })
            .await?;

        Ok(IssuedSession {
            profile,
            session,
            token,
        })
    }

    pub async fn revoke(&self, prefix: &str) -> Result<(), AuthError> {
        self.sessions
            .revoke_session(prefix, OffsetDateTime::now_utc())
            .await?;
        Ok(())
    }

    pub async fn authenticate(&self, token: &str) -> Result<Principal, AuthError> {
        let parsed = Self::parse_token(token).ok_or(AuthError::Invalid)?;
        let record = self
            .sessions
            .find_by_prefix(&parsed.prefix)
            .await?
            .ok_or(AuthError::Invalid)?;

        let now = OffsetDateTime::now_utc();
        if let Some(revoked_at) = record.revoked_at
            && revoked_at <= now
        {
            return Err(AuthError::Revoked);
        }
        if let Some(expires_at) = record.expires_at
            && expires_at <= now
        {
            return Err(AuthError::Expired);
        }

        let hashed_input = Self::hash_secret(&parsed.secret);
        if record.hashed_secret.ct_eq(&hashed_input).unwrap_u8() == 0 {
            return Err(AuthError::Invalid);
        }

        let profile = self
            .profiles
            .find_profile(record.user_id)
            .await?
            .ok_or(AuthError::UnknownProfile)?;

        // best-effort last_used update; never blocks the request
        let sessions = self.sessions.clone();
        let session_id = record.id;
        tokio::spawn(async move {
            if let Err(err) = sessions.touch_session(session_id, now).await {
                debug!(target = "vetrina::auth", error = %err, "failed to touch session");
            }
        });

        Ok(Principal {
            user_id: profile.id,
            is_admin: self.is_admin(&profile),
            email: profile.email,
            role: profile.role,
            session_prefix: record.prefix,
        })
    }

    fn hash_secret(secret: &str) -> Vec<u8> {
        let mut hasher = Sha256::new();
        hasher.update(secret.as_bytes());
        hasher.finalize().to_vec()
    }

    fn generate_prefix() -> String {
        Uuid::new_v4().simple().to_string()[..12].to_string()
    }

    fn generate_secret() -> String {
        format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
    }

    fn parse_token(token: &str) -> Option<ParsedToken> {
        let mut parts = token.trim().splitn(3, '_');
        if parts.next()? != TOKEN_PREFIX {
            return None;
        }
        let prefix = parts.next()?;
        let secret = parts.next()?;
        if secret.len() < MIN_SECRET_LEN || prefix.is_empty() {
            return None;
        }
        Some(ParsedToken {
            prefix: prefix.to_string(),
            secret: secret.to_string(),
        })
    }
}

struct ParsedToken {
    prefix: String,
    secret: String,
}
