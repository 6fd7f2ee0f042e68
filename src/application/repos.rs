//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::entities::{
    AuditLogRecord, DemoAccessRecord, DemoRecord, ProfileRecord, ProjectRecord, SessionRecord,
};
use crate::domain::types::{BuildType, DemoStatus, UserRole};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct CreateDemoParams {
    pub project_id: Uuid,
    pub name: String,
    pub slug: String,
    pub url: String,
    pub build_type: BuildType,
    pub local_path: String,
    pub deployed_by: String,
}

/// Mutable demo columns. `None` leaves a column untouched;
/// `password: Some(None)` clears the password.
#[derive(Debug, Clone, Default)]
pub struct UpdateDemoParams {
    pub name: Option<String>,
    pub local_path: Option<String>,
    pub password: Option<Option<(Vec<u8>, Vec<u8>)>>,
    pub require_login: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct NewAccessParams {
    pub demo_id: Uuid,
    pub viewer_id: Option<Uuid>,
    pub client_addr: Option<String>,
    pub user_agent: Option<String>,
    pub accessed_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct ProjectDemoState {
    pub has_demo: bool,
    pub demo_url: Option<String>,
    pub demo_status: Option<DemoStatus>,
}

impl ProjectDemoState {
    pub fn live(demo_url: String, status: DemoStatus) -> Self {
        Self {
            has_demo: true,
            demo_url: Some(demo_url),
            demo_status: Some(status),
        }
    }

    pub fn cleared() -> Self {
        Self {
            has_demo: false,
            demo_url: None,
            demo_status: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreateSessionParams {
    pub user_id: Uuid,
    pub prefix: String,
    pub hashed_secret: Vec<u8>,
    pub expires_at: Option<OffsetDateTime>,
}

#[async_trait]
pub trait ProjectsRepo: Send + Sync {
    async fn find_project(&self, id: Uuid) -> Result<Option<ProjectRecord>, RepoError>;

    /// Whether the user is the project's client or holds an access grant.
    async fn has_access(&self, project_id: Uuid, user_id: Uuid) -> Result<bool, RepoError>;

    async fn set_demo_state(
        &self,
        project_id: Uuid,
        state: ProjectDemoState,
    ) -> Result<(), RepoError>;
}

#[async_trait]
pub trait DemosRepo: Send + Sync {
    async fn find_by_slug(&self, slug: &str) -> Result<Option<DemoRecord>, RepoError>;

    async fn find_by_project(&self, project_id: Uuid) -> Result<Option<DemoRecord>, RepoError>;

    async fn slug_exists(&self, slug: &str) -> Result<bool, RepoError>;

    /// Insert a new demo in `building`. Fails with `Duplicate` when the project
    /// already has one.
    async fn create_demo(&self, params: CreateDemoParams) -> Result<DemoRecord, RepoError>;

    async fn update_status(&self, id: Uuid, status: DemoStatus) -> Result<DemoRecord, RepoError>;

    async fn update_demo(&self, id: Uuid, params: UpdateDemoParams)
    -> Result<DemoRecord, RepoError>;

    async fn delete_demo(&self, id: Uuid) -> Result<(), RepoError>;

    async fn list_local_paths(&self) -> Result<Vec<String>, RepoError>;
}

#[async_trait]
pub trait DemoAccessRepo: Send + Sync {
    /// Append an access log row and bump the demo's counter.
    async fn record_access(&self, params: NewAccessParams) -> Result<(), RepoError>;

    async fn list_recent(
        &self,
        demo_id: Uuid,
        limit: u32,
    ) -> Result<Vec<DemoAccessRecord>, RepoError>;
}

#[async_trait]
pub trait SessionsRepo: Send + Sync {
    async fn find_by_prefix(&self, prefix: &str) -> Result<Option<SessionRecord>, RepoError>;

    async fn create_session(&self, params: CreateSessionParams)
    -> Result<SessionRecord, RepoError>;

    async fn revoke_session(&self, prefix: &str, at: OffsetDateTime) -> Result<(), RepoError>;

    async fn touch_session(&self, id: Uuid, at: OffsetDateTime) -> Result<(), RepoError>;
}

#[async_trait]
pub trait ProfilesRepo: Send + Sync {
    async fn find_profile(&self, id: Uuid) -> Result<Option<ProfileRecord>, RepoError>;

    async fn upsert_profile(&self, email: &str, role: UserRole)
    -> Result<ProfileRecord, RepoError>;
}

#[async_trait]
pub trait AuditRepo: Send + Sync {
    async fn append_log(&self, record: AuditLogRecord) -> Result<(), RepoError>;
}

#[async_trait]
pub trait HealthRepo: Send + Sync {
    async fn ping(&self) -> Result<(), RepoError>;
}
