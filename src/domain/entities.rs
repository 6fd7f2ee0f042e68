//! Domain entities mirrored from persistent storage.

use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::types::{BuildType, DemoStatus, UserRole};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileRecord {
    pub id: Uuid,
    pub email: String,
    pub role: UserRole,
    pub created_at: OffsetDateTime,
}

/// Bearer/session token row. Only the SHA-256 of the secret is persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub prefix: String,
    pub hashed_secret: Vec<u8>,
    pub expires_at: Option<OffsetDateTime>,
    pub revoked_at: Option<OffsetDateTime>,
    pub last_used_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

/// The subset of a client project the demo subsystem reads and maintains.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectRecord {
    pub id: Uuid,
    pub name: String,
    pub client_id: Option<Uuid>,
    pub has_demo: bool,
    pub demo_url: Option<String>,
    pub demo_status: Option<DemoStatus>,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DemoRecord {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub slug: String,
    pub url: String,
    pub build_type: BuildType,
    pub status: DemoStatus,
    /// Directory relative to the demos root holding `index.html`.
    pub local_path: String,
    pub password_salt: Option<Vec<u8>>,
    pub password_hash: Option<Vec<u8>>,
    pub require_login: bool,
    pub access_count: i64,
    pub last_accessed_at: Option<OffsetDateTime>,
    pub deployed_by: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl DemoRecord {
    pub fn is_password_protected(&self) -> bool {
        self.password_hash.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DemoAccessRecord {
    pub id: Uuid,
    pub demo_id: Uuid,
    pub viewer_id: Option<Uuid>,
    pub client_addr: Option<String>,
    pub user_agent: Option<String>,
    pub accessed_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditLogRecord {
    pub id: Uuid,
    pub actor: String,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub payload_text: Option<String>,
    pub created_at: OffsetDateTime,
}
