//! Request and response types shared by the Vetrina server and its API clients.
//!
//! The enums double as database types when the `sqlx` feature is enabled, so
//! the wire representation and the persisted representation never drift.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Lifecycle status of a hosted demo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "demo_status", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum DemoStatus {
    Building,
    Ready,
    Error,
    Disabled,
}

impl DemoStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Building => "building",
            Self::Ready => "ready",
            Self::Error => "error",
            Self::Disabled => "disabled",
        }
    }
}

impl Display for DemoStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DemoStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "building" => Ok(Self::Building),
            "ready" => Ok(Self::Ready),
            "error" => Ok(Self::Error),
            "disabled" => Ok(Self::Disabled),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// How the demo content was produced before it reached the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "demo_build_type", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum BuildType {
    Static,
    Nextjs,
    React,
    Html,
}

impl BuildType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::Nextjs => "nextjs",
            Self::React => "react",
            Self::Html => "html",
        }
    }
}

impl Display for BuildType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "static" => Ok(Self::Static),
            "nextjs" => Ok(Self::Nextjs),
            "react" => Ok(Self::React),
            "html" => Ok(Self::Html),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant(pub String);

impl Display for UnknownVariant {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown variant `{}`", self.0)
    }
}

impl std::error::Error for UnknownVariant {}

/// Body of `POST /demo/deploy`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployDemoRequest {
    pub project_id: Uuid,
    pub demo_name: String,
    pub build_type: BuildType,
    pub local_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployDemoResponse {
    pub demo_id: Uuid,
    pub demo_url: String,
    pub slug: String,
    pub status: DemoStatus,
}

/// Response of `POST /demo-upload`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadDemoResponse {
    pub demo_id: Uuid,
    pub project_id: Uuid,
    pub demo_url: String,
    pub status: DemoStatus,
    pub files: u64,
    pub extracted_bytes: u64,
}

/// Body of `PATCH /demo/{slug}`. Absent fields are left unchanged; an empty
/// `password` clears the password.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateDemoRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub demo_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<DemoStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_login: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemoResponse {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub slug: String,
    pub url: String,
    pub build_type: BuildType,
    pub status: DemoStatus,
    pub password_protected: bool,
    pub require_login: bool,
    pub access_count: i64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_accessed_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessLogEntry {
    pub id: Uuid,
    pub viewer_id: Option<Uuid>,
    pub client_addr: Option<String>,
    pub user_agent: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub accessed_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessLogResponse {
    pub demo_id: Uuid,
    pub access_count: i64,
    pub entries: Vec<AccessLogEntry>,
}

/// Uniform error body returned by every JSON endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}
