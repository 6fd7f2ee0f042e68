use thiserror::Error;

use crate::domain::types::DemoStatus;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("domain entity `{entity}` not found")]
    NotFound { entity: &'static str },
    #[error("domain validation failed: {message}")]
    Validation { message: String },
    #[error(
        "demo cannot move from `{}` to `{requested}`",
        .current.map_or("none", DemoStatus::as_str)
    )]
    InvalidTransition {
        current: Option<DemoStatus>,
        requested: DemoStatus,
    },
}

impl DomainError {
    pub fn not_found(entity: &'static str) -> Self {
        Self::NotFound { entity }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}
