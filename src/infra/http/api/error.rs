use std::error::Error as StdError;

use crate::application::demos::DemoServiceError;
use crate::application::error::ErrorReport;
use crate::application::repos::RepoError;
use crate::domain::error::DomainError;
use crate::infra::demo_storage::DemoStorageError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use vetrina_api_types::ErrorBody;

pub mod codes {
    pub const BAD_REQUEST: &str = "bad_request";
    pub const UNAUTHORIZED: &str = "unauthorized";
    pub const FORBIDDEN: &str = "forbidden";
    pub const NOT_FOUND: &str = "not_found";
    pub const DEMO_EXISTS: &str = "demo_exists";
    pub const PATH_IN_USE: &str = "path_in_use";
    pub const INVALID_TRANSITION: &str = "invalid_transition";
    pub const PAYLOAD_TOO_LARGE: &str = "payload_too_large";
    pub const INVALID_ARCHIVE: &str = "invalid_archive";
    pub const DUPLICATE: &str = "duplicate";
    pub const INVALID_INPUT: &str = "invalid_input";
    pub const INTEGRITY: &str = "integrity_error";
    pub const DB_TIMEOUT: &str = "db_timeout";
    pub const REPO: &str = "repo_error";
    pub const STORAGE: &str = "storage_error";
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: &'static str,
    details: Option<String>,
    report: Option<ErrorReport>,
}

impl ApiError {
    pub fn new(
        status: StatusCode,
        code: &'static str,
        message: &'static str,
        details: Option<String>,
    ) -> Self {
        Self {
            status,
            code,
            message,
            details,
            report: None,
        }
    }

    /// Server-side failure: the chain goes to the logs, not to the client.
    pub fn internal(code: &'static str, message: &'static str, error: &dyn StdError) -> Self {
        let status = StatusCode::INTERNAL_SERVER_ERROR;
        Self {
            status,
            code,
            message,
            details: None,
            report: Some(ErrorReport::from_error("infra::http::api", status, error)),
        }
    }

    pub fn bad_request(message: &'static str, details: Option<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, codes::BAD_REQUEST, message, details)
    }

    pub fn unauthorized() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            codes::UNAUTHORIZED,
            "authentication required",
            None,
        )
    }

    pub fn forbidden() -> Self {
        Self::new(
            StatusCode::FORBIDDEN,
            codes::FORBIDDEN,
            "insufficient permissions",
            None,
        )
    }

    pub fn not_found(message: &'static str) -> Self {
        Self::new(StatusCode::NOT_FOUND, codes::NOT_FOUND, message, None)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let report = self.report.unwrap_or_else(|| {
            ErrorReport::from_message(
                "infra::http::api",
                self.status,
                format!(
                    "{}: {}",
                    self.code,
                    self.details.as_deref().unwrap_or(self.message)
                ),
            )
        });
        let body = ErrorBody {
            error: self.message.to_string(),
            code: self.code.to_string(),
            details: self.details,
        };
        let mut response = (self.status, Json(body)).into_response();
        // Attach a structured report so shared logging middleware can emit rich diagnostics.
        report.attach(&mut response);
        response
    }
}

pub fn demo_to_api(err: DemoServiceError) -> ApiError {
    match err {
        DemoServiceError::Domain(DomainError::Validation { message }) => {
            ApiError::bad_request("invalid request", Some(message))
        }
        DemoServiceError::Domain(DomainError::NotFound { entity }) => ApiError::new(
            StatusCode::NOT_FOUND,
            codes::NOT_FOUND,
            "resource not found",
            Some(entity.to_string()),
        ),
        DemoServiceError::Domain(err @ DomainError::InvalidTransition { .. }) => ApiError::new(
            StatusCode::CONFLICT,
            codes::INVALID_TRANSITION,
            "demo status change not allowed",
            Some(err.to_string()),
        ),
        DemoServiceError::DemoNotFound => ApiError::not_found("demo not found"),
        DemoServiceError::ProjectNotFound(_) => ApiError::not_found("project not found"),
        DemoServiceError::AlreadyDeployed(project_id) => ApiError::new(
            StatusCode::CONFLICT,
            codes::DEMO_EXISTS,
            "project already has a demo",
            Some(format!("delete the existing demo for project {project_id} first")),
        ),
        DemoServiceError::PathInUse(path) => ApiError::new(
            StatusCode::CONFLICT,
            codes::PATH_IN_USE,
            "local path is already served by another demo",
            Some(path),
        ),
        DemoServiceError::Forbidden => ApiError::forbidden(),
        DemoServiceError::Slug(err) => {
            ApiError::bad_request("demo name cannot be turned into a slug", Some(err.to_string()))
        }
        DemoServiceError::Storage(err) => storage_to_api(err),
        DemoServiceError::Repo(err) => repo_to_api(err),
    }
}

pub fn storage_to_api(err: DemoStorageError) -> ApiError {
    match err {
        DemoStorageError::PayloadTooLarge { .. } => ApiError::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            codes::PAYLOAD_TOO_LARGE,
            "archive too large",
            Some(err.to_string()),
        ),
        err if err.is_client_error() => ApiError::new(
            StatusCode::BAD_REQUEST,
            codes::INVALID_ARCHIVE,
            "archive rejected",
            Some(err.to_string()),
        ),
        err => ApiError::internal(codes::STORAGE, "demo storage failure", &err),
    }
}

pub fn repo_to_api(err: RepoError) -> ApiError {
    match err {
        RepoError::Duplicate { constraint } => ApiError::new(
            StatusCode::CONFLICT,
            codes::DUPLICATE,
            "duplicate record",
            Some(constraint),
        ),
        RepoError::NotFound => ApiError::not_found("resource not found"),
        RepoError::InvalidInput { message } => ApiError::new(
            StatusCode::BAD_REQUEST,
            codes::INVALID_INPUT,
            "invalid input",
            Some(message),
        ),
        RepoError::Integrity { message } => ApiError::new(
            StatusCode::CONFLICT,
            codes::INTEGRITY,
            "integrity constraint violated",
            Some(message),
        ),
        RepoError::Timeout => ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            codes::DB_TIMEOUT,
            "database timeout",
            None,
        ),
        err @ RepoError::Persistence(_) => ApiError::internal(codes::REPO, "persistence error", &err),
    }
}
