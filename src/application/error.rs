use std::error::Error as StdError;

use axum::{
    http::{
        HeaderValue, StatusCode,
        header::{CACHE_CONTROL, RETRY_AFTER},
    },
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::{
    application::{auth::AuthError, demos::DemoServiceError},
    config::LoadError,
    domain::error::DomainError,
    infra::error::InfraError,
};

/// Diagnostic attached to an error response and consumed by the response
/// logging middleware. Never serialized to the client.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub chain: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let chain = std::iter::successors(Some(error), |&current| current.source())
            .map(ToString::to_string)
            .collect();
        Self {
            source,
            status,
            chain,
        }
    }

    pub fn from_message(
        source: &'static str,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            status,
            chain: vec![message.into()],
        }
    }

    /// Outermost message of the chain.
    pub fn headline(&self) -> &str {
        self.chain
            .first()
            .map(String::as_str)
            .unwrap_or("no diagnostic available")
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

/// Plain-text error for the public demo routes. Demo error pages are never
/// cached, since the same URL starts working once a demo becomes ready.
#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    public_message: &'static str,
    retry_after_secs: Option<u64>,
    report: ErrorReport,
}

impl HttpError {
    pub fn new(
        source: &'static str,
        status: StatusCode,
        public_message: &'static str,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            status,
            public_message,
            retry_after_secs: None,
            report: ErrorReport::from_message(source, status, detail),
        }
    }

    pub fn from_error(
        source: &'static str,
        status: StatusCode,
        public_message: &'static str,
        error: &dyn StdError,
    ) -> Self {
        Self {
            status,
            public_message,
            retry_after_secs: None,
            report: ErrorReport::from_error(source, status, error),
        }
    }

    pub fn retry_after(mut self, secs: u64) -> Self {
        self.retry_after_secs = Some(secs);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let mut response = (self.status, self.public_message).into_response();
        let headers = response.headers_mut();
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
        if let Some(secs) = self.retry_after_secs {
            headers.insert(RETRY_AFTER, HeaderValue::from(secs));
        }
        self.report.attach(&mut response);
        response
    }
}

/// Failure of a CLI command or of server startup.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] LoadError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("session command failed")]
    Auth(#[from] AuthError),
    #[error("demo command failed")]
    Demo(#[from] DemoServiceError),
    #[error("invalid argument: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    /// Process exit status: 2 for operator mistakes, 1 for everything else.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Validation(_) => 2,
            Self::Demo(DemoServiceError::Domain(DomainError::Validation { .. })) => 2,
            Self::Auth(AuthError::Repo(_)) => 1,
            Self::Auth(_) => 2,
            Self::Infra(_) | Self::Demo(_) | Self::Unexpected(_) => 1,
        }
    }

    /// Messages from the outermost error inwards.
    pub fn chain(&self) -> Vec<String> {
        std::iter::successors(Some(self as &dyn StdError), |&current| current.source())
            .map(ToString::to_string)
            .collect()
    }
}
