use std::net::SocketAddr;

use thiserror::Error;

use crate::infra::demo_storage::DemoStorageError;

/// Startup and process-level infrastructure failures.
#[derive(Debug, Error)]
pub enum InfraError {
    #[error("database unavailable: {message}")]
    Database { message: String },
    #[error("failed to apply migrations: {message}")]
    Migration { message: String },
    #[error("failed to bind {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("demo storage unavailable")]
    Storage(#[from] DemoStorageError),
    #[error("telemetry initialization failed: {0}")]
    Telemetry(String),
    #[error("configuration error: {message}")]
    Configuration { message: String },
}

impl InfraError {
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
        }
    }

    pub fn migration(message: impl Into<String>) -> Self {
        Self::Migration {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn telemetry(message: impl Into<String>) -> Self {
        Self::Telemetry(message.into())
    }
}
