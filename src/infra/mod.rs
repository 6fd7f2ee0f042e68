//! Infrastructure adapters and runtime bootstrap.

pub mod db;
pub mod demo_storage;
pub mod error;
pub mod http;
pub mod telemetry;
