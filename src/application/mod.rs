//! Application services layer.

pub mod audit;
pub mod auth;
pub mod demos;
pub mod error;
pub mod repos;
pub mod rewrite;
pub mod viewer;
