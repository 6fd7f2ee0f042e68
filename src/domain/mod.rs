//! Domain layer types and invariants.

pub mod demos;
pub mod entities;
pub mod error;
pub mod slug;
pub mod types;
