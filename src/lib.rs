//! Demo hosting for agency client projects.
//!
//! Administrators upload a zipped static site (or register a prebuilt one) for
//! a project; the site is served back under `/demos/{project_id}` with
//! optional password and login gating.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
pub mod presentation;
pub mod util;
