//! # Citadel Common Library
//!
//! Shared code for the Citadel intranet services:
//! - Schema migration runner (applies `migrations/` exactly once per file)
//! - Migration file discovery and checksumming
//! - Database bootstrap
//! - Configuration loading

pub mod config;
pub mod db;
pub mod error;

pub use error::{Error, FailureKind, MigrationError, Result};
