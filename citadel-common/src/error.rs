//! Common error types for Citadel

use std::path::PathBuf;
use thiserror::Error;

/// Common result type for Citadel operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across Citadel services
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Schema migration failed; the service must not start
    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),
}

/// Failure classes of the migration runner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Migration directory or file could not be read
    Io,
    /// Bookkeeping table could not be created or queried
    Bookkeeping,
    /// Recorded history diverges from the files on disk
    Integrity,
    /// A migration could not be executed or committed
    Execution,
}

/// Fatal migration runner error
///
/// Every variant is unrecoverable: the caller is expected to stop the
/// process. Nothing is retried and nothing is auto-corrected.
#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("Unable to read migrations directory {}: {source}", .path.display())]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unable to read migration file {}: {source}", .path.display())]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Migration file name is not valid UTF-8: {0:?}")]
    InvalidFileName(std::ffi::OsString),

    #[error("Migration {name} is not valid UTF-8")]
    Encoding { name: String },

    #[error("Unable to create migrations table: {0}")]
    BookkeepingTable(#[source] sqlx::Error),

    #[error("Failed to load applied migrations: {0}")]
    LoadApplied(#[source] sqlx::Error),

    #[error("Unexpected migration found {found}, expecting {expected}")]
    UnexpectedMigration { found: String, expected: String },

    #[error("Migration has been modified since it was applied! {name} (recorded {recorded}, found {actual})")]
    ChecksumMismatch {
        name: String,
        recorded: String,
        actual: String,
    },

    #[error("Unable to start transaction for migration {name}: {source}")]
    Begin {
        name: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Migration {name} failed on statement `{statement}`: {source}")]
    Statement {
        name: String,
        statement: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Unable to record migration {name}: {source}")]
    Record {
        name: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Transaction commit failed for migration {name}: {source}")]
    Commit {
        name: String,
        #[source]
        source: sqlx::Error,
    },
}

impl MigrationError {
    pub fn kind(&self) -> FailureKind {
        match self {
            MigrationError::ReadDir { .. }
            | MigrationError::ReadFile { .. }
            | MigrationError::InvalidFileName(_)
            | MigrationError::Encoding { .. } => FailureKind::Io,
            MigrationError::BookkeepingTable(_) | MigrationError::LoadApplied(_) => {
                FailureKind::Bookkeeping
            }
            MigrationError::UnexpectedMigration { .. } | MigrationError::ChecksumMismatch { .. } => {
                FailureKind::Integrity
            }
            MigrationError::Begin { .. }
            | MigrationError::Statement { .. }
            | MigrationError::Record { .. }
            | MigrationError::Commit { .. } => FailureKind::Execution,
        }
    }
}
