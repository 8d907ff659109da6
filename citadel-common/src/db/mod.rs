//! Database bootstrap and schema migrations

pub mod init;
pub mod migration_files;
pub mod migrations;

pub use init::*;
pub use migration_files::*;
pub use migrations::*;
