//! Migration file discovery
//!
//! A migration is a file in the migrations directory. Its file name is both
//! its identity and its sort key; its checksum is the SHA-1 of the raw file
//! bytes. Files whose name starts with `.` are never considered.

use crate::MigrationError;
use sha1::{Digest, Sha1};
use std::path::{Path, PathBuf};
use tracing::debug;

/// A migration file read from disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFile {
    pub name: String,
    pub path: PathBuf,
    pub checksum: String,
    contents: Vec<u8>,
}

impl MigrationFile {
    /// Read a migration file and compute its checksum
    pub fn read(path: &Path) -> Result<Self, MigrationError> {
        let name = path
            .file_name()
            .ok_or_else(|| MigrationError::InvalidFileName(path.as_os_str().to_owned()))?
            .to_str()
            .ok_or_else(|| MigrationError::InvalidFileName(path.as_os_str().to_owned()))?
            .to_string();

        let contents = std::fs::read(path).map_err(|source| MigrationError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(Self {
            name,
            path: path.to_path_buf(),
            checksum: checksum(&contents),
            contents,
        })
    }

    /// SQL body of the migration
    pub fn sql(&self) -> Result<&str, MigrationError> {
        std::str::from_utf8(&self.contents).map_err(|_| MigrationError::Encoding {
            name: self.name.clone(),
        })
    }
}

/// Lowercase hex SHA-1 of `bytes` (40 characters)
pub fn checksum(bytes: &[u8]) -> String {
    format!("{:x}", Sha1::digest(bytes))
}

/// List the migrations in `dir`, sorted by file name ascending
///
/// Dotfiles and sub-directories are skipped.
pub fn discover(dir: &Path) -> Result<Vec<MigrationFile>, MigrationError> {
    let read_dir_error = |source: std::io::Error| MigrationError::ReadDir {
        path: dir.to_path_buf(),
        source,
    };

    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(read_dir_error)? {
        let entry = entry.map_err(read_dir_error)?;
        let file_name = entry.file_name();

        // Skip dotfiles
        if file_name.to_string_lossy().starts_with('.') {
            continue;
        }

        let name = file_name
            .to_str()
            .ok_or_else(|| MigrationError::InvalidFileName(file_name.clone()))?
            .to_string();

        let path = entry.path();
        if path.is_dir() {
            debug!("Skipping directory in migrations folder: {}", path.display());
            continue;
        }

        paths.push((name, path));
    }

    // Byte-wise order, same as SQLite's BINARY collation on the name column
    paths.sort_by(|(a, _), (b, _)| a.cmp(b));

    paths
        .iter()
        .map(|(_, path)| MigrationFile::read(path))
        .collect()
}

/// Split a migration body into individual statements
///
/// The split is purely textual: every `;` ends a statement, including one
/// inside a string literal or a procedure body. Pieces are trimmed and empty
/// pieces are dropped.
pub fn split_statements(sql: &str) -> Vec<&str> {
    sql.split(';')
        .map(str::trim)
        .filter(|statement| !statement.is_empty())
        .collect()
}
