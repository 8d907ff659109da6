//! Database schema migrations
//!
//! Applies the SQL files of a migrations directory exactly once each, in
//! file-name order, and refuses to start if an applied migration has changed.
//!
//! # Migration Guidelines
//!
//! 1. **Never modify applied migrations** - The runner compares the SHA-1 of
//!    every applied file against the checksum recorded when it ran
//! 2. **Never delete or rename applied migrations** - Recorded names must stay
//!    a prefix of the files on disk
//! 3. **Name files so lexical order is application order** - e.g. `001_init.sql`
//! 4. **No semicolons inside statements** - Files are split on every `;`,
//!    string literals and trigger bodies included
//! 5. **Prefer `IF NOT EXISTS` DDL** - Two instances racing at startup may both
//!    execute a migration before one of them fails to record it
//!
//! # Failure policy
//!
//! Every error is fatal. A file's statements and its bookkeeping row commit
//! together or not at all; nothing is retried.

use crate::db::migration_files::{discover, split_statements, MigrationFile};
use crate::MigrationError;
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::path::Path;
use tracing::{debug, info, warn};

/// A row of the bookkeeping table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMigration {
    pub name: String,
    pub checksum: String,
}

/// Outcome of a successful [`migrate`] run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Files whose recorded checksum matched, in order
    pub verified: Vec<String>,
    /// Files applied by this run, in order
    pub applied: Vec<String>,
}

/// Bring the schema up to date with the files in `migrations_dir`
///
/// Previously applied files are verified by name and checksum; the first
/// file without a record and every file after it are applied, each in its
/// own transaction together with its bookkeeping row.
pub async fn migrate(
    pool: &SqlitePool,
    migrations_dir: &Path,
) -> Result<MigrationReport, MigrationError> {
    ensure_migrations_table(pool).await?;

    let files = discover(migrations_dir)?;
    let mut applied = load_applied(pool).await?.into_iter();

    info!(
        "Found {} migration files in {}",
        files.len(),
        migrations_dir.display()
    );

    let mut report = MigrationReport::default();
    let mut reconciling = true;

    for file in &files {
        if reconciling {
            match applied.next() {
                Some(record) => {
                    verify_applied(&record, file)?;
                    report.verified.push(file.name.clone());
                    continue;
                }
                None => reconciling = false,
            }
        }

        apply_migration(pool, file).await?;
        report.applied.push(file.name.clone());
    }

    for orphan in applied {
        warn!(
            "Applied migration {} has no file in {}",
            orphan.name,
            migrations_dir.display()
        );
    }

    if report.applied.is_empty() {
        info!(
            "Database schema is up to date ({} migrations)",
            report.verified.len()
        );
    } else {
        info!(
            "All migrations completed successfully ({} applied, {} already present)",
            report.applied.len(),
            report.verified.len()
        );
    }

    Ok(report)
}

/// Create the bookkeeping table if it does not exist
pub async fn ensure_migrations_table(pool: &SqlitePool) -> Result<(), MigrationError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS migrations (
            id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
            name VARCHAR(255) UNIQUE NOT NULL DEFAULT '',
            checksum VARCHAR(40) NOT NULL DEFAULT ''
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(MigrationError::BookkeepingTable)?;

    Ok(())
}

/// Recorded migrations ordered by name ascending
pub async fn load_applied(pool: &SqlitePool) -> Result<Vec<AppliedMigration>, MigrationError> {
    let rows: Vec<(String, String)> = sqlx::query_as(
        r#"
        SELECT
            name,
            checksum
        FROM migrations
        ORDER BY
            name ASC
        "#,
    )
    .fetch_all(pool)
    .await
    .map_err(MigrationError::LoadApplied)?;

    Ok(rows
        .into_iter()
        .map(|(name, checksum)| AppliedMigration { name, checksum })
        .collect())
}

fn verify_applied(record: &AppliedMigration, file: &MigrationFile) -> Result<(), MigrationError> {
    if record.name != file.name {
        return Err(MigrationError::UnexpectedMigration {
            found: file.name.clone(),
            expected: record.name.clone(),
        });
    }

    if record.checksum != file.checksum {
        return Err(MigrationError::ChecksumMismatch {
            name: record.name.clone(),
            recorded: record.checksum.clone(),
            actual: file.checksum.clone(),
        });
    }

    debug!("Migration {} already applied ({})", file.name, file.checksum);
    Ok(())
}

/// Execute one migration file and record it, atomically
pub async fn apply_migration(pool: &SqlitePool, file: &MigrationFile) -> Result<(), MigrationError> {
    let sql = file.sql()?;
    info!("Running migration: {}", file.name);

    let mut tx = pool.begin().await.map_err(|source| MigrationError::Begin {
        name: file.name.clone(),
        source,
    })?;

    for statement in split_statements(sql) {
        debug!("{}", statement);
        if let Err(source) = sqlx::query(statement)
            .persistent(false)
            .execute(&mut *tx)
            .await
        {
            rollback(tx, &file.name).await;
            return Err(MigrationError::Statement {
                name: file.name.clone(),
                statement: statement.to_string(),
                source,
            });
        }
    }

    info!("Writing checksum: {} for migration: {}", file.checksum, file.name);
    if let Err(source) = sqlx::query("INSERT INTO migrations (name, checksum) VALUES (?, ?)")
        .bind(&file.name)
        .bind(&file.checksum)
        .execute(&mut *tx)
        .await
    {
        rollback(tx, &file.name).await;
        return Err(MigrationError::Record {
            name: file.name.clone(),
            source,
        });
    }

    tx.commit().await.map_err(|source| MigrationError::Commit {
        name: file.name.clone(),
        source,
    })?;

    info!("✓ Migration {} completed", file.name);
    Ok(())
}

async fn rollback(tx: Transaction<'_, Sqlite>, name: &str) {
    if let Err(e) = tx.rollback().await {
        warn!("Rollback of migration {} failed: {}", name, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_test_db() -> SqlitePool {
        // One connection: every in-memory connection is a separate database
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    fn migration(name: &str, sql: &str) -> (tempfile::TempDir, MigrationFile) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(name);
        std::fs::write(&path, sql).unwrap();
        let file = MigrationFile::read(&path).unwrap();
        (dir, file)
    }

    #[tokio::test]
    async fn test_ensure_migrations_table_idempotent() {
        let pool = setup_test_db().await;

        ensure_migrations_table(&pool).await.unwrap();
        ensure_migrations_table(&pool).await.unwrap();

        let table_exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='migrations')",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert!(table_exists);
        assert!(load_applied(&pool).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_load_applied_ordered_by_name() {
        let pool = setup_test_db().await;
        ensure_migrations_table(&pool).await.unwrap();

        for name in ["002_b.sql", "010_c.sql", "001_a.sql"] {
            sqlx::query("INSERT INTO migrations (name, checksum) VALUES (?, ?)")
                .bind(name)
                .bind("0".repeat(40))
                .execute(&pool)
                .await
                .unwrap();
        }

        let names: Vec<String> = load_applied(&pool)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.name)
            .collect();
        assert_eq!(names, vec!["001_a.sql", "002_b.sql", "010_c.sql"]);
    }

    #[tokio::test]
    async fn test_load_applied_without_table_fails() {
        let pool = setup_test_db().await;
        let err = load_applied(&pool).await.unwrap_err();
        assert!(matches!(err, MigrationError::LoadApplied(_)));
    }

    #[tokio::test]
    async fn test_apply_migration_records_checksum() {
        let pool = setup_test_db().await;
        ensure_migrations_table(&pool).await.unwrap();
        let (_dir, file) = migration(
            "001_init.sql",
            "CREATE TABLE artists (id INTEGER PRIMARY KEY, name TEXT NOT NULL);\n\
             INSERT INTO artists (name) VALUES ('Nina Simone');\n",
        );

        apply_migration(&pool, &file).await.unwrap();

        let applied = load_applied(&pool).await.unwrap();
        assert_eq!(
            applied,
            vec![AppliedMigration {
                name: "001_init.sql".to_string(),
                checksum: file.checksum.clone(),
            }]
        );

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM artists")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_apply_migration_rolls_back_on_failed_statement() {
        let pool = setup_test_db().await;
        ensure_migrations_table(&pool).await.unwrap();
        let (_dir, file) = migration(
            "001_broken.sql",
            "CREATE TABLE albums (id INTEGER PRIMARY KEY);\n\
             INSERT INTO missing_table VALUES (1);\n\
             CREATE TABLE tracks (id INTEGER PRIMARY KEY);\n",
        );

        let err = apply_migration(&pool, &file).await.unwrap_err();
        match err {
            MigrationError::Statement { name, statement, .. } => {
                assert_eq!(name, "001_broken.sql");
                assert_eq!(statement, "INSERT INTO missing_table VALUES (1)");
            }
            other => panic!("Expected statement error, got {:?}", other),
        }

        let albums_exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='albums')",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert!(!albums_exists, "First statement must not be committed");
        assert!(load_applied(&pool).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_apply_migration_duplicate_record_fails() {
        let pool = setup_test_db().await;
        ensure_migrations_table(&pool).await.unwrap();
        let (_dir, file) = migration(
            "001_init.sql",
            "CREATE TABLE IF NOT EXISTS artists (id INTEGER PRIMARY KEY);",
        );

        apply_migration(&pool, &file).await.unwrap();

        // A concurrent runner that lost the race fails on the unique name
        let err = apply_migration(&pool, &file).await.unwrap_err();
        assert!(matches!(err, MigrationError::Record { .. }));
        assert_eq!(load_applied(&pool).await.unwrap().len(), 1);
    }

    #[test]
    fn test_verify_applied_checks_name_then_checksum() {
        let (_dir, file) = migration("002_seed.sql", "SELECT 1;");

        let wrong_name = AppliedMigration {
            name: "001_init.sql".to_string(),
            checksum: file.checksum.clone(),
        };
        assert!(matches!(
            verify_applied(&wrong_name, &file),
            Err(MigrationError::UnexpectedMigration { .. })
        ));

        let wrong_checksum = AppliedMigration {
            name: "002_seed.sql".to_string(),
            checksum: "0".repeat(40),
        };
        assert!(matches!(
            verify_applied(&wrong_checksum, &file),
            Err(MigrationError::ChecksumMismatch { .. })
        ));

        let matching = AppliedMigration {
            name: "002_seed.sql".to_string(),
            checksum: file.checksum.clone(),
        };
        assert!(verify_applied(&matching, &file).is_ok());
    }
}
