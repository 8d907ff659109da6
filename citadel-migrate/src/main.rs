//! citadel-migrate - Startup schema migration for the Citadel intranet
//!
//! Brings the catalog database up to date with the migrations directory and
//! exits. Any migration failure stops the process with exit status 1; the
//! service must not be started against a database whose history diverges
//! from the files on disk.

use anyhow::Result;
use citadel_common::config::{CliOverrides, ConfigResolver};
use citadel_common::db::{connect, migrate};
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "citadel-migrate", version, about = "Apply pending SQL migrations")]
struct Args {
    /// SQLite database file (env: DB_PATH)
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Directory of migration files (env: MIGRATIONS)
    #[arg(long)]
    migrations: Option<PathBuf>,

    /// SQLite busy timeout in milliseconds (env: DB_BUSY_TIMEOUT_MS)
    #[arg(long)]
    busy_timeout_ms: Option<u64>,

    /// TOML config file (default: ~/.config/citadel/config.toml, /etc/citadel/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,
}

impl From<Args> for CliOverrides {
    fn from(args: Args) -> Self {
        CliOverrides {
            database_path: args.db_path,
            migrations_path: args.migrations,
            busy_timeout_ms: args.busy_timeout_ms,
            config_file: args.config,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!(
        "Starting citadel-migrate v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let args = Args::parse();
    let config = ConfigResolver::new(args.into()).resolve()?;
    info!("Database path: {}", config.database_path.display());
    info!("Migrations path: {}", config.migrations_path.display());

    let pool = connect(&config.database_path, config.busy_timeout_ms).await?;

    match migrate(&pool, &config.migrations_path).await {
        Ok(report) => {
            info!(
                "✓ Schema ready: {} applied, {} verified",
                report.applied.len(),
                report.verified.len()
            );
        }
        Err(e) => {
            error!(kind = ?e.kind(), "Migration failed: {}", e);
            pool.close().await;
            std::process::exit(1);
        }
    }

    pool.close().await;
    Ok(())
}
