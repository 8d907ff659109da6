//! Configuration loading
//!
//! Each setting is resolved independently, highest priority first:
//! 1. Command-line argument
//! 2. Environment variable
//! 3. TOML config file
//! 4. OS-dependent compiled default

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const ENV_DATABASE_PATH: &str = "DB_PATH";
pub const ENV_MIGRATIONS_PATH: &str = "MIGRATIONS";
pub const ENV_BUSY_TIMEOUT_MS: &str = "DB_BUSY_TIMEOUT_MS";

/// Resolved service configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub database_path: PathBuf,
    pub migrations_path: PathBuf,
    pub busy_timeout_ms: u64,
}

/// Contents of `config.toml`; every key is optional
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct TomlConfig {
    pub database_path: Option<PathBuf>,
    pub migrations_path: Option<PathBuf>,
    pub busy_timeout_ms: Option<u64>,
}

/// Values given on the command line
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub database_path: Option<PathBuf>,
    pub migrations_path: Option<PathBuf>,
    pub busy_timeout_ms: Option<u64>,
    /// Explicit config file; when unset the platform locations are searched
    pub config_file: Option<PathBuf>,
}

/// Fallback values when nothing else is configured
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub database_path: PathBuf,
    pub migrations_path: PathBuf,
    pub busy_timeout_ms: u64,
}

impl CompiledDefaults {
    pub fn for_current_platform() -> Self {
        let database_path = dirs::data_local_dir()
            .map(|d| d.join("citadel"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/citadel"))
            .join("citadel.db");

        Self {
            database_path,
            migrations_path: PathBuf::from("/var/migrations"),
            busy_timeout_ms: 5000,
        }
    }
}

/// Resolves [`Config`] from CLI, environment, config file and defaults
pub struct ConfigResolver {
    cli: CliOverrides,
    defaults: CompiledDefaults,
}

impl ConfigResolver {
    pub fn new(cli: CliOverrides) -> Self {
        Self {
            cli,
            defaults: CompiledDefaults::for_current_platform(),
        }
    }

    pub fn resolve(&self) -> Result<Config> {
        let file = self.load_toml()?;

        let database_path = self
            .cli
            .database_path
            .clone()
            .or_else(|| env_path(ENV_DATABASE_PATH))
            .or(file.database_path)
            .unwrap_or_else(|| self.defaults.database_path.clone());

        let migrations_path = self
            .cli
            .migrations_path
            .clone()
            .or_else(|| env_path(ENV_MIGRATIONS_PATH))
            .or(file.migrations_path)
            .unwrap_or_else(|| self.defaults.migrations_path.clone());

        let busy_timeout_ms = self
            .cli
            .busy_timeout_ms
            .or_else(|| env_u64(ENV_BUSY_TIMEOUT_MS))
            .or(file.busy_timeout_ms)
            .unwrap_or(self.defaults.busy_timeout_ms);

        Ok(Config {
            database_path,
            migrations_path,
            busy_timeout_ms,
        })
    }

    fn load_toml(&self) -> Result<TomlConfig> {
        // An explicitly requested file must exist and parse
        if let Some(path) = &self.cli.config_file {
            return read_toml(path);
        }

        match default_config_file() {
            Some(path) => read_toml(&path),
            None => {
                debug!("No config file found, using environment and defaults");
                Ok(TomlConfig::default())
            }
        }
    }
}

/// Parse a TOML config file
pub fn read_toml(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Unable to read {}: {}", path.display(), e)))?;

    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Invalid config file {}: {}", path.display(), e)))
}

/// First existing config file: `~/.config/citadel/config.toml`, then
/// `/etc/citadel/config.toml`
fn default_config_file() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("citadel").join("config.toml"));
    let system_config = PathBuf::from("/etc/citadel/config.toml");

    user_config
        .into_iter()
        .chain(std::iter::once(system_config))
        .find(|path| path.exists())
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var_os(key).map(PathBuf::from)
}

fn env_u64(key: &str) -> Option<u64> {
    let value = std::env::var(key).ok()?;
    match value.trim().parse::<u64>() {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            warn!("Unable to parse {}={:?} as an integer, ignoring: {}", key, value, e);
            None
        }
    }
}
