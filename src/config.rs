//! Configuration file parser for ~/.config/keepsake/config.toml.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are accepted by serde but logged as warnings, since they are
//! usually typos.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::storage::DatabaseOptions;

/// Environment variable that overrides `database_path`
pub const DATABASE_ENV_VAR: &str = "KEEPSAKE_DB";

/// File name of the database inside the config directory when no path is set
pub const DEFAULT_DATABASE_FILE: &str = "keepsake.db";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

// ============================================================================
// Configuration
// ============================================================================

/// Top-level configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database file. Defaults to `keepsake.db` in the config directory.
    pub database_path: Option<PathBuf>,

    /// Size of the connection pool.
    pub max_connections: u32,

    /// How long a writer waits on a locked database before failing.
    pub busy_timeout_ms: u64,

    /// Refuse to create users once at least one exists.
    pub disable_signups: bool,

    /// Largest asset accepted, in megabytes. 0 = unlimited.
    pub max_asset_size_mb: u64,

    /// Icon for lists created without one.
    pub default_list_icon: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: None,
            max_connections: 5,
            busy_timeout_ms: 5000,
            disable_signups: false,
            max_asset_size_mb: 50,
            default_list_icon: "📚".to_string(),
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 6] = [
        "database_path",
        "max_connections",
        "busy_timeout_ms",
        "disable_signups",
        "max_asset_size_mb",
        "default_list_icon",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing, empty or whitespace-only file → `Ok(Config::default())`
    /// - Invalid TOML or wrong value types → `Err(ConfigError::Parse)`
    /// - Out-of-range values → `Err(ConfigError::Invalid)`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check the size before reading so a huge file is never loaded
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        let config = Self::parse(&content)?;
        tracing::info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Parse configuration from TOML text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "max_connections must be at least 1".to_string(),
            ));
        }
        if self.default_list_icon.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "default_list_icon cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Where the database lives.
    ///
    /// Precedence: `env_override` (the value of `KEEPSAKE_DB`), then
    /// `database_path`, then `keepsake.db` inside `config_dir`.
    pub fn resolve_database_path(&self, config_dir: &Path, env_override: Option<String>) -> PathBuf {
        env_override
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from)
            .or_else(|| self.database_path.clone())
            .unwrap_or_else(|| config_dir.join(DEFAULT_DATABASE_FILE))
    }

    /// Storage options derived from this configuration.
    pub fn database_options(&self) -> DatabaseOptions {
        let max_asset_bytes = match self.max_asset_size_mb {
            0 => None,
            mb => Some(i64::try_from(mb.saturating_mul(1024 * 1024)).unwrap_or(i64::MAX)),
        };
        DatabaseOptions {
            max_connections: self.max_connections,
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
            max_asset_bytes,
            default_list_icon: self.default_list_icon.clone(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
