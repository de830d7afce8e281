//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/citelib/config.toml)
//! 3. Environment variables (CITELIB_* prefix)
//!
//! Environment variables take precedence over config file values.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::merge::MergeStrategy;
use crate::parse::DatabaseFormat;

/// Environment variable prefix
const ENV_PREFIX: &str = "CITELIB";

/// How a database file is reached
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    /// Read directly from the filesystem
    #[default]
    LocalFile,
    /// Read through the vault, path relative to `vault_dir`
    VaultFile,
}

/// One configured bibliography database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Name used in composite keys (`citekey@name`)
    pub name: String,
    pub path: PathBuf,
    pub format: DatabaseFormat,
    #[serde(default)]
    pub kind: SourceKind,
}

impl DatabaseConfig {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, format: DatabaseFormat) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            format,
            kind: SourceKind::LocalFile,
        }
    }
}

/// Load orchestration timings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Budget for all sources of one load, in milliseconds
    pub load_timeout_ms: u64,
    /// Quiet period before a file change triggers a reload
    pub watch_debounce_ms: u64,
    /// First retry delay after a failed load; doubles per attempt
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// Retries after which the error is left in place
    pub max_retries: u32,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            load_timeout_ms: 10_000,
            watch_debounce_ms: 1_000,
            retry_base_delay_ms: 1_000,
            retry_max_delay_ms: 30_000,
            max_retries: 5,
        }
    }
}

impl LoaderConfig {
    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }

    pub fn watch_debounce(&self) -> Duration {
        Duration::from_millis(self.watch_debounce_ms)
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        let delay = self.retry_base_delay_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.retry_max_delay_ms))
    }
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Root for relative database paths and for vault-file databases
    #[serde(default)]
    pub vault_dir: Option<PathBuf>,

    /// Databases in load order
    #[serde(default)]
    pub databases: Vec<DatabaseConfig>,

    #[serde(default)]
    pub merge_strategy: MergeStrategy,

    /// Default log level for the CLI (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub loader: LoaderConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            vault_dir: None,
            databases: Vec::new(),
            merge_strategy: MergeStrategy::default(),
            log_level: default_log_level(),
            loader: LoaderConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (CITELIB_VAULT_DIR, CITELIB_MERGE_STRATEGY, ...)
    /// 2. Config file (~/.config/citelib/config.toml or CITELIB_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<()> {
        // CITELIB_VAULT_DIR
        if let Ok(val) = std::env::var(format!("{}_VAULT_DIR", ENV_PREFIX)) {
            self.vault_dir = if val.is_empty() {
                None
            } else {
                Some(PathBuf::from(val))
            };
        }

        // CITELIB_MERGE_STRATEGY
        if let Ok(val) = std::env::var(format!("{}_MERGE_STRATEGY", ENV_PREFIX)) {
            self.merge_strategy = val
                .parse()
                .map_err(anyhow::Error::msg)
                .with_context(|| format!("Invalid {}_MERGE_STRATEGY", ENV_PREFIX))?;
        }

        // CITELIB_LOAD_TIMEOUT_MS
        if let Ok(val) = std::env::var(format!("{}_LOAD_TIMEOUT_MS", ENV_PREFIX)) {
            self.loader.load_timeout_ms = val
                .trim()
                .parse()
                .with_context(|| format!("Invalid {}_LOAD_TIMEOUT_MS: {:?}", ENV_PREFIX, val))?;
        }

        // CITELIB_LOG_LEVEL
        if let Ok(val) = std::env::var(format!("{}_LOG_LEVEL", ENV_PREFIX)) {
            if !val.is_empty() {
                self.log_level = val;
            }
        }

        Ok(())
    }

    /// Reject configurations the loader cannot reconcile
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for db in &self.databases {
            if db.name.trim().is_empty() {
                bail!("Database with path {:?} has an empty name", db.path);
            }
            if !seen.insert(db.name.as_str()) {
                bail!("Duplicate database name: {}", db.name);
            }
        }
        if self.loader.load_timeout_ms == 0 {
            bail!("loader.load_timeout_ms must be greater than zero");
        }
        Ok(())
    }

    /// Save configuration to the default config file
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file_path())
    }

    /// Save configuration to a specific file
    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with CITELIB_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("citelib")
            .join("config.toml")
    }

    /// Resolve a local-file database path
    ///
    /// `~/` expands to the home directory; other relative paths are taken
    /// from `vault_dir`, or the working directory when none is set.
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        let path = expand_home(path);
        if path.is_absolute() {
            return path;
        }
        match &self.vault_dir {
            Some(root) => expand_home(root).join(path),
            None => std::env::current_dir()
                .map(|cwd| cwd.join(&path))
                .unwrap_or(path),
        }
    }

    /// The vault root, with `~/` expanded
    pub fn vault_root(&self) -> Option<PathBuf> {
        self.vault_dir.as_deref().map(expand_home)
    }
}

/// Expand a leading `~/` to the home directory
pub fn expand_home(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

fn default_log_level() -> String {
    "warn".to_string()
}
