//! Configuration loading and root folder resolution
//!
//! Bootstrap configuration comes from a TOML file. Every setting can be
//! overridden per process: command-line argument → environment variable →
//! TOML file → built-in default. The command-line and environment tiers are
//! resolved by the binary (clap `env` fallbacks); this module covers the TOML
//! and default tiers.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Bootstrap configuration loaded from TOML
///
/// Settings cannot change during runtime; the service must restart to pick
/// up changes.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct TomlConfig {
    /// Folder holding the SQLite database
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    /// HTTP server port
    #[serde(default)]
    pub port: Option<u16>,

    /// Logging configuration (optional)
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Conversion webhook (GAEB → rows)
    #[serde(default)]
    pub upload_url: Option<String>,

    /// Matching webhook (one request per line item)
    #[serde(default)]
    pub matching_url: Option<String>,

    /// Correction-feedback webhook
    #[serde(default)]
    pub feedback_url: Option<String>,

    /// Per-row matching timeout in seconds
    #[serde(default)]
    pub row_timeout_secs: Option<u64>,

    /// Upload forwarding timeout in seconds
    #[serde(default)]
    pub upload_timeout_secs: Option<u64>,

    /// Reason seeded when a non-top candidate is selected
    #[serde(default)]
    pub default_wrong_reason: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Load a TOML config file
///
/// A missing file yields the defaults; an unreadable or malformed file is an
/// error.
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "No TOML config file, using defaults");
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read TOML failed: {}", e)))?;
    toml::from_str(&content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
}

/// Default TOML config path for a module (`~/.config/tawo/<module>.toml`)
pub fn default_config_path(module_name: &str) -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tawo")
        .join(format!("{}.toml", module_name))
}

/// Root folder resolution:
/// 1. Command-line argument / environment (already merged by clap)
/// 2. TOML config file
/// 3. OS-dependent compiled default (fallback)
pub fn resolve_root_folder(cli_or_env: Option<&Path>, toml_config: &TomlConfig) -> PathBuf {
    if let Some(path) = cli_or_env {
        return path.to_path_buf();
    }

    if let Some(path) = &toml_config.root_folder {
        return path.clone();
    }

    default_root_folder()
}

/// OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("tawo"))
        .unwrap_or_else(|| PathBuf::from("./tawo_data"))
}
