//! Configuration resolution for tawo-match
//!
//! Each setting resolves as: command line / environment (merged by clap) →
//! TOML file → built-in default.

use std::path::{Path, PathBuf};
use std::time::Duration;
use tawo_common::config::{resolve_root_folder, TomlConfig};

use crate::db::DATABASE_FILE;
use crate::services::gaeb_upload::{DEFAULT_UPLOAD_TIMEOUT_SECS, DEFAULT_UPLOAD_URL};
use crate::services::matching_client::{DEFAULT_MATCHING_TIMEOUT_SECS, DEFAULT_MATCHING_URL};
use crate::services::selection::DEFAULT_WRONG_REASON;

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 5730;

/// Values supplied on the command line or via `TAWO_*` variables
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub root_folder: Option<PathBuf>,
    pub port: Option<u16>,
    pub upload_url: Option<String>,
    pub matching_url: Option<String>,
    pub feedback_url: Option<String>,
    pub row_timeout_secs: Option<u64>,
}

/// Fully resolved service configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub root_folder: PathBuf,
    pub port: u16,
    pub log_level: String,
    pub upload_url: String,
    pub matching_url: String,
    pub feedback_url: Option<String>,
    pub row_timeout: Duration,
    pub upload_timeout: Duration,
    pub default_wrong_reason: String,
}

impl ServiceConfig {
    pub fn resolve(cli: &CliOverrides, toml: &TomlConfig) -> Self {
        let root_folder = resolve_root_folder(cli.root_folder.as_deref(), toml);

        let row_timeout_secs = cli
            .row_timeout_secs
            .or(toml.row_timeout_secs)
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_MATCHING_TIMEOUT_SECS);
        let upload_timeout_secs = toml
            .upload_timeout_secs
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_UPLOAD_TIMEOUT_SECS);

        Self {
            root_folder,
            port: cli.port.or(toml.port).unwrap_or(DEFAULT_PORT),
            log_level: toml.logging.level.clone(),
            upload_url: pick(&cli.upload_url, &toml.upload_url).unwrap_or_else(|| DEFAULT_UPLOAD_URL.to_string()),
            matching_url: pick(&cli.matching_url, &toml.matching_url)
                .unwrap_or_else(|| DEFAULT_MATCHING_URL.to_string()),
            feedback_url: pick(&cli.feedback_url, &toml.feedback_url),
            row_timeout: Duration::from_secs(row_timeout_secs),
            upload_timeout: Duration::from_secs(upload_timeout_secs),
            default_wrong_reason: toml
                .default_wrong_reason
                .clone()
                .filter(|r| !r.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_WRONG_REASON.to_string()),
        }
    }

    pub fn database_path(&self) -> PathBuf {
        database_path(&self.root_folder)
    }
}

/// `<root>/tawo.db`
pub fn database_path(root_folder: &Path) -> PathBuf {
    root_folder.join(DATABASE_FILE)
}

/// First non-blank value of CLI then TOML
fn pick(cli: &Option<String>, toml: &Option<String>) -> Option<String> {
    cli.iter()
        .chain(toml.iter())
        .map(|v| v.trim())
        .find(|v| !v.is_empty())
        .map(str::to_string)
}
