//! Bootstrap configuration loading and root folder resolution
//!
//! Every service reads the same TOML file; each service only looks at its own
//! section plus `[logging]`. All fields have built-in defaults, so a missing
//! file or a missing section is never fatal.
//!
//! Config file path priority:
//! 1. Command-line argument (`--config`)
//! 2. `CSP_CONFIG` environment variable
//! 3. `<platform config dir>/csp/config.toml`
//! 4. Built-in defaults (no file)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "CSP_CONFIG";

/// Environment variable overriding the data root folder
pub const ROOT_FOLDER_ENV_VAR: &str = "CSP_ROOT_FOLDER";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct TomlConfig {
    /// Data root folder (store root and database live beneath it unless overridden)
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub tracker: TrackerConfig,

    #[serde(default)]
    pub reports: ReportsConfig,

    #[serde(default)]
    pub analysis: AnalysisConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
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

/// Submission tracker service and client settings
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TrackerConfig {
    #[serde(default = "default_tracker_port")]
    pub port: u16,

    /// SQLite database file; defaults to `<root>/csp-tracker.db`
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Base URL clients use to reach the tracker backend
    #[serde(default = "default_tracker_base_url")]
    pub base_url: String,

    /// Upper bound on a best-effort abandon call
    #[serde(default = "default_abandon_timeout_ms")]
    pub abandon_timeout_ms: u64,

    /// Timeout for start/complete calls
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            port: default_tracker_port(),
            database_path: None,
            base_url: default_tracker_base_url(),
            abandon_timeout_ms: default_abandon_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

/// Report service settings
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ReportsConfig {
    #[serde(default = "default_reports_port")]
    pub port: u16,

    /// Object store directory; defaults to `<root>/store`
    #[serde(default)]
    pub store_root: Option<PathBuf>,

    /// Maximum in-flight object fetches during a listing
    #[serde(default = "default_listing_concurrency")]
    pub listing_concurrency: usize,

    /// Dashboard listing cache lifetime (0 disables the cache)
    #[serde(default = "default_listing_cache_ttl_secs")]
    pub listing_cache_ttl_secs: u64,
}

impl Default for ReportsConfig {
    fn default() -> Self {
        Self {
            port: default_reports_port(),
            store_root: None,
            listing_concurrency: default_listing_concurrency(),
            listing_cache_ttl_secs: default_listing_cache_ttl_secs(),
        }
    }
}

/// External analysis service settings
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct AnalysisConfig {
    /// Analysis endpoint; enrichment is disabled when unset
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default = "default_analysis_timeout_ms")]
    pub timeout_ms: u64,

    /// Read-modify-write attempts before a merge gives up on conflicts
    #[serde(default = "default_merge_max_attempts")]
    pub merge_max_attempts: u32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_ms: default_analysis_timeout_ms(),
            merge_max_attempts: default_merge_max_attempts(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_tracker_port() -> u16 {
    5741
}

fn default_tracker_base_url() -> String {
    "http://127.0.0.1:5741".to_string()
}

fn default_abandon_timeout_ms() -> u64 {
    2_000
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_reports_port() -> u16 {
    5742
}

fn default_listing_concurrency() -> usize {
    8
}

fn default_listing_cache_ttl_secs() -> u64 {
    30
}

fn default_analysis_timeout_ms() -> u64 {
    60_000
}

fn default_merge_max_attempts() -> u32 {
    3
}

/// Resolve which config file to read, if any
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Platform config directory
    dirs::config_dir()
        .map(|d| d.join("csp").join("config.toml"))
        .filter(|p| p.exists())
}

/// Load bootstrap configuration
///
/// A missing file yields defaults with a warning. A file that exists but does
/// not parse is a configuration error.
pub fn load_toml_config(path: Option<&Path>) -> Result<TomlConfig> {
    let Some(path) = path else {
        info!("No config file found, using built-in defaults");
        return Ok(TomlConfig::default());
    };

    if !path.exists() {
        warn!(path = %path.display(), "Config file not found, using built-in defaults");
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;

    info!(path = %path.display(), "Loaded config file");
    Ok(config)
}

/// Root folder resolution:
/// 1. Command-line argument (highest priority)
/// 2. `CSP_ROOT_FOLDER` environment variable
/// 3. TOML `root_folder`
/// 4. OS-dependent default
pub fn resolve_root_folder(cli_arg: Option<&Path>, config: &TomlConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(ROOT_FOLDER_ENV_VAR) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = &config.root_folder {
        return path.clone();
    }

    default_root_folder()
}

/// OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("csp"))
        .unwrap_or_else(|| PathBuf::from("./csp_data"))
}
