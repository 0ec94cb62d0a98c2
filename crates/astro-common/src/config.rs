//! Astro configuration
//!
//! Configuration is a single JSON document; every field has a default so an
//! empty object (or no file at all) is a valid configuration.
//!
//! The kubeconfig resolution chain (highest priority first):
//! 1. Explicit `--kubeconfig` flag
//! 2. `ASTRO_KUBECONFIG` environment variable
//! 3. `kubeconfig` in the config file
//! 4. Fall back to kube inference (in-cluster, `KUBECONFIG`, `~/.kube/config`)

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    Error, Result, DEFAULT_FIELD_MANAGER, DEFAULT_LOG_LINES, DEFAULT_MANAGED_BY,
    DEFAULT_NAMESPACE_PREFIX,
};

/// Environment variable overriding the kubeconfig path
pub const ASTRO_KUBECONFIG_ENV: &str = "ASTRO_KUBECONFIG";

/// Default location of the JSON record store used by the CLI
pub const DEFAULT_STORE_PATH: &str = "astro-apps.json";

/// How often the log file rolls over
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    /// New file every minute
    Minutely,
    /// New file every hour
    Hourly,
    /// New file every day
    #[default]
    Daily,
    /// A single file that is never rotated
    Never,
}

/// Logging options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Emit JSON lines instead of human-readable output on the console
    pub json: bool,
    /// Filter directive used when `RUST_LOG` is unset (e.g. `debug`)
    pub level: Option<String>,
    /// Also write JSON lines to this file
    pub file: Option<PathBuf>,
    /// Rotation period for `file`
    pub rotation: LogRotation,
}

/// Top-level Astro configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AstroConfig {
    /// Kubeconfig path; `None` means infer
    pub kubeconfig: Option<PathBuf>,
    /// Prefix for per-owner namespaces
    pub namespace_prefix: String,
    /// Value of the `managed-by` label on everything Astro creates
    pub managed_by: String,
    /// Field manager used for writes against the API server
    pub field_manager: String,
    /// Path of the JSON record store
    pub store_path: PathBuf,
    /// Log lines returned when a caller does not ask for a specific count
    pub default_log_lines: i64,
    /// API server connect timeout in seconds
    pub connect_timeout_secs: u64,
    /// API server read timeout in seconds
    pub read_timeout_secs: u64,
    /// Logging options
    pub log: LogConfig,
}

impl Default for AstroConfig {
    fn default() -> Self {
        Self {
            kubeconfig: None,
            namespace_prefix: DEFAULT_NAMESPACE_PREFIX.to_string(),
            managed_by: DEFAULT_MANAGED_BY.to_string(),
            field_manager: DEFAULT_FIELD_MANAGER.to_string(),
            store_path: PathBuf::from(DEFAULT_STORE_PATH),
            default_log_lines: DEFAULT_LOG_LINES,
            connect_timeout_secs: 5,
            read_timeout_secs: 30,
            log: LogConfig::default(),
        }
    }
}

impl AstroConfig {
    /// Connect timeout as a `Duration`
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Read timeout as a `Duration`
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    /// Reject values that would produce invalid namespaces or labels
    pub fn validate(&self) -> Result<()> {
        if self.namespace_prefix.is_empty() {
            return Err(Error::config("namespace_prefix must not be empty"));
        }
        if self.managed_by.is_empty() {
            return Err(Error::config("managed_by must not be empty"));
        }
        if self.field_manager.is_empty() {
            return Err(Error::config("field_manager must not be empty"));
        }
        if self.default_log_lines <= 0 {
            return Err(Error::config("default_log_lines must be positive"));
        }
        if self.log.level.as_deref().is_some_and(|l| l.trim().is_empty()) {
            return Err(Error::config("log.level must not be empty when set"));
        }
        Ok(())
    }

    /// Resolve the kubeconfig path using the priority chain
    pub fn resolve_kubeconfig(&self, explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }

        if let Ok(path) = std::env::var(ASTRO_KUBECONFIG_ENV) {
            if !path.is_empty() {
                return Some(PathBuf::from(path));
            }
        }

        self.kubeconfig.clone()
    }
}

/// Parse and validate a JSON document read from `path`
fn parse_config(data: &str, path: &Path) -> Result<AstroConfig> {
    let config: AstroConfig = serde_json::from_str(data)
        .map_err(|e| Error::config_at(path, format!("failed to parse: {}", e)))?;
    config.validate()?;
    Ok(config)
}

/// Load configuration from a file, or defaults when `path` is `None`
pub fn load_config(path: Option<&Path>) -> Result<AstroConfig> {
    let Some(path) = path else {
        return Ok(AstroConfig::default());
    };
    let data = std::fs::read_to_string(path)
        .map_err(|e| Error::config_at(path, format!("failed to read: {}", e)))?;
    parse_config(&data, path)
}
