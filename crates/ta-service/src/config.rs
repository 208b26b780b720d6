//! Service configuration, loaded from a TOML file.
//!
//! The file path comes from the `TA_CONFIG` environment variable and falls
//! back to `ta.toml` in the working directory. A missing file is not an
//! error: the service starts with defaults. A file that exists but cannot
//! be read or parsed is a hard startup failure.

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "TA_CONFIG";

/// Fallback config path when [`CONFIG_ENV`] is unset.
pub const DEFAULT_CONFIG_PATH: &str = "ta.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// What the service does after a fatal fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Terminate the process immediately without unwinding.
    Abort,
    /// Log the fault and exit with a nonzero status.
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Directory under which session directories are created.
    #[serde(default = "default_data_root")]
    pub data_root: PathBuf,

    /// Reaction to a fatal fault in the service loop.
    #[serde(default = "default_failure_policy")]
    pub failure_policy: FailurePolicy,

    /// Default log filter, overridable via `RUST_LOG`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_data_root() -> PathBuf {
    PathBuf::from("./data")
}

fn default_failure_policy() -> FailurePolicy {
    FailurePolicy::Abort
}

fn default_log_level() -> String {
    "info".to_owned()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_root: default_data_root(),
            failure_policy: default_failure_policy(),
            log_level: default_log_level(),
        }
    }
}

/// Loads the config from `path`. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            info!(path = %path.display(), "no config file, using defaults");
            return Ok(Config::default());
        }
        Err(e) => {
            return Err(ConfigError::Read {
                path: path.to_owned(),
                source: e,
            })
        }
    };
    toml::from_str(&raw).map_err(|e| ConfigError::Parse {
        path: path.to_owned(),
        source: e,
    })
}

/// Resolves the config path from the environment and loads it.
pub fn load_from_env() -> Result<Config, ConfigError> {
    let path = env::var_os(CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    load_config(&path)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
