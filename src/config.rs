/*!
 * Configuration types for clouddeck
 */

use crate::error::{DeckError, Result};
use crate::protocol::s3::recovery::RetryPolicy;
use crate::protocol::s3::{StoreOptions, TransferPlanner};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory name under the platform config dir
pub const APP_DIR: &str = "clouddeck";

/// Config file name inside [`APP_DIR`]
pub const CONFIG_FILE: &str = "config.toml";

/// Main configuration, loaded from `config.toml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DeckConfig {
    /// Logging level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Write JSON logs to this file instead of stderr
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Debug logging regardless of `log_level`
    #[serde(default)]
    pub verbose: bool,

    /// Upload strategy thresholds
    #[serde(default)]
    pub transfer: TransferPlanner,

    /// Whole-transfer retry settings
    #[serde(default)]
    pub retry: RetrySection,

    /// Transport settings
    #[serde(default)]
    pub connection: ConnectionSection,
}

/// `[retry]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySection {
    /// Total attempts per upload, including the first
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry, in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Cap on any single delay, in seconds
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,

    /// Random extra delay bound, in milliseconds
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_secs: default_max_delay_secs(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

impl RetrySection {
    /// Retry policy described by this section
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_secs(self.max_delay_secs),
            jitter: Duration::from_millis(self.jitter_ms),
        }
    }
}

/// `[connection]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSection {
    /// Per-request timeout, in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Per-request attempts made by the transport
    #[serde(default = "default_transport_attempts")]
    pub max_attempts: u32,

    /// Compute and validate payload checksums
    #[serde(default)]
    pub verify_checksums: bool,

    /// Where connection parameters are persisted
    #[serde(default)]
    pub params_file: Option<PathBuf>,
}

impl Default for ConnectionSection {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout(),
            max_attempts: default_transport_attempts(),
            verify_checksums: false,
            params_file: None,
        }
    }
}

impl ConnectionSection {
    /// Transport options described by this section
    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            request_timeout: Duration::from_secs(self.request_timeout_secs.max(1)),
            max_attempts: self.max_attempts.max(1),
            verify_checksums: self.verify_checksums,
            ..StoreOptions::default()
        }
    }
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = DeckError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(DeckError::Config(format!("Unknown log level '{}'", other))),
        }
    }
}

fn default_retry_attempts() -> u32 {
    4
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_secs() -> u64 {
    30
}

fn default_jitter_ms() -> u64 {
    1000
}

fn default_request_timeout() -> u64 {
    crate::protocol::s3::DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_transport_attempts() -> u32 {
    RetryPolicy::connection().max_attempts
}

impl DeckConfig {
    /// Default config file location: `<config_dir>/clouddeck/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents).map_err(|e| DeckError::ConfigFile {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Load `path` if given, else the default location if it exists, else defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) if !path.exists() => Err(DeckError::FileNotFound(path.to_path_buf())),
            Some(path) => Self::from_file(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self).map_err(|e| DeckError::ConfigFile {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Where connection parameters are persisted
    pub fn params_path(&self) -> Option<PathBuf> {
        self.connection
            .params_file
            .clone()
            .or_else(crate::protocol::s3::FileParamsStore::default_location)
    }
}
