//! Configuration loading and typed config structures for the playtime service.
//!
//! The configuration lives in `playtime-config.yaml` in the working directory,
//! or at the path named by `PLAYTIME_CONFIG`. Every field has a default, so an
//! absent file or an empty document yields a working setup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::info;

/// Default config file name, relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "playtime-config.yaml";

/// Environment variable naming an alternative config file.
pub const CONFIG_PATH_ENV: &str = "PLAYTIME_CONFIG";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level service configuration.
///
/// Mirrors the structure of `playtime-config.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ServiceConfig {
    /// HTTP query API binding.
    #[serde(default)]
    pub server: HttpConfig,

    /// Snapshot file settings.
    #[serde(default)]
    pub snapshot: SnapshotConfig,

    /// Event source settings.
    #[serde(default)]
    pub events: EventsConfig,

    /// Shutdown behaviour.
    #[serde(default)]
    pub shutdown: ShutdownConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ServiceConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// Environment overrides are applied after parsing:
    /// - `PLAYTIME_SNAPSHOT_PATH` overrides `snapshot.path`
    /// - `PLAYTIME_LOG_PATH` overrides `events.log_path`
    /// - `PLAYTIME_PORT` overrides `server.port`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config = Self::parse(&contents)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a YAML string. No overrides are applied.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        // An empty document deserializes to unit, not to a map.
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yml::from_str(yaml)?)
    }

    /// Resolve and load the configuration.
    ///
    /// Uses `explicit` when given, else `PLAYTIME_CONFIG`, else
    /// [`DEFAULT_CONFIG_FILE`]. A missing file means defaults plus
    /// environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file exists but cannot be read or
    /// parsed.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = explicit.map_or_else(
            || {
                std::env::var_os(CONFIG_PATH_ENV)
                    .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from)
            },
            Path::to_path_buf,
        );

        if path.exists() {
            info!(path = %path.display(), "loading config file");
            Self::from_file(&path)
        } else {
            info!(path = %path.display(), "config file not found, using defaults");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Override values from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Override values from `lookup`, which maps a variable name to its
    /// value. Unparseable port values are ignored.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("PLAYTIME_SNAPSHOT_PATH") {
            self.snapshot.path = PathBuf::from(val);
        }
        if let Some(val) = lookup("PLAYTIME_LOG_PATH") {
            self.events.log_path = PathBuf::from(val);
        }
        if let Some(port) = lookup("PLAYTIME_PORT").and_then(|val| val.parse().ok()) {
            self.server.port = port;
        }
    }
}

/// HTTP query API binding.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HttpConfig {
    /// Address to bind.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Snapshot file settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SnapshotConfig {
    /// Snapshot file path.
    #[serde(default = "default_snapshot_path")]
    pub path: PathBuf,

    /// Seconds between periodic saves. `0` disables autosave.
    #[serde(default)]
    pub autosave_interval_secs: u64,
}

impl SnapshotConfig {
    /// The autosave interval, or `None` when disabled.
    pub const fn autosave_interval(&self) -> Option<Duration> {
        if self.autosave_interval_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.autosave_interval_secs))
        }
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            path: default_snapshot_path(),
            autosave_interval_secs: 0,
        }
    }
}

/// Where presence lines are read from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSourceKind {
    /// Tail the file at `events.log_path`.
    #[default]
    File,
    /// Follow the systemd journal of `events.unit` for the current boot.
    Journal,
}

/// Event source settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EventsConfig {
    /// Which source to read.
    #[serde(default)]
    pub source: EventSourceKind,

    /// Game server log file to tail when `source` is `file`.
    #[serde(default = "default_log_path")]
    pub log_path: PathBuf,

    /// systemd unit whose journal is read when `source` is `journal`.
    #[serde(default = "default_unit")]
    pub unit: String,

    /// Seconds between polls.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Skip existing log content on first start.
    #[serde(default = "default_true")]
    pub start_at_end: bool,
}

impl EventsConfig {
    /// The poll interval, never shorter than one second.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            source: EventSourceKind::default(),
            log_path: default_log_path(),
            unit: default_unit(),
            poll_interval_secs: default_poll_interval_secs(),
            start_at_end: true,
        }
    }
}

/// Shutdown behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ShutdownConfig {
    /// Upper bound on waiting for background tasks before saving.
    #[serde(default = "default_join_timeout_secs")]
    pub join_timeout_secs: u64,
}

impl ShutdownConfig {
    /// The join timeout as a [`Duration`].
    pub const fn join_timeout(&self) -> Duration {
        Duration::from_secs(self.join_timeout_secs)
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            join_timeout_secs: default_join_timeout_secs(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins.
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

fn default_host() -> String {
    "0.0.0.0".to_owned()
}

const fn default_port() -> u16 {
    5000
}

fn default_snapshot_path() -> PathBuf {
    PathBuf::from("stats.json")
}

fn default_log_path() -> PathBuf {
    PathBuf::from("valheim-server.log")
}

fn default_unit() -> String {
    "valheim-server.service".to_owned()
}

const fn default_poll_interval_secs() -> u64 {
    60
}

const fn default_true() -> bool {
    true
}

const fn default_join_timeout_secs() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_owned()
}
