//! Configuration management
//!
//! Config is read from `config.toml` (next to the executable, or the
//! working directory, or an explicit `--config` path), then overlaid with
//! environment variables and CLI flags.
//!
//! The log file to stream is resolved from three ordered sources; the first
//! one with text wins. When none is set the stream endpoint is disabled.

use crate::constants::{
    DEFAULT_BASE_PATH, DEFAULT_BIND_ADDRESS, DEFAULT_HTTP_PORT, DEFAULT_KEEP_ALIVE_SECS,
    DEFAULT_LOG_FILE_NAME, DEFAULT_MAX_LINE_BYTES, DEFAULT_MAX_READ_BYTES,
    DEFAULT_MISSING_GRACE_MS, DEFAULT_POLL_INTERVAL_MS, DEFAULT_SESSION_BUFFER_LINES,
    DEFAULT_TRANSPORT_CAPACITY,
};
use crate::error::{Result, StreamError};
use crate::tail::{StartPosition, WatcherOptions};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

// =============================================================================
// Application Configuration
// =============================================================================

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub management: ManagementConfig,
    pub tail: TailConfig,
    pub stream: StreamConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to
    pub bind: String,
    /// HTTP port (0 = ephemeral, useful in tests)
    pub port: u16,
}

/// Where the host application writes its log
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Explicit log file
    pub file: Option<String>,
    /// Log directory; the file inside it is `spring.log`
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagementConfig {
    /// Prefix for every endpoint route
    pub base_path: String,
    pub endpoint: EndpointsConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointsConfig {
    pub logfile: LogFileEndpointConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogFileEndpointConfig {
    /// Master switch for the logfile routes
    pub enabled: bool,
    /// Log file written by something other than the host logging system
    pub external_file: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TailConfig {
    /// Poll interval in milliseconds
    pub poll_interval_ms: u64,
    /// How long a missing file is tolerated before streams end (milliseconds)
    pub missing_grace_ms: u64,
    /// Start at the current end of file (true) or replay it from the start
    pub start_at_end: bool,
    /// Maximum bytes consumed per poll
    pub max_read_bytes: usize,
    /// Longest partial line held back waiting for its terminator
    pub max_line_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Outbound channel capacity per client
    pub transport_capacity: usize,
    /// Lines buffered per session once the transport is full
    pub session_buffer_lines: usize,
    /// Seconds between SSE keep-alive comments
    pub keep_alive_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND_ADDRESS.to_string(),
            port: DEFAULT_HTTP_PORT,
        }
    }
}

impl Default for ManagementConfig {
    fn default() -> Self {
        Self {
            base_path: DEFAULT_BASE_PATH.to_string(),
            endpoint: EndpointsConfig::default(),
        }
    }
}

impl Default for LogFileEndpointConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            external_file: None,
        }
    }
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            missing_grace_ms: DEFAULT_MISSING_GRACE_MS,
            start_at_end: true,
            max_read_bytes: DEFAULT_MAX_READ_BYTES,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            transport_capacity: DEFAULT_TRANSPORT_CAPACITY,
            session_buffer_lines: DEFAULT_SESSION_BUFFER_LINES,
            keep_alive_secs: DEFAULT_KEEP_ALIVE_SECS,
        }
    }
}

impl TailConfig {
    pub fn watcher_options(&self) -> WatcherOptions {
        WatcherOptions {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            missing_grace: Duration::from_millis(self.missing_grace_ms),
            start: if self.start_at_end {
                StartPosition::End
            } else {
                StartPosition::Beginning
            },
            max_read_bytes: self.max_read_bytes,
            max_line_bytes: self.max_line_bytes,
        }
    }
}

impl Config {
    /// Overlay environment variables, `lookup` is usually `std::env::var`
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("LOGGING_FILE") {
            self.logging.file = Some(v);
        }
        if let Some(v) = lookup("LOGGING_PATH") {
            self.logging.path = Some(v);
        }
        if let Some(v) = lookup("MANAGEMENT_ENDPOINT_LOGFILE_EXTERNAL_FILE") {
            self.management.endpoint.logfile.external_file = Some(v);
        }
    }

    /// Reject values that would make the server misbehave
    pub fn validate(&self) -> Result<()> {
        if self.tail.poll_interval_ms == 0 {
            return Err(StreamError::ConfigValidation {
                field: "tail.poll_interval_ms",
                reason: "must be greater than zero".into(),
            });
        }
        if self.tail.max_read_bytes == 0 {
            return Err(StreamError::ConfigValidation {
                field: "tail.max_read_bytes",
                reason: "must be greater than zero".into(),
            });
        }
        if self.stream.transport_capacity == 0 {
            return Err(StreamError::ConfigValidation {
                field: "stream.transport_capacity",
                reason: "must be greater than zero".into(),
            });
        }
        if self.stream.session_buffer_lines == 0 {
            return Err(StreamError::ConfigValidation {
                field: "stream.session_buffer_lines",
                reason: "must be greater than zero".into(),
            });
        }
        if !self.management.base_path.starts_with('/') {
            return Err(StreamError::ConfigValidation {
                field: "management.base_path",
                reason: format!("'{}' must start with '/'", self.management.base_path),
            });
        }
        Ok(())
    }
}

// =============================================================================
// Log file resolution
// =============================================================================

/// Which setting supplied the log file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFileSource {
    LoggingFile,
    LoggingPath,
    ExternalFile,
}

impl LogFileSource {
    /// Dotted config key, as written in log messages
    pub fn key(&self) -> &'static str {
        match self {
            Self::LoggingFile => "logging.file",
            Self::LoggingPath => "logging.path",
            Self::ExternalFile => "management.endpoint.logfile.external_file",
        }
    }
}

/// Outcome of a successful resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLogFile {
    pub source: LogFileSource,
    /// The raw configured value
    pub value: String,
    /// Absolute path of the file to stream
    pub path: PathBuf,
}

type Lookup = fn(&Config) -> Option<ResolvedLogFile>;

/// Precedence order, first hit wins
const LOOKUPS: [Lookup; 3] = [from_logging_file, from_logging_path, from_external_file];

fn has_text(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

fn absolutize(path: PathBuf) -> PathBuf {
    std::path::absolute(&path).unwrap_or(path)
}

fn from_logging_file(cfg: &Config) -> Option<ResolvedLogFile> {
    let value = has_text(&cfg.logging.file)?;
    Some(ResolvedLogFile {
        source: LogFileSource::LoggingFile,
        value: value.to_string(),
        path: absolutize(PathBuf::from(value)),
    })
}

fn from_logging_path(cfg: &Config) -> Option<ResolvedLogFile> {
    let value = has_text(&cfg.logging.path)?;
    Some(ResolvedLogFile {
        source: LogFileSource::LoggingPath,
        value: value.to_string(),
        path: absolutize(Path::new(value).join(DEFAULT_LOG_FILE_NAME)),
    })
}

fn from_external_file(cfg: &Config) -> Option<ResolvedLogFile> {
    let value = has_text(&cfg.management.endpoint.logfile.external_file)?;
    Some(ResolvedLogFile {
        source: LogFileSource::ExternalFile,
        value: value.to_string(),
        path: absolutize(PathBuf::from(value)),
    })
}

/// Resolve the log file to stream
///
/// Returns `ConfigurationMissing` when no source has text; callers treat
/// that as "endpoint disabled", not as a failure.
pub fn resolve_log_file(cfg: &Config) -> Result<ResolvedLogFile> {
    LOOKUPS
        .iter()
        .find_map(|lookup| lookup(cfg))
        .ok_or(StreamError::ConfigurationMissing)
}

// =============================================================================
// Loading
// =============================================================================

/// Get the config file path
///
/// An explicit path wins. Otherwise `config.toml` next to the executable if
/// it exists, else `config.toml` in the working directory.
pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }

    let beside_exe = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("config.toml")));
    match beside_exe {
        Some(path) if path.exists() => path,
        _ => PathBuf::from("config.toml"),
    }
}

/// Load config from a file, failing on read or parse errors
pub fn load_from(path: &Path) -> Result<Config> {
    let content = fs::read_to_string(path).map_err(|e| StreamError::ConfigRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    toml::from_str(&content).map_err(|e| StreamError::ConfigValidation {
        field: "config",
        reason: format!("{}: {}", path.display(), e),
    })
}

/// Load config, falling back to defaults when the file is absent or broken
pub fn load(path: &Path) -> Config {
    if !path.exists() {
        return Config::default();
    }

    match load_from(path) {
        Ok(config) => config,
        Err(e) => {
            warn!("{}, using defaults", e);
            Config::default()
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
