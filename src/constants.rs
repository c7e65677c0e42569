//! Application-wide constants
//!
//! Centralized defaults shared by config, tailing and transports.

// =============================================================================
// Network
// =============================================================================

/// Default bind address for the HTTP endpoint
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1";

/// Default HTTP port
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Default management base path (routes live under it)
pub const DEFAULT_BASE_PATH: &str = "/actuator";

/// File name appended to `logging.path` when only a directory is configured
pub const DEFAULT_LOG_FILE_NAME: &str = "spring.log";

// =============================================================================
// Timing - Tailing
// =============================================================================

/// Interval between file polls (milliseconds)
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 250;

/// How long a deleted file may stay missing before the watcher gives up (milliseconds)
pub const DEFAULT_MISSING_GRACE_MS: u64 = 10_000;

/// Interval between SSE keep-alive comments (seconds)
pub const DEFAULT_KEEP_ALIVE_SECS: u64 = 15;

// =============================================================================
// Buffers
// =============================================================================

/// Outbound channel capacity between a session and its transport writer
pub const DEFAULT_TRANSPORT_CAPACITY: usize = 256;

/// Lines a session buffers once its transport is full, before dropping the oldest
pub const DEFAULT_SESSION_BUFFER_LINES: usize = 1024;

/// Maximum bytes read from the log file per poll
pub const DEFAULT_MAX_READ_BYTES: usize = 1024 * 1024;

/// A pending line longer than this is emitted without waiting for its terminator
pub const DEFAULT_MAX_LINE_BYTES: usize = 64 * 1024;
