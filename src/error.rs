//! Centralized error types for the log stream server
//!
//! All errors are represented by the `StreamError` enum.
//! Use `Result<T>` as shorthand for `std::result::Result<T, StreamError>`.

use crate::stream::SessionId;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::fmt;
use std::path::PathBuf;

/// All log stream errors
#[derive(Debug)]
pub enum StreamError {
    // === Configuration ===
    /// No log file resolvable from any source; the endpoint stays disabled
    ConfigurationMissing,
    /// Failed to read the config file
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Invalid config value
    ConfigValidation { field: &'static str, reason: String },

    // === Network ===
    /// Failed to bind the HTTP listener
    Bind {
        addr: String,
        source: std::io::Error,
    },
    /// HTTP server stopped with an error
    Serve { source: std::io::Error },

    // === Tailing ===
    /// Read failed but may succeed on the next poll
    TransientRead {
        path: PathBuf,
        source: std::io::Error,
    },
    /// File gone for longer than the grace window
    PermanentRead { path: PathBuf },

    // === Sessions ===
    /// Transport refused a write; only that session is closed
    TransportWrite { session: SessionId },

    // === IO ===
    /// File system operation failed
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    // === Runtime ===
    /// Tokio runtime creation failed
    Runtime { source: std::io::Error },
}

impl std::error::Error for StreamError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ConfigRead { source, .. }
            | Self::Bind { source, .. }
            | Self::Serve { source }
            | Self::TransientRead { source, .. }
            | Self::Io { source, .. }
            | Self::Runtime { source } => Some(source),
            _ => None,
        }
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigurationMissing => write!(f, "No log file configured"),
            Self::ConfigRead { path, .. } => write!(f, "Cannot read config: {}", path.display()),
            Self::ConfigValidation { field, reason } => {
                write!(f, "Invalid {}: {}", field, reason)
            }
            Self::Bind { addr, .. } => write!(f, "Cannot bind {}", addr),
            Self::Serve { source } => write!(f, "HTTP server failed: {}", source),
            Self::TransientRead { path, source } => {
                write!(f, "Cannot read {}: {}", path.display(), source)
            }
            Self::PermanentRead { path } => {
                write!(f, "Log file gone: {}", path.display())
            }
            Self::TransportWrite { session } => {
                write!(f, "Transport closed for session {}", session)
            }
            Self::Io { path, .. } => write!(f, "IO error: {}", path.display()),
            Self::Runtime { .. } => write!(f, "Failed to create runtime"),
        }
    }
}

impl StreamError {
    /// HTTP status for errors that reach a handler
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ConfigurationMissing | Self::PermanentRead { .. } => StatusCode::NOT_FOUND,
            Self::Io { source, .. } | Self::TransientRead { source, .. }
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                StatusCode::NOT_FOUND
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for StreamError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("{}", self);
        } else {
            tracing::debug!("{}", self);
        }
        (status, format!("{}\n", self)).into_response()
    }
}

/// Alias for Result with StreamError
pub type Result<T> = std::result::Result<T, StreamError>;
