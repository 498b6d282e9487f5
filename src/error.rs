//! Error types for nodedex.
//!
//! Every error carries a stable code and a retry category so that tool
//! responses stay actionable for the client on the other end of the stream.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for nodedex operations.
pub type Result<T> = std::result::Result<T, Error>;

/// nodedex error types.
#[derive(Error, Debug)]
pub enum Error {
    /// A type or instance reference could not be resolved.
    #[error("Reference error: {0}")]
    Reference(String),

    /// Input does not match the expected shape (missing property, bad port, bad arguments).
    #[error("Schema error: {0}")]
    Schema(String),

    /// Graph structure is invalid (cycle, empty graph).
    #[error("Structural error: {0}")]
    Structural(String),

    /// Catalog store failure. Retrying `sync()` is always safe.
    #[error("Store error: {0}")]
    Store(String),

    /// Malformed envelope or protocol misuse.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The automation platform answered with a non-2xx status or did not answer in time.
    #[error("Upstream error: {message}")]
    Upstream {
        status: Option<u16>,
        message: String,
        retryable: bool,
    },

    /// A tool handler did not finish within its time budget.
    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get the error code for programmatic parsing.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Reference(_) => "REFERENCE_ERROR",
            Error::Schema(_) => "SCHEMA_ERROR",
            Error::Structural(_) => "STRUCTURAL_ERROR",
            Error::Store(_) | Error::Database(_) | Error::Pool(_) => "STORE_ERROR",
            Error::Transport(_) => "TRANSPORT_ERROR",
            Error::Upstream { .. } => "UPSTREAM_ERROR",
            Error::Timeout(_) => "TIMEOUT",
            Error::Config(_) => "CONFIG_ERROR",
            Error::Internal(_) => "INTERNAL_ERROR",
            Error::Json(_) => "JSON_ERROR",
            Error::Io(_) => "IO_ERROR",
        }
    }

    /// Retry category for the caller. The core itself never retries.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Reference(_) | Error::Schema(_) | Error::Structural(_) | Error::Json(_) => {
                ErrorCategory::ClientError
            }
            Error::Transport(_) => ErrorCategory::ClientError,
            Error::Store(_) | Error::Database(_) | Error::Pool(_) | Error::Timeout(_) => {
                ErrorCategory::Transient
            }
            Error::Upstream { retryable, .. } => {
                if *retryable {
                    ErrorCategory::Transient
                } else {
                    ErrorCategory::ClientError
                }
            }
            Error::Config(_) | Error::Internal(_) | Error::Io(_) => ErrorCategory::Permanent,
        }
    }

    /// Whether repeating the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Transient
    }

    /// Build an upstream error from an HTTP status code.
    ///
    /// 5xx is retryable, everything else is terminal.
    pub fn upstream_status(status: u16, message: impl Into<String>) -> Self {
        Error::Upstream {
            status: Some(status),
            message: message.into(),
            retryable: status >= 500,
        }
    }

    /// Get a sanitized error message safe for external consumers.
    ///
    /// Hides SQL statements and file paths behind a generic message.
    pub fn external_message(&self) -> String {
        match self {
            Error::Reference(msg) => format!("Reference error: {}", msg),
            Error::Schema(msg) => format!("Schema error: {}", msg),
            Error::Structural(msg) => format!("Structural error: {}", msg),
            Error::Transport(msg) => format!("Transport error: {}", msg),
            Error::Config(msg) => format!("Configuration error: {}", msg),
            Error::Upstream {
                status: Some(status),
                message,
                ..
            } => format!("Platform request failed with status {}: {}", status, message),
            Error::Upstream { message, .. } => format!("Platform request failed: {}", message),
            Error::Store(msg) => format!("Store error: {}", msg),
            Error::Timeout(msg) => format!("Timeout: {}", msg),
            Error::Database(_) | Error::Pool(_) => "A catalog store error occurred".to_string(),
            Error::Internal(_) => "An internal error occurred".to_string(),
            Error::Io(_) => "An I/O error occurred".to_string(),
            Error::Json(_) => "Invalid JSON format".to_string(),
        }
    }

    /// Convert to a JSON body suitable for an `isError` tool result.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "error": {
                "code": self.code(),
                "message": self.external_message(),
                "category": self.category(),
                "retryable": self.is_retryable(),
            }
        })
    }
}

/// Error categories for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Invalid request. Do not retry without fixing it.
    ClientError,
    /// May succeed on retry.
    Transient,
    /// Unlikely to succeed on retry.
    Permanent,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::ClientError => write!(f, "client_error"),
            ErrorCategory::Transient => write!(f, "transient"),
            ErrorCategory::Permanent => write!(f, "permanent"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_classification() {
        assert!(Error::upstream_status(503, "unavailable").is_retryable());
        assert!(Error::upstream_status(500, "boom").is_retryable());
        assert!(!Error::upstream_status(404, "missing").is_retryable());
        assert_eq!(
            Error::upstream_status(401, "denied").category(),
            ErrorCategory::ClientError
        );
    }

    #[test]
    fn test_store_errors_are_transient() {
        let err = Error::Store("disk full".into());
        assert_eq!(err.code(), "STORE_ERROR");
        assert!(err.is_retryable());
    }

    #[test]
    fn test_timeout_is_transient() {
        let err = Error::Timeout("search_nodes took longer than 60s".into());
        assert_eq!(err.code(), "TIMEOUT");
        assert_eq!(err.category(), ErrorCategory::Transient);
    }

    #[test]
    fn test_json_shape_hides_database_details() {
        let err = Error::Database(rusqlite::Error::InvalidQuery);
        let json = err.to_json();
        assert_eq!(json["error"]["code"], "STORE_ERROR");
        assert_eq!(json["error"]["message"], "A catalog store error occurred");
        assert_eq!(json["error"]["category"], "transient");
        assert_eq!(json["error"]["retryable"], true);
    }
}
