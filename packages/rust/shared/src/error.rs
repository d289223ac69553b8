//! Error types for courtlink.
//!
//! Library crates use [`CourtLinkError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all courtlink operations.
#[derive(Debug, thiserror::Error)]
pub enum CourtLinkError {
    /// Configuration loading or validation error. Fatal at startup.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error talking to a geocoding provider.
    #[error("network error: {0}")]
    Network(String),

    /// Input file or provider payload could not be parsed.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (missing column, bad value, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, CourtLinkError>;

impl CourtLinkError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error should abort the run before any record is processed.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config { .. })
    }
}
