//! Error types for media-cache-dl
//!
//! Errors fall into three families that callers usually need to tell apart:
//! - transport failures (network errors, bad HTTP status, truncated bodies)
//! - storage faults (the cache index claims bytes the data file does not hold)
//! - cancellation (an explicit stop requested by the caller)
//!
//! Everything else (configuration, I/O while opening a cache, serialization of
//! the cache index) is reported under [`ErrorKind::Other`].

use std::path::PathBuf;
use thiserror::Error;

use crate::interval::Interval;

/// Result type alias for media-cache-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for media-cache-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Network error reported by the HTTP client
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Server answered a range request with a non-success status
    #[error("HTTP {status} for {url}")]
    HttpStatus {
        /// HTTP status code
        status: u16,
        /// Requested resource address
        url: String,
    },

    /// Response body ended before the requested range was delivered
    #[error("incomplete body for {url}: expected {expected} bytes, received {received}")]
    IncompleteBody {
        /// Requested resource address
        url: String,
        /// Number of bytes the range should have produced
        expected: u64,
        /// Number of bytes actually received
        received: u64,
    },

    /// Cache index and data file disagree (unrecoverable for this resource)
    #[error("storage fault in {} at {interval}: {reason}", path.display())]
    StorageFault {
        /// Data file being read
        path: PathBuf,
        /// Interval that could not be served
        interval: Interval,
        /// What went wrong
        reason: String,
    },

    /// The download was cancelled by the caller
    #[error("download cancelled")]
    Cancelled,

    /// Empty or inverted byte interval
    #[error("invalid interval [{start}, {end})")]
    InvalidInterval {
        /// Requested start offset
        start: u64,
        /// Requested end offset (exclusive)
        end: u64,
    },

    /// Resource address could not be parsed
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Cache index (de)serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "cache_dir")
        key: Option<String>,
    },

    /// Failed to check disk space
    #[error("failed to check disk space: {0}")]
    DiskSpaceCheckFailed(String),
}

/// Coarse classification of an [`Error`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network or protocol failure; surfaced verbatim, never retried internally
    Transport,
    /// Local cache corruption; purge the resource instead of retrying
    Storage,
    /// Explicit user-initiated stop
    Cancellation,
    /// Anything else (configuration, index I/O, serialization)
    Other,
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Network(_) | Error::HttpStatus { .. } | Error::IncompleteBody { .. } => {
                ErrorKind::Transport
            }
            Error::StorageFault { .. } => ErrorKind::Storage,
            Error::Cancelled => ErrorKind::Cancellation,
            Error::InvalidInterval { .. }
            | Error::InvalidUrl(_)
            | Error::Io(_)
            | Error::Serialization(_)
            | Error::Config { .. }
            | Error::DiskSpaceCheckFailed(_) => ErrorKind::Other,
        }
    }

    /// Whether this is the terminal error of an explicitly cancelled download
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}
