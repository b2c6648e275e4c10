//! Error types for chunk-dl
//!
//! One error type covers the whole transfer pipeline. The engine is the only
//! place that turns an error into an abort; everything below it propagates.

use std::fmt;

/// Main error type for chunk-dl operations
#[derive(Debug)]
pub enum Error {
    /// Transfer parameters are unusable (zero chunk size, zero total size, reused engine)
    InvalidSpec(String),

    /// The source did not report a usable size or range support
    PreconditionFailed(String),

    /// Unexpected status or body on a ranged request
    ProtocolError(String),

    /// Connectivity problems, including per-attempt timeouts
    NetworkError(String),

    /// Retry budget for one range exhausted
    FetchFailed {
        index: u64,
        last_error: Box<Error>,
    },

    /// A chunk expected in the store is missing
    CorruptState(String),

    /// Write attempted on a sink that was already closed
    SinkClosed,

    /// The destination rejected a write or a flush
    SinkWriteFailed(std::io::Error),

    /// Chunk store backend failure
    StoreError(String),

    /// File I/O error outside the sink
    IoError(std::io::Error),

    /// Transfer cancelled by the caller
    Cancelled,
}

impl Error {
    /// Whether a single fetch attempt that failed with this error may be retried
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::NetworkError(_) | Error::ProtocolError(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidSpec(msg) => {
                write!(f, "Invalid transfer: {msg}")
            }
            Error::PreconditionFailed(msg) => {
                write!(f, "Cannot start transfer: {msg}")
            }
            Error::ProtocolError(msg) => {
                write!(f, "Protocol error: {msg}")
            }
            Error::NetworkError(msg) => {
                write!(f, "Network error: {msg}")
            }
            Error::FetchFailed { index, last_error } => {
                write!(f, "Fetching chunk {index} failed: {last_error}")
            }
            Error::CorruptState(msg) => {
                write!(f, "Corrupt chunk store: {msg}")
            }
            Error::SinkClosed => {
                write!(f, "Output already closed")
            }
            Error::SinkWriteFailed(err) => {
                write!(f, "Writing output failed: {err}")
            }
            Error::StoreError(msg) => {
                write!(f, "Chunk store error: {msg}")
            }
            Error::IoError(err) => {
                write!(f, "I/O error: {err}")
            }
            Error::Cancelled => {
                write!(f, "Transfer cancelled")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(err) | Error::SinkWriteFailed(err) => Some(err),
            Error::FetchFailed { last_error, .. } => Some(last_error.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IoError(err)
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() || err.is_body() || err.is_request() {
            Error::NetworkError(err.to_string())
        } else {
            Error::ProtocolError(err.to_string())
        }
    }
}

impl From<sled::Error> for Error {
    fn from(err: sled::Error) -> Self {
        Error::StoreError(err.to_string())
    }
}

/// Convenience result type for chunk-dl operations
pub type Result<T> = std::result::Result<T, Error>;
