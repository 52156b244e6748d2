//! Error types for beacon-core

use thiserror::Error;

/// Main error type for the beacon-core library
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Request never produced a usable response (refused, timed out, unreadable body)
    #[error("transport error: {0}")]
    Transport(String),

    /// Collector answered with a non-success status
    #[error("collector returned {status}: {body}")]
    Http { status: u16, body: String },

    /// Overflow store could not be opened or written
    #[error("overflow store error: {0}")]
    Overflow(String),

    /// No async runtime to host the dispatcher
    #[error("runtime error: {0}")]
    Runtime(String),
}

impl Error {
    /// True for failures caused by the collector being unreachable or unhappy.
    pub fn is_delivery_failure(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::Http { .. })
    }
}

/// Result type alias for beacon-core
pub type Result<T> = std::result::Result<T, Error>;
