//! Error types for the ingest/analysis core.

use thiserror::Error;

/// Errors raised by the streaming core.
///
/// Only [`StreamError::InvalidConfig`] ever escapes as a `Result` from a
/// constructor. Everything else travels through the ingestor's `error`
/// listeners wrapped in an [`ErrorEvent`](crate::audio::ingest::ErrorEvent).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StreamError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Stream has been stopped")]
    Stopped,

    #[error("Stream has already ended")]
    Ended,

    #[error("Decode worker error: {0}")]
    Worker(String),
}

impl StreamError {
    pub(crate) fn invalid<T: Into<String>>(msg: T) -> Self {
        Self::InvalidConfig(msg.into())
    }
}

/// Result type alias for the streaming core
pub type Result<T> = std::result::Result<T, StreamError>;
