//! Error types for Fallwatch

use thiserror::Error;

/// Errors that can occur while detecting, classifying or exchanging status
#[derive(Debug, Error)]
pub enum FallWatchError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Empty feature window: {0}")]
    EmptyWindow(String),

    #[error("Malformed status report: {0}")]
    MalformedReport(String),

    #[error("Unclassifiable response: {0}")]
    Unclassifiable(String),

    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to parse sample: {0}")]
    ParseError(String),
}
