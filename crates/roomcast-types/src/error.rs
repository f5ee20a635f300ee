//! Shared error types for roomcast.

use thiserror::Error;

/// Top-level error type for process-level failures (startup, config, IO).
#[derive(Error, Debug)]
pub enum RoomcastError {
    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A network error occurred.
    #[error("Network error: {0}")]
    Network(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid user input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Alias for Result with RoomcastError.
pub type RoomcastResult<T> = Result<T, RoomcastError>;
