//! Error types for the countgate service.

use std::time::Duration;

use thiserror::Error;

/// Main error type for countgate operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Key expression parse or evaluation errors
    #[error("Expression error: {0}")]
    Expression(String),

    /// Shared store transport or protocol errors
    #[error("Store error: {0}")]
    Store(#[from] redis::RedisError),

    /// The shared store did not answer in time
    #[error("Store call timed out after {0:?}")]
    StoreTimeout(Duration),

    /// The shared store answered with something the limiter script never returns
    #[error("Unexpected store reply: {0}")]
    UnexpectedReply(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for countgate operations.
pub type Result<T> = std::result::Result<T, Error>;
