//! Error types for the getuid core library.

use thiserror::Error;

/// Result type alias using the getuid [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for getuid operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}
