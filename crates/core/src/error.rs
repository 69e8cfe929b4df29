//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid content id: {0}")]
    InvalidContentId(String),

    #[error("invalid principal: {0}")]
    InvalidPrincipal(String),

    #[error("invalid name: {0}")]
    InvalidName(String),

    #[error("invalid token: {0}")]
    InvalidToken(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
