//! Common error types shared across the stemcut workspace.

use thiserror::Error;

/// Common result type for stemcut operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types not tied to the HTTP layer.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("internal error: {0}")]
    Internal(String),
}
