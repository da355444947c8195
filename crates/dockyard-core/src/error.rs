//! Error types for dockyard.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("bad input: {0}")]
    BadInput(String),

    #[error("preparation failed: {0}")]
    Preparation(String),

    #[error("engine error: {0}")]
    Engine(String),

    #[error("registry error: {0}")]
    Registry(String),

    #[error("registry unreachable: {0}")]
    Unreachable(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the error was caused by the caller's input rather than by the system.
    pub fn is_bad_input(&self) -> bool {
        matches!(self, Error::BadInput(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
