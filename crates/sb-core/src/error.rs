//! # AppError
//!
//! Centralized error handling for the Story-Board ecosystem.
//! Every storage port, the pool, the cascade executor and the repositories
//! speak this one taxonomy.

use thiserror::Error;

/// The primary error type for all sb-core operations.
#[derive(Error, Debug)]
pub enum AppError {
    /// The pool could not produce a usable handle (dial failure or timeout).
    /// Fatal at startup, retryable afterwards.
    #[error("connection error: {0}")]
    Connection(String),

    /// A primary delete or update matched nothing. Callers cannot tell
    /// "does not exist" apart from "not yours".
    #[error("{0} {1} not found or not owned by caller")]
    NotFoundOrForbidden(String, String),

    /// A fan-out task, the commit, or the cascade deadline failed.
    #[error("transaction aborted: {0}")]
    TransactionAborted(String),

    /// Input rejected before touching storage (e.g. missing parent)
    #[error("validation error: {0}")]
    Validation(String),

    /// Backend I/O failure outside of a transaction
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AppError {
    pub fn not_found_or_forbidden(kind: impl std::fmt::Display, id: impl std::fmt::Display) -> Self {
        Self::NotFoundOrForbidden(kind.to_string(), id.to_string())
    }

    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::StorageUnavailable(_) | Self::TransactionAborted(_)
        )
    }
}

/// A specialized Result type for Story-Board logic.
pub type Result<T> = std::result::Result<T, AppError>;
