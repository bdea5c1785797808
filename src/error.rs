//! Crate-wide error taxonomy for the namespace & version engine.
//!
//! Every public operation returns `Result<T, EngineError>` rather than
//! panicking; background workers log and continue on the per-item variants
//! (`Io`, `Internal`) and only stop on shutdown.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("cycle: moving {0} under {1} would create a cycle")]
    Cycle(String, String),

    #[error("denied: {0}")]
    Denied(String),

    #[error("file has no current version: {0}")]
    NoVersion(String),

    #[error("no such version {1} for file {0}")]
    NoSuchVersion(String, String),

    #[error("oversized: {0}")]
    Oversized(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("read-only mode: primary metadata store unavailable")]
    ReadOnly,

    #[error("busy: {0}")]
    Busy(String),

    #[error("cancelled: deadline elapsed")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// `true` for errors the caller can reasonably retry without changing
    /// what it's asking for (as opposed to `NotFound`/`Conflict`/`Denied`,
    /// which need the caller to change the request).
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::ReadOnly | EngineError::Busy(_) | EngineError::Io(_))
    }
}

impl From<anyhow::Error> for EngineError {
    fn from(e: anyhow::Error) -> Self {
        EngineError::Internal(e.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
