//! Error types for summary-core
//!
//! Covers summarizer spawn failures, worker failures and the controller's
//! own lifecycle. None of these are fatal to the host: every failure
//! degrades to "no summarizer currently running".

use thiserror::Error;

/// Reasons the worker factory could not produce a summarizer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpawnError {
    /// The summarizer route answered with an unexpected status or object type
    #[error("Invalid summarizer route: status={status}, mime_type={mime_type}")]
    InvalidRoute { status: u16, mime_type: String },

    /// The route resolved to an object that is not a summarizer
    #[error("Object does not implement a summarizer")]
    NotASummarizer,

    /// The underlying loader could not be reached
    #[error("Summarizer route unavailable: {reason}")]
    Unavailable { reason: String },
}

/// Primary error type for all summary-core operations
#[derive(Debug, Clone, Error)]
pub enum SummaryError {
    // ========== Worker Errors ==========

    /// Spawning a summarizer failed
    #[error("Failed to create summarizer: {0}")]
    Spawn(#[from] SpawnError),

    /// A running summarizer ended abnormally
    #[error("Summarizer failed: {reason}")]
    WorkerFailed { reason: String },

    // ========== Controller Errors ==========

    /// The summary manager task has exited
    #[error("Summary manager is no longer running")]
    ManagerClosed,

    /// Internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl SummaryError {
    /// Returns true if a later start attempt may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SummaryError::Spawn(SpawnError::Unavailable { .. })
                | SummaryError::Spawn(SpawnError::InvalidRoute { .. })
                | SummaryError::WorkerFailed { .. }
        )
    }
}

/// Result type alias for summary-core operations
pub type Result<T> = std::result::Result<T, SummaryError>;
