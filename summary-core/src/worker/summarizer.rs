//! Running summarizer handle
//!
//! The coordinator never owns the summarizer itself; it holds a handle used
//! to run it, signal it and hear about its problems.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::coordinator::quorum::ClientId;
use crate::coordinator::state::StopReason;
use crate::error::Result;

/// Non-fatal problem reported to the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummarizingWarning {
    /// Human-readable description
    pub message: String,
    /// Whether the warning was already logged by its producer
    pub logged: bool,
    /// When the warning was raised
    pub occurred_at: DateTime<Utc>,
}

impl SummarizingWarning {
    pub fn new(message: impl Into<String>, logged: bool) -> Self {
        Self {
            message: message.into(),
            logged,
            occurred_at: Utc::now(),
        }
    }
}

/// Handle to a spawned summarizer
#[async_trait]
pub trait SummarizerHandle: Send + Sync {
    /// Run until the summarizer stops, normally or abnormally
    async fn run(&self, on_behalf_of: ClientId) -> Result<()>;

    /// Ask the summarizer to stop; `run` completes once it has
    fn stop(&self, reason: StopReason);

    /// The parent client reconnected under a new id
    fn update_on_behalf_of(&self, client_id: ClientId);

    /// Warnings raised while summarizing
    fn warnings(&self) -> broadcast::Receiver<SummarizingWarning>;
}
