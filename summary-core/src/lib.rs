//! Summary Core - single summarizer election for collaborative documents
//!
//! Every client attached to a document runs a summary manager. Exactly one
//! client, the earliest-joined connected one, is elected to run a
//! summarizer that periodically checkpoints the document. This crate
//! provides:
//! - Membership tracking ordered by join sequence
//! - Summarizer supervision with throttled restarts
//! - The worker factory boundary used to create summarizers

pub mod coordinator;
pub mod error;
pub mod metrics;
pub mod runtime;
pub mod worker;

pub use coordinator::{SummaryManager, SummaryManagerConfig, SummaryManagerHandle};
pub use error::{SummaryError, SpawnError};

/// Default startup delay in milliseconds
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 5000;

/// Default number of ops after which the startup delay is skipped
pub const DEFAULT_OPS_TO_BYPASS_INITIAL_DELAY: u64 = 4000;
