//! Summarizer election
//!
//! Tracks membership, elects the summarizer client and supervises the
//! local summarizer when this client is elected.

pub mod leader;
pub mod membership;
pub mod quorum;
pub mod state;
pub mod throttle;

pub use leader::{ManagerStatus, SummaryManager, SummaryManagerConfig, SummaryManagerEvent, SummaryManagerHandle};
pub use membership::{MembershipHeap, TrackedClient};
pub use quorum::{ClientDetails, ClientId, DeltaSource, LocalQuorum, Quorum, QuorumEvent, SequencedClient};
pub use state::{ShouldSummarize, StopReason, SummaryManagerState};
pub use throttle::{ThrottleConfig, Throttler};
