//! Summary manager state machine types

use std::fmt;

/// Supervision state of the local summarizer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SummaryManagerState {
    /// No summarizer and none being created
    Off,
    /// Waiting on delays or on the worker factory
    Starting,
    /// A summarizer is running on behalf of this client
    Running,
    /// Stop was requested; waiting for the summarizer to exit
    Stopping,
    /// Summaries will never run from this client
    Disabled,
}

impl SummaryManagerState {
    /// True while a worker may be alive or about to be
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SummaryManagerState::Starting
                | SummaryManagerState::Running
                | SummaryManagerState::Stopping
        )
    }
}

/// Why a running summarizer was asked to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StopReason {
    /// The local client lost its connection
    NotConnected,
    /// Another client is now elected
    NotElected,
    /// The manager was disposed
    Disposed,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::NotConnected => "parentNotConnected",
            StopReason::NotElected => "parentShouldNotSummarize",
            StopReason::Disposed => "disposed",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the local client should be summarizing right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShouldSummarize {
    NotConnected,
    NotElected,
    Disposed,
    /// Elected, but a summarizer client from an earlier election is still connected
    ElectedButWaiting,
    ElectedAndReady,
}

impl ShouldSummarize {
    /// Reason to stop a running summarizer, if any
    pub fn stop_reason(&self) -> Option<StopReason> {
        match self {
            ShouldSummarize::NotConnected => Some(StopReason::NotConnected),
            ShouldSummarize::NotElected => Some(StopReason::NotElected),
            ShouldSummarize::Disposed => Some(StopReason::Disposed),
            ShouldSummarize::ElectedButWaiting | ShouldSummarize::ElectedAndReady => None,
        }
    }

    pub fn should_start(&self) -> bool {
        *self == ShouldSummarize::ElectedAndReady
    }
}
