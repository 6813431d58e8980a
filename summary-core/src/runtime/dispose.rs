//! Disposal signaling
//!
//! A latched flag that wakes every pending timer once the owner is disposed.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Instant;

/// Disposal signal shared between an owner and its timers
///
/// Unlike a broadcast, a waiter that subscribes after disposal still
/// observes it.
#[derive(Debug, Clone)]
pub struct DisposeSignal {
    sender: Arc<watch::Sender<bool>>,
}

impl DisposeSignal {
    /// Create a new signal
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Trigger disposal; later calls are no-ops
    pub fn dispose(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_disposed(&self) -> bool {
        *self.sender.borrow()
    }

    /// Resolve once disposed
    pub async fn disposed(&self) {
        let mut receiver = self.sender.subscribe();
        // The sender lives in `self`, so the channel cannot close here
        let _ = receiver.wait_for(|disposed| *disposed).await;
    }

    /// Sleep until `deadline`, or less if disposed first
    ///
    /// Returns false if the sleep was cut short.
    pub async fn sleep_until(&self, deadline: Instant) -> bool {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => true,
            _ = self.disposed() => false,
        }
    }
}

impl Default for DisposeSignal {
    fn default() -> Self {
        Self::new()
    }
}
