//! In-memory summarizer and factory for tests and simulation.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::time::{Duration, Instant};

use super::factory::{SummarizerFactory, SummarizerRequest};
use super::summarizer::{SummarizerHandle, SummarizingWarning};
use crate::coordinator::quorum::ClientId;
use crate::coordinator::state::StopReason;
use crate::error::{Result, SpawnError, SummaryError};

/// Summarizer that runs until told to stop
pub struct MockSummarizer {
    stop_tx: watch::Sender<Option<StopReason>>,
    warnings: broadcast::Sender<SummarizingWarning>,
    on_behalf_of: Mutex<Vec<ClientId>>,
    stop_reasons: Mutex<Vec<StopReason>>,
    fail_run: bool,
    stop_delay: Duration,
    finished: AtomicBool,
}

impl MockSummarizer {
    pub fn new() -> Self {
        Self::with_options(false, Duration::ZERO)
    }

    /// Summarizer whose run fails as soon as it starts
    pub fn failing() -> Self {
        Self::with_options(true, Duration::ZERO)
    }

    /// `stop_delay` is how long the summarizer lingers after being stopped
    pub fn with_options(fail_run: bool, stop_delay: Duration) -> Self {
        let (stop_tx, _) = watch::channel(None);
        let (warnings, _) = broadcast::channel(16);
        Self {
            stop_tx,
            warnings,
            on_behalf_of: Mutex::new(Vec::new()),
            stop_reasons: Mutex::new(Vec::new()),
            fail_run,
            stop_delay,
            finished: AtomicBool::new(false),
        }
    }

    /// Raise a warning as a real summarizer would
    pub fn emit_warning(&self, message: &str) {
        let _ = self.warnings.send(SummarizingWarning::new(message, false));
    }

    /// Ids passed to `run` and `update_on_behalf_of`, in order
    pub fn on_behalf_of(&self) -> Vec<ClientId> {
        self.on_behalf_of.lock().clone()
    }

    /// Reasons passed to `stop`, in order
    pub fn stop_reasons(&self) -> Vec<StopReason> {
        self.stop_reasons.lock().clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.stop_tx.borrow().is_some()
    }

    /// True once `run` has returned
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    async fn wait_stopped(&self) -> Result<()> {
        if self.fail_run {
            return Err(SummaryError::WorkerFailed {
                reason: "mock summarizer failure".into(),
            });
        }

        let mut stopped = self.stop_tx.subscribe();
        let result = stopped.wait_for(|reason| reason.is_some()).await.is_ok();
        if !result {
            return Err(SummaryError::Internal {
                message: "stop channel closed".into(),
            });
        }
        if !self.stop_delay.is_zero() {
            tokio::time::sleep(self.stop_delay).await;
        }
        Ok(())
    }
}

impl Default for MockSummarizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SummarizerHandle for MockSummarizer {
    async fn run(&self, on_behalf_of: ClientId) -> Result<()> {
        self.on_behalf_of.lock().push(on_behalf_of);
        let result = self.wait_stopped().await;
        self.finished.store(true, Ordering::SeqCst);
        result
    }

    fn stop(&self, reason: StopReason) {
        self.stop_reasons.lock().push(reason);
        self.stop_tx.send_replace(Some(reason));
    }

    fn update_on_behalf_of(&self, client_id: ClientId) {
        self.on_behalf_of.lock().push(client_id);
    }

    fn warnings(&self) -> broadcast::Receiver<SummarizingWarning> {
        self.warnings.subscribe()
    }
}

/// Factory handing out [`MockSummarizer`]s, with injectable failures
#[derive(Default)]
pub struct MockSummarizerFactory {
    fail_next: AtomicUsize,
    spawn_delay: Mutex<Duration>,
    stop_delay: Mutex<Duration>,
    failing_runs: AtomicUsize,
    requests: Mutex<Vec<SummarizerRequest>>,
    spawn_times: Mutex<Vec<Instant>>,
    spawned: Mutex<Vec<Arc<MockSummarizer>>>,
}

impl MockSummarizerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` spawns
    pub fn fail_next(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Hand out summarizers whose run fails, `count` times
    pub fn fail_runs(&self, count: usize) {
        self.failing_runs.store(count, Ordering::SeqCst);
    }

    /// Take this long to answer each spawn
    pub fn set_spawn_delay(&self, delay: Duration) {
        *self.spawn_delay.lock() = delay;
    }

    /// Summarizers linger this long after being stopped
    pub fn set_stop_delay(&self, delay: Duration) {
        *self.stop_delay.lock() = delay;
    }

    /// When each spawn call arrived
    pub fn spawn_times(&self) -> Vec<Instant> {
        self.spawn_times.lock().clone()
    }

    /// Summarizers handed out whose run has not returned
    pub fn live_count(&self) -> usize {
        self.spawned.lock().iter().filter(|s| !s.is_finished()).count()
    }

    /// Number of spawn calls, failed ones included
    pub fn spawn_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn requests(&self) -> Vec<SummarizerRequest> {
        self.requests.lock().clone()
    }

    /// Summarizers successfully handed out
    pub fn spawned(&self) -> Vec<Arc<MockSummarizer>> {
        self.spawned.lock().clone()
    }

    /// Most recently spawned summarizer
    pub fn last(&self) -> Option<Arc<MockSummarizer>> {
        self.spawned.lock().last().cloned()
    }

    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl SummarizerFactory for MockSummarizerFactory {
    async fn spawn(&self, request: SummarizerRequest) -> Result<Arc<dyn SummarizerHandle>> {
        self.requests.lock().push(request);
        self.spawn_times.lock().push(Instant::now());

        let delay = *self.spawn_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if Self::take(&self.fail_next) {
            return Err(SpawnError::Unavailable {
                reason: "injected spawn failure".into(),
            }
            .into());
        }

        let fail_run = Self::take(&self.failing_runs);
        let stop_delay = *self.stop_delay.lock();
        let summarizer = Arc::new(MockSummarizer::with_options(fail_run, stop_delay));
        self.spawned.lock().push(summarizer.clone());
        Ok(summarizer)
    }
}
