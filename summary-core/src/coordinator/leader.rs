//! Summarizer election and supervision
//!
//! The [`SummaryManager`] decides whether the local client is the elected
//! summarizer client and, if so, keeps exactly one summarizer running on its
//! behalf. All inputs are serialized through one event loop; spawning and
//! running the summarizer happen on separate tasks that report back into it.

use std::future::pending;
use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::{mpsc, watch};
use tokio::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::membership::MembershipHeap;
use super::quorum::{ClientDetails, ClientId, DeltaSource, Quorum, QuorumEvent, SequencedClient};
use super::state::{ShouldSummarize, StopReason, SummaryManagerState};
use super::throttle::{ThrottleConfig, Throttler};
use crate::error::{Result, SummaryError};
use crate::metrics::standard;
use crate::runtime::DisposeSignal;
use crate::worker::{SummarizerFactory, SummarizerHandle, SummarizerRequest, SummarizingWarning};

/// Configuration for the summary manager
#[derive(Debug, Clone)]
pub struct SummaryManagerConfig {
    /// Never summarize from this client when false
    pub summaries_enabled: bool,
    /// Details of the local client
    pub client_details: ClientDetails,
    /// Startup delay for sessions with little history
    pub initial_delay: Duration,
    /// Ops seen before first connecting that skip the startup delay
    pub ops_to_bypass_initial_delay: u64,
    /// Backoff between summarizer starts
    pub throttle: ThrottleConfig,
    /// Buffer of the notification channel
    pub event_capacity: usize,
}

impl Default for SummaryManagerConfig {
    fn default() -> Self {
        Self {
            summaries_enabled: true,
            client_details: ClientDetails::interactive(),
            initial_delay: Duration::from_millis(crate::DEFAULT_INITIAL_DELAY_MS),
            ops_to_bypass_initial_delay: crate::DEFAULT_OPS_TO_BYPASS_INITIAL_DELAY,
            throttle: ThrottleConfig::default(),
            event_capacity: 64,
        }
    }
}

/// Notifications for the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummaryManagerEvent {
    /// The elected summarizer client changed
    ElectedClientChanged(Option<ClientId>),
    /// Something went wrong that the host should know about; never fatal
    Warning(SummarizingWarning),
}

/// Snapshot of the manager, published after every processed event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerStatus {
    pub state: SummaryManagerState,
    pub connected: bool,
    pub client_id: Option<ClientId>,
    pub latest_client_id: Option<ClientId>,
    pub elected_client_id: Option<ClientId>,
    pub tracked_clients: usize,
    pub summarizer_workers: usize,
    pub throttle_attempts: usize,
    pub disposed: bool,
}

impl ManagerStatus {
    fn initial() -> Self {
        Self {
            state: SummaryManagerState::Off,
            connected: false,
            client_id: None,
            latest_client_id: None,
            elected_client_id: None,
            tracked_clients: 0,
            summarizer_workers: 0,
            throttle_attempts: 0,
            disposed: false,
        }
    }
}

enum Command {
    Connected(ClientId),
    Disconnected,
    Dispose,
    Membership(QuorumEvent),
}

enum Internal {
    SpawnFinished {
        on_behalf_of: ClientId,
        result: Result<Arc<dyn SummarizerHandle>>,
    },
    SpawnCancelled,
    RunFinished {
        result: Result<()>,
        elapsed: Duration,
    },
    Warning(SummarizingWarning),
}

enum Step {
    Internal(Internal),
    Command(Option<Command>),
    Quorum(std::result::Result<QuorumEvent, RecvError>),
}

/// Host-side handle to a running [`SummaryManager`]
#[derive(Clone)]
pub struct SummaryManagerHandle {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ManagerStatus>,
    events: broadcast::Sender<SummaryManagerEvent>,
}

impl SummaryManagerHandle {
    /// The local client connected under `client_id`
    pub fn set_connected(&self, client_id: impl Into<ClientId>) -> Result<()> {
        self.send(Command::Connected(client_id.into()))
    }

    /// The local client lost its connection
    pub fn set_disconnected(&self) -> Result<()> {
        self.send(Command::Disconnected)
    }

    /// Dispose the manager; a running summarizer is stopped on the next event
    pub fn dispose(&self) -> Result<()> {
        self.send(Command::Dispose)
    }

    /// Feed a membership addition directly
    pub fn member_added(&self, client_id: impl Into<ClientId>, client: SequencedClient) -> Result<()> {
        self.send(Command::Membership(QuorumEvent::MemberAdded {
            client_id: client_id.into(),
            client,
        }))
    }

    /// Feed a membership removal directly
    pub fn member_removed(&self, client_id: impl Into<ClientId>) -> Result<()> {
        self.send(Command::Membership(QuorumEvent::MemberRemoved {
            client_id: client_id.into(),
        }))
    }

    /// Currently elected summarizer client
    pub fn elected_client_id(&self) -> Option<ClientId> {
        self.status.borrow().elected_client_id.clone()
    }

    pub fn state(&self) -> SummaryManagerState {
        self.status.borrow().state
    }

    pub fn status(&self) -> ManagerStatus {
        self.status.borrow().clone()
    }

    /// Receiver of status snapshots
    pub fn status_changes(&self) -> watch::Receiver<ManagerStatus> {
        self.status.clone()
    }

    /// Wait until the status satisfies `predicate`
    pub async fn wait_for<F>(&self, mut predicate: F) -> Result<ManagerStatus>
    where
        F: FnMut(&ManagerStatus) -> bool,
    {
        let mut status = self.status.clone();
        let matched = status
            .wait_for(|s| predicate(s))
            .await
            .map_err(|_| SummaryError::ManagerClosed)?;
        Ok(matched.clone())
    }

    /// Subscribe to elected-client changes and warnings
    pub fn subscribe(&self) -> broadcast::Receiver<SummaryManagerEvent> {
        self.events.subscribe()
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| SummaryError::ManagerClosed)
    }
}

/// Elects the summarizer client and supervises the local summarizer
pub struct SummaryManager {
    config: SummaryManagerConfig,
    quorum: Arc<dyn Quorum>,
    deltas: Arc<dyn DeltaSource>,
    factory: Arc<dyn SummarizerFactory>,

    heap: MembershipHeap,
    throttler: Throttler,
    state: SummaryManagerState,
    client_id: Option<ClientId>,
    latest_client_id: Option<ClientId>,
    connected: bool,
    elected_client_id: Option<ClientId>,
    running: Option<Arc<dyn SummarizerHandle>>,
    disposed: bool,
    ops_until_first_connect: Option<u64>,
    initial_delay_deadline: Instant,
    dispose_signal: DisposeSignal,

    commands: mpsc::UnboundedReceiver<Command>,
    commands_closed: bool,
    quorum_events: Option<broadcast::Receiver<QuorumEvent>>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    status: watch::Sender<ManagerStatus>,
    events: broadcast::Sender<SummaryManagerEvent>,
}

impl SummaryManager {
    /// Create a manager and its handle; drive it with [`SummaryManager::run`]
    ///
    /// The initial-delay timer starts now.
    pub fn new(
        config: SummaryManagerConfig,
        quorum: Arc<dyn Quorum>,
        deltas: Arc<dyn DeltaSource>,
        factory: Arc<dyn SummarizerFactory>,
    ) -> (Self, SummaryManagerHandle) {
        // Subscribe before taking the snapshot; a duplicate add is harmless
        let quorum_events = quorum.subscribe();
        let heap = MembershipHeap::new(quorum.members());

        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (status, status_rx) = watch::channel(ManagerStatus::initial());
        let (events, _) = broadcast::channel(config.event_capacity.max(1));

        let handle = SummaryManagerHandle {
            commands: commands_tx,
            status: status_rx,
            events: events.clone(),
        };

        let manager = Self {
            throttler: Throttler::new(config.throttle.clone()),
            initial_delay_deadline: Instant::now() + config.initial_delay,
            config,
            quorum,
            deltas,
            factory,
            heap,
            state: SummaryManagerState::Off,
            client_id: None,
            latest_client_id: None,
            connected: false,
            elected_client_id: None,
            running: None,
            disposed: false,
            ops_until_first_connect: None,
            dispose_signal: DisposeSignal::new(),
            commands,
            commands_closed: false,
            quorum_events: Some(quorum_events),
            internal_tx,
            internal_rx,
            status,
            events,
        };
        manager.publish_status();

        (manager, handle)
    }

    /// Create a manager and run it on the current tokio runtime
    pub fn spawn(
        config: SummaryManagerConfig,
        quorum: Arc<dyn Quorum>,
        deltas: Arc<dyn DeltaSource>,
        factory: Arc<dyn SummarizerFactory>,
    ) -> SummaryManagerHandle {
        let (manager, handle) = Self::new(config, quorum, deltas, factory);
        tokio::spawn(manager.run());
        handle
    }

    /// Process events until every handle is dropped and no summarizer is live
    pub async fn run(mut self) {
        info!(
            "Summary manager starting with {} tracked clients",
            self.heap.len()
        );
        self.refresh_summarizer();
        self.publish_status();

        loop {
            // Commands go ahead of quorum events, so a connect sent before
            // the local join is seen is applied first
            let step = tokio::select! {
                biased;
                Some(event) = self.internal_rx.recv() => Step::Internal(event),
                command = self.commands.recv(), if !self.commands_closed => Step::Command(command),
                event = next_quorum_event(&mut self.quorum_events), if self.quorum_events.is_some() => {
                    Step::Quorum(event)
                }
            };

            match step {
                Step::Internal(event) => self.handle_internal(event),
                Step::Command(Some(command)) => self.handle_command(command),
                Step::Command(None) => {
                    debug!("All summary manager handles dropped");
                    self.commands_closed = true;
                    if !self.disposed {
                        self.dispose();
                        self.refresh_summarizer();
                    }
                }
                Step::Quorum(Ok(event)) => self.handle_membership(event),
                Step::Quorum(Err(RecvError::Lagged(missed))) => {
                    warn!("Missed {} quorum events, resynchronizing membership", missed);
                    self.heap = MembershipHeap::new(self.quorum.members());
                    self.refresh_summarizer();
                }
                Step::Quorum(Err(RecvError::Closed)) => {
                    debug!("Quorum event stream closed");
                    self.quorum_events = None;
                }
            }
            self.publish_status();

            if self.commands_closed && !self.state.is_active() {
                break;
            }
        }

        info!("Summary manager stopped in state {:?}", self.state);
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connected(client_id) => self.update_connected(true, Some(client_id)),
            Command::Disconnected => self.update_connected(false, None),
            Command::Dispose => self.dispose(),
            Command::Membership(event) => self.handle_membership(event),
        }
    }

    fn handle_membership(&mut self, event: QuorumEvent) {
        let changed = match event {
            QuorumEvent::MemberAdded { client_id, client } => {
                if self.client_id.as_ref() == Some(&client_id) {
                    self.observe_first_connect(client.sequence_number);
                }
                self.heap.add_client(client_id, &client)
            }
            QuorumEvent::MemberRemoved { client_id } => self.heap.remove_client(&client_id),
        };

        if changed {
            self.refresh_summarizer();
        }
    }

    fn handle_internal(&mut self, event: Internal) {
        match event {
            Internal::SpawnFinished { on_behalf_of, result } => match result {
                Ok(summarizer) => self.run_summarizer(summarizer, on_behalf_of),
                Err(e) => {
                    standard::SPAWN_FAILURES.inc();
                    error!(
                        "Failed to create summarizer (attempt {}, retryable {}): {}",
                        self.throttler.attempts(),
                        e.is_retryable(),
                        e
                    );
                    self.try_restart();
                }
            },
            Internal::SpawnCancelled => {
                debug!("Summarizer creation cancelled by disposal");
                self.try_restart();
            }
            Internal::RunFinished { result, elapsed } => {
                self.running = None;
                standard::RUNNING_SUMMARIZERS.dec();
                standard::RUNS_COMPLETED.inc();
                standard::RUN_DURATION.observe(elapsed);
                match result {
                    Ok(()) => info!(
                        "Summarizer stopped after {:?} (attempt {})",
                        elapsed,
                        self.throttler.attempts()
                    ),
                    Err(e) => warn!("Summarizer failed after {:?}: {}", elapsed, e),
                }
                self.try_restart();
            }
            Internal::Warning(warning) => self.raise_warning(warning),
        }
    }

    fn update_connected(&mut self, connected: bool, client_id: Option<ClientId>) {
        if self.connected == connected {
            return;
        }

        self.connected = connected;
        self.set_client_id(client_id);

        // The local join may already have been applied before the connect
        let joined_at = self
            .client_id
            .as_ref()
            .and_then(|id| self.heap.get(id))
            .map(|tracked| tracked.join_sequence_number);
        if let Some(sequence_number) = joined_at {
            self.observe_first_connect(sequence_number);
        }

        self.refresh_summarizer();
    }

    fn observe_first_connect(&mut self, join_sequence_number: u64) {
        if self.ops_until_first_connect.is_some() {
            return;
        }
        let ops = join_sequence_number.saturating_sub(self.deltas.initial_sequence_number());
        debug!("{} ops before first connect", ops);
        self.ops_until_first_connect = Some(ops);
    }

    fn set_client_id(&mut self, client_id: Option<ClientId>) {
        self.client_id = client_id.clone();
        if let Some(client_id) = client_id {
            debug!("Local client is now {}", client_id);
            if let Some(running) = &self.running {
                running.update_on_behalf_of(client_id.clone());
            }
            self.latest_client_id = Some(client_id);
        }
    }

    fn should_summarize(&self) -> ShouldSummarize {
        if !self.connected {
            ShouldSummarize::NotConnected
        } else if self.client_id != self.elected_client_id {
            ShouldSummarize::NotElected
        } else if self.disposed {
            ShouldSummarize::Disposed
        } else if self.heap.summarizer_worker_count() > 0 {
            // Summarizer clients can outlive their parent; wait for them to leave
            ShouldSummarize::ElectedButWaiting
        } else {
            ShouldSummarize::ElectedAndReady
        }
    }

    /// Local client id, if a summarizer should be started for it now
    fn ready_client_id(&self) -> Option<ClientId> {
        if self.should_summarize().should_start() {
            self.client_id.clone()
        } else {
            None
        }
    }

    fn refresh_summarizer(&mut self) {
        let elected = self.heap.elected_client_id().cloned();
        if elected != self.elected_client_id {
            info!(
                "Elected summarizer client changed: {:?} -> {:?}",
                self.elected_client_id, elected
            );
            standard::ELECTED_CLIENT_CHANGES.inc();
            self.elected_client_id = elected.clone();
            self.emit(SummaryManagerEvent::ElectedClientChanged(elected));
        }

        match self.state {
            SummaryManagerState::Off => {
                if let Some(client_id) = self.ready_client_id() {
                    self.start(client_id);
                }
            }
            SummaryManagerState::Running => {
                if let Some(reason) = self.should_summarize().stop_reason() {
                    self.stop(reason);
                }
            }
            // Starting and Stopping wait for the spawn or run to finish;
            // Disabled never changes
            SummaryManagerState::Starting
            | SummaryManagerState::Stopping
            | SummaryManagerState::Disabled => {}
        }
    }

    fn start(&mut self, on_behalf_of: ClientId) {
        if !self.config.summaries_enabled {
            info!("Summaries disabled for this client");
            self.set_state(SummaryManagerState::Disabled);
            return;
        }
        if self.config.client_details.is_summarizer() {
            // A summarizer client must not load another summarizer
            info!("Local client is a summarizer, not starting a nested one");
            self.set_state(SummaryManagerState::Disabled);
            return;
        }
        self.set_state(SummaryManagerState::Starting);

        let delay = self.throttler.get_delay();
        if delay >= self.throttler.max_delay() {
            standard::THROTTLE_MAX_DELAY.inc();
            self.raise_warning(SummarizingWarning::new(
                "SummaryManager: CreateSummarizer Max Throttle Delay",
                false,
            ));
        }

        let initial_delay = self.should_initial_delay().then_some(self.initial_delay_deadline);
        standard::SPAWN_ATTEMPTS.inc();
        info!(
            "Creating summarizer for {} (delay {:?}, initial delay {}, ops until first connect {:?})",
            on_behalf_of,
            delay,
            initial_delay.is_some(),
            self.ops_until_first_connect
        );

        let factory = self.factory.clone();
        let deltas = self.deltas.clone();
        let dispose_signal = self.dispose_signal.clone();
        let internal_tx = self.internal_tx.clone();
        let throttle_deadline = Instant::now() + delay;

        tokio::spawn(async move {
            let (initial_elapsed, throttle_elapsed) = tokio::join!(
                async {
                    match initial_delay {
                        Some(deadline) => dispose_signal.sleep_until(deadline).await,
                        None => true,
                    }
                },
                async {
                    if delay.is_zero() {
                        true
                    } else {
                        dispose_signal.sleep_until(throttle_deadline).await
                    }
                },
            );

            let event = if initial_elapsed && throttle_elapsed {
                let request = SummarizerRequest::new(on_behalf_of.clone(), deltas.last_sequence_number());
                let result = factory.spawn(request).await;
                Internal::SpawnFinished { on_behalf_of, result }
            } else {
                Internal::SpawnCancelled
            };
            // The manager may already be gone; nothing left to report to
            let _ = internal_tx.send(event);
        });
    }

    fn run_summarizer(&mut self, summarizer: Arc<dyn SummarizerHandle>, requested_for: ClientId) {
        self.set_state(SummaryManagerState::Running);
        standard::RUNNING_SUMMARIZERS.inc();

        let on_behalf_of = self.latest_client_id.clone().unwrap_or(requested_for);
        self.running = Some(summarizer.clone());
        info!("Summarizer running on behalf of {}", on_behalf_of);

        let internal_tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            let mut warnings = summarizer.warnings();
            let run = summarizer.run(on_behalf_of);
            tokio::pin!(run);

            let result = loop {
                tokio::select! {
                    result = &mut run => break result,
                    warning = warnings.recv() => match warning {
                        Ok(warning) => {
                            let _ = internal_tx.send(Internal::Warning(warning));
                        }
                        Err(RecvError::Lagged(missed)) => {
                            warn!("Dropped {} summarizer warnings", missed);
                        }
                        Err(RecvError::Closed) => break run.as_mut().await,
                    },
                }
            };

            let _ = internal_tx.send(Internal::RunFinished {
                result,
                elapsed: started.elapsed(),
            });
        });

        // Membership may have changed while the summarizer was being created
        if let Some(reason) = self.should_summarize().stop_reason() {
            self.stop(reason);
        }
    }

    fn try_restart(&mut self) {
        match self.ready_client_id() {
            Some(client_id) => self.start(client_id),
            None => self.set_state(SummaryManagerState::Off),
        }
    }

    fn stop(&mut self, reason: StopReason) {
        self.set_state(SummaryManagerState::Stopping);

        match &self.running {
            Some(running) => {
                info!("Stopping summarizer: {}", reason);
                running.stop(reason);
            }
            None => {
                error!("Stop called without a running summarizer ({})", reason);
                self.set_state(SummaryManagerState::Off);
            }
        }
    }

    fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        info!("Disposing summary manager");
        self.disposed = true;
        self.dispose_signal.dispose();
    }

    fn should_initial_delay(&self) -> bool {
        self.ops_until_first_connect
            .map_or(true, |ops| ops < self.config.ops_to_bypass_initial_delay)
    }

    fn raise_warning(&self, warning: SummarizingWarning) {
        warn!("Summarizing warning: {}", warning.message);
        self.emit(SummaryManagerEvent::Warning(warning));
    }

    fn emit(&self, event: SummaryManagerEvent) {
        // Nobody listening is fine
        let _ = self.events.send(event);
    }

    fn set_state(&mut self, state: SummaryManagerState) {
        if self.state != state {
            debug!("Summary manager state {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    fn publish_status(&self) {
        self.status.send_replace(ManagerStatus {
            state: self.state,
            connected: self.connected,
            client_id: self.client_id.clone(),
            latest_client_id: self.latest_client_id.clone(),
            elected_client_id: self.elected_client_id.clone(),
            tracked_clients: self.heap.len(),
            summarizer_workers: self.heap.summarizer_worker_count(),
            throttle_attempts: self.throttler.attempts(),
            disposed: self.disposed,
        });
    }
}

async fn next_quorum_event(
    events: &mut Option<broadcast::Receiver<QuorumEvent>>,
) -> std::result::Result<QuorumEvent, RecvError> {
    match events {
        Some(events) => events.recv().await,
        None => pending().await,
    }
}
