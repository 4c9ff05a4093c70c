//! Summarizer Lifecycle Manager
//!
//! Decides, on each replica independently, whether this replica is responsible
//! for the session's dedicated maintenance role, and supervises exactly one
//! instance of it when so. Responsibility follows the deterministic election, so
//! all replicas agree on the role holder from the log order alone.
//!
//! ## Responsibilities
//! - **Election Consumption**: Feeds membership events into `OrderedClientElection`
//!   and reacts when the elected identity changes.
//! - **Lifecycle**: `Off -> Starting -> Running -> Stopping -> Off`, with absorbing
//!   `Disabled`. Creation failures retry forever at the throttled rate.
//! - **Supervision**: Awaits the instance's run-to-exit signal and unconditionally
//!   re-evaluates afterwards; stopping is cooperative via a watch signal.
//! - **Telemetry Gate**: Tracks ordering traffic since the last summary
//!   acknowledgement and raises a one-shot diagnostic when it lags too far.

use anyhow::Result;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{oneshot, watch, Mutex};

use crate::election::election::{ElectionEvent, OrderedClientElection};
use crate::log::types::{ClientCapabilities, ClientId, LogEvent};

use super::throttler::Throttler;

/// Lifecycle of the locally supervised summarizer instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Off,
    Starting,
    Running,
    Stopping,
    /// Terminal: summaries are globally disabled, or this replica is itself the
    /// summarizer client type and must never spawn a nested instance.
    Disabled,
}

/// Why `should_summarize` currently answers no.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummarizeBlocked {
    ParentNotConnected,
    ParentShouldNotSummarize,
    Disposed,
}

impl SummarizeBlocked {
    pub fn as_str(&self) -> &'static str {
        match self {
            SummarizeBlocked::ParentNotConnected => "parentNotConnected",
            SummarizeBlocked::ParentShouldNotSummarize => "parentShouldNotSummarize",
            SummarizeBlocked::Disposed => "disposed",
        }
    }
}

/// Handle to one spawned summarizer execution context.
///
/// `stop` is the cooperative shutdown signal; the instance is expected to observe
/// it and exit its own loop. `done` resolves when the instance has exited,
/// successfully or not.
pub struct SummarizerHandle {
    pub stop: watch::Sender<bool>,
    pub done: oneshot::Receiver<Result<()>>,
}

/// Creates isolated summarizer execution contexts on request.
pub trait SummarizerFactory: Send + Sync {
    fn create(&self) -> Pin<Box<dyn Future<Output = Result<SummarizerHandle>> + Send>>;
}

/// Tuning for the lifecycle manager.
pub struct SummaryConfig {
    /// Global kill switch; `false` sends `start()` straight to `Disabled`.
    pub enabled: bool,
    /// Initial delay before the first spawn in a fresh session.
    pub grace_delay: Duration,
    /// Ordering traffic since first connection that waives the grace delay.
    pub initial_ops_threshold: u64,
    /// Ops since the last acknowledgement above which the one-shot ack-lag
    /// diagnostic fires.
    pub ack_lag_threshold: u64,
    pub throttle_window: Duration,
    pub throttle_max_delay: Duration,
    pub throttle_base_delay: Duration,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            grace_delay: Duration::from_secs(5),
            initial_ops_threshold: 50,
            ack_lag_threshold: 4000,
            throttle_window: Duration::from_secs(60),
            throttle_max_delay: Duration::from_secs(30),
            throttle_base_delay: Duration::from_millis(500),
        }
    }
}

/// Notifications delivered to the owning replica.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummaryNotification {
    /// The elected role holder changed (including to/from none).
    RoleHolderChanged(Option<ClientId>),
    /// The restart throttle reached its ceiling; retries continue.
    ThrottleCeiling { delay: Duration },
    /// Ordering traffic is running far ahead of summary acknowledgements.
    AckLag { ops: u64 },
}

pub struct SummaryManager {
    config: SummaryConfig,
    /// Whether the local replica is itself the summarizer client type.
    local_is_summarizer: bool,
    factory: Arc<dyn SummarizerFactory>,
    inner: Mutex<Inner>,
    notifications: UnboundedSender<SummaryNotification>,
    disposed: watch::Sender<bool>,
}

struct Inner {
    state: LifecycleState,
    election: OrderedClientElection,
    /// Identity of the current connection, while connected.
    connected_as: Option<ClientId>,
    ever_connected: bool,
    throttler: Throttler,
    ops_since_first_connect: u64,
    ops_since_ack: u64,
    ack_lag_flagged: bool,
    /// Stop signal of the instance being supervised, while one is running.
    running_stop: Option<watch::Sender<bool>>,
}

impl SummaryManager {
    pub fn new(
        local_capabilities: ClientCapabilities,
        config: SummaryConfig,
        factory: Arc<dyn SummarizerFactory>,
    ) -> (Arc<Self>, UnboundedReceiver<SummaryNotification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (disposed, _) = watch::channel(false);

        let throttler = Throttler::exponential(
            config.throttle_window,
            config.throttle_max_delay,
            config.throttle_base_delay,
        );

        // Only interactive clients permitted to summarize, and never the
        // synthetic detached placeholder, may hold the role.
        let election = OrderedClientElection::new(Box::new(|record| {
            record.capabilities.interactive
                && record.capabilities.can_summarize
                && !record.id.is_detached_placeholder()
        }));

        let manager = Arc::new(Self {
            local_is_summarizer: !local_capabilities.interactive,
            config,
            factory,
            inner: Mutex::new(Inner {
                state: LifecycleState::Off,
                election,
                connected_as: None,
                ever_connected: false,
                throttler,
                ops_since_first_connect: 0,
                ops_since_ack: 0,
                ack_lag_flagged: false,
                running_stop: None,
            }),
            notifications: tx,
            disposed,
        });

        (manager, rx)
    }

    pub async fn state(&self) -> LifecycleState {
        self.inner.lock().await.state
    }

    /// The deterministic election winner, as currently observed.
    pub async fn elected_role_holder(&self) -> Option<ClientId> {
        self.inner.lock().await.election.elected_client().cloned()
    }

    /// Whether this replica is currently responsible for summarizing, or why not.
    pub async fn should_summarize(&self) -> Result<(), SummarizeBlocked> {
        let inner = self.inner.lock().await;
        self.should_summarize_inner(&inner)
    }

    /// Dispatches one log event: feeds the election, counts ordering traffic,
    /// and re-evaluates the lifecycle when the election output changed.
    pub async fn handle_event(self: &Arc<Self>, event: &LogEvent) {
        let (changes, lag) = {
            let mut inner = self.inner.lock().await;

            inner.ops_since_first_connect = inner.ops_since_first_connect.saturating_add(1);
            inner.ops_since_ack = inner.ops_since_ack.saturating_add(1);
            let lag = self.check_ack_lag(&mut inner);

            let changes = match event {
                LogEvent::MemberAdded { record } => inner.election.member_added(record.clone()),
                LogEvent::MemberRemoved { client_id } => inner.election.member_removed(client_id),
                LogEvent::EntryChanged { .. } => Vec::new(),
            };

            (changes, lag)
        };

        if let Some(ops) = lag {
            tracing::warn!("Summary acknowledgement lagging: {} ops since last ack", ops);
            self.emit(SummaryNotification::AckLag { ops });
        }

        for change in changes {
            if let ElectionEvent::ElectedChanged(elected) = change {
                self.emit(SummaryNotification::RoleHolderChanged(elected));
            }
        }

        // Any membership change can affect responsibility, not just an elected
        // identity change: a draining summarizer client leaving the quorum
        // unblocks should_start without moving the election.
        if matches!(
            event,
            LogEvent::MemberAdded { .. } | LogEvent::MemberRemoved { .. }
        ) {
            self.evaluate().await;
        }
    }

    /// Marks the local replica connected under the given identity.
    pub async fn set_connected(self: &Arc<Self>, client_id: ClientId) {
        {
            let mut inner = self.inner.lock().await;
            inner.connected_as = Some(client_id);
            if !inner.ever_connected {
                inner.ever_connected = true;
                inner.ops_since_first_connect = 0;
            }
        }
        self.evaluate().await;
    }

    /// Marks the local replica disconnected. A running instance is stopped
    /// through the normal lifecycle evaluation.
    pub async fn set_disconnected(self: &Arc<Self>) {
        {
            let mut inner = self.inner.lock().await;
            inner.connected_as = None;
        }
        self.evaluate().await;
    }

    /// Records a summary acknowledgement: resets the lag counter and re-arms the
    /// one-shot diagnostic.
    pub async fn note_ack(&self) {
        let mut inner = self.inner.lock().await;
        inner.ops_since_ack = 0;
        inner.ack_lag_flagged = false;
    }

    /// Records one sequenced operation that did not arrive through `handle_event`.
    pub async fn note_op(self: &Arc<Self>) {
        let lag = {
            let mut inner = self.inner.lock().await;
            inner.ops_since_first_connect = inner.ops_since_first_connect.saturating_add(1);
            inner.ops_since_ack = inner.ops_since_ack.saturating_add(1);
            self.check_ack_lag(&mut inner)
        };

        if let Some(ops) = lag {
            tracing::warn!("Summary acknowledgement lagging: {} ops since last ack", ops);
            self.emit(SummaryNotification::AckLag { ops });
        }
    }

    /// Cancels pending delays, suppresses further starts, and signals a running
    /// instance to stop. Irreversible.
    pub async fn dispose(&self) {
        let _ = self.disposed.send(true);

        let mut inner = self.inner.lock().await;
        if let Some(stop) = inner.running_stop.take() {
            let _ = stop.send(true);
        }

        tracing::info!("Summary manager disposed");
    }

    /// Attempts to bring the summarizer up.
    ///
    /// Transitions to `Disabled` (terminal) when summaries are globally off or
    /// the local replica is role-typed. Otherwise paces itself through the
    /// throttle, optionally waits out the initial grace delay, creates the
    /// instance, and hands it to the supervision task. Every suspension point is
    /// followed by a re-check, so a stale start settles back to `Off` instead of
    /// spawning a duplicate.
    ///
    /// Returns a boxed future: the start path re-enters itself through
    /// supervision and restart, which an opaque `async fn` future cannot express.
    pub fn start(self: &Arc<Self>) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        let manager = self.clone();
        Box::pin(async move { manager.start_inner().await })
    }

    async fn start_inner(self: Arc<Self>) {
        {
            let mut inner = self.inner.lock().await;

            if inner.state == LifecycleState::Disabled {
                return;
            }
            if !self.config.enabled || self.local_is_summarizer {
                tracing::info!(
                    "Summarizer disabled (enabled: {}, role-typed: {})",
                    self.config.enabled,
                    self.local_is_summarizer
                );
                inner.state = LifecycleState::Disabled;
                return;
            }
            if inner.state != LifecycleState::Off {
                return;
            }
            if self.should_summarize_inner(&inner).is_err() {
                return;
            }

            inner.state = LifecycleState::Starting;
        }

        let (delay, at_ceiling, need_grace) = {
            let mut inner = self.inner.lock().await;
            let delay = inner.throttler.get_delay();
            let at_ceiling = inner.throttler.at_ceiling(delay);
            let need_grace = inner.ops_since_first_connect < self.config.initial_ops_threshold;
            (delay, at_ceiling, need_grace)
        };

        if at_ceiling {
            tracing::warn!("Summarizer restart throttle at ceiling ({:?})", delay);
            self.emit(SummaryNotification::ThrottleCeiling { delay });
        }

        if delay > Duration::ZERO && !self.sleep_unless_disposed(delay).await {
            self.settle_off().await;
            return;
        }

        // Fresh sessions wait a moment before spawning; sessions with real
        // ordering traffic behind them start immediately.
        if need_grace && !self.sleep_unless_disposed(self.config.grace_delay).await {
            self.settle_off().await;
            return;
        }

        {
            let inner = self.inner.lock().await;
            if inner.state != LifecycleState::Starting
                || self.should_summarize_inner(&inner).is_err()
            {
                drop(inner);
                self.settle_off().await;
                return;
            }
        }

        match self.factory.create().await {
            Ok(handle) => {
                let stale_recheck = {
                    let mut inner = self.inner.lock().await;

                    if inner.state != LifecycleState::Starting {
                        // Raced with disposal or a forced reset; shut the fresh
                        // instance back down.
                        let _ = handle.stop.send(true);
                        return;
                    }

                    inner.state = LifecycleState::Running;
                    inner.running_stop = Some(handle.stop);
                    self.should_summarize_inner(&inner).err()
                };

                tracing::info!("Summarizer instance running");

                let manager = self.clone();
                let done = handle.done;
                tokio::spawn(async move {
                    manager.supervise(done).await;
                });

                // The election may have moved while we were creating.
                if let Some(blocked) = stale_recheck {
                    self.stop(blocked.as_str()).await;
                }
            }
            Err(e) => {
                tracing::warn!("Failed to create summarizer instance: {}", e);
                self.settle_off().await;
                self.try_restart().await;
            }
        }
    }

    /// Signals the running instance to shut down cooperatively.
    ///
    /// Calling this with nothing running is an internal invariant violation: it
    /// is logged as an error and the state force-reset, never surfaced.
    pub async fn stop(&self, reason: &str) {
        let mut inner = self.inner.lock().await;

        match inner.running_stop.take() {
            Some(stop) => {
                tracing::info!("Stopping summarizer: {}", reason);
                inner.state = LifecycleState::Stopping;
                let _ = stop.send(true);
            }
            None => {
                tracing::error!(
                    "stop('{}') with no summarizer running; forcing state to Off",
                    reason
                );
                if inner.state != LifecycleState::Disabled {
                    inner.state = LifecycleState::Off;
                }
            }
        }
    }

    /// Settles to `Off`, then starts again if this replica is still responsible.
    pub async fn try_restart(self: &Arc<Self>) {
        let restart = {
            let mut inner = self.inner.lock().await;

            if inner.state == LifecycleState::Disabled {
                false
            } else {
                inner.running_stop = None;
                inner.state = LifecycleState::Off;
                self.should_summarize_inner(&inner).is_ok() && Self::should_start_inner(&inner)
            }
        };

        if restart {
            let manager = self.clone();
            tokio::spawn(async move {
                manager.start().await;
            });
        }
    }

    /// Awaits the instance's run-to-exit signal, then unconditionally
    /// re-evaluates whether to restart.
    async fn supervise(self: Arc<Self>, done: oneshot::Receiver<Result<()>>) {
        match done.await {
            Ok(Ok(())) => tracing::info!("Summarizer instance exited"),
            Ok(Err(e)) => tracing::warn!("Summarizer instance exited with error: {}", e),
            Err(_) => tracing::warn!("Summarizer instance dropped its completion channel"),
        }

        self.try_restart().await;
    }

    /// Central reaction to any relevant state change: start when responsible and
    /// idle, stop when running and no longer responsible.
    async fn evaluate(self: &Arc<Self>) {
        enum Action {
            Nothing,
            Start,
            Stop(&'static str),
        }

        let action = {
            let inner = self.inner.lock().await;
            match inner.state {
                LifecycleState::Off => {
                    if self.should_summarize_inner(&inner).is_ok() && Self::should_start_inner(&inner)
                    {
                        Action::Start
                    } else {
                        Action::Nothing
                    }
                }
                LifecycleState::Running => match self.should_summarize_inner(&inner) {
                    Err(blocked) => Action::Stop(blocked.as_str()),
                    Ok(()) => Action::Nothing,
                },
                // A stale Starting settles through start()'s own re-checks.
                LifecycleState::Starting
                | LifecycleState::Stopping
                | LifecycleState::Disabled => Action::Nothing,
            }
        };

        match action {
            Action::Start => {
                let manager = self.clone();
                tokio::spawn(async move {
                    manager.start().await;
                });
            }
            Action::Stop(reason) => self.stop(reason).await,
            Action::Nothing => {}
        }
    }

    fn should_summarize_inner(&self, inner: &Inner) -> Result<(), SummarizeBlocked> {
        if *self.disposed.borrow() {
            return Err(SummarizeBlocked::Disposed);
        }
        let connected_as = match &inner.connected_as {
            Some(id) => id,
            None => return Err(SummarizeBlocked::ParentNotConnected),
        };
        if inner.election.elected_client() != Some(connected_as) {
            return Err(SummarizeBlocked::ParentShouldNotSummarize);
        }
        Ok(())
    }

    /// Guards against a duplicate spawn while a previous summarizer client is
    /// still draining out of the quorum.
    fn should_start_inner(inner: &Inner) -> bool {
        !inner
            .election
            .members()
            .any(|member| !member.capabilities.interactive)
    }

    fn check_ack_lag(&self, inner: &mut Inner) -> Option<u64> {
        if inner.election.elected_client().is_none() {
            return None;
        }
        if inner.ops_since_ack > self.config.ack_lag_threshold && !inner.ack_lag_flagged {
            inner.ack_lag_flagged = true;
            return Some(inner.ops_since_ack);
        }
        None
    }

    /// Returns `false` when disposal cut the wait short.
    async fn sleep_unless_disposed(&self, delay: Duration) -> bool {
        let mut disposed = self.disposed.subscribe();
        if *disposed.borrow() {
            return false;
        }

        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = disposed.changed() => false,
        }
    }

    async fn settle_off(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state == LifecycleState::Starting {
            inner.state = LifecycleState::Off;
        }
    }

    fn emit(&self, notification: SummaryNotification) {
        tracing::debug!("Summary notification: {:?}", notification);
        let _ = self.notifications.send(notification);
    }
}
