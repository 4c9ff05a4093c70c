//! Opportunistic Task Scheduler
//!
//! Drives claim, release, and self-healing of named tasks for one replica. All
//! cross-replica agreement goes through the shared claim register: this scheduler
//! only writes claim/clear entries and reacts to the log-ordered events that come
//! back, so every replica fed the same event order lands on the same owners.
//!
//! ## Responsibilities
//! - **User Operations**: `register` / `pick` / `release` / `picked_tasks`, with
//!   duplicate or out-of-order calls rejected synchronously and without mutation.
//! - **Reactive Rules**: On register changes, membership removals, and local
//!   connectivity flips, claim unclaimed entries of interest, clear or take over
//!   entries owned by departed clients, and start/stop local workers.
//! - **Worker Launch**: Confirmed ownership spawns the task's worker; a worker
//!   error is logged and the claim is kept (no automatic retry).

use anyhow::{bail, Result};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::log::session::SessionLog;
use crate::log::types::{ClientId, ClientRecord, LogEvent, RegisterValue};

use super::registry::TaskRegistry;
use super::types::{TaskId, TaskNotification, TaskWorker};

pub struct AgentScheduler {
    log: Arc<SessionLog>,
    local_id: ClientId,
    /// Attached and connected; only active replicas write to the register.
    active: bool,
    registry: TaskRegistry,
    notifications: UnboundedSender<TaskNotification>,
}

impl AgentScheduler {
    /// Creates a scheduler for one replica. Identity is passed in explicitly;
    /// the replica starts inactive until `set_connected` is called.
    pub fn new(
        log: Arc<SessionLog>,
        record: &ClientRecord,
    ) -> (Self, UnboundedReceiver<TaskNotification>) {
        let (tx, rx) = mpsc::unbounded_channel();

        (
            Self {
                log,
                local_id: record.id.clone(),
                active: false,
                registry: TaskRegistry::new(),
                notifications: tx,
            },
            rx,
        )
    }

    pub fn local_id(&self) -> &ClientId {
        &self.local_id
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Announces tasks to the session.
    ///
    /// This is availability broadcast only, never a claim: entries that do not
    /// exist yet are written as unclaimed so other replicas learn the task name.
    /// Re-registering an id already registered here is a user error; nothing is
    /// mutated in that case.
    pub fn register(&mut self, task_ids: &[TaskId]) -> Result<()> {
        for task_id in task_ids {
            if self.registry.is_registered(task_id) {
                bail!("Task '{}' is already registered", task_id);
            }
        }

        for task_id in task_ids {
            self.registry.add_registered(task_id.clone());

            if self.log.read(&task_id.0).is_none() {
                self.log.write(&task_id.0, RegisterValue::Unclaimed);
            }

            tracing::debug!("Registered task '{}'", task_id);
        }

        Ok(())
    }

    /// Volunteers to run a task.
    ///
    /// Records interest and, when the entry is currently up for grabs, writes this
    /// replica as claimant. The write racing other replicas is resolved by the
    /// log's order; ownership is only trusted once the subsequent register-change
    /// event names this replica.
    pub fn pick(&mut self, task_id: &TaskId, worker: TaskWorker) -> Result<()> {
        if !self.registry.is_registered(task_id) {
            bail!("Task '{}' must be registered before picking", task_id);
        }
        if self.registry.is_interested(task_id) {
            bail!("Task '{}' was already picked here", task_id);
        }
        if !self.active {
            bail!("Cannot pick task '{}' while not connected", task_id);
        }

        self.registry.add_interest(task_id.clone(), worker);

        let claimable = match self.log.read(&task_id.0) {
            None | Some(RegisterValue::Unclaimed) => true,
            // A departed owner is claimable immediately; this is the same rule
            // the reactive reconciliation applies, just without waiting for an
            // unrelated event.
            Some(RegisterValue::Owned(holder)) => !self.log.contains(&holder),
        };

        if claimable {
            self.log
                .write(&task_id.0, RegisterValue::Owned(self.local_id.clone()));
        }

        tracing::debug!("Picked task '{}' (claimable: {})", task_id, claimable);

        Ok(())
    }

    /// Hands tasks back to the session.
    ///
    /// Every id must be registered and currently observed as owned by this
    /// replica, otherwise the whole call is rejected and nothing is mutated.
    pub fn release(&mut self, task_ids: &[TaskId]) -> Result<()> {
        for task_id in task_ids {
            if !self.registry.is_registered(task_id) {
                bail!("Cannot release unregistered task '{}'", task_id);
            }
            let owned = self
                .log
                .read(&task_id.0)
                .map(|value| value.is_owned_by(&self.local_id))
                .unwrap_or(false);
            if !owned {
                bail!("Cannot release task '{}': not the current owner", task_id);
            }
        }

        for task_id in task_ids {
            self.registry.drop_interest(task_id);
            self.log.write(&task_id.0, RegisterValue::Unclaimed);
            tracing::debug!("Released task '{}'", task_id);
        }

        Ok(())
    }

    /// Tasks currently running on this replica, in confirmation order.
    pub fn picked_tasks(&self) -> Vec<TaskId> {
        self.registry.running().to_vec()
    }

    /// Local transition to active. Reconciles everything that accumulated while
    /// detached: claims this replica still holds from a previous connection are
    /// resumed or handed back, interested-but-unclaimed entries are claimed, and
    /// entries owned by departed clients are claimed or cleared.
    pub fn set_connected(&mut self) {
        if self.active {
            return;
        }
        self.active = true;

        tracing::info!("Replica {} is now active", self.local_id);

        for (key, value) in self.log.entries() {
            let task_id = TaskId(key);

            // An entry we own predates the disconnect; no register event will
            // ever re-confirm it, so it must be resolved here.
            if value.is_owned_by(&self.local_id) {
                if self.registry.is_interested(&task_id) {
                    if !self.registry.is_running(&task_id) {
                        tracing::debug!("Resuming task '{}' held across reconnect", task_id);
                        self.registry.mark_running(task_id.clone());
                        self.start_worker(&task_id);
                        self.emit(TaskNotification::Picked(task_id));
                    }
                } else {
                    tracing::debug!("Releasing stale claim on task '{}'", task_id);
                    self.log.write(&task_id.0, RegisterValue::Unclaimed);
                }
                continue;
            }

            self.reconcile_entry(&task_id);
        }

        // Interests whose entries vanished entirely are re-claimed as well.
        for task_id in self.registry.interests() {
            if self.log.read(&task_id.0).is_none() {
                self.log
                    .write(&task_id.0, RegisterValue::Owned(self.local_id.clone()));
            }
        }
    }

    /// Local transition to inactive. Drops all running tasks and notifies per
    /// task, without touching the shared register; remote reconciliation happens
    /// independently once any replica notices.
    pub fn set_disconnected(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;

        tracing::info!("Replica {} is now inactive", self.local_id);

        for task_id in self.registry.take_running() {
            self.emit(TaskNotification::Lost(task_id));
        }
    }

    /// Dispatches one log event. Runs to completion before the next event is
    /// processed; this is the only place local task state mutates reactively.
    pub fn handle_event(&mut self, event: &LogEvent) {
        match event {
            LogEvent::EntryChanged { key, value } => {
                self.handle_entry_changed(&TaskId(key.clone()), value);
            }
            LogEvent::MemberRemoved { client_id } => {
                self.handle_member_removed(client_id);
            }
            LogEvent::MemberAdded { record } => {
                tracing::trace!("Member {} added; nothing to reconcile", record.id);
            }
        }
    }

    fn handle_entry_changed(&mut self, task_id: &TaskId, value: &RegisterValue) {
        if value.is_owned_by(&self.local_id) {
            // A confirmation that lands after we went inactive is stale; the
            // claim gets reconciled once the quorum drops the old identity.
            if self.active && !self.registry.is_running(task_id) {
                self.registry.mark_running(task_id.clone());
                self.start_worker(task_id);
                self.emit(TaskNotification::Picked(task_id.clone()));
            }
            return;
        }

        if self.registry.is_running(task_id) {
            self.registry.mark_not_running(task_id);
            self.emit(TaskNotification::Released(task_id.clone()));
        }

        match value {
            RegisterValue::Unclaimed => {
                // Opportunistic pickup of a freed task we volunteered for.
                if self.active && self.registry.is_interested(task_id) {
                    self.log
                        .write(&task_id.0, RegisterValue::Owned(self.local_id.clone()));
                }
            }
            RegisterValue::Owned(holder) => {
                if !self.log.contains(holder) {
                    self.reconcile_entry(task_id);
                }
            }
        }
    }

    /// Applies the claim-or-clear rule to every entry a departed member owned,
    /// immediately rather than waiting for the next unrelated register event.
    fn handle_member_removed(&mut self, removed: &ClientId) {
        for (key, value) in self.log.entries() {
            if value.is_owned_by(removed) {
                self.reconcile_entry(&TaskId(key));
            }
        }
    }

    /// Claim-or-clear: an unclaimed or orphaned entry is claimed when this
    /// replica volunteered for it, cleared back to unclaimed otherwise. Several
    /// replicas may do this redundantly; the writes are idempotent under the
    /// log's ordering, so convergence is safe.
    fn reconcile_entry(&mut self, task_id: &TaskId) {
        if !self.active {
            return;
        }

        let orphaned = match self.log.read(&task_id.0) {
            Some(RegisterValue::Unclaimed) => false,
            Some(RegisterValue::Owned(holder)) => {
                if self.log.contains(&holder) {
                    return;
                }
                true
            }
            None => return,
        };

        if self.registry.is_interested(task_id) {
            tracing::debug!("Reconciling task '{}': claiming", task_id);
            self.log
                .write(&task_id.0, RegisterValue::Owned(self.local_id.clone()));
        } else if orphaned {
            tracing::debug!("Reconciling task '{}': clearing orphaned claim", task_id);
            self.log.write(&task_id.0, RegisterValue::Unclaimed);
        }
    }

    fn start_worker(&self, task_id: &TaskId) {
        let Some(worker) = self.registry.worker(task_id) else {
            // Owning an entry we never volunteered for breaks the registry
            // invariant; keep the claim but flag it.
            tracing::error!("No worker recorded for owned task '{}'", task_id);
            return;
        };

        let task_id = task_id.clone();
        tokio::spawn(async move {
            if let Err(e) = worker().await {
                tracing::error!("Worker for task '{}' failed: {}", task_id, e);
            }
        });
    }

    fn emit(&self, notification: TaskNotification) {
        tracing::debug!("Task notification: {:?}", notification);
        let _ = self.notifications.send(notification);
    }
}
