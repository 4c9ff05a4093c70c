//! Local Task Bookkeeping
//!
//! Per-replica record of declared, claimed, and running tasks. Owned exclusively
//! by the scheduler and mutated only inside its dispatch path, so there is no
//! cross-context sharing and no locking.

use std::collections::{BTreeMap, HashSet};

use super::types::{TaskId, TaskWorker};

/// The scheduler's local view of its tasks.
///
/// Invariant: `running ⊆ runnable keys ⊆ registered`.
pub struct TaskRegistry {
    /// Every task id this replica has ever announced.
    registered: HashSet<TaskId>,
    /// Declared interest: tasks this replica volunteered to run, with their
    /// workers. A superset of what actually runs here.
    runnable: BTreeMap<TaskId, TaskWorker>,
    /// Tasks currently executing here, in ownership-confirmation order.
    running: Vec<TaskId>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            registered: HashSet::new(),
            runnable: BTreeMap::new(),
            running: Vec::new(),
        }
    }

    pub fn is_registered(&self, task_id: &TaskId) -> bool {
        self.registered.contains(task_id)
    }

    pub fn add_registered(&mut self, task_id: TaskId) {
        self.registered.insert(task_id);
    }

    pub fn is_interested(&self, task_id: &TaskId) -> bool {
        self.runnable.contains_key(task_id)
    }

    pub fn add_interest(&mut self, task_id: TaskId, worker: TaskWorker) {
        self.runnable.insert(task_id, worker);
    }

    pub fn drop_interest(&mut self, task_id: &TaskId) {
        self.runnable.remove(task_id);
    }

    pub fn worker(&self, task_id: &TaskId) -> Option<TaskWorker> {
        self.runnable.get(task_id).cloned()
    }

    /// Task ids with declared interest, in stable order.
    pub fn interests(&self) -> Vec<TaskId> {
        self.runnable.keys().cloned().collect()
    }

    pub fn is_running(&self, task_id: &TaskId) -> bool {
        self.running.contains(task_id)
    }

    pub fn mark_running(&mut self, task_id: TaskId) {
        if !self.running.contains(&task_id) {
            self.running.push(task_id);
        }
    }

    pub fn mark_not_running(&mut self, task_id: &TaskId) {
        self.running.retain(|id| id != task_id);
    }

    /// Drops every running task at once (local inactivity). Returns what was
    /// running so the caller can emit per-task notifications.
    pub fn take_running(&mut self) -> Vec<TaskId> {
        std::mem::take(&mut self.running)
    }

    pub fn running(&self) -> &[TaskId] {
        &self.running
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}
