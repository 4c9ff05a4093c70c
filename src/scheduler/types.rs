use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::Result;

/// Name of a schedulable task. Doubles as the register key for its claim entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Type alias for a thread-safe, asynchronous task worker.
/// Invoked once ownership of the task is confirmed by the register; a returned
/// error is logged, never retried automatically.
pub type TaskWorker = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send + Sync>;

/// Wraps an async closure into the type-erased `TaskWorker` form.
pub fn worker<F, Fut>(f: F) -> TaskWorker
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move || Box::pin(f()) as Pin<Box<dyn Future<Output = Result<()>> + Send>>)
}

/// Scheduler notifications delivered to the owning replica.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskNotification {
    /// Ownership confirmed; the worker has been started.
    Picked(TaskId),
    /// Ownership moved away from this replica through the register.
    Released(TaskId),
    /// Ownership dropped locally because this replica went inactive; the shared
    /// register was not touched.
    Lost(TaskId),
}
