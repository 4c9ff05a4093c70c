//! Summary Lifecycle Module
//!
//! Supervises the dedicated maintenance role ("summarizer") for one replica. The
//! election decides which replica is responsible; this module decides, on that
//! replica only, when to spawn the role's execution context, how to supervise it,
//! and how fast to retry when spawning fails.
//!
//! ## Core Mechanisms
//! - **Lifecycle State Machine**: `Off -> Starting -> Running -> Stopping -> Off`,
//!   with an absorbing `Disabled` state when summaries are globally off or the
//!   local replica is itself the summarizer client type.
//! - **Throttled Restarts**: Creation failures retry forever, rate-bounded by a
//!   sliding-window `Throttler`; hitting the ceiling raises a warning, not a stop.
//! - **Cooperative Stop**: The running instance is signalled and expected to exit
//!   its own loop; there is no forced termination.

pub mod manager;
pub mod throttler;

#[cfg(test)]
mod tests;
