//! Agent Scheduler Module
//!
//! Opportunistic task leasing over the shared claim register. Replicas announce
//! named tasks, volunteer to run them, and hand them back; ownership is a single
//! register entry per task, and every transfer happens through log-ordered writes,
//! so all replicas converge on one owner per task with no central arbiter.
//!
//! ## Core Mechanisms
//! - **Announce vs Claim**: `register` only broadcasts that a task exists;
//!   `pick` declares local interest and claims the entry when it is up for grabs.
//! - **Confirmation By Event**: A claim write is never trusted directly; ownership
//!   is confirmed only when the register-change event names this replica.
//! - **Self-Healing**: Entries owned by departed clients are claimed by interested
//!   replicas or cleared back to unclaimed, idempotently, by whoever notices.

pub mod registry;
pub mod scheduler;
pub mod types;
