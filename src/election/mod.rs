//! Ordered Client Election Module
//!
//! Derives a single distinguished client from the live quorum without any
//! inter-replica messaging. The elected client is simply the eligible member with
//! the smallest join sequence, so every replica that has observed the same
//! membership prefix agrees on the winner.
//!
//! ## Core Mechanisms
//! - **Eligibility Predicate**: Callers decide who may hold the role (e.g.
//!   "interactive and allowed to summarize, and not the detached placeholder").
//! - **Change Events**: Consumers are told exactly when the elected identity
//!   changes, and separately when the eligible count crosses the zero boundary
//!   ("is anyone eligible" vs "who exactly").

pub mod election;
