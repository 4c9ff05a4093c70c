//! Shared Session Log Module
//!
//! Defines the data model for the replicated session log and an in-process
//! implementation of it. The log is the only cross-replica shared state: an ordered
//! membership view (the quorum) plus a small key-value register used as a claim
//! mechanism. Every attached replica observes the same events in the same order.
//!
//! ## Core Concepts
//! - **Total Order**: Appends are serialized; every subscriber receives an identical
//!   event sequence, which is what lets replicas agree without talking to each other.
//! - **Quorum**: The live member set, keyed by a strictly increasing join sequence.
//! - **Claim Register**: Key-value entries holding `Unclaimed` or `Owned(client)`.
//!   Racing claim writes resolve by log order (first accepted wins); clears are
//!   idempotent.
//! - **Snapshot Replay**: A late joiner first receives the current members and
//!   register entries, so it observes an equivalent prefix of the order.

pub mod session;
pub mod types;
