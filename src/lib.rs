//! Replica Coordination Core
//!
//! This library crate implements leaderless coordination among many replicas of a
//! session that share a single replicated event log but have no direct channel to
//! each other. Every decision is a pure function of the log's total event order,
//! so replicas converge with zero inter-replica messaging.
//!
//! ## Architecture Modules
//! The system is composed of four loosely coupled subsystems:
//!
//! - **`log`**: The shared session log. Defines the data model (clients, quorum,
//!   register values, log events) and an in-process `SessionLog` collaborator that
//!   delivers one identical, totally-ordered event stream to every subscriber.
//! - **`election`**: Deterministic role election. `OrderedClientElection` derives a
//!   single distinguished client from the live quorum, filtered by an eligibility
//!   predicate and ordered by join sequence.
//! - **`scheduler`**: Opportunistic task leasing. `AgentScheduler` lets replicas
//!   claim, release, and self-heal ownership of named tasks through the shared
//!   register, with no central arbiter.
//! - **`summary`**: The summarizer lifecycle. `SummaryManager` spawns, supervises,
//!   and restarts a dedicated maintenance role based on the election, pacing
//!   restarts through a sliding-window `Throttler`.

pub mod election;
pub mod log;
pub mod scheduler;
pub mod summary;
