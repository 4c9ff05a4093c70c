//! In-Process Session Log
//!
//! `SessionLog` is the shared collaborator every replica attaches to. It owns the
//! quorum and the claim register, serializes all appends into one total order, and
//! fans each accepted event out to every subscriber over an unbounded channel.
//!
//! ## Responsibilities
//! - **Ordering**: All mutations go through one internal lock, so there is exactly
//!   one global event sequence and every subscriber sees it in full, in order.
//! - **Join Sequencing**: Assigns strictly increasing, never-reused join sequence
//!   numbers; no two live clients ever share one.
//! - **Claim Resolution**: Accepts a claim write only when the entry is absent,
//!   unclaimed, or owned by a departed client. Racing claimants resolve by append
//!   order; the core layers above never reimplement this rule, they only observe it.

use dashmap::DashMap;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use super::types::{ClientCapabilities, ClientId, ClientRecord, LogEvent, RegisterValue};

/// The shared membership + register service.
pub struct SessionLog {
    /// Ordered state behind one lock; holding it across an append is what makes
    /// the event order total.
    inner: Mutex<LogInner>,
    /// Per-subscriber event senders. Entries are pruned lazily when a send fails.
    subscribers: DashMap<ClientId, UnboundedSender<LogEvent>>,
}

struct LogInner {
    next_join_sequence: u64,
    /// Quorum keyed by join sequence, so iteration order is election order.
    members: BTreeMap<u64, ClientRecord>,
    register: HashMap<String, RegisterValue>,
}

impl SessionLog {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(LogInner {
                next_join_sequence: 1,
                members: BTreeMap::new(),
                register: HashMap::new(),
            }),
            subscribers: DashMap::new(),
        }
    }

    /// Adds a new member to the quorum and subscribes it to the event stream.
    ///
    /// The returned receiver first yields a snapshot replay (current members in
    /// join-sequence order, then current register entries, then the caller's own
    /// `MemberAdded`), so a late joiner observes an equivalent prefix of the order.
    pub fn join(
        &self,
        capabilities: ClientCapabilities,
    ) -> (ClientRecord, UnboundedReceiver<LogEvent>) {
        self.join_as(ClientId::new(), capabilities)
    }

    /// `join` with a caller-chosen id. Used for rejoining replicas and for the
    /// detached placeholder.
    pub fn join_as(
        &self,
        id: ClientId,
        capabilities: ClientCapabilities,
    ) -> (ClientRecord, UnboundedReceiver<LogEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();

        let record = {
            let mut inner = self.lock_inner();

            let record = ClientRecord {
                id: id.clone(),
                join_sequence: inner.next_join_sequence,
                capabilities,
            };
            inner.next_join_sequence += 1;

            // Snapshot replay before the subscriber is registered for live events.
            for member in inner.members.values() {
                let _ = tx.send(LogEvent::MemberAdded {
                    record: member.clone(),
                });
            }
            for (key, value) in inner.register.iter() {
                let _ = tx.send(LogEvent::EntryChanged {
                    key: key.clone(),
                    value: value.clone(),
                });
            }

            inner.members.insert(record.join_sequence, record.clone());
            self.subscribers.insert(id.clone(), tx);

            self.broadcast(LogEvent::MemberAdded {
                record: record.clone(),
            });

            record
        };

        tracing::info!(
            "Client {} joined with sequence {}",
            record.id,
            record.join_sequence
        );

        (record, rx)
    }

    /// Removes a member from the quorum and unsubscribes it.
    ///
    /// Register entries the member owned are left in place; reconciliation of
    /// those is the consumers' job, driven by the `MemberRemoved` event.
    pub fn leave(&self, client_id: &ClientId) {
        let removed = {
            let mut inner = self.lock_inner();

            let seq = inner
                .members
                .iter()
                .find(|(_, record)| &record.id == client_id)
                .map(|(seq, _)| *seq);

            match seq {
                Some(seq) => {
                    inner.members.remove(&seq);
                    self.subscribers.remove(client_id);
                    self.broadcast(LogEvent::MemberRemoved {
                        client_id: client_id.clone(),
                    });
                    true
                }
                None => false,
            }
        };

        if removed {
            tracing::info!("Client {} left the quorum", client_id);
        } else {
            tracing::debug!("Leave for unknown client {}", client_id);
        }
    }

    /// Reads the current accepted value of one register entry.
    pub fn read(&self, key: &str) -> Option<RegisterValue> {
        self.lock_inner().register.get(key).cloned()
    }

    /// Writes a register entry, resolving claim races by append order.
    ///
    /// Returns whether the write was accepted. Acceptance is advisory only:
    /// callers confirm ownership from the subsequent `EntryChanged` event, never
    /// from this return value.
    ///
    /// Rules:
    /// - `Unclaimed` is always accepted; if the entry already reads `Unclaimed`
    ///   the write is a no-op and emits nothing (idempotent clears).
    /// - `Owned(c)` is accepted iff the entry is absent, unclaimed, or owned by a
    ///   client no longer in the quorum. First accepted claim wins.
    pub fn write(&self, key: &str, value: RegisterValue) -> bool {
        let (accepted, emitted) = {
            let mut inner = self.lock_inner();

            let current = inner.register.get(key);
            let accepted = match (&value, current) {
                (RegisterValue::Unclaimed, _) => true,
                (RegisterValue::Owned(_), None) => true,
                (RegisterValue::Owned(_), Some(RegisterValue::Unclaimed)) => true,
                (RegisterValue::Owned(_), Some(RegisterValue::Owned(holder))) => {
                    !inner.members.values().any(|m| &m.id == holder)
                }
            };

            if !accepted {
                (false, false)
            } else if current == Some(&value) {
                // Accepted but observationally a no-op.
                (true, false)
            } else {
                inner.register.insert(key.to_string(), value.clone());
                self.broadcast(LogEvent::EntryChanged {
                    key: key.to_string(),
                    value: value.clone(),
                });
                (true, true)
            }
        };

        if !accepted {
            tracing::debug!("Rejected claim write for entry '{}'", key);
        } else if emitted {
            tracing::debug!("Accepted write for entry '{}': {:?}", key, value);
        }

        accepted
    }

    /// Ordered snapshot of the live quorum (join-sequence ascending).
    pub fn quorum(&self) -> Vec<ClientRecord> {
        self.lock_inner().members.values().cloned().collect()
    }

    /// Whether the given client is currently in the quorum.
    pub fn contains(&self, client_id: &ClientId) -> bool {
        self.lock_inner()
            .members
            .values()
            .any(|m| &m.id == client_id)
    }

    /// Snapshot of every register entry. Used for reconciliation sweeps when a
    /// replica transitions to active.
    pub fn entries(&self) -> Vec<(String, RegisterValue)> {
        self.lock_inner()
            .register
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn broadcast(&self, event: LogEvent) {
        let mut dead = Vec::new();

        for entry in self.subscribers.iter() {
            if entry.value().send(event.clone()).is_err() {
                dead.push(entry.key().clone());
            }
        }

        for id in dead {
            tracing::debug!("Dropping closed subscriber {}", id);
            self.subscribers.remove(&id);
        }
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, LogInner> {
        // A poisoned lock means a panic mid-append; the state itself is still
        // consistent because every mutation is a single insert/remove.
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for SessionLog {
    fn default() -> Self {
        Self::new()
    }
}
