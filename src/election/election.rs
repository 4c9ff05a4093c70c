//! Deterministic Election Over The Quorum
//!
//! A pure state machine fed by log-ordered membership events. No timers, no I/O:
//! feeding two instances the identical event sequence yields identical elected
//! clients after every single event, which is the whole correctness argument.

use std::collections::BTreeMap;

use crate::log::types::{ClientId, ClientRecord};

/// Decides whether a quorum member may hold the role being elected.
pub type EligibilityFn = Box<dyn Fn(&ClientRecord) -> bool + Send + Sync>;

/// Emitted by the election when its observable outputs change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElectionEvent {
    /// The elected identity changed, including transitions to/from none.
    ElectedChanged(Option<ClientId>),
    /// The eligible count crossed the zero boundary. `true` means at least one
    /// eligible member is now present.
    EligiblePresenceChanged(bool),
}

/// Elects the eligible quorum member with the smallest join sequence.
pub struct OrderedClientElection {
    /// Live members keyed by join sequence; iteration order is election order.
    members: BTreeMap<u64, ClientRecord>,
    eligible: EligibilityFn,
    elected: Option<ClientId>,
    eligible_count: usize,
}

impl OrderedClientElection {
    pub fn new(eligible: EligibilityFn) -> Self {
        Self {
            members: BTreeMap::new(),
            eligible,
            elected: None,
            eligible_count: 0,
        }
    }

    /// The current winner, or none when no member is eligible.
    pub fn elected_client(&self) -> Option<&ClientId> {
        self.elected.as_ref()
    }

    /// Full record of the current winner.
    pub fn elected_record(&self) -> Option<&ClientRecord> {
        let elected = self.elected.as_ref()?;
        self.members.values().find(|m| &m.id == elected)
    }

    pub fn eligible_count(&self) -> usize {
        self.eligible_count
    }

    /// Ordered view of all tracked members (eligible or not).
    pub fn members(&self) -> impl Iterator<Item = &ClientRecord> {
        self.members.values()
    }

    /// Applies a `MemberAdded` event. Returns the change events it caused.
    pub fn member_added(&mut self, record: ClientRecord) -> Vec<ElectionEvent> {
        if self.members.contains_key(&record.join_sequence) {
            tracing::warn!(
                "Duplicate join sequence {} for client {}",
                record.join_sequence,
                record.id
            );
            return Vec::new();
        }

        self.members.insert(record.join_sequence, record);
        self.recompute()
    }

    /// Applies a `MemberRemoved` event. Returns the change events it caused.
    pub fn member_removed(&mut self, client_id: &ClientId) -> Vec<ElectionEvent> {
        let seq = self
            .members
            .iter()
            .find(|(_, record)| &record.id == client_id)
            .map(|(seq, _)| *seq);

        match seq {
            Some(seq) => {
                self.members.remove(&seq);
                self.recompute()
            }
            None => {
                tracing::debug!("Removal of untracked client {}", client_id);
                Vec::new()
            }
        }
    }

    fn recompute(&mut self) -> Vec<ElectionEvent> {
        let eligible_count = self
            .members
            .values()
            .filter(|m| (self.eligible)(m))
            .count();

        // BTreeMap iterates join-sequence ascending, so the first eligible
        // member is the winner.
        let elected = self
            .members
            .values()
            .find(|m| (self.eligible)(m))
            .map(|m| m.id.clone());

        let mut events = Vec::new();

        if elected != self.elected {
            tracing::info!(
                "Elected client changed: {:?} -> {:?}",
                self.elected,
                elected
            );
            self.elected = elected.clone();
            events.push(ElectionEvent::ElectedChanged(elected));
        }

        let had_eligible = self.eligible_count > 0;
        let has_eligible = eligible_count > 0;
        self.eligible_count = eligible_count;

        if had_eligible != has_eligible {
            events.push(ElectionEvent::EligiblePresenceChanged(has_eligible));
        }

        events
    }
}
