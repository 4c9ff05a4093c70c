use serde::{Deserialize, Serialize};

/// Identifier the log assigns to the synthetic detached placeholder. It stands in
/// for a replica that has not attached yet and is never eligible for any role.
pub const DETACHED_PLACEHOLDER_ID: &str = "detached-placeholder";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub String);

impl ClientId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn detached_placeholder() -> Self {
        Self(DETACHED_PLACEHOLDER_ID.to_string())
    }

    pub fn is_detached_placeholder(&self) -> bool {
        self.0 == DETACHED_PLACEHOLDER_ID
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a client is allowed to do within the session.
///
/// `interactive == false` marks the dedicated-role (summarizer) client type; such
/// clients must never spawn a nested instance of the role themselves.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientCapabilities {
    pub interactive: bool,
    pub can_summarize: bool,
}

impl ClientCapabilities {
    /// A regular user-facing replica that may hold the summarizer role.
    pub fn interactive() -> Self {
        Self {
            interactive: true,
            can_summarize: true,
        }
    }

    /// The dedicated summarizer client type itself.
    pub fn summarizer() -> Self {
        Self {
            interactive: false,
            can_summarize: false,
        }
    }
}

/// A single member of the quorum.
///
/// `join_sequence` is assigned by the log at join time, strictly increasing and
/// unique among live members; it is the tie-break for every election decision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientRecord {
    pub id: ClientId,
    pub join_sequence: u64,
    pub capabilities: ClientCapabilities,
}

/// The value held by one register entry.
///
/// An absent key is distinct from `Unclaimed`: absent means nobody has announced
/// the task yet, `Unclaimed` means it was announced and is up for grabs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum RegisterValue {
    Unclaimed,
    Owned(ClientId),
}

impl RegisterValue {
    pub fn owner(&self) -> Option<&ClientId> {
        match self {
            RegisterValue::Owned(id) => Some(id),
            RegisterValue::Unclaimed => None,
        }
    }

    pub fn is_owned_by(&self, id: &ClientId) -> bool {
        self.owner() == Some(id)
    }
}

/// One entry of the totally-ordered event stream every replica consumes.
///
/// All coordination decisions in this crate are pure functions of this stream:
/// two replicas fed the identical sequence reach identical conclusions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum LogEvent {
    MemberAdded { record: ClientRecord },
    MemberRemoved { client_id: ClientId },
    EntryChanged { key: String, value: RegisterValue },
}
