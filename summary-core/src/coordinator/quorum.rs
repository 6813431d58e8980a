//! Quorum boundary
//!
//! Client identity types and the membership feed the coordinator consumes.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

/// Client type reported by clients whose only purpose is running a summarizer
pub const SUMMARIZER_CLIENT_TYPE: &str = "summarizer";

/// Opaque identifier assigned to a client by the session layer
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// Create a client id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientId {
    fn from(id: &str) -> Self {
        Self(id.into())
    }
}

impl From<String> for ClientId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Details a client announces when joining
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientDetails {
    /// Client type; `None` for older clients that do not report one
    pub client_type: Option<String>,
    /// Whether a user is driving this client
    pub interactive: bool,
}

impl ClientDetails {
    /// Details of an ordinary interactive client
    pub fn interactive() -> Self {
        Self {
            client_type: None,
            interactive: true,
        }
    }

    /// Details of a summarizer worker client
    pub fn summarizer() -> Self {
        Self {
            client_type: Some(SUMMARIZER_CLIENT_TYPE.into()),
            interactive: false,
        }
    }

    /// True if this client exists only to run a summarizer
    pub fn is_summarizer(&self) -> bool {
        self.client_type.as_deref() == Some(SUMMARIZER_CLIENT_TYPE)
    }
}

/// A member as reported by the quorum
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequencedClient {
    /// Sequence number at which the client joined
    pub sequence_number: u64,
    /// Announced client details
    pub details: ClientDetails,
}

impl SequencedClient {
    pub fn new(sequence_number: u64, details: ClientDetails) -> Self {
        Self {
            sequence_number,
            details,
        }
    }
}

/// Membership change notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuorumEvent {
    MemberAdded {
        client_id: ClientId,
        client: SequencedClient,
    },
    MemberRemoved {
        client_id: ClientId,
    },
}

const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Totally-ordered membership view shared by every client of a document
pub trait Quorum: Send + Sync {
    /// Snapshot of the current members
    fn members(&self) -> Vec<(ClientId, SequencedClient)>;

    /// Subscribe to membership changes made after this call
    fn subscribe(&self) -> broadcast::Receiver<QuorumEvent>;
}

/// Sequence numbers of the document's operation stream
pub trait DeltaSource: Send + Sync {
    /// Sequence number the session was loaded at
    fn initial_sequence_number(&self) -> u64;

    /// Most recent sequence number seen
    fn last_sequence_number(&self) -> u64;
}

/// In-process quorum that assigns join sequence numbers itself
pub struct LocalQuorum {
    members: RwLock<HashMap<ClientId, SequencedClient>>,
    events: broadcast::Sender<QuorumEvent>,
    initial_sequence_number: u64,
    sequence_number: AtomicU64,
}

impl LocalQuorum {
    /// Create an empty quorum whose history starts at `initial_sequence_number`
    pub fn new(initial_sequence_number: u64) -> Self {
        Self::with_capacity(initial_sequence_number, DEFAULT_EVENT_CAPACITY)
    }

    /// Like [`LocalQuorum::new`], buffering at most `capacity` unread events
    /// per subscriber
    pub fn with_capacity(initial_sequence_number: u64, capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            members: RwLock::new(HashMap::new()),
            events,
            initial_sequence_number,
            sequence_number: AtomicU64::new(initial_sequence_number),
        }
    }

    /// Advance the operation stream by `ops` without membership changes
    pub fn advance(&self, ops: u64) -> u64 {
        self.sequence_number.fetch_add(ops, Ordering::Relaxed) + ops
    }

    /// Add a member at the next sequence number
    pub fn join(&self, client_id: impl Into<ClientId>, details: ClientDetails) -> u64 {
        let sequence_number = self.advance(1);
        self.add_member(client_id.into(), SequencedClient::new(sequence_number, details));
        sequence_number
    }

    /// Add a member with an externally assigned sequence number
    pub fn add_member(&self, client_id: ClientId, client: SequencedClient) {
        debug!("Quorum member {} joined at seq {}", client_id, client.sequence_number);
        self.members.write().insert(client_id.clone(), client.clone());
        // No receivers is fine: nobody is watching yet
        let _ = self.events.send(QuorumEvent::MemberAdded { client_id, client });
    }

    /// Remove a member; returns false if it was not present
    pub fn remove_member(&self, client_id: &ClientId) -> bool {
        if self.members.write().remove(client_id).is_none() {
            return false;
        }
        self.advance(1);
        debug!("Quorum member {} left", client_id);
        let _ = self.events.send(QuorumEvent::MemberRemoved {
            client_id: client_id.clone(),
        });
        true
    }

    /// Number of current members
    pub fn len(&self) -> usize {
        self.members.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.read().is_empty()
    }
}

impl Quorum for LocalQuorum {
    fn members(&self) -> Vec<(ClientId, SequencedClient)> {
        let mut members: Vec<_> = self
            .members
            .read()
            .iter()
            .map(|(id, client)| (id.clone(), client.clone()))
            .collect();
        members.sort_by_key(|(_, client)| client.sequence_number);
        members
    }

    fn subscribe(&self) -> broadcast::Receiver<QuorumEvent> {
        self.events.subscribe()
    }
}

impl DeltaSource for LocalQuorum {
    fn initial_sequence_number(&self) -> u64 {
        self.initial_sequence_number
    }

    fn last_sequence_number(&self) -> u64 {
        self.sequence_number.load(Ordering::Relaxed)
    }
}
