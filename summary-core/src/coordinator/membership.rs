//! Client membership ordered by join sequence
//!
//! Tracks connected clients and exposes the earliest-joined one, which is
//! the elected summarizer client.

use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use super::quorum::{ClientId, SequencedClient};

/// A connected client as seen by the election
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedClient {
    /// Client identifier
    pub client_id: ClientId,
    /// Join order key
    pub join_sequence_number: u64,
    /// Client exists only to run a previously elected summarizer
    pub is_summarizer_worker: bool,
}

type HeapKey = (u64, ClientId);

/// Connected clients ordered by join sequence number
///
/// The minimum entry is the elected client. Lookup of the minimum is O(1);
/// adds and removes are O(log n).
#[derive(Debug, Default)]
pub struct MembershipHeap {
    heap: BTreeMap<HeapKey, TrackedClient>,
    members: HashMap<ClientId, HeapKey>,
    elected: Option<ClientId>,
    summarizer_count: usize,
}

impl MembershipHeap {
    /// Create a heap seeded with the current members
    pub fn new<I>(members: I) -> Self
    where
        I: IntoIterator<Item = (ClientId, SequencedClient)>,
    {
        let mut heap = Self::default();
        for (client_id, client) in members {
            heap.add_client(client_id, &client);
        }
        heap
    }

    /// Track a newly joined client
    ///
    /// Always reports a heap change: the summarizer count may have moved even
    /// when the elected client did not.
    pub fn add_client(&mut self, client_id: ClientId, client: &SequencedClient) -> bool {
        // Ids are unique; a repeated add replaces the old entry
        self.remove_client(&client_id);

        let tracked = TrackedClient {
            client_id: client_id.clone(),
            join_sequence_number: client.sequence_number,
            is_summarizer_worker: client.details.is_summarizer(),
        };
        if tracked.is_summarizer_worker {
            self.summarizer_count += 1;
        }

        let key = (client.sequence_number, client_id.clone());
        self.heap.insert(key.clone(), tracked);
        self.members.insert(client_id, key);
        self.refresh_elected();

        debug!(
            "Tracking {} clients ({} summarizers)",
            self.heap.len(),
            self.summarizer_count
        );
        true
    }

    /// Stop tracking a client; unknown ids are ignored
    ///
    /// Returns true only if a tracked client was removed.
    pub fn remove_client(&mut self, client_id: &ClientId) -> bool {
        let Some(key) = self.members.remove(client_id) else {
            return false;
        };
        if let Some(removed) = self.heap.remove(&key) {
            if removed.is_summarizer_worker {
                self.summarizer_count -= 1;
            }
        }
        self.refresh_elected();
        true
    }

    /// Earliest-joined connected client
    pub fn elected_client_id(&self) -> Option<&ClientId> {
        self.elected.as_ref()
    }

    /// Number of tracked clients that are summarizer workers
    pub fn summarizer_worker_count(&self) -> usize {
        self.summarizer_count
    }

    /// Look up a tracked client
    pub fn get(&self, client_id: &ClientId) -> Option<&TrackedClient> {
        self.members.get(client_id).and_then(|key| self.heap.get(key))
    }

    pub fn contains(&self, client_id: &ClientId) -> bool {
        self.members.contains_key(client_id)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Tracked clients in join order
    pub fn iter(&self) -> impl Iterator<Item = &TrackedClient> {
        self.heap.values()
    }

    fn refresh_elected(&mut self) {
        self.elected = self
            .heap
            .first_key_value()
            .map(|(_, client)| client.client_id.clone());
    }
}
