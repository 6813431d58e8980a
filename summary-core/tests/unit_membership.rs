//! Unit tests for membership tracking and election
//!
//! Drives the heap with random joins and leaves and checks it against a
//! plain scan of the same membership.

use std::collections::HashMap;

use summary_core::coordinator::{ClientDetails, ClientId, MembershipHeap, SequencedClient};

/// Small deterministic generator so runs are repeatable
struct XorShift(u64);

impl XorShift {
    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    fn below(&mut self, bound: u64) -> u64 {
        self.next() % bound
    }
}

fn details(summarizer: bool) -> ClientDetails {
    if summarizer {
        ClientDetails::summarizer()
    } else {
        ClientDetails::interactive()
    }
}

#[test]
fn test_elected_is_earliest_join() {
    let mut heap = MembershipHeap::default();
    heap.add_client("late".into(), &SequencedClient::new(30, details(false)));
    heap.add_client("early".into(), &SequencedClient::new(10, details(false)));
    heap.add_client("middle".into(), &SequencedClient::new(20, details(false)));

    assert_eq!(heap.elected_client_id(), Some(&ClientId::from("early")));

    heap.remove_client(&"early".into());
    assert_eq!(heap.elected_client_id(), Some(&ClientId::from("middle")));
}

#[test]
fn test_empty_heap_elects_nobody() {
    let mut heap = MembershipHeap::default();
    assert!(heap.elected_client_id().is_none());

    heap.add_client("a".into(), &SequencedClient::new(1, details(false)));
    heap.remove_client(&"a".into());
    assert!(heap.elected_client_id().is_none());
    assert!(heap.is_empty());
}

#[test]
fn test_remove_is_idempotent() {
    let mut heap = MembershipHeap::default();
    heap.add_client("w".into(), &SequencedClient::new(1, details(true)));

    assert!(heap.remove_client(&"w".into()));
    assert!(!heap.remove_client(&"w".into()));
    assert!(!heap.remove_client(&"never-joined".into()));
    assert_eq!(heap.summarizer_worker_count(), 0);
}

#[test]
fn test_snapshot_construction() {
    let heap = MembershipHeap::new(vec![
        (ClientId::from("b"), SequencedClient::new(7, details(false))),
        (ClientId::from("s"), SequencedClient::new(3, details(true))),
        (ClientId::from("a"), SequencedClient::new(5, details(false))),
    ]);

    assert_eq!(heap.len(), 3);
    assert_eq!(heap.summarizer_worker_count(), 1);
    assert_eq!(heap.elected_client_id(), Some(&ClientId::from("s")));
}

#[test]
fn test_random_churn_matches_scan() {
    let mut rng = XorShift(0x9E37_79B9_7F4A_7C15);
    let mut heap = MembershipHeap::default();
    let mut model: HashMap<ClientId, (u64, bool)> = HashMap::new();
    let mut next_seq = 1u64;

    for step in 0..5_000 {
        let client_id = ClientId::new(format!("client-{}", rng.below(40)));

        if rng.below(3) == 0 {
            let removed = heap.remove_client(&client_id);
            assert_eq!(removed, model.remove(&client_id).is_some(), "step {}", step);
        } else {
            let summarizer = rng.below(5) == 0;
            heap.add_client(client_id.clone(), &SequencedClient::new(next_seq, details(summarizer)));
            model.insert(client_id, (next_seq, summarizer));
            next_seq += 1 + rng.below(3);
        }

        let expected_elected = model
            .iter()
            .min_by_key(|(id, (seq, _))| (*seq, (*id).clone()))
            .map(|(id, _)| id.clone());
        let expected_workers = model.values().filter(|(_, summarizer)| *summarizer).count();

        assert_eq!(heap.elected_client_id().cloned(), expected_elected, "step {}", step);
        assert_eq!(heap.summarizer_worker_count(), expected_workers, "step {}", step);
        assert_eq!(heap.len(), model.len(), "step {}", step);
    }
}

#[test]
fn test_worker_count_tracks_iteration() {
    let mut rng = XorShift(42);
    let mut heap = MembershipHeap::default();

    for seq in 0..500u64 {
        let client_id = ClientId::new(format!("c{}", rng.below(25)));
        if rng.below(4) == 0 {
            heap.remove_client(&client_id);
        } else {
            heap.add_client(client_id, &SequencedClient::new(seq, details(rng.below(2) == 0)));
        }

        let scanned = heap.iter().filter(|c| c.is_summarizer_worker).count();
        assert_eq!(heap.summarizer_worker_count(), scanned);
    }
}
