use crate::sampler::WindowSample;
use crate::window::ChainStats;
use ahash::RandomState;
use hashbrown::HashSet;
use node_client::Block;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

type FastSet<T> = HashSet<T, RandomState>;

/// Snapshot served to the dashboard. Counters accumulate for the lifetime of
/// the process; the window fields always describe the latest applied sample.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PublishedStats {
    pub head: u64,
    pub stats: ChainStats,
    pub blocks: Vec<Block>,
    pub sampled_at_unix_ms: i64,
    pub samples_published: u64,
    pub stale_results: u64,
    pub sample_failures: u64,
    pub malformed_discards: u64,
}

#[derive(Clone, Copy, Debug)]
pub struct SampleTicket {
    head: u64,
    ticket: u64,
}

impl SampleTicket {
    pub fn head(&self) -> u64 {
        self.head
    }
}

#[derive(Debug, Default)]
struct AdmissionState {
    last_completed_head: Option<u64>,
    in_flight: FastSet<u64>,
    next_ticket: u64,
    applied_ticket: u64,
}

/// Serializes sample admission and publication around head changes: an
/// unchanged head is a no-op, a height already being sampled is not admitted
/// twice, and results apply in admission order so a sample that finishes late
/// can never overwrite a newer one.
#[derive(Debug, Default)]
pub struct SampleCoordinator {
    admission: Mutex<AdmissionState>,
    published: RwLock<PublishedStats>,
}

impl SampleCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn admit(&self, head: u64) -> Option<SampleTicket> {
        let mut state = self.admission.lock();
        if state.last_completed_head == Some(head) {
            return None;
        }
        if !state.in_flight.insert(head) {
            return None;
        }
        state.next_ticket = state.next_ticket.saturating_add(1);
        Some(SampleTicket {
            head,
            ticket: state.next_ticket,
        })
    }

    /// Publishes a finished sample. Returns false when a sample admitted later
    /// has already been applied; the late result is counted and dropped.
    pub fn commit(
        &self,
        ticket: SampleTicket,
        sample: &WindowSample,
        sampled_at_unix_ms: i64,
    ) -> bool {
        let mut state = self.admission.lock();
        state.in_flight.remove(&ticket.head);
        let fresh = ticket.ticket > state.applied_ticket;
        if fresh {
            state.applied_ticket = ticket.ticket;
            state.last_completed_head = Some(ticket.head);
        }
        drop(state);

        let mut published = self.published.write();
        if !fresh {
            published.stale_results = published.stale_results.saturating_add(1);
            return false;
        }
        published.head = sample.head;
        published.stats = sample.stats;
        published.blocks = sample.blocks.clone();
        published.sampled_at_unix_ms = sampled_at_unix_ms;
        published.samples_published = published.samples_published.saturating_add(1);
        true
    }

    /// Records a failed sample and clears its in-flight marker so the same
    /// height may be retried. Published stats keep their previous values.
    pub fn fail(&self, ticket: SampleTicket, malformed: bool) {
        let mut state = self.admission.lock();
        state.in_flight.remove(&ticket.head);
        drop(state);

        let mut published = self.published.write();
        if malformed {
            published.malformed_discards = published.malformed_discards.saturating_add(1);
        } else {
            published.sample_failures = published.sample_failures.saturating_add(1);
        }
    }

    pub fn snapshot(&self) -> PublishedStats {
        self.published.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::SampleCoordinator;
    use crate::sampler::WindowSample;
    use crate::window::ChainStats;

    fn sample_at(head: u64) -> WindowSample {
        WindowSample {
            head,
            blocks: Vec::new(),
            stats: ChainStats {
                transactions_per_second: 0.5,
                average_block_time_secs: 10.0,
                total_transactions: 15,
            },
        }
    }

    #[test]
    fn unchanged_head_after_commit_is_a_noop() {
        let coordinator = SampleCoordinator::new();

        let ticket = coordinator.admit(5).expect("first head admitted");
        assert!(coordinator.commit(ticket, &sample_at(5), 1_000));

        assert!(coordinator.admit(5).is_none());
        assert!(coordinator.admit(6).is_some());
    }

    #[test]
    fn a_height_already_in_flight_is_not_admitted_twice() {
        let coordinator = SampleCoordinator::new();

        let ticket = coordinator.admit(5).expect("admitted");
        assert!(coordinator.admit(5).is_none());
        assert!(coordinator.commit(ticket, &sample_at(5), 1_000));
    }

    #[test]
    fn late_results_never_overwrite_newer_ones() {
        let coordinator = SampleCoordinator::new();

        let older = coordinator.admit(5).expect("older admitted");
        let newer = coordinator.admit(6).expect("newer admitted");

        assert!(coordinator.commit(newer, &sample_at(6), 2_000));
        assert!(!coordinator.commit(older, &sample_at(5), 2_001));

        let snapshot = coordinator.snapshot();
        assert_eq!(snapshot.head, 6);
        assert_eq!(snapshot.samples_published, 1);
        assert_eq!(snapshot.stale_results, 1);
    }

    #[test]
    fn failures_keep_previous_stats_and_allow_retry() {
        let coordinator = SampleCoordinator::new();

        let first = coordinator.admit(5).expect("admitted");
        assert!(coordinator.commit(first, &sample_at(5), 1_000));

        let failing = coordinator.admit(6).expect("admitted");
        coordinator.fail(failing, false);

        let snapshot = coordinator.snapshot();
        assert_eq!(snapshot.head, 5);
        assert_eq!(snapshot.sample_failures, 1);
        assert_eq!(snapshot.malformed_discards, 0);

        let retried = coordinator.admit(6).expect("retry admitted");
        coordinator.fail(retried, true);
        assert_eq!(coordinator.snapshot().malformed_discards, 1);
    }
}
