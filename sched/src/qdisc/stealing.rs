// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Work-stealing leaf: per-worker lanes with FIFO stealing.

use std::num::NonZeroUsize;
use std::sync::Arc;

use concurrency::sync::atomic::{AtomicUsize, Ordering};
use crossbeam_queue::SegQueue;
use handle::Handle;

use crate::error::SchedError;
use crate::qdisc::{Predicate, Qdisc, QdiscCore, commit_enqueue};
use crate::worker::{self, WorkerId};
use crate::workload::Workload;

/// Classless qdisc with one lock-free lane per worker slot.
///
/// A producing worker enqueues into its own lane (submissions from
/// non-worker threads pick a victim round-robin); a dequeuing worker drains
/// its own lane first and then steals from the other lanes in order, oldest
/// first. Every lane is a symmetric MPMC queue, so "local" is an affinity
/// hint rather than an ownership rule and every path stays lock-free.
#[derive(Debug)]
pub struct WorkStealingQdisc {
    core: QdiscCore,
    lanes: Box<[SegQueue<Arc<Workload>>]>,
    enqueue_cursor: AtomicUsize,
}

impl WorkStealingQdisc {
    #[must_use]
    pub fn new(handle: Handle, predicate: Predicate, lanes: NonZeroUsize) -> Arc<Self> {
        Arc::new(Self {
            core: QdiscCore::new(handle, predicate),
            lanes: (0..lanes.get()).map(|_| SegQueue::new()).collect(),
            enqueue_cursor: AtomicUsize::new(0),
        })
    }

    #[must_use]
    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    fn victim_lane(&self) -> usize {
        match worker::current_worker() {
            Some(worker) => worker.index() % self.lanes.len(),
            None => self.enqueue_cursor.fetch_add(1, Ordering::Relaxed) % self.lanes.len(),
        }
    }
}

impl Qdisc for WorkStealingQdisc {
    fn core(&self) -> &QdiscCore {
        &self.core
    }

    fn is_empty(&self) -> bool {
        self.lanes.iter().all(SegQueue::is_empty)
    }

    fn len(&self) -> usize {
        self.lanes.iter().map(SegQueue::len).sum()
    }

    fn enqueue_direct(&self, workload: Arc<Workload>) -> Result<(), SchedError> {
        let lane = self.victim_lane();
        commit_enqueue(&self.core, workload, |w| self.lanes[lane].push(w))
    }

    fn try_dequeue(&self, worker: WorkerId, _back_track: bool) -> Option<Arc<Workload>> {
        let lanes = self.lanes.len();
        let home = worker.index() % lanes;
        if let Some(w) = self.lanes[home].pop() {
            return Some(w);
        }
        (1..lanes).find_map(|k| self.lanes[(home + k) % lanes].pop())
    }

    fn try_peek(&self, _worker: WorkerId) -> Option<Arc<Workload>> {
        // same contract as the FIFO leaf: no stable interior reference
        None
    }

    fn try_remove(&self, _workload: &Workload) -> bool {
        false
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod test {
    use super::*;
    use crate::qdisc::{ChildLink, RoundRobinQdisc};
    use crate::tree::QdiscTree;

    fn attached(lanes: usize) -> (QdiscTree, Arc<WorkStealingQdisc>) {
        let steal = WorkStealingQdisc::new(
            Handle::new(2),
            Predicate::never(),
            NonZeroUsize::new(lanes).unwrap(),
        );
        let root = RoundRobinQdisc::new(
            Handle::new(1),
            vec![ChildLink::by_handle_only(steal.clone())],
        );
        let tree = QdiscTree::new(root).unwrap();
        (tree, steal)
    }

    #[test]
    fn external_producers_spread_round_robin() {
        let (_tree, steal) = attached(3);
        for _ in 0..6 {
            steal.enqueue_direct(Workload::new(|_| Ok(()))).unwrap();
        }
        assert_eq!(steal.len(), 6);
        // 6 submissions over 3 lanes, round-robin: two each
        for lane in 0..3 {
            assert_eq!(steal.lanes[lane].len(), 2);
        }
    }

    #[test]
    fn workers_drain_their_own_lane_first() {
        let (_tree, steal) = attached(2);
        let a = Workload::new(|_| Ok(()));
        let b = Workload::new(|_| Ok(()));
        // cursor starts at lane 0: a -> lane 0, b -> lane 1
        steal.enqueue_direct(Arc::clone(&a)).unwrap();
        steal.enqueue_direct(Arc::clone(&b)).unwrap();

        let got = steal.try_dequeue(WorkerId::new(1), false).unwrap();
        assert!(Arc::ptr_eq(&got, &b));
        // home lane now empty: worker 1 steals from lane 0
        let got = steal.try_dequeue(WorkerId::new(1), false).unwrap();
        assert!(Arc::ptr_eq(&got, &a));
        assert!(steal.is_empty());
    }

    #[test]
    fn steals_in_lane_order() {
        let (_tree, steal) = attached(4);
        let w = Workload::new(|_| Ok(()));
        // lands in lane 0
        steal.enqueue_direct(Arc::clone(&w)).unwrap();
        // worker 2's home lane is empty; stealing walks 3, 0, 1
        let got = steal.try_dequeue(WorkerId::new(2), false).unwrap();
        assert!(Arc::ptr_eq(&got, &w));
    }
}
