// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Unbounded, order-preserving, multi-producer/multi-consumer FIFO leaf.

use std::sync::Arc;

use crossbeam_queue::SegQueue;
use handle::Handle;

use crate::error::SchedError;
use crate::qdisc::{Predicate, Qdisc, QdiscCore, commit_enqueue};
use crate::worker::WorkerId;
use crate::workload::Workload;

/// Classless FIFO qdisc over a lock-free segmented queue.
///
/// Enqueue and dequeue are wait-free amortized. Per producer, dequeue order
/// equals enqueue order; across producers it is the commit order of the
/// underlying queue. Structural removal of interior items is unsupported:
/// a canceled workload stays queued and is retired by the dispatching
/// worker without running its payload.
#[derive(Debug)]
pub struct FifoQdisc {
    core: QdiscCore,
    queue: SegQueue<Arc<Workload>>,
}

impl FifoQdisc {
    #[must_use]
    pub fn new(handle: Handle, predicate: Predicate) -> Arc<Self> {
        Arc::new(Self {
            core: QdiscCore::new(handle, predicate),
            queue: SegQueue::new(),
        })
    }
}

impl Qdisc for FifoQdisc {
    fn core(&self) -> &QdiscCore {
        &self.core
    }

    fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    fn len(&self) -> usize {
        self.queue.len()
    }

    fn enqueue_direct(&self, workload: Arc<Workload>) -> Result<(), SchedError> {
        commit_enqueue(&self.core, workload, |w| self.queue.push(w))
    }

    fn try_dequeue(&self, _worker: WorkerId, _back_track: bool) -> Option<Arc<Workload>> {
        self.queue.pop()
    }

    fn try_peek(&self, _worker: WorkerId) -> Option<Arc<Workload>> {
        // the queue exposes no stable interior reference; peek is
        // best-effort by contract and this leaf simply declines
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
    use crate::workload::WorkloadStatus;

    fn attached_fifo() -> (QdiscTree, Arc<FifoQdisc>) {
        let fifo = FifoQdisc::new(Handle::new(2), Predicate::never());
        let root = RoundRobinQdisc::new(
            Handle::new(1),
            vec![ChildLink::by_handle_only(fifo.clone())],
        );
        let tree = QdiscTree::new(root).unwrap();
        (tree, fifo)
    }

    #[test]
    fn preserves_producer_order() {
        let (_tree, fifo) = attached_fifo();
        let workloads: Vec<_> = (0..5).map(|_| Workload::new(|_| Ok(()))).collect();
        for w in &workloads {
            fifo.enqueue_direct(Arc::clone(w)).unwrap();
        }
        assert_eq!(fifo.len(), 5);
        for expected in &workloads {
            let got = fifo.try_dequeue(WorkerId::new(0), false).unwrap();
            assert!(Arc::ptr_eq(&got, expected));
        }
        assert!(fifo.is_empty());
    }

    #[test]
    fn enqueue_binds_the_workload() {
        let (_tree, fifo) = attached_fifo();
        let w = Workload::new(|_| Ok(()));
        fifo.enqueue_direct(Arc::clone(&w)).unwrap();
        assert_eq!(w.status(), WorkloadStatus::Scheduled);
        // a second submission of the same workload is rejected
        assert!(matches!(
            fifo.enqueue_direct(Arc::clone(&w)),
            Err(SchedError::WorkloadAlreadyScheduled)
        ));
        assert_eq!(fifo.len(), 1);
    }

    #[test]
    fn predicate_gates_classified_enqueue_only() {
        let fifo = FifoQdisc::new(Handle::new(2), Predicate::typed(|n: &u32| *n > 10));
        let root = RoundRobinQdisc::new(
            Handle::new(1),
            vec![ChildLink::classified(fifo.clone())],
        );
        let _tree = QdiscTree::new(root).unwrap();

        let w = Workload::new(|_| Ok(()));
        assert!(!fifo.try_enqueue(&3_u32, &w).unwrap());
        assert!(!fifo.try_enqueue(&"wrong shape", &w).unwrap());
        assert!(fifo.try_enqueue(&42_u32, &w).unwrap());
        // direct enqueue bypasses the predicate
        let direct = Workload::new(|_| Ok(()));
        fifo.enqueue_direct(direct).unwrap();
        assert_eq!(fifo.len(), 2);
    }

    #[test]
    fn remove_is_unsupported() {
        let (_tree, fifo) = attached_fifo();
        let w = Workload::new(|_| Ok(()));
        fifo.enqueue_direct(Arc::clone(&w)).unwrap();
        assert!(!fifo.try_remove(&w));
        assert_eq!(fifo.len(), 1);
    }
}
