// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Single-slot leaf that keeps only the latest workload.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use handle::Handle;

use crate::error::SchedError;
use crate::qdisc::{Predicate, Qdisc, QdiscCore, commit_enqueue};
use crate::worker::WorkerId;
use crate::workload::Workload;

/// Classless qdisc holding at most one workload.
///
/// Enqueue atomically swaps the slot; a superseded workload that was still
/// `Scheduled` is aborted so its observers see `Canceled` before the new
/// enqueue is observable. At most one workload is ever dequeued per
/// generation between enqueues.
#[derive(Debug)]
pub struct LatestOnlyQdisc {
    core: QdiscCore,
    slot: ArcSwapOption<Workload>,
}

impl LatestOnlyQdisc {
    #[must_use]
    pub fn new(handle: Handle, predicate: Predicate) -> Arc<Self> {
        Arc::new(Self {
            core: QdiscCore::new(handle, predicate),
            slot: ArcSwapOption::empty(),
        })
    }
}

impl Qdisc for LatestOnlyQdisc {
    fn core(&self) -> &QdiscCore {
        &self.core
    }

    fn is_empty(&self) -> bool {
        self.slot.load().is_none()
    }

    fn len(&self) -> usize {
        usize::from(self.slot.load().is_some())
    }

    fn enqueue_direct(&self, workload: Arc<Workload>) -> Result<(), SchedError> {
        commit_enqueue(&self.core, workload, |w| {
            if let Some(superseded) = self.slot.swap(Some(w)) {
                // no-ops unless the previous holder was still Scheduled
                superseded.internal_abort();
            }
        })
    }

    fn try_dequeue(&self, _worker: WorkerId, _back_track: bool) -> Option<Arc<Workload>> {
        self.slot.swap(None)
    }

    fn try_peek(&self, _worker: WorkerId) -> Option<Arc<Workload>> {
        self.slot.load_full()
    }

    fn try_remove(&self, workload: &Workload) -> bool {
        let current = self.slot.load();
        match current.as_ref() {
            Some(held) if std::ptr::eq(Arc::as_ptr(held), workload) => {
                let previous = self.slot.compare_and_swap(held, None);
                previous.as_ref().is_some_and(|p| Arc::ptr_eq(p, held))
            }
            _ => false,
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod test {
    use super::*;
    use crate::qdisc::{ChildLink, RoundRobinQdisc};
    use crate::tree::QdiscTree;
    use crate::workload::WorkloadStatus;

    fn attached_latest() -> (QdiscTree, Arc<LatestOnlyQdisc>) {
        let latest = LatestOnlyQdisc::new(Handle::new(2), Predicate::never());
        let root = RoundRobinQdisc::new(
            Handle::new(1),
            vec![ChildLink::by_handle_only(latest.clone())],
        );
        let tree = QdiscTree::new(root).unwrap();
        (tree, latest)
    }

    #[test]
    fn supersession_aborts_the_previous_workload() {
        let (_tree, latest) = attached_latest();
        let w1 = Workload::new(|_| Ok(()));
        let w2 = Workload::new(|_| Ok(()));
        latest.enqueue_direct(Arc::clone(&w1)).unwrap();
        latest.enqueue_direct(Arc::clone(&w2)).unwrap();

        assert_eq!(w1.status(), WorkloadStatus::Canceled);
        assert!(w1.wait().is_canceled());
        assert_eq!(latest.len(), 1);

        let got = latest.try_dequeue(WorkerId::new(0), false).unwrap();
        assert!(Arc::ptr_eq(&got, &w2));
        assert!(latest.is_empty());
    }

    #[test]
    fn dequeue_takes_the_slot_once() {
        let (_tree, latest) = attached_latest();
        let w = Workload::new(|_| Ok(()));
        latest.enqueue_direct(Arc::clone(&w)).unwrap();
        assert!(latest.try_dequeue(WorkerId::new(0), false).is_some());
        assert!(latest.try_dequeue(WorkerId::new(0), false).is_none());
    }

    #[test]
    fn remove_only_matches_the_held_workload() {
        let (_tree, latest) = attached_latest();
        let held = Workload::new(|_| Ok(()));
        let other = Workload::new(|_| Ok(()));
        latest.enqueue_direct(Arc::clone(&held)).unwrap();

        assert!(!latest.try_remove(&other));
        assert!(latest.try_remove(&held));
        assert!(latest.is_empty());
        assert!(!latest.try_remove(&held));
    }

    #[test]
    fn cancellation_of_queued_workload_is_immediate() {
        let (_tree, latest) = attached_latest();
        let w = Workload::new(|_| Ok(()));
        latest.enqueue_direct(Arc::clone(&w)).unwrap();
        w.request_cancel();
        assert_eq!(w.status(), WorkloadStatus::Canceled);
        assert!(latest.is_empty());
    }
}
