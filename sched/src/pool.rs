// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Lock-free, bounded pool of anonymous workloads.
//!
//! Fire-and-forget submissions churn through short-lived [`Workload`]
//! instances; this pool recycles them. The design trades strict LIFO for
//! contention-free clamped index updates: rent decrements the fill index
//! (clamped at zero) and takes the slot under acquire, return increments
//! (clamped at capacity) and stores under release. Interleavings can leave
//! a rented index pointing at an already-emptied slot; that degrades to a
//! fresh allocation, never to a crash.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use concurrency::sync::atomic::{AtomicUsize, Ordering};

use crate::workload::{Payload, Workload};

/// Bounded recycling pool for anonymous workloads.
#[derive(Debug)]
pub struct AnonymousPool {
    slots: Box<[ArcSwapOption<Workload>]>,
    filled: AtomicUsize,
}

impl AnonymousPool {
    #[must_use]
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            slots: (0..capacity.max(1)).map(|_| ArcSwapOption::empty()).collect(),
            filled: AtomicUsize::new(0),
        })
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// How many instances are currently parked. Approximate under
    /// concurrency.
    #[must_use]
    pub fn available(&self) -> usize {
        self.filled.load(Ordering::Acquire)
    }

    /// Take a recycled instance, or construct a fresh one when the pool is
    /// empty (or a raced slot turned out null).
    #[must_use]
    pub fn rent(self: &Arc<Self>, payload: Payload) -> Arc<Workload> {
        if let Ok(filled) =
            self.filled
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            && let Some(workload) = self.slots[filled - 1].swap(None)
        {
            workload.reset_for_reuse(payload);
            return workload;
        }
        let workload = Arc::new(Workload::from_boxed(payload));
        workload.set_pool(Arc::downgrade(self));
        workload
    }

    /// Park a terminal instance for reuse.
    ///
    /// When the pool is already full the instance is silently dropped; the
    /// next rent simply allocates a fresh one.
    pub fn give_back(&self, workload: Arc<Workload>) {
        if let Ok(filled) = self.filled.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
            (n < self.slots.len()).then_some(n + 1)
        }) {
            self.slots[filled].store(Some(workload));
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod test {
    use super::*;
    use crate::workload::WorkloadStatus;
    use std::sync::Weak;

    fn finish(w: &Arc<Workload>) {
        assert!(w.try_bind(Weak::<crate::qdisc::fifo::FifoQdisc>::new()));
        assert!(w.try_start());
        w.complete_ok();
    }

    #[test]
    fn rent_from_empty_pool_allocates() {
        let pool = AnonymousPool::new(2);
        let w = pool.rent(Box::new(|_| Ok(())));
        assert_eq!(w.status(), WorkloadStatus::Created);
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn returned_instances_are_reused() {
        let pool = AnonymousPool::new(2);
        let w = pool.rent(Box::new(|_| Ok(())));
        finish(&w);
        let recycled = Arc::as_ptr(&w) as usize;
        pool.give_back(w);
        assert_eq!(pool.available(), 1);

        let w = pool.rent(Box::new(|_| Ok(())));
        assert_eq!(Arc::as_ptr(&w) as usize, recycled);
        // a fresh lifetime: back to Created with a new payload
        assert_eq!(w.status(), WorkloadStatus::Created);
        assert!(w.result().is_none());
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn overflow_drops_silently() {
        let pool = AnonymousPool::new(1);
        let w1 = pool.rent(Box::new(|_| Ok(())));
        let w2 = pool.rent(Box::new(|_| Ok(())));
        finish(&w1);
        finish(&w2);
        pool.give_back(w1);
        pool.give_back(w2); // full: dropped
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn rented_instances_remember_their_pool() {
        let pool = AnonymousPool::new(1);
        let w = pool.rent(Box::new(|_| Ok(())));
        assert!(w.pool_ref().is_some_and(|p| Arc::ptr_eq(&p, &pool)));
    }
}
