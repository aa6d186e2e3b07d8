// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Bounded LIFO leaf with drop-oldest overflow.

use std::collections::VecDeque;
use std::num::NonZeroU16;
use std::sync::Arc;

use handle::Handle;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::SchedError;
use crate::qdisc::{Predicate, Qdisc, QdiscCore};
use crate::worker::WorkerId;
use crate::workload::Workload;

tracectl::trace_target!(tracectl::LevelFilter::INFO, &["qdisc"]);

/// Classless LIFO qdisc with a fixed capacity of 1..=65535.
///
/// Dequeue returns the most recently enqueued workload. When a full stack
/// receives another workload the element at the bottom (the oldest) is
/// discarded and aborted, so its observers see `Canceled`. Interior removal
/// is supported, which makes pre-dispatch cancellation immediate here.
///
/// Drop-oldest plus interior removal need a coherent view of the whole
/// sequence, so this leaf runs its operations under a short mutex-protected
/// critical section rather than lock-free.
#[derive(Debug)]
pub struct ConstrainedLifoQdisc {
    core: QdiscCore,
    capacity: NonZeroU16,
    stack: Mutex<VecDeque<Arc<Workload>>>,
}

impl ConstrainedLifoQdisc {
    #[must_use]
    pub fn new(handle: Handle, predicate: Predicate, capacity: NonZeroU16) -> Arc<Self> {
        Arc::new(Self {
            core: QdiscCore::new(handle, predicate),
            capacity,
            stack: Mutex::new(VecDeque::with_capacity(usize::from(capacity.get()))),
        })
    }

    #[must_use]
    pub fn capacity(&self) -> u16 {
        self.capacity.get()
    }
}

impl Qdisc for ConstrainedLifoQdisc {
    fn core(&self) -> &QdiscCore {
        &self.core
    }

    fn is_empty(&self) -> bool {
        self.stack.lock().is_empty()
    }

    fn len(&self) -> usize {
        self.stack.lock().len()
    }

    fn enqueue_direct(&self, workload: Arc<Workload>) -> Result<(), SchedError> {
        let bound = self.core.self_ref().ok_or_else(|| {
            SchedError::QdiscTreeMalformed(format!(
                "qdisc {} is not attached to a tree",
                self.handle()
            ))
        })?;
        if !workload.try_bind(bound) {
            return Err(SchedError::WorkloadAlreadyScheduled);
        }
        let superseded = {
            let mut stack = self.stack.lock();
            let superseded = if stack.len() >= usize::from(self.capacity.get()) {
                stack.pop_front()
            } else {
                None
            };
            stack.push_back(workload);
            superseded
        };
        if let Some(oldest) = superseded {
            // aborted outside the critical section; continuations may rummage
            debug!(qdisc = %self.handle(), "overflow, aborting bottom workload");
            oldest.internal_abort();
        }
        self.core.notify_parent();
        Ok(())
    }

    fn try_dequeue(&self, _worker: WorkerId, _back_track: bool) -> Option<Arc<Workload>> {
        self.stack.lock().pop_back()
    }

    fn try_peek(&self, _worker: WorkerId) -> Option<Arc<Workload>> {
        self.stack.lock().back().cloned()
    }

    fn try_remove(&self, workload: &Workload) -> bool {
        let mut stack = self.stack.lock();
        if let Some(position) = stack
            .iter()
            .position(|held| std::ptr::eq(Arc::as_ptr(held), workload))
        {
            stack.remove(position);
            true
        } else {
            false
        }
    }
}
