// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Classful round-robin qdisc.

use std::sync::Arc;

use concurrency::sync::atomic::{AtomicUsize, Ordering};
use handle::Handle;
use tracing::trace;

use crate::error::SchedError;
use crate::qdisc::emptiness::EmptinessCounter;
use crate::qdisc::{ChildLink, ClassifyMode, ClassifyState, Predicate, Qdisc, QdiscCore};
use crate::route::{RouteNode, RoutingPath};
use crate::worker::WorkerId;
use crate::workload::Workload;

tracectl::trace_target!(tracectl::LevelFilter::INFO, &["qdisc", "hotpath"]);

/// Interior qdisc rotating dequeues over an ordered child sequence.
///
/// Children are fixed at construction. A shared cursor claims one child per
/// dequeue attempt; a failed attempt feeds the [`EmptinessCounter`], and a
/// full round of failures within one counter generation declares the
/// subtree drained so workers can sleep. Every enqueue anywhere below
/// arrives here as a notification, which resets the counter *before*
/// travelling further up; a racing worker holding a stale token can
/// therefore never conclude "all empty" across that enqueue.
///
/// Fairness is per-round, not per-workload: an empty child is skipped
/// within the round and loses nothing but its turn.
#[derive(Debug)]
pub struct RoundRobinQdisc {
    core: QdiscCore,
    children: Box<[ChildLink]>,
    dequeue_cursor: AtomicUsize,
    enqueue_cursor: AtomicUsize,
    emptiness: EmptinessCounter,
}

impl RoundRobinQdisc {
    /// Build with a fixed, ordered child sequence. The child list is
    /// immutable for the tree's lifetime.
    #[must_use]
    pub fn new(handle: Handle, children: Vec<ChildLink>) -> Arc<Self> {
        Arc::new(Self {
            core: QdiscCore::new(handle, Predicate::never()),
            children: children.into_boxed_slice(),
            dequeue_cursor: AtomicUsize::new(0),
            enqueue_cursor: AtomicUsize::new(0),
            emptiness: EmptinessCounter::new(),
        })
    }

    fn attached_self(&self) -> Result<Arc<dyn Qdisc>, SchedError> {
        self.core.self_arc().ok_or_else(|| {
            SchedError::QdiscTreeMalformed(format!(
                "qdisc {} is not attached to a tree",
                self.handle()
            ))
        })
    }
}

impl Qdisc for RoundRobinQdisc {
    fn core(&self) -> &QdiscCore {
        &self.core
    }

    fn is_classful(&self) -> bool {
        true
    }

    fn children(&self) -> &[ChildLink] {
        &self.children
    }

    fn is_empty(&self) -> bool {
        self.children.iter().all(|c| c.qdisc().is_empty())
    }

    fn len(&self) -> usize {
        self.children.iter().map(|c| c.qdisc().len()).sum()
    }

    /// Direct enqueues are spread over the children round-robin; the
    /// selected child performs the bind and the notification travels back
    /// through this node.
    fn enqueue_direct(&self, workload: Arc<Workload>) -> Result<(), SchedError> {
        let n = self.children.len();
        if n == 0 {
            return Err(SchedError::QdiscTreeMalformed(format!(
                "round-robin qdisc {} has no children",
                self.handle()
            )));
        }
        let i = self.enqueue_cursor.fetch_add(1, Ordering::Relaxed) % n;
        self.children[i].qdisc().enqueue_direct(workload)
    }

    /// Walk the children in insertion order; the first match wins.
    fn try_enqueue(
        &self,
        state: &ClassifyState,
        workload: &Arc<Workload>,
    ) -> Result<bool, SchedError> {
        for child in &self.children {
            match child.mode() {
                ClassifyMode::ByHandleOnly => {}
                ClassifyMode::Predicate | ClassifyMode::Recursive => {
                    if child.qdisc().try_enqueue(state, workload)? {
                        return Ok(true);
                    }
                }
            }
        }
        Ok(false)
    }

    fn try_find_route(&self, target: Handle, path: &mut RoutingPath) -> Result<bool, SchedError> {
        let here = self.attached_self()?;
        if self.handle() == target {
            path.complete(here)?;
            return Ok(true);
        }
        // direct children first, then descend; insertion order either way
        for (offset, child) in self.children.iter().enumerate() {
            if child.qdisc().handle() == target {
                path.push(RouteNode::new(Arc::clone(&here), target, offset));
                path.complete(Arc::clone(child.qdisc()))?;
                return Ok(true);
            }
        }
        for (offset, child) in self.children.iter().enumerate() {
            let qdisc = child.qdisc();
            if qdisc.is_classful() {
                path.push(RouteNode::new(Arc::clone(&here), qdisc.handle(), offset));
                if qdisc.try_find_route(target, path)? {
                    return Ok(true);
                }
                path.retract();
            }
        }
        Ok(false)
    }

    fn try_dequeue(&self, worker: WorkerId, back_track: bool) -> Option<Arc<Workload>> {
        let n = self.children.len();
        if n == 0 {
            return None;
        }
        #[allow(clippy::cast_possible_truncation)]
        let width = n as u32;
        let mut attempts = 0;
        loop {
            if self.emptiness.is_drained() {
                return None;
            }
            let token = self.emptiness.token();
            let i = self.dequeue_cursor.fetch_add(1, Ordering::Relaxed) % n;
            if let Some(workload) = self.children[i].qdisc().try_dequeue(worker, back_track) {
                // a success breaks the empty streak; failures recorded
                // earlier in this generation must not count towards a
                // "drained" verdict for children we have not revisited
                self.emptiness.reset();
                return Some(workload);
            }
            if self.emptiness.increment(token, width) {
                trace!(qdisc = %self.handle(), "subtree drained");
                return None;
            }
            attempts += 1;
            if !back_track && attempts >= n {
                // one full round without back-tracking: report empty even
                // though concurrent enqueues kept the counter alive
                return None;
            }
        }
    }

    fn try_peek(&self, worker: WorkerId) -> Option<Arc<Workload>> {
        let n = self.children.len();
        if n == 0 {
            return None;
        }
        let start = self.dequeue_cursor.load(Ordering::Relaxed);
        (0..n).find_map(|k| self.children[start.wrapping_add(k) % n].qdisc().try_peek(worker))
    }

    fn try_remove(&self, workload: &Workload) -> bool {
        self.children.iter().any(|c| c.qdisc().try_remove(workload))
    }

    fn can_classify(&self, state: &ClassifyState) -> bool {
        self.children.iter().any(|child| match child.mode() {
            ClassifyMode::ByHandleOnly => false,
            ClassifyMode::Predicate | ClassifyMode::Recursive => {
                child.qdisc().can_classify(state)
            }
        })
    }

    /// Re-arm the emptiness tracking, then pass the notification up.
    fn notify_work_scheduled(&self) {
        self.emptiness.reset();
        self.core.notify_parent();
    }
}
