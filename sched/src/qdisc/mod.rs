// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The qdisc abstraction: polymorphic tree nodes that enqueue and dequeue
//! workloads according to a policy.
//!
//! A qdisc is either *classless* (a leaf owning a concrete queue) or
//! *classful* (an interior node owning an ordered sequence of child
//! classifications). Child lists are published once at tree-build time and
//! immutable afterwards; parent links and self-references are write-once.
//! Every successful enqueue notifies up the parent chain so the scheduler
//! can wake a worker, and so classful parents can re-arm their emptiness
//! tracking.

pub mod emptiness;
pub mod fifo;
pub mod latest;
pub mod lifo;
pub mod round_robin;
pub mod stealing;

use std::any::Any;
use std::fmt::{self, Debug, Formatter};
use std::sync::{Arc, OnceLock, Weak};

use handle::Handle;

use crate::error::SchedError;
use crate::route::RoutingPath;
use crate::worker::{WakeGate, WorkerId};
use crate::workload::Workload;

pub use fifo::FifoQdisc;
pub use latest::LatestOnlyQdisc;
pub use lifo::ConstrainedLifoQdisc;
pub use round_robin::RoundRobinQdisc;
pub use stealing::WorkStealingQdisc;

/// Opaque classification state supplied by producers.
///
/// Typed predicates downcast it to the shape they declared; a state of an
/// unknown shape simply matches nothing.
pub type ClassifyState = dyn Any + Send + Sync;

/// A qdisc's own classification predicate.
///
/// Invocation is pure and side-effect-free by contract; callers must not
/// block inside it.
pub struct Predicate(PredicateKind);

enum PredicateKind {
    Never,
    Typed(Box<dyn Fn(&ClassifyState) -> bool + Send + Sync>),
}

impl Predicate {
    /// A predicate that never matches; the qdisc is addressable by handle
    /// only.
    #[must_use]
    pub fn never() -> Self {
        Predicate(PredicateKind::Never)
    }

    /// Match when the state is an `S` and `f` accepts it.
    #[must_use]
    pub fn typed<S, F>(f: F) -> Self
    where
        S: Any,
        F: Fn(&S) -> bool + Send + Sync + 'static,
    {
        Predicate(PredicateKind::Typed(Box::new(move |state: &ClassifyState| {
            state.downcast_ref::<S>().is_some_and(|s| f(s))
        })))
    }

    pub(crate) fn matches(&self, state: &ClassifyState) -> bool {
        match &self.0 {
            PredicateKind::Never => false,
            PredicateKind::Typed(f) => f(state),
        }
    }
}

impl Debug for Predicate {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.0 {
            PredicateKind::Never => write!(f, "Predicate::Never"),
            PredicateKind::Typed(_) => write!(f, "Predicate::Typed(..)"),
        }
    }
}

/// How a classful parent consults one child during classification.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ClassifyMode {
    /// Never matched during classification; reachable by handle only.
    ByHandleOnly,
    /// Consult the (classless) child's own typed predicate.
    Predicate,
    /// Delegate to the (classful) child's own classification walk.
    Recursive,
}

/// One child of a classful qdisc: the child plus its classification mode.
#[derive(Debug)]
pub struct ChildLink {
    qdisc: Arc<dyn Qdisc>,
    mode: ClassifyMode,
}

impl ChildLink {
    /// A child reachable only through its handle.
    #[must_use]
    pub fn by_handle_only(qdisc: Arc<dyn Qdisc>) -> Self {
        Self {
            qdisc,
            mode: ClassifyMode::ByHandleOnly,
        }
    }

    /// A classless child matched through its own predicate.
    #[must_use]
    pub fn classified(qdisc: Arc<dyn Qdisc>) -> Self {
        Self {
            qdisc,
            mode: ClassifyMode::Predicate,
        }
    }

    /// A classful child that classifies recursively.
    #[must_use]
    pub fn recursive(qdisc: Arc<dyn Qdisc>) -> Self {
        Self {
            qdisc,
            mode: ClassifyMode::Recursive,
        }
    }

    #[must_use]
    pub fn qdisc(&self) -> &Arc<dyn Qdisc> {
        &self.qdisc
    }

    #[must_use]
    pub fn mode(&self) -> ClassifyMode {
        self.mode
    }
}

/// Where a qdisc's enqueue notifications go: its parent qdisc, or, for the
/// root, the scheduler's wake sink.
#[derive(Clone, Debug)]
pub(crate) enum ParentLink {
    Qdisc(Weak<dyn Qdisc>),
    Scheduler(Weak<WakeGate>),
}

impl ParentLink {
    pub(crate) fn notify_work_scheduled(&self) {
        match self {
            ParentLink::Qdisc(parent) => {
                if let Some(parent) = parent.upgrade() {
                    parent.notify_work_scheduled();
                }
            }
            ParentLink::Scheduler(gate) => {
                if let Some(gate) = gate.upgrade() {
                    gate.notify_work_scheduled();
                }
            }
        }
    }
}

/// Identity and wiring shared by every qdisc implementation.
///
/// Composition, not inheritance: each concrete qdisc owns a `QdiscCore` and
/// hands it out through [`Qdisc::core`], which gives the trait's default
/// methods the handle, the predicate, and the write-once links.
#[derive(Debug)]
pub struct QdiscCore {
    handle: Handle,
    predicate: Predicate,
    parent: OnceLock<ParentLink>,
    self_ref: OnceLock<Weak<dyn Qdisc>>,
}

impl QdiscCore {
    #[must_use]
    pub fn new(handle: Handle, predicate: Predicate) -> Self {
        Self {
            handle,
            predicate,
            parent: OnceLock::new(),
            self_ref: OnceLock::new(),
        }
    }

    #[must_use]
    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub(crate) fn matches(&self, state: &ClassifyState) -> bool {
        self.predicate.matches(state)
    }

    pub(crate) fn attach_self(&self, self_ref: Weak<dyn Qdisc>) -> Result<(), SchedError> {
        self.self_ref.set(self_ref).map_err(|_| {
            SchedError::QdiscTreeMalformed(format!(
                "qdisc {} is already part of a tree",
                self.handle
            ))
        })
    }

    pub(crate) fn attach_parent(&self, parent: ParentLink) -> Result<(), SchedError> {
        self.parent.set(parent).map_err(|_| {
            SchedError::QdiscTreeMalformed(format!(
                "qdisc {} already has a parent",
                self.handle
            ))
        })
    }

    pub(crate) fn self_ref(&self) -> Option<Weak<dyn Qdisc>> {
        self.self_ref.get().cloned()
    }

    pub(crate) fn self_arc(&self) -> Option<Arc<dyn Qdisc>> {
        self.self_ref.get().and_then(Weak::upgrade)
    }

    pub(crate) fn notify_parent(&self) {
        if let Some(parent) = self.parent.get() {
            parent.notify_work_scheduled();
        }
    }
}

/// Bind `workload` to the qdisc owning `core`, run the queue-specific
/// `push`, and notify up. The shared tail of every classless
/// `enqueue_direct`.
pub(crate) fn commit_enqueue(
    core: &QdiscCore,
    workload: Arc<Workload>,
    push: impl FnOnce(Arc<Workload>),
) -> Result<(), SchedError> {
    let bound = core.self_ref().ok_or_else(|| {
        SchedError::QdiscTreeMalformed(format!(
            "qdisc {} is not attached to a tree",
            core.handle()
        ))
    })?;
    if !workload.try_bind(bound) {
        return Err(SchedError::WorkloadAlreadyScheduled);
    }
    push(workload);
    core.notify_parent();
    Ok(())
}

/// A tree node that enqueues and dequeues workloads according to a policy.
///
/// Implementations fall into two families. Classless leaves implement the
/// queue operations and inherit the classification defaults; classful nodes
/// override [`Qdisc::children`], [`Qdisc::is_classful`] and the walk-based
/// operations. Nothing here blocks, and nothing here may be called before
/// the node is wired into a tree.
pub trait Qdisc: Send + Sync + Debug {
    /// Shared identity and wiring.
    fn core(&self) -> &QdiscCore;

    /// Immutable identifier, unique within the tree.
    fn handle(&self) -> Handle {
        self.core().handle()
    }

    /// True for interior nodes owning child classifications.
    fn is_classful(&self) -> bool {
        false
    }

    /// Ordered child classifications; empty for classless leaves.
    fn children(&self) -> &[ChildLink] {
        &[]
    }

    /// Eventually consistent; never claims empty while a committed enqueue
    /// is visible to a future dequeue.
    fn is_empty(&self) -> bool;

    fn len(&self) -> usize;

    /// Bind and enqueue, bypassing classification. On success the workload
    /// is reachable by at least one future `try_dequeue` and the parent
    /// chain has been notified.
    fn enqueue_direct(&self, workload: Arc<Workload>) -> Result<(), SchedError>;

    /// Classify `state` and enqueue on a match. `Ok(false)` means "not my
    /// workload"; errors mean the match succeeded but the enqueue could not.
    fn try_enqueue(
        &self,
        state: &ClassifyState,
        workload: &Arc<Workload>,
    ) -> Result<bool, SchedError> {
        if !self.core().matches(state) {
            return Ok(false);
        }
        self.enqueue_direct(Arc::clone(workload))?;
        Ok(true)
    }

    /// Enqueue on the direct child with `target`, if there is one.
    fn try_enqueue_by_handle(
        &self,
        target: Handle,
        workload: &Arc<Workload>,
    ) -> Result<bool, SchedError> {
        for child in self.children() {
            if child.qdisc().handle() == target {
                child.qdisc().enqueue_direct(Arc::clone(workload))?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Extend `path` towards `target`; on terminal success the path has been
    /// completed with the leaf.
    fn try_find_route(&self, target: Handle, path: &mut RoutingPath) -> Result<bool, SchedError> {
        if self.handle() != target {
            return Ok(false);
        }
        let leaf = self.core().self_arc().ok_or(SchedError::RoutingPathInvalid(
            "routed qdisc is not attached to a tree",
        ))?;
        path.complete(leaf)?;
        Ok(true)
    }

    /// Take one workload, or none. Safe under concurrent enqueue; never
    /// hands the same workload to two workers. `back_track` permits
    /// re-examining children that were just found empty.
    fn try_dequeue(&self, worker: WorkerId, back_track: bool) -> Option<Arc<Workload>>;

    /// Non-destructive best-effort look at the next workload; may race.
    fn try_peek(&self, worker: WorkerId) -> Option<Arc<Workload>>;

    /// Remove `workload` if this qdisc still holds it. Atomic with respect
    /// to `try_dequeue`.
    fn try_remove(&self, workload: &Workload) -> bool;

    /// Would this qdisc (or, for classful nodes, one of their children)
    /// accept `state`?
    fn can_classify(&self, state: &ClassifyState) -> bool {
        self.core().matches(state)
    }

    /// True iff a direct child carries `handle`.
    fn contains_child(&self, handle: Handle) -> bool {
        self.children().iter().any(|c| c.qdisc().handle() == handle)
    }

    /// Called (bottom-up) after every successful enqueue in the subtree.
    fn notify_work_scheduled(&self) {
        self.core().notify_parent();
    }
}
