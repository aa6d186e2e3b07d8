// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Workloads: units of deferred work with their own lifecycle.
//!
//! A [`Workload`] carries a payload, a one-shot weak binding to the qdisc
//! that accepted it, a set of continuations that fire exactly once on the
//! terminal transition, and an optional per-workload service container.
//! Anonymous (fire-and-forget) instances additionally carry a back-reference
//! to the pool they came from; the engine treats both variants uniformly.

pub mod status;

use std::any::Any;
use std::fmt::{self, Debug, Formatter};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::{Condvar, Mutex};

use crate::pool::AnonymousPool;
use crate::qdisc::Qdisc;
use crate::service::ServiceContainer;

pub use status::WorkloadStatus;
pub(crate) use status::{AtomicWorkloadStatus, StartDecision};

/// Error type payloads may fail with.
pub type PayloadError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The callable invoked on a worker thread.
pub type Payload = Box<dyn FnOnce(&WorkloadContext<'_>) -> Result<(), PayloadError> + Send + 'static>;

/// An observer awaiting completion.
pub type Continuation = Box<dyn FnOnce(&WorkloadResult) + Send + 'static>;

/// Why a workload ended `Faulted`.
#[derive(Debug, Clone)]
pub enum WorkloadFault {
    /// The payload returned an error.
    Error(String),
    /// The payload panicked; the panic was contained on the worker.
    Panic(String),
}

impl fmt::Display for WorkloadFault {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            WorkloadFault::Error(msg) => write!(f, "payload error: {msg}"),
            WorkloadFault::Panic(msg) => write!(f, "payload panic: {msg}"),
        }
    }
}

/// The observer view of a finished (or finishing) workload.
#[derive(Debug, Clone)]
pub struct WorkloadResult {
    pub status: WorkloadStatus,
    pub fault: Option<Arc<WorkloadFault>>,
}

impl WorkloadResult {
    #[must_use]
    pub fn ran_to_completion(&self) -> bool {
        self.status == WorkloadStatus::RanToCompletion
    }

    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.status == WorkloadStatus::Canceled
    }

    #[must_use]
    pub fn is_faulted(&self) -> bool {
        self.status == WorkloadStatus::Faulted
    }
}

enum CompletionState {
    Pending(Vec<Continuation>),
    Fired(WorkloadResult),
}

/// One unit of deferred work.
///
/// Created by a producer (or rented from an [`AnonymousPool`]), bound to a
/// leaf qdisc by the first successful enqueue, executed exactly once by one
/// worker, then observed through [`Workload::wait`] /
/// [`Workload::await_completion`].
pub struct Workload {
    status: AtomicWorkloadStatus,
    bound: Mutex<Option<Weak<dyn Qdisc>>>,
    payload: Mutex<Option<Payload>>,
    completion: Mutex<CompletionState>,
    completed: Condvar,
    services: Mutex<Option<Arc<ServiceContainer>>>,
    pool: OnceLock<Weak<AnonymousPool>>,
}

impl Debug for Workload {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workload")
            .field("status", &self.status())
            .field("cancel_requested", &self.cancel_requested())
            .finish_non_exhaustive()
    }
}

impl Workload {
    /// Create an awaitable workload around `payload`.
    pub fn new<F>(payload: F) -> Arc<Workload>
    where
        F: FnOnce(&WorkloadContext<'_>) -> Result<(), PayloadError> + Send + 'static,
    {
        Arc::new(Self::from_boxed(Box::new(payload)))
    }

    pub(crate) fn from_boxed(payload: Payload) -> Workload {
        Workload {
            status: AtomicWorkloadStatus::new(),
            bound: Mutex::new(None),
            payload: Mutex::new(Some(payload)),
            completion: Mutex::new(CompletionState::Pending(Vec::new())),
            completed: Condvar::new(),
            services: Mutex::new(None),
            pool: OnceLock::new(),
        }
    }

    #[must_use]
    pub fn status(&self) -> WorkloadStatus {
        self.status.load()
    }

    #[must_use]
    pub fn cancel_requested(&self) -> bool {
        self.status.cancel_requested()
    }

    /// Attach a service container the payload can retrieve while running.
    /// The container is released on the terminal transition.
    pub fn attach_services(&self, services: Arc<ServiceContainer>) {
        *self.services.lock() = Some(services);
    }

    /// One-shot bind to the qdisc that accepted this workload.
    ///
    /// `Created → Scheduled` with the accepting qdisc recorded; false if the
    /// workload is already bound or already finished, in which case the
    /// caller must not enqueue it.
    pub(crate) fn try_bind(&self, qdisc: Weak<dyn Qdisc>) -> bool {
        if !self.status.try_bind() {
            return false;
        }
        // Only the CAS winner reaches this store.
        *self.bound.lock() = Some(qdisc);
        true
    }

    fn bound_qdisc(&self) -> Option<Arc<dyn Qdisc>> {
        let bound = self.bound.lock();
        bound.as_ref().and_then(Weak::upgrade)
    }

    /// Request cooperative cancellation. Idempotent.
    ///
    /// If the workload is still queued and its qdisc supports removal, it is
    /// retired as `Canceled` immediately; otherwise the flag is observed by
    /// the dispatching worker (which then never invokes the payload) or by
    /// the payload itself at its own check-points.
    pub fn request_cancel(&self) {
        let observed = self.status.request_cancel();
        if observed == WorkloadStatus::Scheduled
            && let Some(qdisc) = self.bound_qdisc()
            && qdisc.try_remove(self)
            && self.status.try_abort_scheduled()
        {
            self.finish(WorkloadStatus::Canceled, None);
        }
    }

    /// Fast path used by a qdisc when an in-queue workload is superseded
    /// (latest-only swap, constrained-LIFO overflow). The caller has already
    /// removed the workload from its queue.
    pub(crate) fn internal_abort(&self) {
        self.status.request_cancel();
        if self.status.try_abort_scheduled() {
            self.finish(WorkloadStatus::Canceled, None);
        }
    }

    /// Worker-side start. True means the payload must now be invoked; false
    /// means there is nothing to run (canceled at start, or lost a race).
    pub(crate) fn try_start(&self) -> bool {
        match self.status.try_start() {
            StartDecision::Run => true,
            StartDecision::CanceledAtStart => {
                self.finish(WorkloadStatus::Canceled, None);
                false
            }
            StartDecision::Refused => false,
        }
    }

    pub(crate) fn take_payload(&self) -> Option<Payload> {
        self.payload.lock().take()
    }

    pub(crate) fn complete_ok(&self) {
        if self.status.complete(WorkloadStatus::RanToCompletion) {
            self.finish(WorkloadStatus::RanToCompletion, None);
        }
    }

    pub(crate) fn complete_canceled(&self) {
        if self.status.complete(WorkloadStatus::Canceled) {
            self.finish(WorkloadStatus::Canceled, None);
        }
    }

    pub(crate) fn complete_faulted(&self, fault: WorkloadFault) {
        if self.status.complete(WorkloadStatus::Faulted) {
            self.finish(WorkloadStatus::Faulted, Some(Arc::new(fault)));
        }
    }

    /// Terminal bookkeeping. Reached exactly once per scheduled lifetime:
    /// every caller first wins a CAS into a terminal state.
    fn finish(&self, status: WorkloadStatus, fault: Option<Arc<WorkloadFault>>) {
        *self.bound.lock() = None;
        *self.services.lock() = None;
        let result = WorkloadResult { status, fault };
        let waiters = {
            let mut state = self.completion.lock();
            match std::mem::replace(&mut *state, CompletionState::Fired(result.clone())) {
                CompletionState::Pending(waiters) => waiters,
                CompletionState::Fired(previous) => {
                    // double finish would be an engine bug; keep the first result
                    *state = CompletionState::Fired(previous);
                    Vec::new()
                }
            }
        };
        self.completed.notify_all();
        // invoked outside the lock so continuations may touch the workload
        for continuation in waiters {
            continuation(&result);
        }
    }

    /// Register an observer. If the workload is already terminal the
    /// observer is invoked immediately, inline.
    pub fn await_completion(&self, continuation: impl FnOnce(&WorkloadResult) + Send + 'static) {
        let mut state = self.completion.lock();
        match &mut *state {
            CompletionState::Pending(waiters) => waiters.push(Box::new(continuation)),
            CompletionState::Fired(result) => {
                let result = result.clone();
                drop(state);
                continuation(&result);
            }
        }
    }

    /// Block until the workload reaches a terminal state.
    #[must_use]
    pub fn wait(&self) -> WorkloadResult {
        let mut state = self.completion.lock();
        loop {
            if let CompletionState::Fired(result) = &*state {
                return result.clone();
            }
            self.completed.wait(&mut state);
        }
    }

    /// The result, if the workload already finished.
    #[must_use]
    pub fn result(&self) -> Option<WorkloadResult> {
        match &*self.completion.lock() {
            CompletionState::Fired(result) => Some(result.clone()),
            CompletionState::Pending(_) => None,
        }
    }

    pub(crate) fn services(&self) -> Option<Arc<ServiceContainer>> {
        self.services.lock().clone()
    }

    pub(crate) fn set_pool(&self, pool: Weak<AnonymousPool>) {
        let _ = self.pool.set(pool);
    }

    pub(crate) fn pool_ref(&self) -> Option<Arc<AnonymousPool>> {
        self.pool.get().and_then(Weak::upgrade)
    }

    /// Begin a fresh lifetime for a pooled instance.
    pub(crate) fn reset_for_reuse(&self, payload: Payload) {
        *self.bound.lock() = None;
        *self.payload.lock() = Some(payload);
        *self.completion.lock() = CompletionState::Pending(Vec::new());
        *self.services.lock() = None;
        self.status.reset_for_reuse();
    }
}

/// What a running payload sees of its own workload.
pub struct WorkloadContext<'a> {
    workload: &'a Workload,
}

impl<'a> WorkloadContext<'a> {
    pub(crate) fn new(workload: &'a Workload) -> Self {
        Self { workload }
    }

    /// True once someone asked this workload to cancel.
    #[must_use]
    pub fn cancel_requested(&self) -> bool {
        self.workload.cancel_requested()
    }

    /// Cancellation check-point: returns an error the worker recognizes as
    /// "canceled, not faulted" when a cancellation request is pending.
    ///
    /// ```ignore
    /// |ctx: &WorkloadContext<'_>| {
    ///     for chunk in work {
    ///         ctx.checkpoint()?;
    ///         process(chunk);
    ///     }
    ///     Ok(())
    /// }
    /// ```
    pub fn checkpoint(&self) -> Result<(), PayloadError> {
        if self.workload.cancel_requested() {
            Err(Box::new(crate::error::SchedError::WorkloadCanceled))
        } else {
            Ok(())
        }
    }

    /// Fetch a service from the container attached at submission, if any.
    #[must_use]
    pub fn service<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.workload.services().and_then(|s| s.get::<T>())
    }
}
