// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Worker threads and the wake gate.
//!
//! A fixed set of interchangeable workers drains the root qdisc: each loops
//! *drain until the tree reports empty, then sleep on the gate*. The gate
//! is a counting semaphore fed by the enqueue notification chain, so a
//! permit released by a racing enqueue survives the gap between "observed
//! empty" and "went to sleep" — a worker can never sleep through work.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::JoinHandle;

use concurrency::sync::atomic::{AtomicBool, Ordering};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info};

use crate::error::SchedError;
use crate::qdisc::Qdisc;
use crate::service::ServiceContainer;
use crate::workload::{Workload, WorkloadContext, WorkloadFault};

tracectl::trace_target!(tracectl::LevelFilter::INFO, &["worker"]);

/// Identity of one worker thread. Used as an affinity hint by the
/// work-stealing qdisc; workers are otherwise interchangeable.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct WorkerId(usize);

impl WorkerId {
    pub(crate) const fn new(index: usize) -> Self {
        Self(index)
    }

    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

thread_local! {
    static CURRENT_WORKER: Cell<Option<WorkerId>> = const { Cell::new(None) };
    static CURRENT_SERVICES: RefCell<Option<Arc<ServiceContainer>>> = const { RefCell::new(None) };
}

/// The identity of the worker running the current thread, if any. Lets
/// submissions made from inside a payload carry a lane hint.
pub(crate) fn current_worker() -> Option<WorkerId> {
    CURRENT_WORKER.get()
}

/// The service container of the workload executing on the current thread,
/// if any. For code that cannot see the `WorkloadContext`.
#[must_use]
pub fn current_services() -> Option<Arc<ServiceContainer>> {
    CURRENT_SERVICES.with(|slot| slot.borrow().clone())
}

/// Counting semaphore the workers sleep on.
///
/// Permits are capped at the worker count: one permit is enough to get the
/// whole tree drained, so there is no point stacking more wakeups than
/// there are workers to take them.
#[derive(Debug)]
pub(crate) struct WakeGate {
    permits: Mutex<usize>,
    available: Condvar,
    cap: usize,
    shutdown: AtomicBool,
}

impl WakeGate {
    pub(crate) fn new(cap: usize) -> Self {
        Self {
            permits: Mutex::new(0),
            available: Condvar::new(),
            cap: cap.max(1),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Sink end of the enqueue notification chain.
    pub(crate) fn notify_work_scheduled(&self) {
        {
            let mut permits = self.permits.lock();
            if *permits < self.cap {
                *permits += 1;
            }
        }
        self.available.notify_one();
    }

    /// Block until a permit arrives. False means shutdown.
    pub(crate) fn wait_for_work(&self) -> bool {
        let mut permits = self.permits.lock();
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                return false;
            }
            if *permits > 0 {
                *permits -= 1;
                return true;
            }
            self.available.wait(&mut permits);
        }
    }

    pub(crate) fn begin_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        // taking the lock orders the flag before any sleeper re-checks it
        drop(self.permits.lock());
        self.available.notify_all();
    }
}

/// Spawn the worker set. Each worker gets a named OS thread.
pub(crate) fn spawn_workers(
    count: usize,
    name_prefix: &str,
    root: &Arc<dyn Qdisc>,
    gate: &Arc<WakeGate>,
) -> Result<Vec<JoinHandle<()>>, SchedError> {
    info!("Spawning {count} workers");
    let mut handles = Vec::with_capacity(count);
    for index in 0..count {
        let builder = std::thread::Builder::new().name(format!("{name_prefix}-{index}"));
        let root = Arc::clone(root);
        let gate = Arc::clone(gate);
        handles.push(builder.spawn(move || run_worker(WorkerId::new(index), &root, &gate))?);
    }
    Ok(handles)
}

fn run_worker(id: WorkerId, root: &Arc<dyn Qdisc>, gate: &WakeGate) {
    CURRENT_WORKER.set(Some(id));
    debug!(worker = id.index(), "worker started");
    loop {
        while let Some(workload) = root.try_dequeue(id, true) {
            execute(id, &workload);
        }
        if !gate.wait_for_work() {
            break;
        }
    }
    debug!(worker = id.index(), "worker stopped");
}

/// Run one dequeued workload through its lifecycle edges.
pub(crate) fn execute(worker: WorkerId, workload: &Arc<Workload>) {
    if workload.try_start() {
        invoke_payload(worker, workload);
    }
    // canceled-at-start and executed workloads are terminal here; pooled
    // instances go home either way
    if workload.status().is_terminal()
        && let Some(pool) = workload.pool_ref()
    {
        pool.give_back(Arc::clone(workload));
    }
}

fn invoke_payload(worker: WorkerId, workload: &Arc<Workload>) {
    let Some(payload) = workload.take_payload() else {
        // internal invariant violation: fatal to the workload, not to us
        error!(worker = worker.index(), "workload reached Running without a payload");
        workload.complete_faulted(WorkloadFault::Error(
            "payload missing at dispatch".to_string(),
        ));
        return;
    };

    CURRENT_SERVICES.with(|slot| *slot.borrow_mut() = workload.services());
    let context = WorkloadContext::new(workload);
    let outcome = catch_unwind(AssertUnwindSafe(|| payload(&context)));
    CURRENT_SERVICES.with(|slot| *slot.borrow_mut() = None);

    match outcome {
        Ok(Ok(())) => workload.complete_ok(),
        Ok(Err(error)) => {
            if error
                .downcast_ref::<SchedError>()
                .is_some_and(|e| matches!(e, SchedError::WorkloadCanceled))
            {
                workload.complete_canceled();
            } else {
                debug!(worker = worker.index(), %error, "payload failed");
                workload.complete_faulted(WorkloadFault::Error(error.to_string()));
            }
        }
        Err(panic) => {
            error!(worker = worker.index(), "payload panicked");
            workload.complete_faulted(WorkloadFault::Panic(panic_message(&panic)));
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic of unknown type".to_string()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod test {
    use super::*;
    use crate::workload::WorkloadStatus;
    use std::sync::Weak;

    fn bound(workload: &Arc<Workload>) {
        assert!(workload.try_bind(Weak::<crate::qdisc::fifo::FifoQdisc>::new()));
    }

    #[test]
    fn normal_return_completes() {
        let w = Workload::new(|_| Ok(()));
        bound(&w);
        execute(WorkerId::new(0), &w);
        assert_eq!(w.status(), WorkloadStatus::RanToCompletion);
    }

    #[test]
    fn payload_error_faults() {
        let w = Workload::new(|_| Err("boom".into()));
        bound(&w);
        execute(WorkerId::new(0), &w);
        let result = w.wait();
        assert!(result.is_faulted());
        let fault = result.fault.unwrap();
        assert!(matches!(&*fault, WorkloadFault::Error(m) if m.contains("boom")));
    }

    #[test]
    fn payload_panic_is_contained() {
        let w = Workload::new(|_| panic!("kaboom"));
        bound(&w);
        execute(WorkerId::new(0), &w);
        let result = w.wait();
        assert!(result.is_faulted());
        let fault = result.fault.unwrap();
        assert!(matches!(&*fault, WorkloadFault::Panic(m) if m.contains("kaboom")));
    }

    #[test]
    fn cancel_before_start_skips_the_payload() {
        let w = Workload::new(|_| -> Result<(), crate::workload::PayloadError> {
            panic!("payload must not run")
        });
        bound(&w);
        w.request_cancel();
        execute(WorkerId::new(0), &w);
        assert_eq!(w.status(), WorkloadStatus::Canceled);
    }

    #[test]
    fn honored_cancellation_ends_canceled_not_faulted() {
        // the payload sees the flag go up mid-run and bails at a checkpoint
        let me: Arc<std::sync::OnceLock<Arc<Workload>>> = Arc::new(std::sync::OnceLock::new());
        let inner = Arc::clone(&me);
        let w = Workload::new(move |ctx: &WorkloadContext<'_>| {
            if let Some(myself) = inner.get() {
                myself.request_cancel();
            }
            ctx.checkpoint()?;
            Ok(())
        });
        me.set(Arc::clone(&w)).unwrap();
        bound(&w);
        execute(WorkerId::new(0), &w);
        let result = w.wait();
        assert!(result.is_canceled());
        assert!(result.fault.is_none());
    }

    #[test]
    fn refused_start_runs_nothing() {
        let w = Workload::new(|_| Ok(()));
        // never bound: still Created, the worker must leave it alone
        execute(WorkerId::new(0), &w);
        assert_eq!(w.status(), WorkloadStatus::Created);
    }

    #[test]
    fn gate_permits_cap_and_drain() {
        let gate = WakeGate::new(2);
        for _ in 0..5 {
            gate.notify_work_scheduled();
        }
        assert!(gate.wait_for_work());
        assert!(gate.wait_for_work());
        gate.begin_shutdown();
        assert!(!gate.wait_for_work());
    }
}
