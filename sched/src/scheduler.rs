// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The scheduler: tree + workers + pools, behind the submission API.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::thread::JoinHandle;

use handle::Handle;
use parking_lot::Mutex;
use tracing::{error, info};

use crate::error::SchedError;
use crate::pool::AnonymousPool;
use crate::qdisc::{ClassifyState, Qdisc};
use crate::route::PathPool;
use crate::tree::QdiscTree;
use crate::worker::{self, WakeGate};
use crate::workload::{PayloadError, Workload, WorkloadContext};

tracectl::trace_target!(tracectl::LevelFilter::INFO, &["sched"]);

/// Startup configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of worker threads.
    pub workers: NonZeroUsize,
    /// Thread-name prefix; workers are named `<prefix>-<index>`.
    pub worker_name_prefix: String,
    /// Capacity of the anonymous workload pool.
    pub anonymous_pool_capacity: usize,
    /// Capacity of the routing-path backing pool.
    pub routing_path_pool_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism().unwrap_or(NonZeroUsize::MIN),
            worker_name_prefix: "wp-worker".to_string(),
            anonymous_pool_capacity: 64,
            routing_path_pool_capacity: 32,
        }
    }
}

impl SchedulerConfig {
    /// Convenience for tests and small deployments.
    #[must_use]
    pub fn with_workers(workers: NonZeroUsize) -> Self {
        Self {
            workers,
            ..Self::default()
        }
    }
}

/// A running scheduling engine.
///
/// Owns an immutable qdisc tree (rooted in a classful qdisc) and a fixed
/// worker set. Dropping the scheduler shuts it down: workers are woken,
/// told to stop, and joined; workloads still queued at that point are
/// dropped with the tree.
pub struct Scheduler {
    tree: QdiscTree,
    gate: Arc<WakeGate>,
    paths: Arc<PathPool>,
    anonymous: Arc<AnonymousPool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("root", &self.tree.root().handle())
            .field("qdiscs", &self.tree.qdisc_count())
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Take ownership of an assembled tree and start the worker set.
    pub fn new(root: Arc<dyn Qdisc>, config: SchedulerConfig) -> Result<Self, SchedError> {
        let tree = QdiscTree::new(root)?;
        let gate = Arc::new(WakeGate::new(config.workers.get()));
        tree.attach_sink(&gate)?;
        let workers = match worker::spawn_workers(
            config.workers.get(),
            &config.worker_name_prefix,
            tree.root(),
            &gate,
        ) {
            Ok(workers) => workers,
            Err(e) => {
                // release any workers that did start before the failure
                gate.begin_shutdown();
                return Err(e);
            }
        };
        info!(
            root = %tree.root().handle(),
            qdiscs = tree.qdisc_count(),
            workers = config.workers.get(),
            "scheduler started"
        );
        Ok(Self {
            tree,
            gate,
            paths: PathPool::new(config.routing_path_pool_capacity),
            anonymous: AnonymousPool::new(config.anonymous_pool_capacity),
            workers: Mutex::new(workers),
        })
    }

    /// State-driven submission: classify `state` down the tree and enqueue
    /// at the first matching leaf.
    pub fn schedule(
        &self,
        state: &ClassifyState,
        workload: &Arc<Workload>,
    ) -> Result<(), SchedError> {
        if self.tree.root().try_enqueue(state, workload)? {
            Ok(())
        } else {
            Err(SchedError::ClassificationFailed)
        }
    }

    /// Handle-addressed submission: route to the qdisc carrying `target`
    /// and enqueue there directly, skipping classification.
    pub fn schedule_by_handle(
        &self,
        target: Handle,
        workload: &Arc<Workload>,
    ) -> Result<(), SchedError> {
        if target.is_default() {
            return Err(SchedError::HandleIsDefault);
        }
        let mut path = self.paths.acquire();
        if !self.tree.root().try_find_route(target, &mut path)? {
            return Err(SchedError::NoRouteFound(target));
        }
        let leaf = path.leaf().ok_or(SchedError::RoutingPathInvalid(
            "route completed without a leaf",
        ))?;
        if leaf.handle() != target {
            return Err(SchedError::RoutingPathInvalid(
                "completed leaf does not carry the routed handle",
            ));
        }
        leaf.enqueue_direct(Arc::clone(workload))
        // path drops here; its backing returns to the pool on every branch
    }

    /// Create, classify, and return an awaitable workload in one step.
    pub fn submit<F>(&self, state: &ClassifyState, payload: F) -> Result<Arc<Workload>, SchedError>
    where
        F: FnOnce(&WorkloadContext<'_>) -> Result<(), PayloadError> + Send + 'static,
    {
        let workload = Workload::new(payload);
        self.schedule(state, &workload)?;
        Ok(workload)
    }

    /// Create and route an awaitable workload to `target` in one step.
    pub fn submit_to<F>(&self, target: Handle, payload: F) -> Result<Arc<Workload>, SchedError>
    where
        F: FnOnce(&WorkloadContext<'_>) -> Result<(), PayloadError> + Send + 'static,
    {
        let workload = Workload::new(payload);
        self.schedule_by_handle(target, &workload)?;
        Ok(workload)
    }

    /// Fire-and-forget submission through the anonymous pool.
    pub fn spawn<F>(&self, state: &ClassifyState, payload: F) -> Result<(), SchedError>
    where
        F: FnOnce(&WorkloadContext<'_>) -> Result<(), PayloadError> + Send + 'static,
    {
        let workload = self.anonymous.rent(Box::new(payload));
        let outcome = self.schedule(state, &workload);
        if outcome.is_err() {
            self.anonymous.give_back(workload);
        }
        outcome
    }

    /// Fire-and-forget submission routed to `target`.
    pub fn spawn_at<F>(&self, target: Handle, payload: F) -> Result<(), SchedError>
    where
        F: FnOnce(&WorkloadContext<'_>) -> Result<(), PayloadError> + Send + 'static,
    {
        let workload = self.anonymous.rent(Box::new(payload));
        let outcome = self.schedule_by_handle(target, &workload);
        if outcome.is_err() {
            self.anonymous.give_back(workload);
        }
        outcome
    }

    /// Flat lookup into the tree.
    #[must_use]
    pub fn qdisc(&self, handle: Handle) -> Option<&Arc<dyn Qdisc>> {
        self.tree.find(handle)
    }

    #[must_use]
    pub fn tree(&self) -> &QdiscTree {
        &self.tree
    }

    /// Stop the gate, wake every worker, and join them. Idempotent.
    pub fn shutdown(&self) {
        self.gate.begin_shutdown();
        let workers = std::mem::take(&mut *self.workers.lock());
        for handle in workers {
            if handle.join().is_err() {
                error!("worker thread panicked outside payload execution");
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod test {
    use super::*;
    use crate::qdisc::{ChildLink, FifoQdisc, Predicate, RoundRobinQdisc};

    fn one_worker() -> SchedulerConfig {
        SchedulerConfig::with_workers(NonZeroUsize::MIN)
    }

    fn classified_tree() -> Arc<RoundRobinQdisc> {
        let evens = FifoQdisc::new(Handle::new(2), Predicate::typed(|n: &u64| n % 2 == 0));
        let odds = FifoQdisc::new(Handle::new(3), Predicate::typed(|n: &u64| n % 2 == 1));
        RoundRobinQdisc::new(
            Handle::new(1),
            vec![ChildLink::classified(evens), ChildLink::classified(odds)],
        )
    }

    #[test]
    #[tracing_test::traced_test]
    fn classification_picks_the_first_matching_leaf() {
        let sched = Scheduler::new(classified_tree(), one_worker()).unwrap();
        let w = sched.submit(&4_u64, |_| Ok(())).unwrap();
        assert!(w.wait().ran_to_completion());
        let w = sched.submit(&5_u64, |_| Ok(())).unwrap();
        assert!(w.wait().ran_to_completion());
    }

    #[test]
    fn unclassifiable_state_is_rejected() {
        let sched = Scheduler::new(classified_tree(), one_worker()).unwrap();
        let err = sched.submit(&"not a number", |_| Ok(())).unwrap_err();
        assert!(matches!(err, SchedError::ClassificationFailed));
    }

    #[test]
    fn default_handle_is_rejected_up_front() {
        let sched = Scheduler::new(classified_tree(), one_worker()).unwrap();
        let err = sched.submit_to(Handle::DEFAULT, |_| Ok(())).unwrap_err();
        assert!(matches!(err, SchedError::HandleIsDefault));
    }

    #[test]
    fn unknown_handle_reports_no_route() {
        let sched = Scheduler::new(classified_tree(), one_worker()).unwrap();
        let err = sched.submit_to(Handle::new(99), |_| Ok(())).unwrap_err();
        assert!(matches!(err, SchedError::NoRouteFound(h) if h == Handle::new(99)));
    }

    #[test]
    fn resubmission_is_rejected() {
        let sched = Scheduler::new(classified_tree(), one_worker()).unwrap();
        let w = sched.submit(&2_u64, |_| Ok(())).unwrap();
        let err = sched.schedule(&2_u64, &w).unwrap_err();
        assert!(matches!(err, SchedError::WorkloadAlreadyScheduled));
        assert!(w.wait().ran_to_completion());
    }

    #[test]
    fn shutdown_is_idempotent() {
        let sched = Scheduler::new(classified_tree(), one_worker()).unwrap();
        sched.shutdown();
        sched.shutdown();
    }
}
