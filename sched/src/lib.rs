// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Hierarchical, classful workload scheduling.
//!
//! The engine accepts submitted workloads, routes them through a tree of
//! queueing disciplines (qdiscs), and dispatches them to a fixed pool of
//! worker threads. The tree is assembled once, handed to a [`Scheduler`] by
//! ownership, and never mutated afterwards; everything that moves at runtime
//! (queue heads, cursors, the emptiness counter, workload status words) is
//! atomic with release/acquire discipline.
//!
//! Submission has two modes: *state-driven* ([`Scheduler::schedule`])
//! classifies an opaque state down the tree to a leaf, and *handle-addressed*
//! ([`Scheduler::schedule_by_handle`]) routes to a qdisc the caller already
//! knows. Workloads run exactly once, transition through a small atomic state
//! machine, and support cooperative cancellation.

#![allow(clippy::missing_errors_doc)]

pub mod error;
pub mod pool;
pub mod qdisc;
pub mod route;
pub mod scheduler;
pub mod service;
pub mod tree;
pub mod worker;
pub mod workload;

// re-exports
pub use error::SchedError;
pub use handle::Handle;
pub use scheduler::{Scheduler, SchedulerConfig};
pub use workload::{Workload, WorkloadContext, WorkloadResult, WorkloadStatus};
