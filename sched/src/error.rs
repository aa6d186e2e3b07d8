// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Error surface of the scheduling core.
//!
//! Submission failures are reported synchronously to the producer and leave
//! no trace in the tree. Payload failures never show up here: they are
//! captured into the workload's terminal state and surfaced through its
//! [`WorkloadResult`](crate::workload::WorkloadResult).

use handle::Handle;

#[derive(Debug, thiserror::Error)]
pub enum SchedError {
    /// The producer submitted the reserved all-zero handle.
    #[error("handle is the default value and cannot address a qdisc")]
    HandleIsDefault,
    /// Handle-addressed submission could not locate the handle in the tree.
    #[error("no route to qdisc {0}")]
    NoRouteFound(Handle),
    /// No qdisc in the tree accepted the classification state.
    #[error("no qdisc accepted the classification state")]
    ClassificationFailed,
    /// Internal invariant failure while routing.
    #[error("routing path invariant violated: {0}")]
    RoutingPathInvalid(&'static str),
    /// A routing path was completed with a leaf twice. Programming error in
    /// a custom qdisc.
    #[error("routing path leaf already completed")]
    RoutingPathLeafAlreadyCompleted,
    /// The qdisc tree failed validation at build time.
    #[error("malformed qdisc tree: {0}")]
    QdiscTreeMalformed(String),
    /// `try_bind` failed because the workload is already bound.
    #[error("workload is already scheduled")]
    WorkloadAlreadyScheduled,
    /// Terminal signal surfaced to observers of a canceled workload.
    ///
    /// Payloads that honor a cancellation request return this (boxed) from
    /// their body; the worker then retires the workload as `Canceled`
    /// instead of `Faulted`.
    #[error("workload was canceled")]
    WorkloadCanceled,
    /// The OS refused to start a worker thread.
    #[error("failed to spawn worker thread")]
    WorkerSpawnFailed(#[from] std::io::Error),
}
