// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Routing paths for handle-addressed submission.
//!
//! A [`RoutingPath`] records the walk from the root towards a target handle
//! as `(qdisc, child-handle, child-offset)` triples and is *completed*
//! exactly once with the leaf. Paths are built top-down, consumed by a
//! single direct enqueue, and always release their pooled backing vector on
//! drop, whichever exit path the caller takes.

use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

use crossbeam_queue::ArrayQueue;
use handle::Handle;

use crate::error::SchedError;
use crate::qdisc::Qdisc;

/// One step of a routing path: the qdisc whose child list was consulted,
/// the handle of the child that was entered, and that child's offset.
pub struct RouteNode {
    qdisc: Arc<dyn Qdisc>,
    child_handle: Handle,
    child_offset: usize,
}

impl RouteNode {
    pub(crate) fn new(qdisc: Arc<dyn Qdisc>, child_handle: Handle, child_offset: usize) -> Self {
        Self {
            qdisc,
            child_handle,
            child_offset,
        }
    }

    #[must_use]
    pub fn qdisc(&self) -> &Arc<dyn Qdisc> {
        &self.qdisc
    }

    #[must_use]
    pub fn child_handle(&self) -> Handle {
        self.child_handle
    }

    #[must_use]
    pub fn child_offset(&self) -> usize {
        self.child_offset
    }
}

impl Debug for RouteNode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteNode")
            .field("qdisc", &self.qdisc.handle())
            .field("child_handle", &self.child_handle)
            .field("child_offset", &self.child_offset)
            .finish()
    }
}

/// A pool of backing vectors for routing paths.
///
/// Acquisition hands out a [`RoutingPath`] whose backing comes from the
/// pool when one is available; the path gives it back on drop. An empty
/// pool degrades to a fresh allocation, a full pool lets the backing drop.
#[derive(Debug)]
pub struct PathPool {
    backings: ArrayQueue<Vec<RouteNode>>,
}

impl PathPool {
    #[must_use]
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            backings: ArrayQueue::new(capacity.max(1)),
        })
    }

    #[must_use]
    pub fn acquire(self: &Arc<Self>) -> RoutingPath {
        let nodes = self.backings.pop().unwrap_or_default();
        RoutingPath {
            nodes,
            leaf: None,
            pool: Arc::clone(self),
        }
    }

    fn release(&self, mut nodes: Vec<RouteNode>) {
        nodes.clear();
        // pool full: let the allocation drop
        let _ = self.backings.push(nodes);
    }

    #[cfg(test)]
    fn pooled(&self) -> usize {
        self.backings.len()
    }
}

/// The ordered walk from the root to a leaf for one submission.
pub struct RoutingPath {
    nodes: Vec<RouteNode>,
    leaf: Option<Arc<dyn Qdisc>>,
    pool: Arc<PathPool>,
}

impl RoutingPath {
    pub(crate) fn push(&mut self, node: RouteNode) {
        self.nodes.push(node);
    }

    /// Back out of a subtree that turned out not to contain the target.
    pub(crate) fn retract(&mut self) {
        self.nodes.pop();
    }

    /// Terminate the path with its leaf. Completing twice is a programming
    /// error in the routing qdisc and is reported, not tolerated.
    pub fn complete(&mut self, leaf: Arc<dyn Qdisc>) -> Result<(), SchedError> {
        if self.leaf.is_some() {
            return Err(SchedError::RoutingPathLeafAlreadyCompleted);
        }
        self.leaf = Some(leaf);
        Ok(())
    }

    #[must_use]
    pub fn leaf(&self) -> Option<&Arc<dyn Qdisc>> {
        self.leaf.as_ref()
    }

    #[must_use]
    pub fn nodes(&self) -> &[RouteNode] {
        &self.nodes
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }
}

impl Debug for RoutingPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutingPath")
            .field("nodes", &self.nodes)
            .field("leaf", &self.leaf.as_ref().map(|l| l.handle()))
            .finish()
    }
}

impl Drop for RoutingPath {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.nodes));
    }
}
