// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Tree validation and wiring.
//!
//! The builder hands the core a fully assembled root by ownership;
//! [`QdiscTree::new`] is the checked insertion point. It verifies the shape
//! (classful root, unique non-default handles, every node appearing exactly
//! once), installs the write-once parent and self links, and builds the
//! flat handle table used for lookups. After this, the tree is immutable.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use handle::Handle;

use crate::error::SchedError;
use crate::qdisc::{ClassifyMode, ParentLink, Qdisc};
use crate::worker::WakeGate;

type HandleTable = HashMap<Handle, Arc<dyn Qdisc>, ahash::RandomState>;

/// An immutable, validated qdisc tree.
#[derive(Debug)]
pub struct QdiscTree {
    root: Arc<dyn Qdisc>,
    table: HandleTable,
}

impl QdiscTree {
    /// Validate and wire an assembled tree.
    pub fn new(root: Arc<dyn Qdisc>) -> Result<Self, SchedError> {
        if !root.is_classful() {
            return Err(SchedError::QdiscTreeMalformed(
                "root must be a classful qdisc".to_string(),
            ));
        }
        let mut table = HandleTable::default();
        let mut seen = HashSet::new();
        root.core().attach_self(Arc::downgrade(&root))?;
        visit(&root, &mut table, &mut seen)?;
        Ok(Self { root, table })
    }

    #[must_use]
    pub fn root(&self) -> &Arc<dyn Qdisc> {
        &self.root
    }

    /// Flat lookup by handle, any depth.
    #[must_use]
    pub fn find(&self, handle: Handle) -> Option<&Arc<dyn Qdisc>> {
        self.table.get(&handle)
    }

    #[must_use]
    pub fn qdisc_count(&self) -> usize {
        self.table.len()
    }

    /// Point the root's notifications at the scheduler's wake sink.
    pub(crate) fn attach_sink(&self, gate: &Arc<WakeGate>) -> Result<(), SchedError> {
        self.root
            .core()
            .attach_parent(ParentLink::Scheduler(Arc::downgrade(gate)))
    }
}

fn visit(
    qdisc: &Arc<dyn Qdisc>,
    table: &mut HandleTable,
    seen: &mut HashSet<usize>,
) -> Result<(), SchedError> {
    // identity by address: one node must not appear twice (shared child or
    // a cycle smuggled in through the builder)
    let identity = Arc::as_ptr(qdisc) as *const () as usize;
    if !seen.insert(identity) {
        return Err(SchedError::QdiscTreeMalformed(format!(
            "qdisc {} appears more than once in the tree",
            qdisc.handle()
        )));
    }
    let handle = qdisc.handle();
    if handle.is_default() {
        return Err(SchedError::QdiscTreeMalformed(
            "a qdisc carries the default handle".to_string(),
        ));
    }
    if table.insert(handle, Arc::clone(qdisc)).is_some() {
        return Err(SchedError::QdiscTreeMalformed(format!(
            "duplicate handle {handle}"
        )));
    }
    for child in qdisc.children() {
        match child.mode() {
            ClassifyMode::Recursive if !child.qdisc().is_classful() => {
                return Err(SchedError::QdiscTreeMalformed(format!(
                    "recursive classification on classless child {}",
                    child.qdisc().handle()
                )));
            }
            ClassifyMode::Predicate if child.qdisc().is_classful() => {
                return Err(SchedError::QdiscTreeMalformed(format!(
                    "typed classification on classful child {}; mark it recursive",
                    child.qdisc().handle()
                )));
            }
            _ => {}
        }
        child
            .qdisc()
            .core()
            .attach_self(Arc::downgrade(child.qdisc()))?;
        child
            .qdisc()
            .core()
            .attach_parent(ParentLink::Qdisc(Arc::downgrade(qdisc)))?;
        visit(child.qdisc(), table, seen)?;
    }
    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod test {
    use super::*;
    use crate::qdisc::{ChildLink, FifoQdisc, Predicate, RoundRobinQdisc};

    #[test]
    fn valid_tree_builds_a_flat_table() {
        let f1 = FifoQdisc::new(Handle::new(20), Predicate::never());
        let f2 = FifoQdisc::new(Handle::new(30), Predicate::never());
        let inner = RoundRobinQdisc::new(
            Handle::new(10),
            vec![
                ChildLink::by_handle_only(f1),
                ChildLink::by_handle_only(f2),
            ],
        );
        let root = RoundRobinQdisc::new(Handle::new(1), vec![ChildLink::recursive(inner)]);
        let tree = QdiscTree::new(root).unwrap();

        assert_eq!(tree.qdisc_count(), 4);
        for raw in [1, 10, 20, 30] {
            assert!(tree.find(Handle::new(raw)).is_some());
        }
        assert!(tree.find(Handle::new(99)).is_none());
        assert!(tree.root().contains_child(Handle::new(10)));
        assert!(!tree.root().contains_child(Handle::new(20)));
    }

    #[test]
    fn classless_root_is_rejected() {
        let fifo = FifoQdisc::new(Handle::new(1), Predicate::never());
        assert!(matches!(
            QdiscTree::new(fifo),
            Err(SchedError::QdiscTreeMalformed(_))
        ));
    }

    #[test]
    fn duplicate_handles_are_rejected() {
        let f1 = FifoQdisc::new(Handle::new(7), Predicate::never());
        let f2 = FifoQdisc::new(Handle::new(7), Predicate::never());
        let root = RoundRobinQdisc::new(
            Handle::new(1),
            vec![ChildLink::by_handle_only(f1), ChildLink::by_handle_only(f2)],
        );
        assert!(matches!(
            QdiscTree::new(root),
            Err(SchedError::QdiscTreeMalformed(_))
        ));
    }

    #[test]
    fn default_handles_are_rejected() {
        let fifo = FifoQdisc::new(Handle::DEFAULT, Predicate::never());
        let root = RoundRobinQdisc::new(Handle::new(1), vec![ChildLink::by_handle_only(fifo)]);
        assert!(matches!(
            QdiscTree::new(root),
            Err(SchedError::QdiscTreeMalformed(_))
        ));
    }

    #[test]
    fn shared_nodes_are_rejected() {
        let fifo = FifoQdisc::new(Handle::new(7), Predicate::never());
        let root = RoundRobinQdisc::new(
            Handle::new(1),
            vec![
                ChildLink::by_handle_only(fifo.clone()),
                ChildLink::by_handle_only(fifo),
            ],
        );
        assert!(matches!(
            QdiscTree::new(root),
            Err(SchedError::QdiscTreeMalformed(_))
        ));
    }

    #[test]
    fn a_qdisc_cannot_join_two_trees() {
        let fifo = FifoQdisc::new(Handle::new(7), Predicate::never());
        let root1 =
            RoundRobinQdisc::new(Handle::new(1), vec![ChildLink::by_handle_only(fifo.clone())]);
        let _tree1 = QdiscTree::new(root1).unwrap();

        let root2 = RoundRobinQdisc::new(Handle::new(2), vec![ChildLink::by_handle_only(fifo)]);
        assert!(matches!(
            QdiscTree::new(root2),
            Err(SchedError::QdiscTreeMalformed(_))
        ));
    }

    #[test]
    fn recursive_mode_requires_a_classful_child() {
        let fifo = FifoQdisc::new(Handle::new(7), Predicate::never());
        let root = RoundRobinQdisc::new(Handle::new(1), vec![ChildLink::recursive(fifo)]);
        assert!(matches!(
            QdiscTree::new(root),
            Err(SchedError::QdiscTreeMalformed(_))
        ));
    }
}
