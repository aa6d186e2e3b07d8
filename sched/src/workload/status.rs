// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The workload lifecycle state machine.
//!
//! One `AtomicU32` holds both the state and the cancellation-requested flag
//! so that every lifecycle edge is a single compare-and-swap and exactly one
//! actor observes each transition. The permitted edges are
//! `Created → Scheduled → Running → {RanToCompletion | Faulted | Canceled}`,
//! plus `Scheduled → Canceled` when a cancellation wins before dispatch.
//! No edge is ever reversed within one scheduled lifetime.

use concurrency::sync::atomic::{AtomicU32, Ordering};
use std::fmt::{self, Debug, Formatter};

const STATE_MASK: u32 = 0b0111;
const CANCEL_REQUESTED: u32 = 0b1000;

/// Lifecycle state of a workload.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WorkloadStatus {
    Created = 0,
    Scheduled = 1,
    Running = 2,
    RanToCompletion = 3,
    Faulted = 4,
    Canceled = 5,
}

impl WorkloadStatus {
    /// True for the three states a workload can end in.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkloadStatus::RanToCompletion | WorkloadStatus::Faulted | WorkloadStatus::Canceled
        )
    }

    const fn from_bits(bits: u32) -> Self {
        match bits & STATE_MASK {
            0 => WorkloadStatus::Created,
            1 => WorkloadStatus::Scheduled,
            2 => WorkloadStatus::Running,
            3 => WorkloadStatus::RanToCompletion,
            4 => WorkloadStatus::Faulted,
            // 5; the 6 and 7 bit patterns are never stored
            _ => WorkloadStatus::Canceled,
        }
    }
}

/// What a worker should do after asking to start a workload.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum StartDecision {
    /// The `Scheduled → Running` edge was taken; invoke the payload.
    Run,
    /// A cancellation request was pending; the workload went
    /// `Scheduled → Canceled` instead and the payload must not run.
    CanceledAtStart,
    /// The workload was not in `Scheduled` (already started elsewhere or
    /// already terminal); leave it alone.
    Refused,
}

/// The packed (state, cancel-requested) word.
pub struct AtomicWorkloadStatus(AtomicU32);

impl Debug for AtomicWorkloadStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.load())
    }
}

impl Default for AtomicWorkloadStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl AtomicWorkloadStatus {
    #[must_use]
    pub fn new() -> Self {
        Self(AtomicU32::new(WorkloadStatus::Created as u32))
    }

    #[must_use]
    pub fn load(&self) -> WorkloadStatus {
        WorkloadStatus::from_bits(self.0.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn cancel_requested(&self) -> bool {
        self.0.load(Ordering::Acquire) & CANCEL_REQUESTED != 0
    }

    /// `Created → Scheduled`. False if the workload was already scheduled,
    /// completed, or aborted; callers must not enqueue on failure.
    pub(crate) fn try_bind(&self) -> bool {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                (bits & STATE_MASK == WorkloadStatus::Created as u32)
                    .then_some((bits & CANCEL_REQUESTED) | WorkloadStatus::Scheduled as u32)
            })
            .is_ok()
    }

    /// `Scheduled → Running`, or `Scheduled → Canceled` when a cancellation
    /// request is pending.
    pub(crate) fn try_start(&self) -> StartDecision {
        match self.0.fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
            if bits & STATE_MASK != WorkloadStatus::Scheduled as u32 {
                return None;
            }
            if bits & CANCEL_REQUESTED != 0 {
                Some(CANCEL_REQUESTED | WorkloadStatus::Canceled as u32)
            } else {
                Some(WorkloadStatus::Running as u32)
            }
        }) {
            Ok(prev) if prev & CANCEL_REQUESTED != 0 => StartDecision::CanceledAtStart,
            Ok(_) => StartDecision::Run,
            Err(_) => StartDecision::Refused,
        }
    }

    /// `Running → terminal`. False if the workload was not `Running`.
    pub(crate) fn complete(&self, terminal: WorkloadStatus) -> bool {
        debug_assert!(terminal.is_terminal());
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                (bits & STATE_MASK == WorkloadStatus::Running as u32)
                    .then_some((bits & CANCEL_REQUESTED) | terminal as u32)
            })
            .is_ok()
    }

    /// Set the cancellation-requested flag; returns the state observed at
    /// the instant the flag went up. Idempotent.
    pub(crate) fn request_cancel(&self) -> WorkloadStatus {
        WorkloadStatus::from_bits(self.0.fetch_or(CANCEL_REQUESTED, Ordering::AcqRel))
    }

    /// `Scheduled → Canceled` for a workload that has been removed from its
    /// queue. False if another actor moved it first.
    pub(crate) fn try_abort_scheduled(&self) -> bool {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                (bits & STATE_MASK == WorkloadStatus::Scheduled as u32)
                    .then_some(CANCEL_REQUESTED | WorkloadStatus::Canceled as u32)
            })
            .is_ok()
    }

    /// Reset to `Created` for a pooled instance starting a new lifetime.
    pub(crate) fn reset_for_reuse(&self) {
        self.0
            .store(WorkloadStatus::Created as u32, Ordering::Release);
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn straight_line_lifecycle() {
        let status = AtomicWorkloadStatus::new();
        assert_eq!(status.load(), WorkloadStatus::Created);
        assert!(status.try_bind());
        assert_eq!(status.load(), WorkloadStatus::Scheduled);
        assert_eq!(status.try_start(), StartDecision::Run);
        assert_eq!(status.load(), WorkloadStatus::Running);
        assert!(status.complete(WorkloadStatus::RanToCompletion));
        assert_eq!(status.load(), WorkloadStatus::RanToCompletion);
    }

    #[test]
    fn bind_is_one_shot() {
        let status = AtomicWorkloadStatus::new();
        assert!(status.try_bind());
        assert!(!status.try_bind());
        assert_eq!(status.try_start(), StartDecision::Run);
        assert!(!status.try_bind());
        assert!(status.complete(WorkloadStatus::Faulted));
        assert!(!status.try_bind());
    }

    #[test]
    fn cancel_flag_survives_bind() {
        let status = AtomicWorkloadStatus::new();
        assert_eq!(status.request_cancel(), WorkloadStatus::Created);
        assert!(status.try_bind());
        assert!(status.cancel_requested());
        assert_eq!(status.try_start(), StartDecision::CanceledAtStart);
        assert_eq!(status.load(), WorkloadStatus::Canceled);
    }

    #[test]
    fn cancel_after_start_does_not_move_state() {
        let status = AtomicWorkloadStatus::new();
        assert!(status.try_bind());
        assert_eq!(status.try_start(), StartDecision::Run);
        assert_eq!(status.request_cancel(), WorkloadStatus::Running);
        assert_eq!(status.load(), WorkloadStatus::Running);
        assert!(!status.try_abort_scheduled());
        assert!(status.complete(WorkloadStatus::Canceled));
    }

    #[test]
    fn abort_races_with_start_have_one_winner() {
        let status = AtomicWorkloadStatus::new();
        assert!(status.try_bind());
        status.request_cancel();
        assert!(status.try_abort_scheduled());
        assert_eq!(status.try_start(), StartDecision::Refused);
        assert!(!status.try_abort_scheduled());
    }

    #[test]
    fn terminal_states_refuse_everything() {
        for terminal in [
            WorkloadStatus::RanToCompletion,
            WorkloadStatus::Faulted,
            WorkloadStatus::Canceled,
        ] {
            let status = AtomicWorkloadStatus::new();
            assert!(status.try_bind());
            assert_eq!(status.try_start(), StartDecision::Run);
            assert!(status.complete(terminal));
            assert!(terminal.is_terminal());
            assert!(!status.try_bind());
            assert_eq!(status.try_start(), StartDecision::Refused);
            assert!(!status.complete(WorkloadStatus::Canceled));
        }
    }

    #[test]
    fn packing_round_trips() {
        bolero::check!().with_type().for_each(|bits: &u32| {
            let decoded = WorkloadStatus::from_bits(*bits);
            // the flag bit never leaks into the decoded state
            assert!((decoded as u32) & CANCEL_REQUESTED == 0);
            assert!((decoded as u32) <= WorkloadStatus::Canceled as u32);
        });
    }
}
