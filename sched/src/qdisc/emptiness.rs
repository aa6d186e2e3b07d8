// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Lock-free emptiness tracking for round-robin subtrees.
//!
//! One `AtomicU64` packs a 32-bit *generation* (high half) and a 32-bit
//! *empty-streak count* (low half); the all-ones value is the sentinel for
//! "subtree observed empty". A dequeuing worker snapshots the generation as
//! a token, and a failed child dequeue only bumps the count while that token
//! is still current. Any enqueue anywhere in the subtree resets the counter
//! to a fresh generation *before* notifying up, which invalidates every
//! in-flight token and prevents workers from concluding "all empty" across
//! a racing enqueue.

use concurrency::sync::atomic::{AtomicU64, Ordering};

const GENERATION_SHIFT: u32 = 32;
const COUNT_MASK: u64 = u32::MAX as u64;
const DRAINED: u64 = u64::MAX;

/// Packed (generation, empty-streak) counter.
#[derive(Debug)]
pub struct EmptinessCounter {
    bits: AtomicU64,
}

/// A generation snapshot held across one child dequeue attempt.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct EmptinessToken {
    generation: u32,
}

impl Default for EmptinessCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl EmptinessCounter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            bits: AtomicU64::new(0),
        }
    }

    /// Snapshot the current generation.
    #[must_use]
    pub fn token(&self) -> EmptinessToken {
        EmptinessToken {
            generation: (self.bits.load(Ordering::Acquire) >> GENERATION_SHIFT) as u32,
        }
    }

    /// True once a full round of failed dequeues has been recorded within a
    /// single generation.
    #[must_use]
    pub fn is_drained(&self) -> bool {
        self.bits.load(Ordering::Acquire) == DRAINED
    }

    /// Start a new generation with a zero streak. Called on every enqueue
    /// into the subtree, before the notification travels up.
    pub fn reset(&self) {
        // Always succeeds; the fetch_update loop only re-runs on contention.
        let _ = self
            .bits
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                let generation = ((current >> GENERATION_SHIFT) as u32).wrapping_add(1);
                Some(u64::from(generation) << GENERATION_SHIFT)
            });
    }

    /// Record one failed child dequeue observed under `token`.
    ///
    /// Returns true when the subtree is now (or was already) drained: the
    /// streak reached `children` within one generation. A stale token is
    /// discarded without touching the streak.
    pub fn increment(&self, token: EmptinessToken, children: u32) -> bool {
        let result = self
            .bits
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                if current == DRAINED {
                    return None;
                }
                if (current >> GENERATION_SHIFT) as u32 != token.generation {
                    return None;
                }
                let count = ((current & COUNT_MASK) as u32).saturating_add(1);
                if count >= children {
                    Some(DRAINED)
                } else {
                    Some((current & !COUNT_MASK) | u64::from(count))
                }
            });
        match result {
            Ok(previous) => ((previous & COUNT_MASK) as u32).saturating_add(1) >= children,
            // the sentinel means someone else finished the round
            Err(current) => current == DRAINED,
        }
    }
}


// Model check for the interleaving the counter exists for: a reset racing a
// final increment must never let the incrementing thread conclude "drained"
// when its token predates the reset.
concurrency::with_loom! {
    #[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    #[cfg(test)]
    mod loom_test {
        use super::*;
        use loom::sync::Arc;
        use loom::thread;

        #[test]
        fn reset_never_races_into_false_drain() {
            loom::model(|| {
                let counter = Arc::new(EmptinessCounter::new());
                let token = counter.token();
                // one failed attempt is already on the books
                assert!(!counter.increment(token, 2));

                let resetter = {
                    let counter = Arc::clone(&counter);
                    thread::spawn(move || {
                        // an enqueue arrives: new generation before notify
                        counter.reset();
                    })
                };

                let _drained = counter.increment(token, 2);
                resetter.join().unwrap();

                // Whichever way the race resolved, the reset generation wins:
                // either the increment lost its token (stale, discarded), or
                // the sentinel it managed to set was cleared by the reset
                // that followed. A worker can therefore never stay convinced
                // the subtree is empty once the enqueue's reset has run.
                assert!(!counter.is_drained());
            });
        }
    }
}
