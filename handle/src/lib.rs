// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Caller-chosen qdisc identifiers.
//!
//! A [`Handle`] names one qdisc within one tree. The value is picked by the
//! caller when the tree is assembled, compared by value, and never
//! interpreted by the engine beyond one rule: the all-zero value is the
//! *default* handle and is rejected wherever a live qdisc identifier is
//! required. Keeping zero representable (instead of a `NonZeroU64` layout)
//! lets submission paths report the mistake as an error instead of making it
//! unconstructible and pushing the failure to the caller's parsing code.

#![deny(
    unsafe_code,
    missing_docs,
    clippy::all,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic
)]

use core::fmt::{Debug, Display, Formatter};

#[allow(unused_imports)] // re-export
#[cfg(any(test, feature = "bolero"))]
pub use contract::*;

/// A caller-chosen identifier for a qdisc, unique within one tree.
///
/// Equality and hashing are value-based. The zero value is the reserved
/// *default* handle; [`Handle::is_default`] tells you whether you are holding
/// it. Tree assembly and handle-addressed submission both reject default
/// handles.
///
/// # Example
///
/// ```
/// # use workplane_handle::Handle;
/// let fast = Handle::new(0x10);
/// let slow = Handle::new(0x20);
/// assert_ne!(fast, slow);
/// assert!(!fast.is_default());
/// assert!(Handle::DEFAULT.is_default());
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle(u64);

impl Handle {
    /// The reserved all-zero handle. Never a live qdisc identifier.
    pub const DEFAULT: Handle = Handle(0);

    /// Wrap a caller-chosen raw value.
    ///
    /// `Handle::new(0)` is [`Handle::DEFAULT`]; it is constructible so that
    /// the engine can reject it with a proper error at the point of use.
    #[must_use]
    pub const fn new(raw: u64) -> Handle {
        Handle(raw)
    }

    /// True for the reserved zero value.
    #[must_use]
    pub const fn is_default(self) -> bool {
        self.0 == 0
    }

    /// Return the wrapped raw value.
    #[must_use]
    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

impl Display for Handle {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl Debug for Handle {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(f, "Handle({:#x})", self.0)
    }
}

impl From<u64> for Handle {
    fn from(raw: u64) -> Self {
        Handle(raw)
    }
}

impl From<Handle> for u64 {
    fn from(handle: Handle) -> Self {
        handle.0
    }
}

#[cfg(any(test, feature = "bolero"))]
mod contract {
    use crate::Handle;
    use bolero::{Driver, TypeGenerator};

    impl TypeGenerator for Handle {
        fn generate<D: Driver>(driver: &mut D) -> Option<Self> {
            Some(Handle::new(driver.produce::<u64>()?))
        }
    }
}
