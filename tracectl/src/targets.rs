// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Automated, static registry of tracing targets across all linked crates

use crate::LevelFilter;
use linkme::distributed_slice;

/// One registered trace target: the module path it covers, its default
/// level, and the tags it can be addressed by as a group.
pub struct TraceTarget {
    pub(crate) target: &'static str,
    pub(crate) level: LevelFilter,
    pub(crate) tags: &'static [&'static str],
}

impl TraceTarget {
    pub const fn new(
        target: &'static str,
        level: LevelFilter,
        tags: &'static [&'static str],
    ) -> Self {
        Self {
            target,
            level,
            tags,
        }
    }
}

#[distributed_slice]
pub static TRACE_TARGETS: [TraceTarget];

#[macro_export]
macro_rules! trace_target_deps {
    () => {
        use linkme::distributed_slice;
        use $crate::LevelFilter;
        use $crate::targets::{TRACE_TARGETS, TraceTarget};
    };
}

/// Declare the invoking module as a trace target with a default level and
/// a set of tags. The target is the module path, so the ordinary
/// `tracing::debug!`-family macros emit into it with no extra ceremony.
// NOTE: the macro output lives in a fresh const scope so that:
//  - the imports it needs do not leak into (or collide with) the caller,
//  - TRACE_TGT can be reused as the static's name across invocations,
//    since each const scope yields a distinct linker name.
#[macro_export]
macro_rules! trace_target {
    ($level:expr, $tags:expr) => {
        const _: () = {
            use $crate::trace_target_deps;
            trace_target_deps!();

            #[distributed_slice(TRACE_TARGETS)]
            static TRACE_TGT: TraceTarget = TraceTarget::new(module_path!(), $level, $tags);
        };
    };
}
