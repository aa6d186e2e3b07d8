// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Crate to control tracing dynamically at runtime.
//!
//! Modules declare their trace target with [`trace_target!`]; the targets are
//! collected into a distributed slice at link time and seeded with their
//! default level when [`control::TracingControl`] initializes. Levels can be
//! raised or lowered per target (or per tag) on a live process, which is how
//! hot-path tracing in the scheduler stays free until someone asks for it.

pub mod control;
pub mod targets;

// re-exports
pub use control::TracingControl;
pub use control::get_trace_ctl;
pub use tracing_subscriber::filter::LevelFilter;
