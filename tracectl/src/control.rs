// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Tracing runtime control.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use crate::targets::TRACE_TARGETS;
use crate::trace_target;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, Registry, filter::LevelFilter, prelude::*, reload};

trace_target!(LevelFilter::INFO, &["tracectl"]);

#[derive(Debug)]
struct TargetDb {
    level: LevelFilter,
    levels: HashMap<&'static str, LevelFilter>,
}

impl TargetDb {
    fn new(level: LevelFilter) -> Self {
        Self {
            level,
            levels: HashMap::new(),
        }
    }

    fn register(&mut self, target: &'static str, level: LevelFilter) {
        debug!("Registering target {target} level={level}");
        if self.levels.insert(target, level).is_some() {
            warn!("Target {target} has been multiply defined!");
        }
    }

    fn env_filter(&self) -> EnvFilter {
        let mut f = EnvFilter::new(self.level.to_string());
        for (target, level) in &self.levels {
            let directive = format!("{target}={level}");
            match directive.parse() {
                Ok(directive) => f = f.add_directive(directive),
                Err(e) => warn!("Skipping malformed directive '{directive}': {e}"),
            }
        }
        f
    }
}

/// Handle for adjusting trace levels on a live process.
///
/// One global instance exists per process, created on first use; see
/// [`get_trace_ctl`].
pub struct TracingControl {
    db: Mutex<TargetDb>,
    reload_handle: reload::Handle<EnvFilter, Registry>,
}

impl TracingControl {
    fn new() -> Self {
        let mut db = TargetDb::new(LevelFilter::INFO);
        for t in TRACE_TARGETS {
            db.register(t.target, t.level);
        }

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(true)
            .with_level(true);

        let (filter, reload_handle) = reload::Layer::new(db.env_filter());

        let subscriber = Registry::default().with(filter).with(fmt_layer);
        if tracing::subscriber::set_global_default(subscriber).is_err() {
            warn!("A global tracing subscriber is already installed; runtime level control is inert");
        }

        info!("Initialized tracing control. Log level is {}", db.level);
        Self {
            db: Mutex::new(db),
            reload_handle,
        }
    }

    fn reload(&self, filter: EnvFilter) {
        if let Err(e) = self.reload_handle.reload(filter) {
            warn!("Failed to reload trace filter: {e}");
        }
    }
}

static TRACING_CTL: OnceLock<TracingControl> = OnceLock::new();

/// Get a reference to the process-wide [`TracingControl`], initializing it
/// (and installing the global subscriber) if needed.
pub fn get_trace_ctl() -> &'static TracingControl {
    TRACING_CTL.get_or_init(TracingControl::new)
}

// public methods for TracingControl
impl TracingControl {
    /// Initialize tracing for the process. Idempotent.
    pub fn init() {
        get_trace_ctl();
    }

    /// Set the level of every target carrying `tag`.
    pub fn set_tag_level(&self, tag: &str, level: LevelFilter) {
        let mut changed = false;
        if let Ok(mut db) = self.db.lock() {
            for t in TRACE_TARGETS {
                if t.tags.contains(&tag)
                    && db.levels.get(t.target).copied() != Some(level)
                {
                    db.levels.insert(t.target, level);
                    changed = true;
                }
            }
            if changed {
                info!("Set log level for {tag} to {level}");
                self.reload(db.env_filter());
            }
        }
    }

    /// Set the level of one target (a module path).
    pub fn set_target_level(&self, target: &'static str, level: LevelFilter) {
        if let Ok(mut db) = self.db.lock()
            && db.levels.get(target).copied() != Some(level)
        {
            db.levels.insert(target, level);
            info!("Set log level for {target} to {level}");
            self.reload(db.env_filter());
        }
    }

    /// Set the default level for everything without a per-target directive.
    pub fn set_default_level(&self, level: LevelFilter) {
        if let Ok(mut db) = self.db.lock()
            && db.level != level
        {
            db.level = level;
            info!("Set default log level to {level}");
            self.reload(db.env_filter());
        }
    }

    /// The current default level.
    pub fn get_default_level(&self) -> LevelFilter {
        self.db.lock().map_or(LevelFilter::OFF, |db| db.level)
    }
}
