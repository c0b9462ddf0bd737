// SPDX-License-Identifier: GPL-3.0-or-later

//! The built-in detector plugins.
//!
//! Each detector lives in its own module and exports a `plugin()`
//! constructor spec. The set is static; `builtin()` returns the specs in
//! the order they are loaded and therefore the order they run for a
//! shared hook key.

pub mod flag_buster;
pub mod king_watcher;
pub mod zombie_killer;

use crate::dispatch::PluginSpec;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// The time source of stateful detectors.
///
/// Detectors compare event arrival times against sliding windows; taking
/// the clock as a seam keeps those windows testable without sleeping.
pub trait Clock: Send {
    /// Monotonic-enough time as a duration since the UNIX epoch.
    fn now(&self) -> Duration;
}

/// The wall clock used in production.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default()
    }
}

/// All compiled-in plugins, in load order.
pub fn builtin() -> Vec<PluginSpec> {
    vec![zombie_killer::plugin(), king_watcher::plugin(), flag_buster::plugin()]
}
