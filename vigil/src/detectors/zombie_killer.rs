// SPDX-License-Identifier: GPL-3.0-or-later

//! Persistence/webshell monitor.
//!
//! Flags filesystem paths rewritten at a frequency no human editor
//! reaches: dozens of writes within a couple of seconds is the signature
//! of a watchdog script re-creating a deleted backdoor. Once a path is
//! confirmed, further events for it are suppressed to keep the event log
//! readable, until a two minute quiet period re-arms detection.

use super::Clock;
use crate::config;
use crate::dispatch::{
    Detector, DispatchContext, HandlerError, PluginSpec, Record, Registration,
};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::time::Duration;

/// Writes within this span of the window start count towards the threshold.
const WINDOW: Duration = Duration::from_secs(2);
/// Hits inside one window that confirm a path as an offender.
const HIT_THRESHOLD: u32 = 50;
/// Quiet period after which a confirmed path gets a fresh probation.
const COOLDOWN: Duration = Duration::from_secs(120);
/// Tracked-path bound; exceeding it clears the whole map.
const MAX_TRACKED_PATHS: usize = 1000;

pub fn plugin() -> PluginSpec {
    PluginSpec {
        name: "zombie_killer",
        build: |config: &config::Detectors| {
            if !config.zombie_killer.enabled {
                return Ok(None);
            }
            Ok(Some(Registration {
                detector: Box::new(ZombieKiller::new(Box::new(super::SystemClock))),
                hooks: vec![(String::from("filesystem"), String::from("processLog"))],
            }))
        },
    }
}

struct PathState {
    window_start: Duration,
    hits: u32,
    confirmed: bool,
}

pub struct ZombieKiller {
    clock: Box<dyn Clock>,
    paths: HashMap<String, PathState>,
}

impl ZombieKiller {
    pub fn new(clock: Box<dyn Clock>) -> Self {
        Self { clock, paths: HashMap::new() }
    }
}

impl Detector for ZombieKiller {
    fn name(&self) -> &str {
        "zombie_killer"
    }

    fn handle(
        &mut self,
        context: &mut DispatchContext,
        record: Record,
    ) -> Result<Record, HandlerError> {
        let path = record
            .get("path")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| {
                HandlerError::MalformedRecord(String::from("filesystem event without a path"))
            })?
            .to_string();

        // Coarse eviction: a map past the bound is dropped wholesale.
        if self.paths.len() > MAX_TRACKED_PATHS {
            self.paths.clear();
        }

        let now = self.clock.now();
        match self.paths.entry(path) {
            Entry::Vacant(slot) => {
                // First sighting is never alerted.
                slot.insert(PathState { window_start: now, hits: 0, confirmed: false });
            }
            Entry::Occupied(mut slot) => {
                let path = slot.key().clone();
                let state = slot.get_mut();
                // The wall clock can step backwards; a window start in the
                // future reads as an expired window.
                let elapsed = now.checked_sub(state.window_start);
                if !state.confirmed {
                    if state.hits >= HIT_THRESHOLD {
                        context.raise_alert(&format!("possible immortal webshell at {path}"));
                        state.confirmed = true;
                    } else if elapsed.is_some_and(|elapsed| elapsed <= WINDOW) {
                        state.hits += 1;
                    } else {
                        state.window_start = now;
                        state.hits = 0;
                    }
                } else {
                    // A known offender only adds noise; stop persisting it.
                    context.suppress_record();
                    if elapsed.is_some_and(|elapsed| elapsed >= COOLDOWN) {
                        *state = PathState { window_start: now, hits: 0, confirmed: false };
                    }
                }
            }
        }

        Ok(record)
    }
}

#[cfg(test)]
mod test {
    use super::super::testing::ManualClock;
    use super::*;
    use crate::dispatch::DispatchContext;
    use serde_json::json;
    use std::time::Duration;

    fn event(path: &str) -> Record {
        json!({"time": 0, "path": path, "oper": "MODIFY", "isdir": false, "content": ""})
    }

    /// Runs one event through the detector and reports (alerts, suppressed).
    fn feed(sut: &mut ZombieKiller, path: &str) -> (usize, bool) {
        let record = event(path);
        let mut context = DispatchContext::new("test", record.clone());
        context.enter(sut.name());
        sut.handle(&mut context, record).unwrap();
        let (suppress, alerts) = context.finish();
        (alerts.len(), suppress)
    }

    #[test]
    fn a_quiet_path_never_alerts() {
        let clock = ManualClock::new();
        let mut sut = ZombieKiller::new(Box::new(clock.clone()));

        for _ in 0..10 {
            let (alerts, suppressed) = feed(&mut sut, "/var/www/index.php");
            assert_eq!(alerts, 0);
            assert!(!suppressed);
            clock.advance(Duration::from_secs(5));
        }
    }

    #[test]
    fn a_burst_raises_exactly_one_alert_then_suppresses() {
        let clock = ManualClock::new();
        let mut sut = ZombieKiller::new(Box::new(clock.clone()));

        let mut alerts = 0;
        let mut suppressed = 0;
        for _ in 0..60 {
            let (a, s) = feed(&mut sut, "/var/www/shell.php");
            alerts += a;
            if s {
                suppressed += 1;
            }
            clock.advance(Duration::from_millis(10));
        }

        assert_eq!(alerts, 1);
        // Every event after confirmation is suppressed.
        assert!(suppressed > 0);
        let (_, still_suppressed) = feed(&mut sut, "/var/www/shell.php");
        assert!(still_suppressed);
    }

    #[test]
    fn the_window_resets_when_writes_slow_down() {
        let clock = ManualClock::new();
        let mut sut = ZombieKiller::new(Box::new(clock.clone()));

        // 40 hits, then a pause past the window, then 40 more. Neither run
        // reaches the threshold on its own, so no alert fires.
        for _ in 0..40 {
            let (alerts, _) = feed(&mut sut, "/tmp/a");
            assert_eq!(alerts, 0);
        }
        clock.advance(Duration::from_secs(3));
        for _ in 0..40 {
            let (alerts, _) = feed(&mut sut, "/tmp/a");
            assert_eq!(alerts, 0);
        }
    }

    #[test]
    fn a_confirmed_path_rearms_after_the_cooldown() {
        let clock = ManualClock::new();
        let mut sut = ZombieKiller::new(Box::new(clock.clone()));

        for _ in 0..60 {
            feed(&mut sut, "/tmp/zombie");
        }

        // Still within the cooldown: suppressed, no second alert.
        clock.advance(Duration::from_secs(60));
        let (alerts, suppressed) = feed(&mut sut, "/tmp/zombie");
        assert_eq!(alerts, 0);
        assert!(suppressed);

        // Past the cooldown: the state resets and a fresh burst is needed
        // before anything fires again.
        clock.advance(Duration::from_secs(120));
        let (alerts, _) = feed(&mut sut, "/tmp/zombie");
        assert_eq!(alerts, 0);
        let (alerts, suppressed) = feed(&mut sut, "/tmp/zombie");
        assert_eq!(alerts, 0);
        assert!(!suppressed);
    }

    #[test]
    fn exceeding_the_path_bound_clears_all_state() {
        let clock = ManualClock::new();
        let mut sut = ZombieKiller::new(Box::new(clock.clone()));

        // Confirm one path, then flood the map past the bound.
        for _ in 0..60 {
            feed(&mut sut, "/tmp/zombie");
        }
        for index in 0..=MAX_TRACKED_PATHS {
            feed(&mut sut, &format!("/tmp/filler-{index}"));
        }

        // The offender lost its history with everything else.
        let (alerts, suppressed) = feed(&mut sut, "/tmp/zombie");
        assert_eq!(alerts, 0);
        assert!(!suppressed);
    }

    #[test]
    fn a_backwards_stepping_clock_reads_as_an_expired_window() {
        let clock = ManualClock::new();
        clock.advance(Duration::from_secs(10));
        let mut sut = ZombieKiller::new(Box::new(clock.clone()));

        feed(&mut sut, "/var/www/index.php");
        clock.rewind(Duration::from_secs(1));

        // The second event arrives before the stored window start; the
        // window resets instead of panicking on the elapsed time.
        let (alerts, suppressed) = feed(&mut sut, "/var/www/index.php");
        assert_eq!(alerts, 0);
        assert!(!suppressed);

        // Counting resumes normally from the reset window.
        for _ in 0..60 {
            feed(&mut sut, "/var/www/index.php");
        }
        let (_, suppressed) = feed(&mut sut, "/var/www/index.php");
        assert!(suppressed);
    }

    #[test]
    fn a_backwards_stepping_clock_keeps_a_confirmed_path_suppressed() {
        let clock = ManualClock::new();
        clock.advance(Duration::from_secs(10));
        let mut sut = ZombieKiller::new(Box::new(clock.clone()));

        for _ in 0..60 {
            feed(&mut sut, "/tmp/zombie");
        }
        clock.rewind(Duration::from_secs(5));

        // The cooldown cannot elapse backwards; the offender stays muted.
        let (alerts, suppressed) = feed(&mut sut, "/tmp/zombie");
        assert_eq!(alerts, 0);
        assert!(suppressed);
    }

    #[test]
    fn a_record_without_a_path_is_a_handler_error() {
        let clock = ManualClock::new();
        let mut sut = ZombieKiller::new(Box::new(clock));
        let record = json!({"oper": "MODIFY"});
        let mut context = DispatchContext::new("test", record.clone());

        let result = sut.handle(&mut context, record);

        assert!(matches!(result, Err(HandlerError::MalformedRecord(_))));
    }
}
