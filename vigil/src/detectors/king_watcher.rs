// SPDX-License-Identifier: GPL-3.0-or-later

//! Pattern alert monitor.
//!
//! Stateless: raises an alert whenever a filesystem event touches a path
//! containing one of the configured sensitive substrings. The record is
//! neither mutated nor suppressed.

use crate::config;
use crate::dispatch::{
    Detector, DispatchContext, HandlerError, PluginSpec, Record, Registration,
};

pub fn plugin() -> PluginSpec {
    PluginSpec {
        name: "king_watcher",
        build: |config: &config::Detectors| {
            if !config.king_watcher.enabled {
                return Ok(None);
            }
            Ok(Some(Registration {
                detector: Box::new(KingWatcher::new(config.king_watcher.markers.clone())),
                hooks: vec![(String::from("filesystem"), String::from("processLog"))],
            }))
        },
    }
}

pub struct KingWatcher {
    markers: Vec<String>,
}

impl KingWatcher {
    pub fn new(markers: Vec<String>) -> Self {
        Self { markers }
    }
}

impl Detector for KingWatcher {
    fn name(&self) -> &str {
        "king_watcher"
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
            })?;

        if self.markers.iter().any(|marker| path.contains(marker.as_str())) {
            context.raise_alert(&format!("sensitive path touched: {path}"));
        }

        Ok(record)
    }
}
