// SPDX-License-Identifier: GPL-3.0-or-later

//! Response rewriting filter.
//!
//! Keeps the competition flag from leaking verbatim through logged HTTP
//! response bodies. Every `{"flag":"..."` prefix in the response buffer is
//! rewritten to carry a random UUID-shaped token before the record is
//! persisted, and an alert names the substituted token so the exfiltration
//! attempt itself is still on the books.

use crate::config;
use crate::dispatch::{
    Detector, DispatchContext, HandlerError, PluginSpec, Record, Registration,
};
use rand::Rng;
use regex_lite::Regex;

pub fn plugin() -> PluginSpec {
    PluginSpec {
        name: "flag_buster",
        build: |config: &config::Detectors| {
            if !config.flag_buster.enabled {
                return Ok(None);
            }
            Ok(Some(Registration {
                detector: Box::new(FlagBuster::new()?),
                hooks: vec![(String::from("web"), String::from("processLog"))],
            }))
        },
    }
}

pub struct FlagBuster {
    pattern: Regex,
}

impl FlagBuster {
    pub fn new() -> anyhow::Result<Self> {
        let pattern = Regex::new(r#"(?i)\{"flag":"[^"]*""#)?;
        Ok(Self { pattern })
    }
}

impl Detector for FlagBuster {
    fn name(&self) -> &str {
        "flag_buster"
    }

    fn handle(
        &mut self,
        context: &mut DispatchContext,
        mut record: Record,
    ) -> Result<Record, HandlerError> {
        let Some(buffer) = record.get("buffer").and_then(serde_json::Value::as_str) else {
            // Not every web event carries a response body.
            return Ok(record);
        };

        if !self.pattern.is_match(buffer) {
            return Ok(record);
        }

        let token = fake_token();
        let replacement = format!(r#"{{"flag":"{token}""#);
        let rewritten = self.pattern.replace_all(buffer, replacement.as_str()).into_owned();
        record["buffer"] = serde_json::Value::String(rewritten);

        context.raise_alert(&format!("flag leak rewritten, substituted token {token}"));

        Ok(record)
    }
}

/// An 8-4-4-4-12 hex token with the random-UUID layout: version nibble 4,
/// variant bits `10`. Not cryptographic, only needs to look like a UUID.
fn fake_token() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill(&mut bytes[..]);
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    let hex: Vec<String> = bytes.iter().map(|byte| format!("{byte:02x}")).collect();
    format!(
        "{}-{}-{}-{}-{}",
        hex[0..4].join(""),
        hex[4..6].join(""),
        hex[6..8].join(""),
        hex[8..10].join(""),
        hex[10..16].join("")
    )
}
