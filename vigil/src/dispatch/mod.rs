// SPDX-License-Identifier: GPL-3.0-or-later

//! The hook-dispatch engine.
//!
//! Every decoded record is classified by a routine (its event category)
//! and an operation (conventionally `processLog`). The registry keeps an
//! ordered list of detector handlers per `(routine, operation)` key and
//! folds each record through them, isolating failures so one buggy
//! detector never aborts ingestion.
//!
//! A detector executes with a dispatch context that is created for one
//! `invoke()` call and passed by parameter. The context carries the
//! side-channel surface: raising alerts and requesting suppression of the
//! current record. There is no process-wide invoker slot, so a dispatch
//! cannot corrupt another one.

pub mod plugins;
pub mod registry;

use chrono::{DateTime, Local};
use serde::Serialize;
use thiserror::Error;

pub use plugins::{PluginManager, PluginSpec, Registration};
pub use registry::HookRegistry;

/// A case-insensitive event category name.
///
/// Routines are normalized to lowercase on construction; equality is by
/// the normalized string. The well-known routines are `web`, `filesystem`,
/// `process` and `pwn`, but a plugin may define its own.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Routine(String);

impl Routine {
    pub fn new(name: &str) -> Self {
        Self(name.to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Routine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A case-insensitive operation name, the second half of a dispatch key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Operation(String);

impl Operation {
    pub fn new(name: &str) -> Self {
        Self(name.to_lowercase())
    }

    /// The conventional operation every log record is dispatched with.
    pub fn process_log() -> Self {
        Self::new("processLog")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The record payload threaded through a dispatch.
pub type Record = serde_json::Value;

/// The handler contract every detector implements.
///
/// A handler receives the record, may return it mutated, and reports
/// failures as values. The dispatch fold treats an error as "keep the
/// prior record, log the reason".
pub trait Detector: Send {
    /// Stable identifier used in logs and alerts.
    fn name(&self) -> &str;

    /// Processes one record.
    fn handle(&mut self, context: &mut DispatchContext, record: Record)
        -> Result<Record, HandlerError>;
}

/// A detector failed while processing a record.
///
/// Recovered locally: the offending handler is skipped and the dispatch
/// continues. Never visible to the agent or to the rest of the pipeline.
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("Malformed record: {0}")]
    MalformedRecord(String),
    #[error("Detector failure: {0}")]
    Failure(String),
}

/// An alert raised by a detector during a dispatch.
#[derive(Serialize, Debug, Clone)]
pub struct Alert {
    /// Wall-clock time the alert was raised.
    pub timestamp: DateTime<Local>,
    /// The detector that raised it.
    pub detector: String,
    /// Human-readable description.
    pub message: String,
    /// The record that triggered the dispatch, as received.
    pub record: Record,
}

/// The side-channel surface available to the executing handler.
///
/// One context exists per `invoke()` call; it is dropped when the dispatch
/// finishes, so its state can never leak into another dispatch.
pub struct DispatchContext {
    caller: String,
    current_detector: String,
    trigger: Record,
    alerts: Vec<Alert>,
    suppress: bool,
}

impl DispatchContext {
    pub(crate) fn new(caller: &str, trigger: Record) -> Self {
        Self {
            caller: caller.to_string(),
            current_detector: String::new(),
            trigger,
            alerts: Vec::new(),
            suppress: false,
        }
    }

    /// The identity of the component that started the dispatch.
    pub fn caller(&self) -> &str {
        &self.caller
    }

    pub(crate) fn enter(&mut self, detector: &str) {
        self.current_detector = detector.to_string();
    }

    /// Records an alert keyed by wall-clock time, the executing detector,
    /// the message, and the triggering record.
    pub fn raise_alert(&mut self, message: &str) {
        log::warn!("[{}] alert: {message}", self.current_detector);
        self.alerts.push(Alert {
            timestamp: Local::now(),
            detector: self.current_detector.clone(),
            message: message.to_string(),
            record: self.trigger.clone(),
        });
    }

    /// Asks the caller of `invoke()` not to persist the current record.
    ///
    /// Detectors already ran and may have mutated their own state; only the
    /// persistence of this record is skipped.
    pub fn suppress_record(&mut self) {
        self.suppress = true;
    }

    pub(crate) fn finish(self) -> (bool, Vec<Alert>) {
        (self.suppress, self.alerts)
    }
}

/// The result of one dispatch, handed back to the caller of `invoke()`.
#[derive(Debug)]
pub struct DispatchOutcome {
    /// The record after the fold, possibly mutated by the detectors.
    pub record: Record,
    /// True when some detector requested suppression.
    pub suppress: bool,
    /// The alerts raised during the dispatch, in raise order.
    pub alerts: Vec<Alert>,
}

impl DispatchOutcome {
    /// The outcome of a dispatch with no registered handlers.
    pub(crate) fn passthrough(record: Record) -> Self {
        Self { record, suppress: false, alerts: Vec::new() }
    }
}
