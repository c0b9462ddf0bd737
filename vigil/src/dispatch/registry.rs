// SPDX-License-Identifier: GPL-3.0-or-later

//! The hook registry and the dispatch fold.

use super::{Detector, DispatchContext, DispatchOutcome, Operation, Record, Routine};
use std::collections::HashMap;

/// An opaque handle to a detector owned by the registry.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DetectorId(usize);

/// Maps `(routine, operation)` keys to ordered handler lists.
///
/// Insertion order is preserved and defines execution order; there is no
/// priority or dependency mechanism. The registry is built at plugin load
/// time and only appended to afterwards.
#[derive(Default)]
pub struct HookRegistry {
    detectors: Vec<Box<dyn Detector>>,
    hooks: HashMap<(Routine, Operation), Vec<DetectorId>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes ownership of a detector and returns its handle.
    pub fn add_detector(&mut self, detector: Box<dyn Detector>) -> DetectorId {
        self.detectors.push(detector);
        DetectorId(self.detectors.len() - 1)
    }

    /// Appends a handler to the list for the normalized key.
    ///
    /// Registration is not deduplicated: registering the same handler
    /// twice runs it twice.
    pub fn register(&mut self, routine: &str, operation: &str, detector: DetectorId) {
        let key = (Routine::new(routine), Operation::new(operation));
        self.hooks.entry(key).or_default().push(detector);
    }

    /// Dispatches one record through the handlers registered for the key.
    ///
    /// With no registered handlers the record is returned unchanged.
    /// Otherwise the record is folded through each handler in registration
    /// order; a failing handler is logged with its identity and the fold
    /// continues with the last successful value. One failing detector
    /// never blocks the others or aborts ingestion.
    pub fn invoke(
        &mut self,
        caller: &str,
        routine: &Routine,
        operation: &Operation,
        record: Record,
    ) -> DispatchOutcome {
        let key = (routine.clone(), operation.clone());
        let Some(handlers) = self.hooks.get(&key) else {
            return DispatchOutcome::passthrough(record);
        };
        let handlers = handlers.clone();

        let mut context = DispatchContext::new(caller, record.clone());
        let mut current = record;
        for DetectorId(index) in handlers {
            let detector = &mut self.detectors[index];
            context.enter(detector.name());
            // The handler gets its own copy so a failure cannot lose the
            // record accumulated so far.
            match detector.handle(&mut context, current.clone()) {
                Ok(next) => current = next,
                Err(error) => {
                    log::error!("Detector '{}' failed: {error}", detector.name());
                }
            }
        }

        let (suppress, alerts) = context.finish();
        DispatchOutcome { record: current, suppress, alerts }
    }

    /// True when at least one handler is registered for the key.
    pub fn has_handlers(&self, routine: &Routine, operation: &Operation) -> bool {
        self.hooks.contains_key(&(routine.clone(), operation.clone()))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dispatch::HandlerError;
    use serde_json::json;

    /// Scriptable detector for registry tests.
    struct Scripted {
        name: &'static str,
        action: fn(&mut DispatchContext, Record) -> Result<Record, HandlerError>,
    }

    impl Detector for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        fn handle(
            &mut self,
            context: &mut DispatchContext,
            record: Record,
        ) -> Result<Record, HandlerError> {
            (self.action)(context, record)
        }
    }

    fn tag(record: Record, label: &str) -> Record {
        let mut tags: Vec<String> = record
            .get("tags")
            .and_then(|value| serde_json::from_value(value.clone()).ok())
            .unwrap_or_default();
        tags.push(label.to_string());
        json!({"tags": tags})
    }

    fn registry_with(
        detectors: Vec<Scripted>,
        routine: &str,
        operation: &str,
    ) -> HookRegistry {
        let mut registry = HookRegistry::new();
        for detector in detectors {
            let id = registry.add_detector(Box::new(detector));
            registry.register(routine, operation, id);
        }
        registry
    }

    #[test]
    fn invoke_without_handlers_returns_the_input_unchanged() {
        let mut sut = HookRegistry::new();
        let record = json!({"path": "/etc/passwd"});

        let outcome = sut.invoke(
            "test",
            &Routine::new("filesystem"),
            &Operation::process_log(),
            record.clone(),
        );

        assert_eq!(outcome.record, record);
        assert!(!outcome.suppress);
        assert!(outcome.alerts.is_empty());
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let mut sut = registry_with(
            vec![
                Scripted { name: "first", action: |_, record| Ok(tag(record, "first")) },
                Scripted { name: "second", action: |_, record| Ok(tag(record, "second")) },
            ],
            "web",
            "processLog",
        );

        let outcome =
            sut.invoke("test", &Routine::new("web"), &Operation::process_log(), json!({}));

        assert_eq!(outcome.record, json!({"tags": ["first", "second"]}));
    }

    #[test]
    fn a_failing_handler_does_not_block_the_next_one() {
        // Handler #2 of 3 fails; #3 must still run, applied to #1's output.
        let mut sut = registry_with(
            vec![
                Scripted { name: "first", action: |_, record| Ok(tag(record, "first")) },
                Scripted {
                    name: "second",
                    action: |_, _| Err(HandlerError::Failure("boom".into())),
                },
                Scripted { name: "third", action: |_, record| Ok(tag(record, "third")) },
            ],
            "web",
            "processLog",
        );

        let outcome =
            sut.invoke("test", &Routine::new("web"), &Operation::process_log(), json!({}));

        assert_eq!(outcome.record, json!({"tags": ["first", "third"]}));
    }

    #[test]
    fn registering_the_same_handler_twice_runs_it_twice() {
        let mut sut = HookRegistry::new();
        let id = sut.add_detector(Box::new(Scripted {
            name: "again",
            action: |_, record| Ok(tag(record, "again")),
        }));
        sut.register("web", "processLog", id);
        sut.register("web", "processLog", id);

        let outcome =
            sut.invoke("test", &Routine::new("web"), &Operation::process_log(), json!({}));

        assert_eq!(outcome.record, json!({"tags": ["again", "again"]}));
    }

    #[test]
    fn keys_are_case_insensitive() {
        let mut sut = registry_with(
            vec![Scripted { name: "only", action: |_, record| Ok(tag(record, "only")) }],
            "FileSystem",
            "ProcessLog",
        );

        let outcome = sut.invoke(
            "test",
            &Routine::new("filesystem"),
            &Operation::new("processlog"),
            json!({}),
        );

        assert_eq!(outcome.record, json!({"tags": ["only"]}));
    }

    #[test]
    fn suppression_and_alerts_surface_in_the_outcome() {
        let mut sut = registry_with(
            vec![Scripted {
                name: "guard",
                action: |context, record| {
                    context.raise_alert("sensitive path touched");
                    context.suppress_record();
                    Ok(record)
                },
            }],
            "filesystem",
            "processLog",
        );

        let outcome = sut.invoke(
            "test",
            &Routine::new("filesystem"),
            &Operation::process_log(),
            json!({"path": "/flag"}),
        );

        assert!(outcome.suppress);
        assert_eq!(outcome.alerts.len(), 1);
        assert_eq!(outcome.alerts[0].detector, "guard");
        assert_eq!(outcome.alerts[0].record, json!({"path": "/flag"}));
    }

    #[test]
    fn a_failing_handler_keeps_alerts_raised_before_the_failure() {
        let mut sut = registry_with(
            vec![Scripted {
                name: "half",
                action: |context, _| {
                    context.raise_alert("raised before the failure");
                    Err(HandlerError::Failure("after the alert".into()))
                },
            }],
            "web",
            "processLog",
        );

        let input = json!({"uri": "/"});
        let outcome =
            sut.invoke("test", &Routine::new("web"), &Operation::process_log(), input.clone());

        assert_eq!(outcome.record, input);
        assert_eq!(outcome.alerts.len(), 1);
    }
}
