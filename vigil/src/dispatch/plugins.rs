// SPDX-License-Identifier: GPL-3.0-or-later

//! Plugin loading for the dispatch engine.
//!
//! The detector set is static: plugins are compiled in and described by
//! `PluginSpec` entries. Loading walks the specs, builds each detector
//! from the configuration, and registers its hooks. A plugin is loaded at
//! most once per name; a failing constructor is logged and skipped, so a
//! broken plugin never prevents the others from loading.

use super::{Detector, DispatchOutcome, HookRegistry, Operation, Record, Routine};
use crate::config;
use log::{info, warn};

/// What a plugin constructor hands back: the detector instance and the
/// `(routine, operation)` keys it wants to be invoked for.
pub struct Registration {
    pub detector: Box<dyn Detector>,
    pub hooks: Vec<(String, String)>,
}

/// A compiled-in plugin: a stable name and a constructor.
///
/// The constructor returns `Ok(None)` when the configuration disables the
/// plugin, and an error when the configuration is unusable.
pub struct PluginSpec {
    pub name: &'static str,
    pub build: fn(&config::Detectors) -> anyhow::Result<Option<Registration>>,
}

/// Owns the registry and tracks which plugins were loaded.
#[derive(Default)]
pub struct PluginManager {
    registry: HookRegistry,
    loaded: Vec<String>,
}

impl PluginManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every plugin from the given specs.
    ///
    /// A name that was already loaded is skipped. A constructor failure is
    /// logged and the loading continues with the next spec.
    pub fn load(&mut self, specs: &[PluginSpec], config: &config::Detectors) {
        for spec in specs {
            if self.loaded.iter().any(|name| name == spec.name) {
                warn!("Plugin '{}' is already loaded, skipping", spec.name);
                continue;
            }
            match (spec.build)(config) {
                Ok(Some(registration)) => {
                    let id = self.registry.add_detector(registration.detector);
                    for (routine, operation) in &registration.hooks {
                        self.registry.register(routine, operation, id);
                    }
                    self.loaded.push(spec.name.to_string());
                    info!("Plugin '{}' loaded", spec.name);
                }
                Ok(None) => {
                    info!("Plugin '{}' is disabled", spec.name);
                }
                Err(error) => {
                    warn!("Plugin '{}' failed to load: {error}", spec.name);
                }
            }
        }
    }

    /// The names of the plugins loaded so far, in load order.
    pub fn loaded(&self) -> &[String] {
        &self.loaded
    }

    pub fn has_handlers(&self, routine: &Routine, operation: &Operation) -> bool {
        self.registry.has_handlers(routine, operation)
    }

    /// Dispatches one record through the registry.
    pub fn invoke(
        &mut self,
        caller: &str,
        routine: &Routine,
        operation: &Operation,
        record: Record,
    ) -> DispatchOutcome {
        self.registry.invoke(caller, routine, operation, record)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dispatch::{DispatchContext, HandlerError};
    use serde_json::json;

    struct Stamp(&'static str);

    impl Detector for Stamp {
        fn name(&self) -> &str {
            self.0
        }

        fn handle(
            &mut self,
            _: &mut DispatchContext,
            _: Record,
        ) -> Result<Record, HandlerError> {
            Ok(json!({"stamped_by": self.0}))
        }
    }

    fn stamping_spec(name: &'static str) -> PluginSpec {
        PluginSpec {
            name,
            build: |_| {
                Ok(Some(Registration {
                    detector: Box::new(Stamp("stamp")),
                    hooks: vec![(String::from("web"), String::from("processLog"))],
                }))
            },
        }
    }

    #[test]
    fn loading_registers_the_plugin_hooks() {
        let mut sut = PluginManager::new();

        sut.load(&[stamping_spec("stamp")], &config::Detectors::default());

        assert_eq!(sut.loaded(), &[String::from("stamp")]);
        assert!(sut.has_handlers(&Routine::new("web"), &Operation::process_log()));

        let outcome =
            sut.invoke("test", &Routine::new("web"), &Operation::process_log(), json!({}));
        assert_eq!(outcome.record, json!({"stamped_by": "stamp"}));
    }

    #[test]
    fn a_name_is_loaded_at_most_once() {
        let mut sut = PluginManager::new();
        let config = config::Detectors::default();

        sut.load(&[stamping_spec("stamp")], &config);
        sut.load(&[stamping_spec("stamp")], &config);

        assert_eq!(sut.loaded().len(), 1);

        // The handler runs once, not twice.
        let outcome =
            sut.invoke("test", &Routine::new("web"), &Operation::process_log(), json!({}));
        assert_eq!(outcome.record, json!({"stamped_by": "stamp"}));
    }

    #[test]
    fn a_disabled_plugin_is_not_loaded() {
        let mut sut = PluginManager::new();
        let spec = PluginSpec { name: "disabled", build: |_| Ok(None) };

        sut.load(&[spec], &config::Detectors::default());

        assert!(sut.loaded().is_empty());
    }

    #[test]
    fn a_failing_constructor_does_not_stop_the_others() {
        let mut sut = PluginManager::new();
        let broken = PluginSpec {
            name: "broken",
            build: |_| Err(anyhow::anyhow!("bad configuration")),
        };

        sut.load(&[broken, stamping_spec("stamp")], &config::Detectors::default());

        assert_eq!(sut.loaded(), &[String::from("stamp")]);
    }
}
