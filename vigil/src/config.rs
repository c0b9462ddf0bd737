// SPDX-License-Identifier: GPL-3.0-or-later

//! This module defines the configuration of the collector.
//!
//! The configuration is either loaded from a file or used with default
//! values defined in the code. The file syntax is based on the YAML
//! format and the default file name is `vigil.yml`.
//!
//! The configuration file location is searched in the following order:
//! 1. The current working directory
//! 2. The local configuration directory of the user
//! 3. The configuration directory of the user
//! 4. The local configuration directory of the application
//! 5. The configuration directory of the application
//!
//! ```yaml
//! schema: 1.0
//!
//! server:
//!   tcp: "0.0.0.0:8023"
//!   udp: "0.0.0.0:8023"
//!
//! sink:
//!   events: events.jsonl
//!   alerts: alerts.jsonl
//!
//! detectors:
//!   zombie_killer:
//!     enabled: true
//!   king_watcher:
//!     enabled: true
//!     markers: ["flag"]
//!   flag_buster:
//!     enabled: true
//! ```

// Re-Export the types and the loader module content.
pub use loader::{ConfigError, Loader};
pub use types::*;
pub use validation::Validator;

mod types {
    use serde::Deserialize;
    use std::path::PathBuf;

    /// Represents the collector configuration.
    #[derive(Debug, PartialEq, serde::Deserialize, serde::Serialize)]
    pub struct Main {
        #[serde(deserialize_with = "validate_schema_version")]
        pub schema: String,
        #[serde(default)]
        pub server: Server,
        #[serde(default)]
        pub sink: Sink,
        #[serde(default)]
        pub detectors: Detectors,
    }

    impl Default for Main {
        fn default() -> Self {
            Self {
                schema: String::from(SUPPORTED_SCHEMA_VERSION),
                server: Server::default(),
                sink: Sink::default(),
                detectors: Detectors::default(),
            }
        }
    }

    /// The listener addresses of the ingress layer.
    #[derive(Clone, Debug, PartialEq, serde::Deserialize, serde::Serialize)]
    pub struct Server {
        #[serde(default = "default_tcp_address")]
        pub tcp: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub udp: Option<String>,
    }

    impl Default for Server {
        fn default() -> Self {
            Self { tcp: default_tcp_address(), udp: None }
        }
    }

    /// Where surviving records and alerts are appended.
    #[derive(Clone, Debug, PartialEq, serde::Deserialize, serde::Serialize)]
    pub struct Sink {
        #[serde(default = "default_events_file")]
        pub events: PathBuf,
        #[serde(default = "default_alerts_file")]
        pub alerts: PathBuf,
    }

    impl Default for Sink {
        fn default() -> Self {
            Self { events: default_events_file(), alerts: default_alerts_file() }
        }
    }

    /// Per-detector configuration of the built-in plugin set.
    #[derive(Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize)]
    pub struct Detectors {
        #[serde(default)]
        pub zombie_killer: Toggle,
        #[serde(default)]
        pub king_watcher: KingWatcher,
        #[serde(default)]
        pub flag_buster: Toggle,
    }

    /// An enabled/disabled switch for a detector without parameters.
    #[derive(Clone, Debug, PartialEq, serde::Deserialize, serde::Serialize)]
    pub struct Toggle {
        #[serde(default = "default_enabled")]
        pub enabled: bool,
    }

    impl Default for Toggle {
        fn default() -> Self {
            Self { enabled: true }
        }
    }

    /// Configuration of the pattern alert monitor.
    #[derive(Clone, Debug, PartialEq, serde::Deserialize, serde::Serialize)]
    pub struct KingWatcher {
        #[serde(default = "default_enabled")]
        pub enabled: bool,
        /// Sensitive path substrings that trigger an alert when touched.
        #[serde(default = "default_markers")]
        pub markers: Vec<String>,
    }

    impl Default for KingWatcher {
        fn default() -> Self {
            Self { enabled: true, markers: default_markers() }
        }
    }

    const SUPPORTED_SCHEMA_VERSION: &str = "1.0";

    fn default_tcp_address() -> String {
        String::from("127.0.0.1:8023")
    }

    fn default_events_file() -> PathBuf {
        PathBuf::from("events.jsonl")
    }

    fn default_alerts_file() -> PathBuf {
        PathBuf::from("alerts.jsonl")
    }

    fn default_enabled() -> bool {
        true
    }

    fn default_markers() -> Vec<String> {
        vec![String::from("flag")]
    }

    // Custom deserialization function to validate the schema version
    fn validate_schema_version<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let schema: String = Deserialize::deserialize(deserializer)?;
        if schema != SUPPORTED_SCHEMA_VERSION {
            use serde::de::Error;
            Err(Error::custom(format!(
                "Unsupported schema version: {schema}. Expected: {SUPPORTED_SCHEMA_VERSION}"
            )))
        } else {
            Ok(schema)
        }
    }
}

pub mod validation {

    use super::types::*;
    use std::net::SocketAddr;
    use thiserror::Error;

    /// Trait for validating configuration objects
    pub trait Validator<T> {
        type Error: std::error::Error;

        fn validate(config: &T) -> Result<(), Self::Error>;
    }

    /// Validation errors for configuration
    #[derive(Debug, Error)]
    pub enum ValidationError {
        #[error("Invalid socket address for '{field}': '{value}'")]
        InvalidAddress { field: &'static str, value: String },
        #[error("Empty string value for field '{field}'")]
        EmptyString { field: String },
        #[error("Multiple validation errors: {errors:?}")]
        Multiple { errors: Vec<ValidationError> },
    }

    /// Combinator for collecting and handling validation errors
    #[derive(Default)]
    struct ValidationCollector {
        errors: Vec<ValidationError>,
    }

    impl ValidationCollector {
        fn new() -> Self {
            Self { errors: Vec::new() }
        }

        fn add(&mut self, error: ValidationError) {
            self.errors.push(error);
        }

        fn add_result(&mut self, result: Result<(), ValidationError>) {
            if let Err(error) = result {
                match error {
                    ValidationError::Multiple { errors } => {
                        self.errors.extend(errors);
                    }
                    single_error => self.errors.push(single_error),
                }
            }
        }

        fn finish(mut self) -> Result<(), ValidationError> {
            match self.errors.len() {
                0 => Ok(()),
                1 => Err(self.errors.remove(0)),
                _ => Err(ValidationError::Multiple { errors: self.errors }),
            }
        }
    }

    impl Validator<Main> for Main {
        type Error = ValidationError;

        fn validate(config: &Main) -> Result<(), Self::Error> {
            let mut collector = ValidationCollector::new();

            collector.add_result(Server::validate(&config.server));
            collector.add_result(Detectors::validate(&config.detectors));

            collector.finish()
        }
    }

    impl Validator<Server> for Server {
        type Error = ValidationError;

        fn validate(config: &Server) -> Result<(), Self::Error> {
            let mut collector = ValidationCollector::new();

            if config.tcp.parse::<SocketAddr>().is_err() {
                collector.add(ValidationError::InvalidAddress {
                    field: "server.tcp",
                    value: config.tcp.clone(),
                });
            }
            if let Some(udp) = &config.udp {
                if udp.parse::<SocketAddr>().is_err() {
                    collector.add(ValidationError::InvalidAddress {
                        field: "server.udp",
                        value: udp.clone(),
                    });
                }
            }

            collector.finish()
        }
    }

    impl Validator<Detectors> for Detectors {
        type Error = ValidationError;

        fn validate(config: &Detectors) -> Result<(), Self::Error> {
            let mut collector = ValidationCollector::new();

            for (idx, marker) in config.king_watcher.markers.iter().enumerate() {
                if marker.is_empty() {
                    collector.add(ValidationError::EmptyString {
                        field: format!("detectors.king_watcher.markers[{idx}]"),
                    });
                }
            }

            collector.finish()
        }
    }

}

pub mod loader {
    use super::{Main, Validator};
    use directories::{BaseDirs, ProjectDirs};
    use log::{debug, info};
    use std::fs::OpenOptions;
    use std::path::{Path, PathBuf};
    use thiserror::Error;

    pub struct Loader {}

    impl Loader {
        /// Loads the configuration from the specified file or the default locations.
        ///
        /// If the configuration file is specified, it will be used. Otherwise the
        /// default locations will be searched. If no configuration file is found,
        /// the default configuration will be returned.
        pub fn load(filename: &Option<String>) -> Result<Main, ConfigError> {
            if let Some(path) = filename {
                // If the configuration file is specified, use it.
                Self::from_file(Path::new(path))
            } else {
                // Otherwise, try to find the configuration file in the default locations.
                let locations = Self::file_locations();
                for location in locations {
                    debug!("Checking configuration file: {}", location.display());
                    if location.exists() {
                        return Self::from_file(location.as_path());
                    }
                }
                // If the configuration file is not found, return the default configuration.
                debug!("Configuration file not found. Using the default configuration.");
                Ok(Main::default())
            }
        }

        /// The default locations where the configuration file can be found.
        fn file_locations() -> Vec<PathBuf> {
            let mut locations = Vec::new();

            if let Ok(current) = std::env::current_dir() {
                locations.push(current);
            }
            if let Some(base_dirs) = BaseDirs::new() {
                locations.push(base_dirs.config_local_dir().to_path_buf());
                locations.push(base_dirs.config_dir().to_path_buf());
            }
            if let Some(proj_dirs) = ProjectDirs::from("com.github", "vigil-awd", "vigil") {
                locations.push(proj_dirs.config_local_dir().to_path_buf());
                locations.push(proj_dirs.config_dir().to_path_buf());
            }
            // filter out duplicate elements from the list
            locations.dedup();
            // append the default configuration file name to the locations
            locations.iter().map(|p| p.join("vigil.yml")).collect()
        }

        /// Loads the configuration from the specified file.
        pub fn from_file(path: &Path) -> Result<Main, ConfigError> {
            info!("Loading configuration file: {}", path.display());

            let reader = OpenOptions::new()
                .read(true)
                .open(path)
                .map_err(|source| ConfigError::FileAccess { path: path.to_path_buf(), source })?;

            let content: Main = Self::from_reader(reader)
                .map_err(|source| ConfigError::ParseError { path: path.to_path_buf(), source })?;

            // Validate the loaded configuration
            Main::validate(&content)
                .map_err(|source| ConfigError::ValidationError { path: path.to_path_buf(), source })?;

            Ok(content)
        }

        /// Define the deserialization format of the config file.
        fn from_reader<R, T>(rdr: R) -> serde_yml::Result<T>
        where
            R: std::io::Read,
            T: serde::de::DeserializeOwned,
        {
            serde_yml::from_reader(rdr)
        }
    }

    /// Represents all possible configuration-related errors.
    #[derive(Debug, Error)]
    pub enum ConfigError {
        /// Error when opening or reading a configuration file.
        #[error("Failed to access configuration file '{path}': {source}")]
        FileAccess {
            path: PathBuf,
            #[source]
            source: std::io::Error,
        },
        /// Error when parsing the configuration file format.
        #[error("Failed to parse configuration from file '{path}': {source}")]
        ParseError {
            path: PathBuf,
            #[source]
            source: serde_yml::Error,
        },
        /// Error when configuration validation fails.
        #[error("Configuration validation failed: {source}")]
        ValidationError {
            path: PathBuf,
            #[source]
            source: crate::config::validation::ValidationError,
        },
    }

}
