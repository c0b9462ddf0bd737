// SPDX-License-Identifier: GPL-3.0-or-later

//! This module contains the command line interfaces of the tools.
//!
//! The command line parsing is implemented using the `clap` library.
//! Each binary has its own `Command` description and a structured
//! argument type built from the matches: the collector itself, the
//! executable patching tool, and the source injection tool.

use anyhow::anyhow;
use clap::{arg, command, ArgAction, ArgMatches, Command};

/// Represents the command line arguments of the collector.
#[derive(Debug, PartialEq)]
pub struct Collector {
    // The path of the configuration file.
    pub config: Option<String>,
    // Listener address overrides.
    pub tcp: Option<String>,
    pub udp: Option<String>,
    // Event output file override.
    pub output: Option<String>,
    pub verbose: u8,
}

impl TryFrom<ArgMatches> for Collector {
    type Error = anyhow::Error;

    fn try_from(matches: ArgMatches) -> Result<Self, Self::Error> {
        let config = matches.get_one::<String>("config").map(String::to_string);
        let tcp = matches.get_one::<String>("tcp").map(String::to_string);
        let udp = matches.get_one::<String>("udp").map(String::to_string);
        let output = matches.get_one::<String>("output").map(String::to_string);
        let verbose = matches.get_count("verbose");

        Ok(Collector { config, tcp, udp, output, verbose })
    }
}

/// Represents the command line interface of the collector.
pub fn collector_cli() -> Command {
    command!()
        .about("telemetry collector for attack-defense competitions")
        .args(&[
            arg!(-v --verbose ... "Sets the level of verbosity").action(ArgAction::Count),
            arg!(-c --config <FILE> "Path of the config file"),
            arg!(--tcp <ADDRESS> "TCP listener address, overrides the config"),
            arg!(--udp <ADDRESS> "UDP listener address, overrides the config"),
            arg!(-o --output <FILE> "Path of the event file, overrides the config"),
        ])
}

/// Represents the command line arguments of the executable patching tool.
#[derive(Debug, PartialEq)]
pub struct Patch {
    pub input: String,
    pub output: String,
    pub stub: String,
    pub collector: String,
    pub verbose: u8,
}

impl TryFrom<ArgMatches> for Patch {
    type Error = anyhow::Error;

    fn try_from(matches: ArgMatches) -> Result<Self, Self::Error> {
        let input = matches
            .get_one::<String>("input")
            .map(String::to_string)
            .ok_or_else(|| anyhow!("missing input file"))?;
        let output = matches
            .get_one::<String>("output")
            .map(String::to_string)
            .ok_or_else(|| anyhow!("missing output file"))?;
        let stub = matches
            .get_one::<String>("stub")
            .map(String::to_string)
            .ok_or_else(|| anyhow!("missing stub file"))?;
        let collector = matches
            .get_one::<String>("collector")
            .map(String::to_string)
            .ok_or_else(|| anyhow!("missing collector address"))?;
        let verbose = matches.get_count("verbose");

        Ok(Patch { input, output, stub, collector, verbose })
    }
}

/// Represents the command line interface of the executable patching tool.
pub fn patch_cli() -> Command {
    command!()
        .name("vigil-patch")
        .about("wraps an executable with the process monitor stub")
        .arg_required_else_help(true)
        .args(&[
            arg!(-v --verbose ... "Sets the level of verbosity").action(ArgAction::Count),
            arg!(<input> "Path of the executable to patch"),
            arg!(-o --output <FILE> "Path of the patched output").required(true),
            arg!(--stub <FILE> "Path of the monitor stub to embed").required(true),
            arg!(-c --collector <ADDRESS> "Collector address as host:port").required(true),
        ])
}

/// Represents the command line arguments of the source injection tool.
#[derive(Debug, PartialEq)]
pub struct Inject {
    pub input: String,
    /// Defaults to modifying the input in place.
    pub output: Option<String>,
    /// The include path written into the target; unused on removal.
    pub agent: Option<String>,
    pub collector: String,
    pub remove: bool,
    pub verbose: u8,
}

impl TryFrom<ArgMatches> for Inject {
    type Error = anyhow::Error;

    fn try_from(matches: ArgMatches) -> Result<Self, Self::Error> {
        let input = matches
            .get_one::<String>("input")
            .map(String::to_string)
            .ok_or_else(|| anyhow!("missing input file"))?;
        let output = matches.get_one::<String>("output").map(String::to_string);
        let agent = matches.get_one::<String>("agent").map(String::to_string);
        let collector = matches
            .get_one::<String>("collector")
            .map(String::to_string)
            .ok_or_else(|| anyhow!("missing collector address"))?;
        let remove = matches.get_flag("remove");
        let verbose = matches.get_count("verbose");

        if agent.is_none() && !remove {
            return Err(anyhow!("missing agent include path"));
        }
        Ok(Inject { input, output, agent, collector, remove, verbose })
    }
}

/// Represents the command line interface of the source injection tool.
pub fn inject_cli() -> Command {
    command!()
        .name("vigil-inject")
        .about("installs the web agent include into an application source file")
        .arg_required_else_help(true)
        .args(&[
            arg!(-v --verbose ... "Sets the level of verbosity").action(ArgAction::Count),
            arg!(<input> "Path of the source file to modify"),
            arg!(-o --output <FILE> "Path of the modified output, in place by default"),
            arg!(--agent <PATH> "Include path of the web agent").required_unless_present("remove"),
            arg!(-c --collector <ADDRESS> "Collector address as host:port").required(true),
            arg!(--remove "Remove a previously injected agent").action(ArgAction::SetTrue),
        ])
}
