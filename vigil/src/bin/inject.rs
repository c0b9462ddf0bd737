// SPDX-License-Identifier: GPL-3.0-or-later

use anyhow::Context;
use std::fs;
use std::process::ExitCode;
use vigil::args;
use vigil::patch::{handshake, inject, HANDSHAKE_TIMEOUT};

/// Driver function of the source injection tool.
fn main() -> anyhow::Result<ExitCode> {
    let matches = args::inject_cli().get_matches();
    let arguments = args::Inject::try_from(matches)?;
    init_logging(arguments.verbose);

    let source = fs::read_to_string(&arguments.input)
        .with_context(|| format!("Failed to read the input '{}'", arguments.input))?;

    let modified = if arguments.remove {
        inject::remove(&source)
            .with_context(|| format!("Failed to uninstall from '{}'", arguments.input))?
    } else {
        // Verify the collector before producing an agent that reports to it.
        handshake(&arguments.collector, HANDSHAKE_TIMEOUT)
            .with_context(|| format!("Collector at '{}' is not answering", arguments.collector))?;
        log::info!("Collector verified at '{}'", arguments.collector);

        // The argument parser guarantees the agent path outside of removal.
        let agent = arguments.agent.as_deref().unwrap_or_default();
        inject::inject(&source, agent)
            .with_context(|| format!("Failed to install into '{}'", arguments.input))?
    };

    let output = arguments.output.as_deref().unwrap_or(&arguments.input);
    fs::write(output, modified)
        .with_context(|| format!("Failed to write the output '{output}'"))?;

    log::info!("Wrote '{output}'");
    Ok(ExitCode::SUCCESS)
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::from_default_env().filter_level(level).init();
}
