// SPDX-License-Identifier: GPL-3.0-or-later

use anyhow::{anyhow, Context};
use std::fs;
use std::net::SocketAddr;
use std::process::ExitCode;
use vigil::args;
use vigil::patch::{footer, handshake, HANDSHAKE_TIMEOUT};

/// Driver function of the executable patching tool.
fn main() -> anyhow::Result<ExitCode> {
    let matches = args::patch_cli().get_matches();
    let arguments = args::Patch::try_from(matches)?;
    init_logging(arguments.verbose);

    // Verify the collector before touching anything.
    let address = handshake(&arguments.collector, HANDSHAKE_TIMEOUT)
        .with_context(|| format!("Collector at '{}' is not answering", arguments.collector))?;
    let SocketAddr::V4(collector) = address else {
        return Err(anyhow!("The patch format carries IPv4 addresses only, got {address}"));
    };
    log::info!("Collector verified at {collector}");

    let stub = fs::read(&arguments.stub)
        .with_context(|| format!("Failed to read the stub '{}'", arguments.stub))?;
    let original = fs::read(&arguments.input)
        .with_context(|| format!("Failed to read the input '{}'", arguments.input))?;

    let patched = footer::encode(&stub, &original, collector);
    fs::write(&arguments.output, patched)
        .with_context(|| format!("Failed to write the output '{}'", arguments.output))?;

    // The patched file replaces an executable, so it keeps the mode bits.
    let permissions = fs::metadata(&arguments.input)?.permissions();
    fs::set_permissions(&arguments.output, permissions)?;

    log::info!(
        "Patched '{}' into '{}', reporting to {collector}",
        arguments.input,
        arguments.output
    );
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
