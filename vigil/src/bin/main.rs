// SPDX-License-Identifier: GPL-3.0-or-later

use crossbeam_channel::unbounded;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use vigil::dispatch::PluginManager;
use vigil::ingress::{Command, IngressServer};
use vigil::receiver::{AlertLog, EventLog, Receiver};
use vigil::{args, config, detectors};

/// Driver function of the collector.
fn main() -> anyhow::Result<ExitCode> {
    // Parse the command line arguments.
    let matches = args::collector_cli().get_matches();
    let arguments = args::Collector::try_from(matches)?;
    // Initialize the logging system.
    init_logging(arguments.verbose);

    let pkg_name = env!("CARGO_PKG_NAME");
    let pkg_version = env!("CARGO_PKG_VERSION");
    log::info!("{pkg_name} v{pkg_version}");

    // Load the configuration and apply the command line overrides.
    let mut configuration = config::Loader::load(&arguments.config)?;
    if let Some(tcp) = &arguments.tcp {
        configuration.server.tcp = tcp.clone();
    }
    if let Some(udp) = &arguments.udp {
        configuration.server.udp = Some(udp.clone());
    }
    if let Some(output) = &arguments.output {
        configuration.sink.events = PathBuf::from(output);
    }
    log::debug!("{configuration:?}");

    // Load the detector plugins.
    let mut plugins = PluginManager::new();
    plugins.load(&detectors::builtin(), &configuration.detectors);
    log::info!("Detectors loaded: {:?}", plugins.loaded());

    // Open the sinks and bind the listeners before accepting traffic.
    let events_sink = EventLog::open(&configuration.sink.events)?;
    let alerts_sink = AlertLog::open(&configuration.sink.alerts)?;
    let server =
        IngressServer::bind(&configuration.server.tcp, configuration.server.udp.as_deref())?;
    log::info!("Listening on tcp://{}", server.tcp_address()?);
    if let Some(address) = server.udp_address() {
        log::info!("Listening on udp://{}", address?);
    }

    let (event_tx, event_rx) = unbounded();
    let (command_tx, command_rx) = unbounded();

    // A termination signal turns into a shutdown command for the loop.
    let signaled = Arc::new(AtomicBool::new(false));
    for signal in signal_hook::consts::TERM_SIGNALS {
        signal_hook::flag::register(*signal, Arc::clone(&signaled))?;
    }
    {
        let commands = command_tx.clone();
        thread::spawn(move || {
            while !signaled.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_millis(100));
            }
            log::info!("Shutdown signal received");
            let _ = commands.send(Command::Shutdown);
        });
    }

    // The ingress loop gets its own thread; the receiver runs on this one
    // and stops when the loop closes the event channel.
    let ingress = thread::spawn(move || server.run(event_tx, command_rx));
    let receiver = Receiver::new(plugins, Box::new(events_sink), Box::new(alerts_sink));
    receiver.run(event_rx, command_tx);

    if ingress.join().is_err() {
        log::error!("Ingress loop terminated abnormally");
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::from_default_env().filter_level(level).init();
}
