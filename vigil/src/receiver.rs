// SPDX-License-Identifier: GPL-3.0-or-later

//! The downstream consumer of the ingress layer.
//!
//! The receiver drains the event channel: it answers handshake pings,
//! decodes record envelopes, dispatches them to the detectors keyed by the
//! envelope type, and appends the surviving records and the raised alerts
//! to their sinks. A malformed line is logged and dropped; it never
//! disturbs the connection it arrived on.

use crate::dispatch::{Alert, Operation, PluginManager, Record, Routine};
use crate::ingress::{Command, ConnectionId, DeliveryMode, IngressEvent};
use crate::protocol;
use log::{debug, info, warn};
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::net::SocketAddr;
use std::path::Path;

/// Where surviving records go.
pub trait EventSink: Send {
    fn persist(&mut self, routine: &Routine, record: &Record) -> std::io::Result<()>;
}

/// Where raised alerts go.
pub trait AlertSink: Send {
    fn record(&mut self, alert: &Alert) -> std::io::Result<()>;
}

/// Appends records as JSON lines, `{"routine": ..., "data": ...}`.
pub struct EventLog {
    writer: BufWriter<std::fs::File>,
}

impl EventLog {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { writer: BufWriter::new(file) })
    }
}

impl EventSink for EventLog {
    fn persist(&mut self, routine: &Routine, record: &Record) -> std::io::Result<()> {
        let line = serde_json::json!({"routine": routine.as_str(), "data": record});
        serde_json::to_writer(&mut self.writer, &line)?;
        self.writer.write_all(b"\n")?;
        // One record per line on disk, even if the process dies mid-run.
        self.writer.flush()
    }
}

/// Appends alerts as JSON lines.
pub struct AlertLog {
    writer: BufWriter<std::fs::File>,
}

impl AlertLog {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { writer: BufWriter::new(file) })
    }
}

impl AlertSink for AlertLog {
    fn record(&mut self, alert: &Alert) -> std::io::Result<()> {
        serde_json::to_writer(&mut self.writer, alert)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()
    }
}

/// Asks the ingress loop to switch the delivery mode of a stream peer.
///
/// External collaborators use this when a connection stops carrying
/// line-delimited records, e.g. an interactive session relay. Returns
/// false when the ingress loop is gone.
pub fn set_delivery_mode(
    commands: &crossbeam_channel::Sender<Command>,
    peer: ConnectionId,
    mode: DeliveryMode,
) -> bool {
    commands.send(Command::SetMode { peer, mode }).is_ok()
}

/// The origin of one decoded line, used as the dispatch caller identity
/// and as the reply route for handshake pings.
enum Source {
    Stream(ConnectionId),
    Datagram(SocketAddr),
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Source::Stream(peer) => write!(f, "peer {peer}"),
            Source::Datagram(address) => write!(f, "datagram {address}"),
        }
    }
}

pub struct Receiver {
    plugins: PluginManager,
    events: Box<dyn EventSink>,
    alerts: Box<dyn AlertSink>,
}

impl Receiver {
    pub fn new(
        plugins: PluginManager,
        events: Box<dyn EventSink>,
        alerts: Box<dyn AlertSink>,
    ) -> Self {
        Self { plugins, events, alerts }
    }

    /// Consumes ingress events until the channel closes.
    pub fn run(
        mut self,
        events: crossbeam_channel::Receiver<IngressEvent>,
        commands: crossbeam_channel::Sender<Command>,
    ) {
        for event in events {
            match event {
                IngressEvent::Connected { peer, address } => {
                    info!("Agent connected: {peer} from {address}");
                }
                IngressEvent::Disconnected { peer } => {
                    info!("Agent disconnected: {peer}");
                }
                IngressEvent::Record { peer, payload } => {
                    self.process(Source::Stream(peer), &payload, &commands);
                }
                IngressEvent::Datagram { address, payload } => {
                    self.process(Source::Datagram(address), &payload, &commands);
                }
            }
        }
        debug!("Ingress channel closed, receiver stopping");
    }

    fn process(
        &mut self,
        source: Source,
        payload: &[u8],
        commands: &crossbeam_channel::Sender<Command>,
    ) {
        let envelope = match protocol::Envelope::decode(payload) {
            Ok(envelope) => envelope,
            Err(error) => {
                warn!("Dropping malformed line from {source}: {error}");
                return;
            }
        };

        if envelope.is_ping() {
            let reply = protocol::pong_line();
            let command = match source {
                Source::Stream(peer) => Command::Send { peer, bytes: reply },
                Source::Datagram(address) => Command::SendTo { address, bytes: reply },
            };
            if commands.send(command).is_err() {
                debug!("Ingress loop is gone, dropping the pong reply");
            }
            return;
        }

        let routine = Routine::new(&envelope.kind);
        let caller = source.to_string();
        let outcome = self.plugins.invoke(
            &caller,
            &routine,
            &Operation::process_log(),
            envelope.data,
        );

        for alert in &outcome.alerts {
            if let Err(error) = self.alerts.record(alert) {
                warn!("Failed to record an alert: {error}");
            }
        }
        if outcome.suppress {
            debug!("Record from {caller} suppressed by a detector");
        } else if let Err(error) = self.events.persist(&routine, &outcome.record) {
            warn!("Failed to persist a record from {caller}: {error}");
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config;
    use crate::detectors;
    use crossbeam_channel::unbounded;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Memory {
        records: Arc<Mutex<Vec<(String, Record)>>>,
        alerts: Arc<Mutex<Vec<Alert>>>,
    }

    impl EventSink for Memory {
        fn persist(&mut self, routine: &Routine, record: &Record) -> std::io::Result<()> {
            self.records
                .lock()
                .unwrap()
                .push((routine.as_str().to_string(), record.clone()));
            Ok(())
        }
    }

    impl AlertSink for Memory {
        fn record(&mut self, alert: &Alert) -> std::io::Result<()> {
            self.alerts.lock().unwrap().push(alert.clone());
            Ok(())
        }
    }

    /// Feeds the given events through a receiver and returns the sinks
    /// and the commands it emitted.
    fn drive(events: Vec<IngressEvent>) -> (Memory, Vec<Command>) {
        let mut plugins = PluginManager::new();
        plugins.load(&detectors::builtin(), &config::Detectors::default());

        let memory = Memory::default();
        let sut =
            Receiver::new(plugins, Box::new(memory.clone()), Box::new(memory.clone()));

        let (event_tx, event_rx) = unbounded();
        let (command_tx, command_rx) = unbounded();
        for event in events {
            event_tx.send(event).unwrap();
        }
        drop(event_tx);

        sut.run(event_rx, command_tx);
        (memory, command_rx.try_iter().collect())
    }

    fn record(payload: &str) -> IngressEvent {
        IngressEvent::Record { peer: ConnectionId(1), payload: payload.as_bytes().to_vec() }
    }

    #[test]
    fn a_ping_is_answered_with_a_pong_to_the_same_peer() {
        let (_, commands) = drive(vec![record(r#"{"type":"ping"}"#)]);

        assert_eq!(commands.len(), 1);
        match &commands[0] {
            Command::Send { peer, bytes } => {
                assert_eq!(*peer, ConnectionId(1));
                assert_eq!(bytes, &protocol::pong_line());
            }
            other => panic!("Expected a stream reply, got {other:?}"),
        }
    }

    #[test]
    fn a_datagram_ping_is_answered_to_the_sender_address() {
        let address: SocketAddr = "127.0.0.1:4567".parse().unwrap();
        let (_, commands) = drive(vec![IngressEvent::Datagram {
            address,
            payload: br#"{"type":"ping"}"#.to_vec(),
        }]);

        match &commands[0] {
            Command::SendTo { address: target, bytes } => {
                assert_eq!(*target, address);
                assert_eq!(bytes, &protocol::pong_line());
            }
            other => panic!("Expected a datagram reply, got {other:?}"),
        }
    }

    #[test]
    fn a_record_is_dispatched_and_persisted_under_its_routine() {
        let line = r#"{"type":"process","data":{"pid":42,"bin":"/bin/ls"}}"#;
        let (memory, _) = drive(vec![record(line)]);

        let records = memory.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].0, "process");
        assert_eq!(records[0].1, json!({"pid": 42, "bin": "/bin/ls"}));
    }

    #[test]
    fn a_malformed_line_is_dropped_without_stopping_the_receiver() {
        let (memory, _) = drive(vec![
            record("not json at all"),
            record(r#"{"type":"process","data":{"pid":1}}"#),
        ]);

        assert_eq!(memory.records.lock().unwrap().len(), 1);
    }

    #[test]
    fn detector_alerts_reach_the_alert_sink() {
        let line = r#"{"type":"filesystem","data":{"path":"/home/ctf/flag","oper":"CLOSE_WRITE"}}"#;
        let (memory, _) = drive(vec![record(line)]);

        let alerts = memory.alerts.lock().unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].detector, "king_watcher");
        assert!(alerts[0].message.contains("/home/ctf/flag"));
        // The record itself still gets persisted.
        assert_eq!(memory.records.lock().unwrap().len(), 1);
    }

    #[test]
    fn mode_switch_requests_land_on_the_command_channel() {
        let (command_tx, command_rx) = unbounded();

        assert!(set_delivery_mode(&command_tx, ConnectionId(3), DeliveryMode::Raw));

        match command_rx.try_recv().unwrap() {
            Command::SetMode { peer, mode } => {
                assert_eq!(peer, ConnectionId(3));
                assert_eq!(mode, DeliveryMode::Raw);
            }
            other => panic!("Expected a mode switch, got {other:?}"),
        }
    }

    #[test]
    fn a_rewritten_web_record_is_persisted_without_the_flag() {
        let line = r#"{"type":"web","data":{"uri":"/x","buffer":"{\"flag\":\"TOPSECRET\"}"}}"#;
        let (memory, _) = drive(vec![record(line)]);

        let records = memory.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        let buffer = records[0].1["buffer"].as_str().unwrap();
        assert!(!buffer.contains("TOPSECRET"));
        assert_eq!(memory.alerts.lock().unwrap().len(), 1);
    }
}
