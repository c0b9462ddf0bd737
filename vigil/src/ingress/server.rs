// SPDX-License-Identifier: GPL-3.0-or-later

//! The ingress server loop.
//!
//! One thread owns all the sockets. Each iteration accepts pending stream
//! connections, reads up to 64 KiB from every readable connection, polls
//! the datagram socket, and drains the command channel. When nothing made
//! progress the loop naps briefly instead of spinning.
//!
//! Handler and detector code downstream must not block: the loop itself is
//! never the bottleneck, but a stalled consumer lets per-connection buffers
//! fill up to their bound.

use super::{BindError, Command, ConnectionId, DeliveryMode, FrameBuffer, IngressEvent};
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use std::collections::HashMap;
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::time::Duration;

/// Maximum bytes read from one connection per wake-up.
const READ_CHUNK: usize = 65535;
/// Nap length for an idle iteration.
const IDLE_NAP: Duration = Duration::from_millis(1);
/// Retry budget for a non-blocking write before the peer is dropped.
const WRITE_RETRIES: usize = 100;

/// Per-connection state, created on accept and destroyed on close.
struct Connection {
    stream: TcpStream,
    frames: FrameBuffer,
}

/// Accepts stream and datagram traffic and feeds one consumer channel.
pub struct IngressServer {
    listener: TcpListener,
    datagram: Option<UdpSocket>,
    connections: HashMap<ConnectionId, Connection>,
    next_id: u64,
}

impl IngressServer {
    /// Binds the listeners.
    ///
    /// The TCP listener is mandatory; the datagram socket is optional.
    /// Both are switched to non-blocking mode before the loop starts.
    pub fn bind(tcp: &str, udp: Option<&str>) -> Result<Self, BindError> {
        let listener = TcpListener::bind(tcp)
            .and_then(|listener| listener.set_nonblocking(true).map(|()| listener))
            .map_err(|source| BindError::Tcp { address: tcp.to_string(), source })?;

        let datagram = match udp {
            Some(address) => {
                let socket = UdpSocket::bind(address)
                    .and_then(|socket| socket.set_nonblocking(true).map(|()| socket))
                    .map_err(|source| BindError::Udp { address: address.to_string(), source })?;
                Some(socket)
            }
            None => None,
        };

        Ok(Self { listener, datagram, connections: HashMap::new(), next_id: 0 })
    }

    /// The local address of the stream listener.
    pub fn tcp_address(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// The local address of the datagram socket, when one is bound.
    pub fn udp_address(&self) -> Option<std::io::Result<SocketAddr>> {
        self.datagram.as_ref().map(UdpSocket::local_addr)
    }

    /// Runs the loop until a `Shutdown` command arrives or the consumer
    /// goes away.
    ///
    /// Events are delivered to `events`; `commands` carries the control
    /// surface back from the consumer.
    pub fn run(mut self, events: Sender<IngressEvent>, commands: Receiver<Command>) {
        log::debug!("Ingress loop started");
        loop {
            let mut progressed = false;

            match self.drain_commands(&events, &commands) {
                Flow::Continue(busy) => progressed |= busy,
                Flow::Stop => break,
            }
            match self.accept_pending(&events) {
                Flow::Continue(busy) => progressed |= busy,
                Flow::Stop => break,
            }
            match self.read_connections(&events) {
                Flow::Continue(busy) => progressed |= busy,
                Flow::Stop => break,
            }
            match self.read_datagrams(&events) {
                Flow::Continue(busy) => progressed |= busy,
                Flow::Stop => break,
            }

            if !progressed {
                std::thread::sleep(IDLE_NAP);
            }
        }
        log::debug!("Ingress loop stopped");
    }

    fn drain_commands(
        &mut self,
        events: &Sender<IngressEvent>,
        commands: &Receiver<Command>,
    ) -> Flow {
        let mut busy = false;
        loop {
            match commands.try_recv() {
                Ok(Command::Send { peer, bytes }) => {
                    busy = true;
                    if let Some(connection) = self.connections.get_mut(&peer) {
                        if let Err(error) = write_nonblocking(&mut connection.stream, &bytes) {
                            log::warn!("Failed to write to peer {peer}: {error}");
                        }
                    }
                }
                Ok(Command::SendTo { address, bytes }) => {
                    busy = true;
                    if let Some(socket) = &self.datagram {
                        if let Err(error) = socket.send_to(&bytes, address) {
                            log::warn!("Failed to send datagram to {address}: {error}");
                        }
                    }
                }
                Ok(Command::SetMode { peer, mode }) => {
                    busy = true;
                    // Flushed partial data goes out as one record before
                    // any raw chunk.
                    if let Some(connection) = self.connections.get_mut(&peer) {
                        for payload in connection.frames.set_mode(mode) {
                            if events.send(IngressEvent::Record { peer, payload }).is_err() {
                                return Flow::Stop;
                            }
                        }
                    }
                }
                Ok(Command::Shutdown) => return Flow::Stop,
                Err(TryRecvError::Empty) => return Flow::Continue(busy),
                Err(TryRecvError::Disconnected) => return Flow::Stop,
            }
        }
    }

    fn accept_pending(&mut self, events: &Sender<IngressEvent>) -> Flow {
        let mut busy = false;
        loop {
            match self.listener.accept() {
                Ok((stream, address)) => {
                    busy = true;
                    if let Err(error) = stream.set_nonblocking(true) {
                        log::warn!("Failed to configure accepted connection: {error}");
                        continue;
                    }
                    let peer = ConnectionId(self.next_id);
                    self.next_id += 1;
                    self.connections
                        .insert(peer, Connection { stream, frames: FrameBuffer::new() });
                    log::debug!("Accepted connection {peer} from {address}");
                    if events.send(IngressEvent::Connected { peer, address }).is_err() {
                        return Flow::Stop;
                    }
                }
                Err(error) if error.kind() == ErrorKind::WouldBlock => {
                    return Flow::Continue(busy)
                }
                Err(error) => {
                    log::error!("Error while accepting a connection: {error}");
                    return Flow::Continue(busy);
                }
            }
        }
    }

    fn read_connections(&mut self, events: &Sender<IngressEvent>) -> Flow {
        let mut busy = false;
        let mut closed: Vec<ConnectionId> = Vec::new();
        let mut buffer = [0u8; READ_CHUNK];

        for (peer, connection) in self.connections.iter_mut() {
            match connection.stream.read(&mut buffer) {
                Ok(0) => {
                    // Peer closed its write side; release the connection.
                    busy = true;
                    closed.push(*peer);
                }
                Ok(count) => {
                    busy = true;
                    match connection.frames.push(&buffer[..count]) {
                        Ok(records) => {
                            for payload in records {
                                if events.send(IngressEvent::Record { peer: *peer, payload }).is_err()
                                {
                                    return Flow::Stop;
                                }
                            }
                        }
                        Err(error) => {
                            // Bounds the memory a hostile peer can pin.
                            log::warn!("Closing connection {peer}: {error}");
                            let _ = connection.stream.shutdown(Shutdown::Both);
                            closed.push(*peer);
                        }
                    }
                }
                Err(error) if error.kind() == ErrorKind::WouldBlock => {}
                Err(error) => {
                    log::debug!("Read error on connection {peer}: {error}");
                    busy = true;
                    closed.push(*peer);
                }
            }
        }

        for peer in closed {
            if let Some(connection) = self.connections.remove(&peer) {
                // Half-close for writing; the read side is already done.
                let _ = connection.stream.shutdown(Shutdown::Write);
            }
            log::debug!("Connection {peer} closed");
            if events.send(IngressEvent::Disconnected { peer }).is_err() {
                return Flow::Stop;
            }
        }
        Flow::Continue(busy)
    }

    fn read_datagrams(&mut self, events: &Sender<IngressEvent>) -> Flow {
        let Some(socket) = &self.datagram else {
            return Flow::Continue(false);
        };
        let mut busy = false;
        let mut buffer = [0u8; READ_CHUNK];
        loop {
            match socket.recv_from(&mut buffer) {
                Ok((count, address)) => {
                    busy = true;
                    let payload = buffer[..count].to_vec();
                    if events.send(IngressEvent::Datagram { address, payload }).is_err() {
                        return Flow::Stop;
                    }
                }
                Err(error) if error.kind() == ErrorKind::WouldBlock => {
                    return Flow::Continue(busy)
                }
                Err(error) => {
                    log::warn!("Datagram receive error: {error}");
                    return Flow::Continue(busy);
                }
            }
        }
    }
}

/// Loop outcome of one polling step.
enum Flow {
    /// Keep looping; the flag tells whether the step made progress.
    Continue(bool),
    /// Leave the loop.
    Stop,
}

/// Writes the whole buffer to a non-blocking stream.
///
/// Small control messages (the `pong` reply) are the only writes the
/// collector performs, so a bounded retry is sufficient backpressure
/// handling.
fn write_nonblocking(stream: &mut TcpStream, bytes: &[u8]) -> std::io::Result<()> {
    let mut written = 0;
    let mut retries = 0;
    while written < bytes.len() {
        match stream.write(&bytes[written..]) {
            Ok(count) => written += count,
            Err(error) if error.kind() == ErrorKind::WouldBlock => {
                retries += 1;
                if retries > WRITE_RETRIES {
                    return Err(std::io::Error::new(
                        ErrorKind::TimedOut,
                        "peer did not drain its receive buffer",
                    ));
                }
                std::thread::sleep(IDLE_NAP);
            }
            Err(error) if error.kind() == ErrorKind::Interrupted => {}
            Err(error) => return Err(error),
        }
    }
    Ok(())
}
