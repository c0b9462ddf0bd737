// SPDX-License-Identifier: GPL-3.0-or-later

//! The network ingress layer of the collector.
//!
//! Agents reach the collector over stream (TCP) and datagram (UDP)
//! transports. The ingress layer accepts the traffic, reassembles stream
//! bytes into discrete records, and hands every record to one downstream
//! consumer through a channel. A command channel runs the other way: the
//! consumer uses it to write replies to peers, to switch the delivery mode
//! of a connection, and to stop the loop.
//!
//! The loop is single threaded and all socket I/O is non-blocking, so
//! records from one connection arrive downstream in the exact order the
//! peer wrote them. There is no ordering guarantee across connections.

pub mod framing;
pub mod server;

use std::fmt;
use std::net::SocketAddr;
use thiserror::Error;

pub use framing::{DeliveryMode, FrameBuffer, MAX_BUFFERED};
pub use server::IngressServer;

/// Identifies one accepted stream connection for its lifetime.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What the ingress loop delivers to the downstream consumer.
#[derive(Debug, PartialEq)]
pub enum IngressEvent {
    /// A new stream peer was accepted.
    Connected { peer: ConnectionId, address: SocketAddr },
    /// One reassembled record from a stream peer.
    Record { peer: ConnectionId, payload: Vec<u8> },
    /// One datagram, delivered verbatim with the sender address.
    Datagram { address: SocketAddr, payload: Vec<u8> },
    /// The peer disconnected or was force-closed; sent exactly once.
    Disconnected { peer: ConnectionId },
}

/// What the downstream consumer can ask the ingress loop to do.
#[derive(Debug)]
pub enum Command {
    /// Write bytes to a stream peer.
    Send { peer: ConnectionId, bytes: Vec<u8> },
    /// Write a datagram to the given address.
    SendTo { address: SocketAddr, bytes: Vec<u8> },
    /// Switch the delivery mode of a stream connection.
    SetMode { peer: ConnectionId, mode: DeliveryMode },
    /// Stop the loop, closing all connections.
    Shutdown,
}

/// Errors raised while setting up the listeners.
///
/// These are fatal to the collector and must surface to the operator.
#[derive(Error, Debug)]
pub enum BindError {
    #[error("Failed to bind TCP listener on {address}: {source}")]
    Tcp { address: String, source: std::io::Error },
    #[error("Failed to bind UDP socket on {address}: {source}")]
    Udp { address: String, source: std::io::Error },
}

/// A line-delimited peer exceeded the accumulation bound.
///
/// Terminates only the offending connection.
#[derive(Error, Debug)]
#[error("Stream buffer exceeded the {limit} byte bound ({buffered} bytes without a delimiter)")]
pub struct OverflowError {
    pub buffered: usize,
    pub limit: usize,
}
