// SPDX-License-Identifier: GPL-3.0-or-later

//! Agent installation helpers shared by the patching tools.
//!
//! Both tools verify that the collector is reachable before they touch a
//! target: they connect, send the handshake ping, and require the pong
//! reply within a timeout. Only then is the patched output produced, so a
//! misconfigured collector address never results in an agent that reports
//! into the void.

pub mod footer;
pub mod inject;

use crate::protocol::{Envelope, ProtocolError, TYPE_PING, TYPE_PONG};
use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;
use thiserror::Error;

/// How long the tools wait for the collector to answer the ping.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors raised while verifying the collector.
#[derive(Error, Debug)]
pub enum HandshakeError {
    #[error("Invalid collector address '{address}': {reason}")]
    Address { address: String, reason: String },
    #[error("Failed to connect to the collector at {address}: {source}")]
    Connect { address: SocketAddr, source: std::io::Error },
    #[error("I/O failure during the handshake: {0}")]
    Io(#[from] std::io::Error),
    #[error("Collector sent a malformed handshake reply: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("Collector replied with '{0}' instead of the handshake reply")]
    UnexpectedReply(String),
}

/// Performs the ping/pong handshake against the collector.
///
/// Returns the resolved address on success so the caller can embed it in
/// the patched output.
pub fn handshake(collector: &str, timeout: Duration) -> Result<SocketAddr, HandshakeError> {
    let address = resolve(collector)?;

    let stream = TcpStream::connect_timeout(&address, timeout)
        .map_err(|source| HandshakeError::Connect { address, source })?;
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;

    let mut writer = &stream;
    writer.write_all(&Envelope::new(TYPE_PING).encode()?)?;
    writer.flush()?;

    let mut line = String::new();
    BufReader::new(&stream).read_line(&mut line)?;

    let reply = Envelope::decode(line.as_bytes())?;
    if reply.kind == TYPE_PONG {
        Ok(address)
    } else {
        Err(HandshakeError::UnexpectedReply(reply.kind))
    }
}

fn resolve(collector: &str) -> Result<SocketAddr, HandshakeError> {
    let mut candidates =
        collector.to_socket_addrs().map_err(|source| HandshakeError::Address {
            address: collector.to_string(),
            reason: source.to_string(),
        })?;
    candidates.next().ok_or_else(|| HandshakeError::Address {
        address: collector.to_string(),
        reason: String::from("no address behind the name"),
    })
}
