// SPDX-License-Identifier: GPL-3.0-or-later

//! The agent wire protocol codec.
//!
//! Agents exchange newline-terminated JSON objects with the collector.
//! Every logical message is an envelope with a `type` field naming the
//! agent subsystem and a `data` object whose shape depends on the type.
//! The collector treats `data` as opaque pass-through for the routines.
//!
//! Immediately after connecting, an agent sends `{"type":"ping"}` and the
//! collector replies with `{"type":"pong"}` on the same connection. Agents
//! that do not see the reply within their own timeout treat the collector
//! as unreachable.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The message type of the handshake request.
pub const TYPE_PING: &str = "ping";
/// The message type of the handshake reply.
pub const TYPE_PONG: &str = "pong";

/// One decoded agent message.
///
/// The envelope is immutable once parsed; the caller owns it for the
/// duration of one dispatch.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default = "empty_object")]
    pub data: serde_json::Value,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl Envelope {
    /// Creates an envelope with an empty data object.
    pub fn new(kind: &str) -> Self {
        Self { kind: kind.to_string(), data: empty_object() }
    }

    /// Decodes one line of the wire protocol.
    ///
    /// The line must be a single JSON object with a string `type` field.
    /// A missing `data` field is read as an empty object. The trailing
    /// newline may or may not be present in the input.
    pub fn decode(line: &[u8]) -> Result<Self, ProtocolError> {
        let value: serde_json::Value = serde_json::from_slice(line)?;
        let object = value.as_object().ok_or(ProtocolError::NotAnObject)?;
        let kind = object
            .get("type")
            .and_then(serde_json::Value::as_str)
            .ok_or(ProtocolError::MissingType)?
            .to_string();
        let data = object.get("data").cloned().unwrap_or_else(empty_object);

        Ok(Self { kind, data })
    }

    /// Serializes the envelope as one newline-terminated wire message.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut bytes = serde_json::to_vec(self)?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    /// Returns true for the handshake request.
    pub fn is_ping(&self) -> bool {
        self.kind == TYPE_PING
    }
}

/// The handshake reply, ready to be written to the peer.
pub fn pong_line() -> Vec<u8> {
    // The reply has no data payload, and the shape is fixed.
    b"{\"type\":\"pong\"}\n".to_vec()
}

/// Errors that can occur while decoding an agent message.
///
/// A single bad line is reported and dropped; the connection is not
/// closed for it.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("Envelope is not a JSON object")]
    NotAnObject,
    #[error("Envelope has no 'type' field")]
    MissingType,
}
