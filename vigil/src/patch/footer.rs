// SPDX-License-Identifier: GPL-3.0-or-later

//! The binary footer format of patched executables.
//!
//! A patched file is the monitor stub, the original program, and a fixed
//! ten byte trailer:
//!
//! ```text
//! [stub bytes][original bytes][stub length: u32 LE][IPv4: 4 bytes BE][port: u16 BE]
//! ```
//!
//! The stub runs first, reads the trailer of its own file to find where
//! the original program starts and which collector to report to, then
//! hands control over. Address and port are in network byte order.

use std::net::{Ipv4Addr, SocketAddrV4};
use thiserror::Error;

/// The fixed trailer size: length, address, port.
pub const TRAILER_LEN: usize = 10;

/// Errors raised while reading a patched file.
#[derive(Error, Debug)]
pub enum FooterError {
    #[error("File too short to carry a trailer: {size} bytes")]
    TooShort { size: usize },
    #[error("Stub length {stub_len} exceeds the {available} bytes before the trailer")]
    StubOutOfRange { stub_len: usize, available: usize },
}

/// The decoded parts of a patched file.
#[derive(Debug, PartialEq)]
pub struct Patched<'a> {
    pub stub: &'a [u8],
    pub original: &'a [u8],
    pub collector: SocketAddrV4,
}

/// Assembles a patched file from its parts.
pub fn encode(stub: &[u8], original: &[u8], collector: SocketAddrV4) -> Vec<u8> {
    let mut output = Vec::with_capacity(stub.len() + original.len() + TRAILER_LEN);
    output.extend_from_slice(stub);
    output.extend_from_slice(original);
    output.extend_from_slice(&(stub.len() as u32).to_le_bytes());
    output.extend_from_slice(&collector.ip().octets());
    output.extend_from_slice(&collector.port().to_be_bytes());
    output
}

/// Splits a patched file back into its parts.
pub fn decode(bytes: &[u8]) -> Result<Patched<'_>, FooterError> {
    if bytes.len() < TRAILER_LEN {
        return Err(FooterError::TooShort { size: bytes.len() });
    }
    let (body, trailer) = bytes.split_at(bytes.len() - TRAILER_LEN);

    // The trailer layout is fixed, so the slices are exact.
    let stub_len = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]) as usize;
    let ip = Ipv4Addr::new(trailer[4], trailer[5], trailer[6], trailer[7]);
    let port = u16::from_be_bytes([trailer[8], trailer[9]]);

    if stub_len > body.len() {
        return Err(FooterError::StubOutOfRange { stub_len, available: body.len() });
    }
    let (stub, original) = body.split_at(stub_len);

    Ok(Patched { stub, original, collector: SocketAddrV4::new(ip, port) })
}
