//! Connection-level error types
//!
//! Everything that can go wrong on a single RTMP connection. These errors are
//! always handled locally: the connection is closed and unregistered, and
//! sibling connections are never affected.

use std::io;

use thiserror::Error;

/// Result type alias using the crate's transport error
pub type Result<T> = std::result::Result<T, Error>;

/// Transport error for a single connection
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error during network operations
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// RTMP protocol violation
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// AMF encoding/decoding error
    #[error("AMF error: {0}")]
    Amf(#[from] AmfError),

    /// Handshake failure
    #[error("Handshake error: {0}")]
    Handshake(#[from] HandshakeError),

    /// Request rejected (bad stream key, stream busy, nothing live)
    #[error("Connection rejected: {0}")]
    Rejected(String),

    /// Read or write missed its deadline
    #[error("Operation timed out")]
    Timeout,

    /// Peer closed the connection
    #[error("Connection closed")]
    ConnectionClosed,
}

/// Protocol-level errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Invalid chunk header")]
    InvalidChunkHeader,

    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: u32, max: u32 },

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Truncated {0} message")]
    Truncated(&'static str),
}

/// AMF encoding/decoding errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AmfError {
    #[error("Unknown AMF marker: 0x{0:02x}")]
    UnknownMarker(u8),

    #[error("Unexpected end of AMF data")]
    UnexpectedEof,

    #[error("Invalid UTF-8 in AMF string")]
    InvalidUtf8,

    #[error("AMF nesting too deep")]
    NestingTooDeep,
}

/// Handshake errors
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("Unsupported RTMP version: {0}")]
    InvalidVersion(u8),

    #[error("Handshake sent in wrong state")]
    InvalidState,
}
