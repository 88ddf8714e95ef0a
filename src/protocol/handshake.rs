//! RTMP simple handshake
//!
//! ```text
//! Client                                   Server
//!   |------- C0 (version) + C1 (1536) ----->|
//!   |<------ S0 + S1 (1536) + S2 (echo C1) -|
//!   |------- C2 (echo S1) ----------------->|
//! ```
//!
//! Only the digest-less handshake is implemented. Encoders that attempt the
//! complex handshake fall back to the simple one when the server's S1 carries
//! no digest, which is what every mainstream encoder does.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use rand::RngCore;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{HandshakeError, Result};
use crate::protocol::constants::{HANDSHAKE_SIZE, RTMP_VERSION};

/// Which side of the handshake we are
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeRole {
    /// Accepting side (the ingest server)
    Server,
    /// Connecting side (used to drive the server in tests and tools)
    Client,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Client: must send C0C1. Server: waiting for C0C1.
    Start,
    /// Client: waiting for S0S1S2
    AwaitS0S1S2,
    /// Server: waiting for C2
    AwaitC2,
    Done,
}

/// Handshake state machine, fed with whatever bytes have arrived
#[derive(Debug)]
pub struct Handshake {
    role: HandshakeRole,
    phase: Phase,
}

impl Handshake {
    pub fn new(role: HandshakeRole) -> Self {
        Self {
            role,
            phase: Phase::Start,
        }
    }

    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }

    /// Bytes that must be buffered before `process` can make progress
    pub fn bytes_needed(&self) -> usize {
        match (self.role, self.phase) {
            (HandshakeRole::Server, Phase::Start) => 1 + HANDSHAKE_SIZE,
            (HandshakeRole::Server, Phase::AwaitC2) => HANDSHAKE_SIZE,
            (HandshakeRole::Client, Phase::AwaitS0S1S2) => 1 + 2 * HANDSHAKE_SIZE,
            _ => 0,
        }
    }

    /// Client only: produce C0C1 and start waiting for the server
    pub fn client_hello(&mut self) -> Result<Bytes> {
        if self.role != HandshakeRole::Client || self.phase != Phase::Start {
            return Err(HandshakeError::InvalidState.into());
        }

        let mut buf = BytesMut::with_capacity(1 + HANDSHAKE_SIZE);
        buf.put_u8(RTMP_VERSION);
        buf.put_slice(&random_packet());

        self.phase = Phase::AwaitS0S1S2;
        Ok(buf.freeze())
    }

    /// Consume peer bytes and return what must be written back, if anything
    ///
    /// Returns `Ok(None)` without consuming when `data` is still short.
    pub fn process(&mut self, data: &mut Bytes) -> Result<Option<Bytes>> {
        if data.remaining() < self.bytes_needed() {
            return Ok(None);
        }

        match (self.role, self.phase) {
            (HandshakeRole::Server, Phase::Start) => {
                check_version(data.get_u8())?;
                let c1 = data.split_to(HANDSHAKE_SIZE);

                let mut reply = BytesMut::with_capacity(1 + 2 * HANDSHAKE_SIZE);
                reply.put_u8(RTMP_VERSION);
                reply.put_slice(&random_packet());
                put_echo(&mut reply, &c1);

                self.phase = Phase::AwaitC2;
                Ok(Some(reply.freeze()))
            }
            (HandshakeRole::Server, Phase::AwaitC2) => {
                // C2 content is not verified; several encoders echo garbage
                data.advance(HANDSHAKE_SIZE);
                self.phase = Phase::Done;
                Ok(None)
            }
            (HandshakeRole::Client, Phase::AwaitS0S1S2) => {
                check_version(data.get_u8())?;
                let s1 = data.split_to(HANDSHAKE_SIZE);
                data.advance(HANDSHAKE_SIZE);

                let mut c2 = BytesMut::with_capacity(HANDSHAKE_SIZE);
                put_echo(&mut c2, &s1);

                self.phase = Phase::Done;
                Ok(Some(c2.freeze()))
            }
            _ => Err(HandshakeError::InvalidState.into()),
        }
    }
}

/// Versions below 3 are plain-text RTMP relics; anything above is tolerated
fn check_version(version: u8) -> Result<()> {
    if version < RTMP_VERSION {
        return Err(HandshakeError::InvalidVersion(version).into());
    }
    Ok(())
}

fn now_millis() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u32)
        .unwrap_or(0)
}

/// C1/S1: timestamp, four zero bytes, random fill
fn random_packet() -> [u8; HANDSHAKE_SIZE] {
    let mut packet = [0u8; HANDSHAKE_SIZE];
    packet[0..4].copy_from_slice(&now_millis().to_be_bytes());
    rand::thread_rng().fill_bytes(&mut packet[8..]);
    packet
}

/// C2/S2: the peer's packet with bytes 4..8 replaced by our read time
fn put_echo(buf: &mut BytesMut, peer: &[u8]) {
    buf.put_slice(&peer[0..4]);
    buf.put_u32(now_millis());
    buf.put_slice(&peer[8..HANDSHAKE_SIZE]);
}
