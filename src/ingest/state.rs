//! Per-connection session state
//!
//! Tracks where an RTMP connection is in its life, which message streams it
//! has created and how many bytes it owes an acknowledgement for.

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::protocol::constants::DEFAULT_WINDOW_ACK_SIZE;
use crate::protocol::ConnectParams;

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// TCP connected, handshake not started
    Connected,
    Handshaking,
    /// Handshake complete, waiting for `connect`
    WaitingConnect,
    /// `connect` accepted, no publish or play yet
    Active,
    Publishing,
    Playing,
    Closed,
}

#[derive(Debug)]
pub struct SessionState {
    pub id: u64,
    pub peer_addr: SocketAddr,
    pub phase: SessionPhase,
    pub connected_at: Instant,
    pub connect_params: Option<ConnectParams>,

    /// Message streams handed out by `createStream`
    streams: BTreeSet<u32>,
    next_stream_id: u32,

    /// Window the peer asked us to acknowledge at
    pub window_ack_size: u32,
    bytes_received: u64,
    last_ack: u64,
}

impl SessionState {
    pub fn new(id: u64, peer_addr: SocketAddr) -> Self {
        Self {
            id,
            peer_addr,
            phase: SessionPhase::Connected,
            connected_at: Instant::now(),
            connect_params: None,
            streams: BTreeSet::new(),
            next_stream_id: 1, // 0 is the NetConnection
            window_ack_size: DEFAULT_WINDOW_ACK_SIZE,
            bytes_received: 0,
            last_ack: 0,
        }
    }

    pub fn start_handshake(&mut self) {
        if self.phase == SessionPhase::Connected {
            self.phase = SessionPhase::Handshaking;
        }
    }

    pub fn complete_handshake(&mut self) {
        if self.phase == SessionPhase::Handshaking {
            self.phase = SessionPhase::WaitingConnect;
        }
    }

    pub fn on_connect(&mut self, params: ConnectParams) {
        self.connect_params = Some(params);
        if self.phase == SessionPhase::WaitingConnect {
            self.phase = SessionPhase::Active;
        }
    }

    /// Whether `publish`/`play` may be granted right now
    pub fn can_start_stream(&self) -> bool {
        self.phase == SessionPhase::Active
    }

    pub fn start_publishing(&mut self) {
        self.phase = SessionPhase::Publishing;
    }

    pub fn start_playing(&mut self) {
        self.phase = SessionPhase::Playing;
    }

    /// Back to `Active` after `deleteStream`, so the stream can be reopened
    pub fn finish_stream(&mut self) {
        if matches!(self.phase, SessionPhase::Publishing | SessionPhase::Playing) {
            self.phase = SessionPhase::Active;
        }
    }

    pub fn close(&mut self) {
        self.phase = SessionPhase::Closed;
    }

    pub fn allocate_stream_id(&mut self) -> u32 {
        let id = self.next_stream_id;
        self.next_stream_id += 1;
        self.streams.insert(id);
        id
    }

    pub fn has_stream(&self, stream_id: u32) -> bool {
        self.streams.contains(&stream_id)
    }

    pub fn remove_stream(&mut self, stream_id: u32) -> bool {
        self.streams.remove(&stream_id)
    }

    /// Count received bytes; true when an acknowledgement is due
    pub fn add_bytes_received(&mut self, n: u64) -> bool {
        self.bytes_received += n;
        self.window_ack_size > 0
            && self.bytes_received - self.last_ack >= u64::from(self.window_ack_size)
    }

    /// Sequence number for the acknowledgement, marking it sent
    pub fn take_ack_sequence(&mut self) -> u32 {
        self.last_ack = self.bytes_received;
        // Sequence numbers wrap at 32 bits
        self.bytes_received as u32
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    pub fn app(&self) -> Option<&str> {
        self.connect_params.as_ref().map(|p| p.app.as_str())
    }

    pub fn duration(&self) -> Duration {
        self.connected_at.elapsed()
    }
}
