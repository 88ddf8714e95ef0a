//! Publish and viewer sessions handed out by the registry

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use super::packet::MediaPacket;

/// What a viewer queue carries
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    Packet(MediaPacket),
    /// The publisher went away; close cleanly
    EndOfStream,
}

#[derive(Debug, Default)]
pub(super) struct PublishCounters {
    pub(super) bytes: AtomicU64,
    pub(super) packets: AtomicU64,
}

/// Handle held by the publishing connection
///
/// Only the session that won `start_publish` can feed the relay; once it has
/// been ended, packets relayed through it are ignored.
#[derive(Debug)]
pub struct PublishSession {
    pub id: u64,
    /// Key as supplied by the publisher, query string included
    pub key: String,
    pub peer: SocketAddr,
    pub started_at: Instant,
    pub(super) counters: Arc<PublishCounters>,
}

impl PublishSession {
    pub fn bytes_received(&self) -> u64 {
        self.counters.bytes.load(Ordering::Relaxed)
    }

    pub fn packets_received(&self) -> u64 {
        self.counters.packets.load(Ordering::Relaxed)
    }
}

/// Snapshot of the active publisher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublisherInfo {
    pub session_id: u64,
    pub peer: SocketAddr,
    pub uptime: Duration,
    pub bytes_received: u64,
    pub packets_received: u64,
}

/// Handle held by a playing connection
///
/// The registry keeps the sending half of the queue; dropping it there is
/// how a viewer gets cut off.
#[derive(Debug)]
pub struct ViewerSession {
    pub id: u64,
    pub peer: SocketAddr,
    pub joined_at: Instant,
    catch_up: Vec<MediaPacket>,
    events: mpsc::Receiver<RelayEvent>,
    bytes_sent: u64,
}

impl ViewerSession {
    pub(super) fn new(
        id: u64,
        peer: SocketAddr,
        catch_up: Vec<MediaPacket>,
        events: mpsc::Receiver<RelayEvent>,
    ) -> Self {
        Self {
            id,
            peer,
            joined_at: Instant::now(),
            catch_up,
            events,
            bytes_sent: 0,
        }
    }

    /// Metadata and sequence headers to send before live packets
    pub fn take_catch_up(&mut self) -> Vec<MediaPacket> {
        std::mem::take(&mut self.catch_up)
    }

    /// Next event in publish order, `None` once the registry dropped us
    pub async fn recv(&mut self) -> Option<RelayEvent> {
        self.events.recv().await
    }

    pub fn record_sent(&mut self, n: usize) {
        self.bytes_sent += n as u64;
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }
}
