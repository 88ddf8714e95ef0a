//! Single-publisher stream registry and packet fan-out
//!
//! The registry owns the one publish slot, the viewer set and the cached
//! decoder-configuration packets. Membership changes take the write lock;
//! fan-out of ordinary packets only needs the read lock because each viewer
//! has its own bounded queue and `try_send` never waits.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;

use super::config::RelayConfig;
use super::error::RelayError;
use super::gate::{Admission, SessionGate, StreamRequest};
use super::packet::{MediaPacket, PacketKind};
use super::session::{
    PublishCounters, PublishSession, PublisherInfo, RelayEvent, ViewerSession,
};
use crate::stats::StreamStats;

struct ActivePublisher {
    id: u64,
    peer: SocketAddr,
    started_at: Instant,
    counters: Arc<PublishCounters>,
}

struct ViewerSlot {
    peer: SocketAddr,
    tx: mpsc::Sender<RelayEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Removal {
    /// Queue full: the viewer cannot keep up
    Slow,
    /// Queue closed: the connection task is already gone
    Closed,
}

#[derive(Default)]
struct RelayState {
    publisher: Option<ActivePublisher>,
    viewers: HashMap<u64, ViewerSlot>,
    metadata: Option<MediaPacket>,
    video_header: Option<MediaPacket>,
    audio_header: Option<MediaPacket>,
}

impl RelayState {
    fn is_active(&self, session_id: u64) -> bool {
        self.publisher.as_ref().map(|p| p.id) == Some(session_id)
    }

    fn cache(&mut self, packet: &MediaPacket) {
        match packet.kind {
            PacketKind::Metadata => self.metadata = Some(packet.clone()),
            PacketKind::Video if packet.sequence_header => {
                self.video_header = Some(packet.clone())
            }
            PacketKind::Audio if packet.sequence_header => {
                self.audio_header = Some(packet.clone())
            }
            _ => {}
        }
    }

    fn clear_cache(&mut self) {
        self.metadata = None;
        self.video_header = None;
        self.audio_header = None;
    }

    fn catch_up(&self) -> Vec<MediaPacket> {
        [&self.metadata, &self.video_header, &self.audio_header]
            .into_iter()
            .flatten()
            .cloned()
            .collect()
    }

    /// Offer a packet to every viewer, returning those that must go
    fn fan_out(&self, packet: &MediaPacket) -> Vec<(u64, Removal)> {
        self.viewers
            .iter()
            .filter_map(|(id, slot)| {
                match slot.tx.try_send(RelayEvent::Packet(packet.clone())) {
                    Ok(()) => None,
                    Err(TrySendError::Full(_)) => Some((*id, Removal::Slow)),
                    Err(TrySendError::Closed(_)) => Some((*id, Removal::Closed)),
                }
            })
            .collect()
    }
}

/// Tracks the single publish session and all viewer sessions
pub struct StreamRegistry {
    state: RwLock<RelayState>,
    stream_key: String,
    config: RelayConfig,
    stats: Arc<StreamStats>,
    next_id: AtomicU64,
}

impl StreamRegistry {
    pub fn new(stream_key: impl Into<String>, config: RelayConfig, stats: Arc<StreamStats>) -> Self {
        Self {
            state: RwLock::new(RelayState::default()),
            stream_key: stream_key.into(),
            config,
            stats,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Compare a publish key, ignoring any `?query` suffix encoders append
    fn key_matches(&self, provided: &str) -> bool {
        let key = provided.split_once('?').map_or(provided, |(key, _)| key);
        !self.stream_key.is_empty() && key == self.stream_key
    }

    /// Claim the publish slot
    pub async fn start_publish(
        &self,
        provided_key: &str,
        peer: SocketAddr,
    ) -> Result<PublishSession, RelayError> {
        if !self.key_matches(provided_key) {
            self.stats.record_publish_rejected();
            tracing::warn!(peer = %peer, "Publish rejected: invalid stream key");
            return Err(RelayError::Auth);
        }

        let mut state = self.state.write().await;

        if let Some(active) = &state.publisher {
            self.stats.record_publish_rejected();
            tracing::warn!(
                peer = %peer,
                active_session = active.id,
                active_peer = %active.peer,
                "Publish rejected: stream already live"
            );
            return Err(RelayError::AlreadyPublishing);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let counters = Arc::new(PublishCounters::default());
        let started_at = Instant::now();

        state.publisher = Some(ActivePublisher {
            id,
            peer,
            started_at,
            counters: Arc::clone(&counters),
        });
        state.clear_cache();
        drop(state);

        self.stats.record_publish_start();
        tracing::info!(session_id = id, peer = %peer, "Publish started");

        Ok(PublishSession {
            id,
            key: provided_key.to_owned(),
            peer,
            started_at,
            counters,
        })
    }

    /// Release the publish slot and end every viewer
    ///
    /// A stale or already-ended session is ignored.
    pub async fn end_publish(&self, session: &PublishSession) {
        let mut state = self.state.write().await;

        if !state.is_active(session.id) {
            return;
        }
        let Some(active) = state.publisher.take() else {
            return;
        };
        let viewers = std::mem::take(&mut state.viewers);
        state.clear_cache();
        drop(state);

        let viewer_count = viewers.len();
        for (_, slot) in viewers {
            // A full queue is dropped anyway, which the viewer also sees as the end
            let _ = slot.tx.try_send(RelayEvent::EndOfStream);
            self.stats.record_viewer_leave();
        }

        let duration = active.started_at.elapsed();
        self.stats.record_publish_end(duration);

        tracing::info!(
            session_id = active.id,
            peer = %active.peer,
            duration_secs = duration.as_secs(),
            bytes = active.counters.bytes.load(Ordering::Relaxed),
            packets = active.counters.packets.load(Ordering::Relaxed),
            viewers = viewer_count,
            "Publish ended"
        );
    }

    /// Register a viewer on the live stream
    pub async fn join_viewer(&self, peer: SocketAddr) -> Result<ViewerSession, RelayError> {
        let mut state = self.state.write().await;

        if state.publisher.is_none() {
            drop(state);
            self.stats.record_viewer_rejected();
            tracing::debug!(peer = %peer, "Play rejected: nothing live");
            return Err(RelayError::NoActiveStream);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.config.viewer_queue_capacity);
        let catch_up = state.catch_up();
        state.viewers.insert(id, ViewerSlot { peer, tx });
        let viewers = state.viewers.len();
        drop(state);

        self.stats.record_viewer_join();
        tracing::info!(
            session_id = id,
            peer = %peer,
            viewers = viewers,
            catch_up = catch_up.len(),
            "Viewer joined"
        );

        Ok(ViewerSession::new(id, peer, catch_up, rx))
    }

    /// Remove a viewer; unknown ids are ignored
    pub async fn leave_viewer(&self, id: u64) {
        let removed = self.state.write().await.viewers.remove(&id);

        if let Some(slot) = removed {
            self.stats.record_viewer_leave();
            tracing::debug!(session_id = id, peer = %slot.peer, "Viewer left");
        }
    }

    /// Forward one packet from the publisher to every viewer
    ///
    /// Never waits on a viewer: a full queue gets that viewer dropped.
    pub async fn relay(&self, session: &PublishSession, packet: MediaPacket) {
        let len = packet.len() as u64;
        let cacheable = packet.sequence_header || packet.kind == PacketKind::Metadata;

        // Cacheable packets are fanned out under the same write lock so a
        // viewer joining concurrently sees them exactly once
        let removals = if cacheable {
            let mut state = self.state.write().await;
            if !state.is_active(session.id) {
                return;
            }
            state.cache(&packet);
            state.fan_out(&packet)
        } else {
            let state = self.state.read().await;
            if !state.is_active(session.id) {
                return;
            }
            state.fan_out(&packet)
        };

        session.counters.bytes.fetch_add(len, Ordering::Relaxed);
        session.counters.packets.fetch_add(1, Ordering::Relaxed);
        self.stats.record_bytes_in(len);

        if !removals.is_empty() {
            self.remove_viewers(removals).await;
        }
    }

    async fn remove_viewers(&self, removals: Vec<(u64, Removal)>) {
        let mut state = self.state.write().await;

        for (id, reason) in removals {
            // Dropping the slot drops the sender, which ends the viewer's recv loop
            let Some(slot) = state.viewers.remove(&id) else {
                continue;
            };
            self.stats.record_viewer_leave();

            match reason {
                Removal::Slow => {
                    self.stats.record_viewer_dropped();
                    tracing::warn!(
                        session_id = id,
                        peer = %slot.peer,
                        capacity = self.config.viewer_queue_capacity,
                        "Dropping slow viewer"
                    );
                }
                Removal::Closed => {
                    tracing::debug!(session_id = id, peer = %slot.peer, "Viewer queue closed");
                }
            }
        }
    }

    pub async fn is_live(&self) -> bool {
        self.state.read().await.publisher.is_some()
    }

    pub async fn viewer_count(&self) -> usize {
        self.state.read().await.viewers.len()
    }

    pub async fn active_publisher(&self) -> Option<PublisherInfo> {
        let state = self.state.read().await;
        state.publisher.as_ref().map(|p| PublisherInfo {
            session_id: p.id,
            peer: p.peer,
            uptime: p.started_at.elapsed(),
            bytes_received: p.counters.bytes.load(Ordering::Relaxed),
            packets_received: p.counters.packets.load(Ordering::Relaxed),
        })
    }
}

#[async_trait]
impl SessionGate for StreamRegistry {
    async fn admit(
        &self,
        request: StreamRequest,
        peer: SocketAddr,
    ) -> Result<Admission, RelayError> {
        match request {
            StreamRequest::Publish { key } => self
                .start_publish(&key, peer)
                .await
                .map(Admission::Publisher),
            StreamRequest::Play { name } => {
                // There is only one stream; the name is informational
                tracing::debug!(peer = %peer, name = %name, "Play requested");
                self.join_viewer(peer).await.map(Admission::Viewer)
            }
        }
    }

    async fn relay(&self, session: &PublishSession, packet: MediaPacket) {
        StreamRegistry::relay(self, session, packet).await
    }

    async fn end_publish(&self, session: &PublishSession) {
        StreamRegistry::end_publish(self, session).await
    }

    async fn leave_viewer(&self, session: &ViewerSession) {
        StreamRegistry::leave_viewer(self, session.id).await
    }

    fn write_timeout(&self) -> Duration {
        self.config.write_timeout
    }
}
