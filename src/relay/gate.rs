//! The interface the ingest server uses to reach the relay

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;

use super::error::RelayError;
use super::packet::MediaPacket;
use super::session::{PublishSession, ViewerSession};

/// What an RTMP connection is asking for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamRequest {
    /// `publish <key>`
    Publish { key: String },
    /// `play <name>`
    Play { name: String },
}

/// A granted request
#[derive(Debug)]
pub enum Admission {
    Publisher(PublishSession),
    Viewer(ViewerSession),
}

/// Admission control and packet hand-off for ingest connections
///
/// Implemented by [`StreamRegistry`](super::StreamRegistry); connections are
/// generic over it so tests can drive them with a stand-in.
#[async_trait]
pub trait SessionGate: Send + Sync + 'static {
    /// Decide a publish or play request
    async fn admit(&self, request: StreamRequest, peer: SocketAddr)
        -> Result<Admission, RelayError>;

    /// Hand a packet from the publisher to the viewers
    async fn relay(&self, session: &PublishSession, packet: MediaPacket);

    /// The publisher is gone
    async fn end_publish(&self, session: &PublishSession);

    /// The viewer is gone
    async fn leave_viewer(&self, session: &ViewerSession);

    /// Deadline for each write to a viewer socket
    fn write_timeout(&self) -> Duration;
}
