//! Chat participants and their lifecycle

use std::net::SocketAddr;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::mpsc;

use super::message::ChatEvent;

/// Privilege level, ordered from least to most
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Moderator,
    Admin,
}

/// Websocket-side lifecycle of a chat connection
///
/// `Connecting -> Joined -> Leaving -> Closed`, with `Connecting` and
/// `Joined` allowed to skip straight to `Leaving` or `Closed`. `Closed` is
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Connecting,
    Joined,
    Leaving,
    Closed,
}

impl ClientState {
    fn can_advance(self, next: ClientState) -> bool {
        use ClientState::*;
        matches!(
            (self, next),
            (Connecting, Joined)
                | (Connecting, Leaving)
                | (Connecting, Closed)
                | (Joined, Leaving)
                | (Joined, Closed)
                | (Leaving, Closed)
        )
    }

    /// Move to `next`; false (and no change) for an illegal transition
    pub fn advance(&mut self, next: ClientState) -> bool {
        if !self.can_advance(next) {
            return false;
        }
        *self = next;
        true
    }

    pub fn is_closed(self) -> bool {
        self == ClientState::Closed
    }
}

/// Room-side record of a joined client
#[derive(Debug)]
pub(super) struct ChatClient {
    pub(super) name: String,
    pub(super) role: Role,
    pub(super) peer: SocketAddr,
    pub(super) joined_at: Instant,
    pub(super) tx: mpsc::Sender<ChatEvent>,
}

/// Handle returned to the connection that joined
#[derive(Debug)]
pub struct ChatSession {
    pub id: u64,
    pub name: String,
    pub role: Role,
    events: mpsc::Receiver<ChatEvent>,
}

impl ChatSession {
    pub(super) fn new(id: u64, name: String, role: Role, events: mpsc::Receiver<ChatEvent>) -> Self {
        Self {
            id,
            name,
            role,
            events,
        }
    }

    /// Next event for this client; `None` once the room let go of it
    pub async fn recv(&mut self) -> Option<ChatEvent> {
        self.events.recv().await
    }

    /// Non-blocking variant, mostly for tests
    pub fn try_recv(&mut self) -> Option<ChatEvent> {
        self.events.try_recv().ok()
    }
}
