//! Websocket wire format
//!
//! ```json
//! {"type": "join", "name": "alice"}                          client -> room
//! {"type": "message", "text": "hello"}                       client -> room
//! {"type": "message", "from": "alice", "text": "hello", "at": 1700000000000}
//! ```

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use super::client::Role;

/// Frames a browser sends
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Join { name: String },
    Message { text: String },
}

/// Everything the room sends to a client
///
/// `text` fields are already HTML-escaped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    /// Sent only to a client that just joined
    Welcome {
        name: String,
        role: Role,
        users: Vec<String>,
        now_playing: Option<String>,
    },
    Message { from: String, text: String, at: u64 },
    /// `/me`
    Action { from: String, text: String, at: u64 },
    /// `/sv`
    Announcement { from: String, text: String, at: u64 },
    Joined { name: String, at: u64 },
    Left { name: String, at: u64 },
    Renamed { old: String, new: String, at: u64 },
    Kicked { name: String, by: String, at: u64 },
    RoleChanged { name: String, role: Role, at: u64 },
    NowPlaying { title: Option<String>, at: u64 },
    /// Private answer to a command
    Reply { text: String },
    /// Private error
    Error { text: String },
    Shutdown { text: String },
}

impl ChatEvent {
    pub fn to_json(&self) -> String {
        // Plain strings, enums and options only; serialization cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Milliseconds since the Unix epoch
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_frames() {
        let join: ClientFrame = serde_json::from_str(r#"{"type":"join","name":"alice"}"#).unwrap();
        assert_eq!(join, ClientFrame::Join { name: "alice".into() });

        let msg: ClientFrame =
            serde_json::from_str(r#"{"type":"message","text":"hi there"}"#).unwrap();
        assert_eq!(msg, ClientFrame::Message { text: "hi there".into() });

        assert!(serde_json::from_str::<ClientFrame>(r#"{"type":"nope"}"#).is_err());
    }

    #[test]
    fn test_event_json_shape() {
        let json: serde_json::Value = serde_json::from_str(
            &ChatEvent::Message {
                from: "alice".into(),
                text: "hi".into(),
                at: 5,
            }
            .to_json(),
        )
        .unwrap();
        assert_eq!(json["type"], "message");
        assert_eq!(json["from"], "alice");
        assert_eq!(json["at"], 5);

        let json: serde_json::Value = serde_json::from_str(
            &ChatEvent::RoleChanged {
                name: "bob".into(),
                role: Role::Moderator,
                at: 1,
            }
            .to_json(),
        )
        .unwrap();
        assert_eq!(json["type"], "role_changed");
        assert_eq!(json["role"], "moderator");
    }
}
