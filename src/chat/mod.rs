//! Real-time chat room
//!
//! ```text
//!   websocket task ──join/dispatch/leave──► ChatRoom ──try_send──► client queues
//!        ▲                                     │                      │
//!        └──────────── ChatEvent (JSON) ◄──────┴──────────────────────┘
//! ```
//!
//! The room owns every client's sending half. Leaving, being kicked, falling
//! behind and room shutdown all end the same way: the sender is dropped and
//! the websocket task sees its event stream close.

pub mod client;
pub mod command;
pub mod config;
pub mod emotes;
pub mod error;
pub mod message;
pub mod room;

pub use client::{ChatSession, ClientState, Role};
pub use command::ChatCommand;
pub use config::ChatConfig;
pub use emotes::Emotes;
pub use error::ChatError;
pub use message::{ChatEvent, ClientFrame};
pub use room::ChatRoom;
