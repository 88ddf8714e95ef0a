//! # livegate
//!
//! A self-hosted live streaming gateway: one authenticated RTMP publisher,
//! any number of RTMP viewers, and a websocket chat room next to the stream.
//!
//! ## Layout
//!
//! - [`ingest`]: RTMP listener and per-connection protocol handling
//! - [`relay`]: the single-publisher registry and viewer fan-out
//! - [`chat`]: the chat room, commands and emotes
//! - [`http`]: axum router for the chat websocket, pages and static files
//! - [`stats`]: process-wide counters printed on shutdown
//! - [`app`]: startup and signal-driven graceful shutdown
//!
//! The wire-level pieces ([`protocol`], [`amf`]) are the RTMP chunk stream,
//! handshake and AMF0 codec.
//!
//! ## Publishing
//!
//! ```text
//! ffmpeg -re -i input.mp4 -c copy -f flv rtmp://localhost/live/<stream key>
//! ffplay rtmp://localhost/live/anything
//! ```

pub mod amf;
pub mod app;
pub mod chat;
pub mod cli;
pub mod error;
pub mod http;
pub mod ingest;
pub mod logging;
pub mod protocol;
pub mod relay;
pub mod settings;
pub mod shutdown;
pub mod stats;

pub use app::{App, StartupError};
pub use chat::ChatRoom;
pub use error::{Error, Result};
pub use ingest::{IngestConfig, IngestServer};
pub use relay::{RelayConfig, StreamRegistry};
pub use settings::Settings;
pub use stats::StreamStats;
