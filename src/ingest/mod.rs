//! RTMP ingest server
//!
//! Accepts publishers and players on the RTMP port and bridges them to the
//! relay through [`SessionGate`](crate::relay::SessionGate).

pub mod config;
pub mod connection;
pub mod listener;
pub mod state;

pub use config::IngestConfig;
pub use connection::Connection;
pub use listener::IngestServer;
pub use state::{SessionPhase, SessionState};
