//! Stream relay: one authenticated publisher, many viewers
//!
//! # Architecture
//!
//! ```text
//!                        Arc<StreamRegistry>
//!                  ┌──────────────────────────────┐
//!                  │ publisher: Option<Active>    │
//!                  │ viewers: id -> mpsc::Sender  │
//!                  │ metadata / sequence headers  │
//!                  └──────────────┬───────────────┘
//!                                 │ try_send (never waits)
//!         ┌───────────────────────┼───────────────────────┐
//!         │                       │                       │
//!    [Publisher]              [Viewer]                [Viewer]
//!    relay(packet)        bounded queue ──► TCP   bounded queue ──► TCP
//! ```
//!
//! A viewer whose queue is full when a packet arrives is removed on the spot;
//! its connection task sees the queue close and disconnects. Each viewer's
//! socket writes run under a deadline, so a stalled peer costs only itself.
//!
//! Payloads are `bytes::Bytes`, so fan-out clones a reference count, not the
//! media.

pub mod config;
pub mod error;
pub mod gate;
pub mod packet;
pub mod registry;
pub mod session;

pub use config::RelayConfig;
pub use error::RelayError;
pub use gate::{Admission, SessionGate, StreamRequest};
pub use packet::{MediaPacket, PacketKind};
pub use registry::StreamRegistry;
pub use session::{PublishSession, PublisherInfo, RelayEvent, ViewerSession};
