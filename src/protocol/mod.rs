//! RTMP wire protocol
//!
//! - Handshake (C0C1C2/S0S1S2 exchange)
//! - Chunk stream multiplexing and reassembly
//! - Message framing and command parsing

pub mod chunk;
pub mod constants;
pub mod handshake;
pub mod message;

pub use chunk::{ChunkDecoder, ChunkEncoder, RawMessage};
pub use handshake::{Handshake, HandshakeRole};
pub use message::{Command, ConnectParams, DataMessage, RtmpMessage, UserControlEvent};
