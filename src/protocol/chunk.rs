//! RTMP chunk stream codec
//!
//! ```text
//! +--------------+------------------+--------------------+------------+
//! | Basic header | Message header   | Extended timestamp | Chunk data |
//! | 1-3 bytes    | 0, 3, 7, 11 bytes| 0 or 4 bytes       |            |
//! +--------------+------------------+--------------------+------------+
//!
//! fmt 0: timestamp(3) length(3) type(1) stream id(4, little endian)
//! fmt 1: delta(3) length(3) type(1)
//! fmt 2: delta(3)
//! fmt 3: nothing, everything inherited from the chunk stream
//! ```
//!
//! The decoder never consumes a partial chunk: it peeks the headers, checks
//! that the whole chunk is buffered, and only then commits. A short read
//! therefore leaves both the buffer and the per-stream state untouched.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::HashMap;

use crate::error::{ProtocolError, Result};
use crate::protocol::constants::{
    DEFAULT_CHUNK_SIZE, EXTENDED_TIMESTAMP_THRESHOLD, MAX_CHUNK_SIZE, MAX_MESSAGE_SIZE,
};

/// A message as it comes off (or goes onto) the chunk stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub csid: u32,
    pub timestamp: u32,
    pub message_type: u8,
    pub stream_id: u32,
    pub payload: Bytes,
}

#[derive(Debug, Default)]
struct StreamState {
    timestamp: u32,
    delta: u32,
    length: u32,
    message_type: u8,
    stream_id: u32,
    extended: bool,
    partial: BytesMut,
}

enum Step {
    Incomplete,
    Chunk,
    Message(RawMessage),
}

/// Reassembles messages from interleaved chunks
#[derive(Debug)]
pub struct ChunkDecoder {
    chunk_size: u32,
    max_message_size: u32,
    streams: HashMap<u32, StreamState>,
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_message_size: MAX_MESSAGE_SIZE,
            streams: HashMap::new(),
        }
    }

    /// Apply a Set Chunk Size from the peer
    pub fn set_chunk_size(&mut self, size: u32) {
        self.chunk_size = size.clamp(1, MAX_CHUNK_SIZE);
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Drop a half-received message (Abort Message)
    pub fn abort(&mut self, csid: u32) {
        if let Some(state) = self.streams.get_mut(&csid) {
            state.partial.clear();
        }
    }

    /// Pull the next complete message out of `buf`
    ///
    /// Consumes as many whole chunks as are buffered; returns `Ok(None)` once
    /// the remaining bytes do not form a whole chunk.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<RawMessage>> {
        loop {
            match self.decode_chunk(buf)? {
                Step::Incomplete => return Ok(None),
                Step::Chunk => continue,
                Step::Message(message) => return Ok(Some(message)),
            }
        }
    }

    fn decode_chunk(&mut self, buf: &mut BytesMut) -> Result<Step> {
        let Some((fmt, csid, basic_len)) = parse_basic_header(buf) else {
            return Ok(Step::Incomplete);
        };

        let header_len = match fmt {
            0 => 11,
            1 => 7,
            2 => 3,
            _ => 0,
        };
        if buf.len() < basic_len + header_len {
            return Ok(Step::Incomplete);
        }

        let state = self.streams.entry(csid).or_default();
        let h = &buf[basic_len..basic_len + header_len];

        let (ts_field, length, message_type, stream_id) = match fmt {
            0 => (
                read_u24(&h[0..3]),
                read_u24(&h[3..6]),
                h[6],
                u32::from_le_bytes([h[7], h[8], h[9], h[10]]),
            ),
            1 => (read_u24(&h[0..3]), read_u24(&h[3..6]), h[6], state.stream_id),
            2 => (read_u24(&h[0..3]), state.length, state.message_type, state.stream_id),
            _ => (state.delta, state.length, state.message_type, state.stream_id),
        };

        let extended = if fmt == 3 {
            state.extended
        } else {
            ts_field >= EXTENDED_TIMESTAMP_THRESHOLD
        };

        let mut pos = basic_len + header_len;
        let ts_value = if extended {
            if buf.len() < pos + 4 {
                return Ok(Step::Incomplete);
            }
            let ext = u32::from_be_bytes([buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]]);
            pos += 4;
            ext
        } else {
            ts_field
        };

        let continuation = fmt == 3 && !state.partial.is_empty();
        if !continuation && length > self.max_message_size {
            return Err(ProtocolError::MessageTooLarge {
                size: length,
                max: self.max_message_size,
            }
            .into());
        }

        let received = if continuation { state.partial.len() } else { 0 };
        let take = (length as usize - received).min(self.chunk_size as usize);
        if buf.len() < pos + take {
            return Ok(Step::Incomplete);
        }

        // Whole chunk is buffered: commit
        buf.advance(pos);

        if !continuation {
            state.partial.clear();
            state.timestamp = if fmt == 0 {
                ts_value
            } else {
                state.timestamp.wrapping_add(ts_value)
            };
            state.delta = ts_value;
            state.length = length;
            state.message_type = message_type;
            state.stream_id = stream_id;
            state.extended = extended;
            state.partial.reserve(length as usize);
        }

        state.partial.put_slice(&buf[..take]);
        buf.advance(take);

        if state.partial.len() < state.length as usize {
            return Ok(Step::Chunk);
        }

        Ok(Step::Message(RawMessage {
            csid,
            timestamp: state.timestamp,
            message_type: state.message_type,
            stream_id: state.stream_id,
            payload: state.partial.split().freeze(),
        }))
    }
}

impl Default for ChunkDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Splits messages into chunks, compressing headers per chunk stream
#[derive(Debug)]
pub struct ChunkEncoder {
    chunk_size: u32,
    streams: HashMap<u32, StreamState>,
}

impl ChunkEncoder {
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            streams: HashMap::new(),
        }
    }

    /// Must match the Set Chunk Size we sent the peer
    pub fn set_chunk_size(&mut self, size: u32) {
        self.chunk_size = size.clamp(1, MAX_CHUNK_SIZE);
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    pub fn encode(&mut self, message: &RawMessage, buf: &mut BytesMut) {
        let length = message.payload.len() as u32;
        let previous = self.streams.get(&message.csid);
        let delta = previous
            .map(|s| message.timestamp.wrapping_sub(s.timestamp))
            .unwrap_or(message.timestamp);

        let fmt = match previous {
            None => 0,
            Some(_) if message.timestamp >= EXTENDED_TIMESTAMP_THRESHOLD => 0,
            Some(_) if delta >= EXTENDED_TIMESTAMP_THRESHOLD => 0,
            Some(s) if s.stream_id != message.stream_id => 0,
            Some(s) if s.message_type != message.message_type || s.length != length => 1,
            Some(s) if s.delta == delta => 3,
            Some(_) => 2,
        };
        let extended = fmt == 0 && message.timestamp >= EXTENDED_TIMESTAMP_THRESHOLD;

        let state = self.streams.entry(message.csid).or_default();
        state.timestamp = message.timestamp;
        state.delta = if fmt == 0 { message.timestamp } else { delta };
        state.length = length;
        state.message_type = message.message_type;
        state.stream_id = message.stream_id;
        state.extended = extended;

        let ts_field = if extended {
            EXTENDED_TIMESTAMP_THRESHOLD
        } else if fmt == 0 {
            message.timestamp
        } else {
            delta
        };

        let mut chunks = message.payload.chunks(self.chunk_size as usize);
        let first = chunks.next().unwrap_or(&[]);

        write_basic_header(buf, fmt, message.csid);
        match fmt {
            0 => {
                write_u24(buf, ts_field);
                write_u24(buf, length);
                buf.put_u8(message.message_type);
                buf.put_u32_le(message.stream_id);
            }
            1 => {
                write_u24(buf, ts_field);
                write_u24(buf, length);
                buf.put_u8(message.message_type);
            }
            2 => write_u24(buf, ts_field),
            _ => {}
        }
        if extended {
            buf.put_u32(message.timestamp);
        }
        buf.put_slice(first);

        for chunk in chunks {
            write_basic_header(buf, 3, message.csid);
            if extended {
                buf.put_u32(message.timestamp);
            }
            buf.put_slice(chunk);
        }
    }
}

impl Default for ChunkEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Returns (fmt, csid, header length) or `None` when more bytes are needed
fn parse_basic_header(buf: &[u8]) -> Option<(u8, u32, usize)> {
    let first = *buf.first()?;
    let fmt = first >> 6;

    match first & 0x3F {
        0 => {
            let b1 = *buf.get(1)?;
            Some((fmt, 64 + b1 as u32, 2))
        }
        1 => {
            let b1 = *buf.get(1)?;
            let b2 = *buf.get(2)?;
            Some((fmt, 64 + b1 as u32 + ((b2 as u32) << 8), 3))
        }
        csid => Some((fmt, csid as u32, 1)),
    }
}

fn write_basic_header(buf: &mut BytesMut, fmt: u8, csid: u32) {
    let fmt = fmt << 6;
    if csid >= 320 {
        let id = csid - 64;
        buf.put_u8(fmt | 1);
        buf.put_u8((id & 0xFF) as u8);
        buf.put_u8((id >> 8) as u8);
    } else if csid >= 64 {
        buf.put_u8(fmt);
        buf.put_u8((csid - 64) as u8);
    } else {
        buf.put_u8(fmt | csid as u8);
    }
}

fn read_u24(b: &[u8]) -> u32 {
    ((b[0] as u32) << 16) | ((b[1] as u32) << 8) | b[2] as u32
}

fn write_u24(buf: &mut BytesMut, value: u32) {
    buf.put_u8((value >> 16) as u8);
    buf.put_u8((value >> 8) as u8);
    buf.put_u8(value as u8);
}
