//! RTMP message parsing and encoding
//!
//! ```text
//! 1-6   protocol control (chunk size, abort, ack, user control, window, bandwidth)
//! 8, 9  audio / video
//! 15,18 data (AMF3 wrapper / AMF0): @setDataFrame, onMetaData
//! 17,20 command (AMF3 wrapper / AMF0): connect, publish, play, ...
//! ```
//!
//! The AMF3 variants only differ by a leading format byte; their bodies are
//! AMF0 in practice, so both flavours parse into the same types.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::amf::{encode_all, Amf0Decoder, Amf0Encoder, AmfValue};
use crate::error::{ProtocolError, Result};
use crate::protocol::chunk::RawMessage;
use crate::protocol::constants::*;

/// Parsed RTMP message
#[derive(Debug, Clone, PartialEq)]
pub enum RtmpMessage {
    SetChunkSize(u32),
    Abort { csid: u32 },
    Acknowledgement(u32),
    UserControl(UserControlEvent),
    WindowAckSize(u32),
    SetPeerBandwidth { size: u32, limit_type: u8 },
    Audio { timestamp: u32, data: Bytes },
    Video { timestamp: u32, data: Bytes },
    Command(Command),
    Data(DataMessage),
    /// Aggregate and shared-object messages land here and are ignored
    Unknown { type_id: u8, data: Bytes },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserControlEvent {
    StreamBegin(u32),
    StreamEof(u32),
    SetBufferLength { stream_id: u32, buffer_ms: u32 },
    PingRequest(u32),
    PingResponse(u32),
    Other { event_type: u16, data: Bytes },
}

/// AMF command (connect, createStream, publish, play, ...)
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub name: String,
    pub transaction_id: f64,
    /// Usually null except for connect and `_result`
    pub command_object: AmfValue,
    pub arguments: Vec<AmfValue>,
    /// Message stream the command arrived on
    pub stream_id: u32,
}

/// AMF data message (@setDataFrame, onMetaData)
#[derive(Debug, Clone, PartialEq)]
pub struct DataMessage {
    pub name: String,
    pub values: Vec<AmfValue>,
}

/// The bits of the connect command object we care about
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectParams {
    pub app: String,
    pub tc_url: Option<String>,
    pub object_encoding: f64,
}

impl ConnectParams {
    pub fn from_amf(obj: &AmfValue) -> Self {
        let text = |key: &str| obj.get(key).and_then(AmfValue::as_str).map(str::to_owned);
        Self {
            app: text("app").unwrap_or_default(),
            tc_url: text("tcUrl"),
            object_encoding: obj
                .get("objectEncoding")
                .and_then(AmfValue::as_number)
                .unwrap_or(0.0),
        }
    }
}

impl RtmpMessage {
    /// Interpret a reassembled chunk-stream message
    pub fn from_raw(raw: &RawMessage) -> Result<Self> {
        let mut payload = raw.payload.clone();

        let message = match raw.message_type {
            MSG_SET_CHUNK_SIZE => {
                RtmpMessage::SetChunkSize(read_u32(&mut payload, "set chunk size")? & 0x7FFF_FFFF)
            }
            MSG_ABORT => RtmpMessage::Abort {
                csid: read_u32(&mut payload, "abort")?,
            },
            MSG_ACKNOWLEDGEMENT => {
                RtmpMessage::Acknowledgement(read_u32(&mut payload, "acknowledgement")?)
            }
            MSG_USER_CONTROL => RtmpMessage::UserControl(UserControlEvent::parse(&mut payload)?),
            MSG_WINDOW_ACK_SIZE => {
                RtmpMessage::WindowAckSize(read_u32(&mut payload, "window ack size")?)
            }
            MSG_SET_PEER_BANDWIDTH => {
                let size = read_u32(&mut payload, "set peer bandwidth")?;
                if !payload.has_remaining() {
                    return Err(ProtocolError::Truncated("set peer bandwidth").into());
                }
                RtmpMessage::SetPeerBandwidth {
                    size,
                    limit_type: payload.get_u8(),
                }
            }
            MSG_AUDIO => RtmpMessage::Audio {
                timestamp: raw.timestamp,
                data: payload,
            },
            MSG_VIDEO => RtmpMessage::Video {
                timestamp: raw.timestamp,
                data: payload,
            },
            MSG_COMMAND_AMF0 => RtmpMessage::Command(Command::parse(&mut payload, raw.stream_id)?),
            MSG_COMMAND_AMF3 => {
                skip_amf3_format_byte(&mut payload);
                RtmpMessage::Command(Command::parse(&mut payload, raw.stream_id)?)
            }
            MSG_DATA_AMF0 => RtmpMessage::Data(DataMessage::parse(&mut payload)?),
            MSG_DATA_AMF3 => {
                skip_amf3_format_byte(&mut payload);
                RtmpMessage::Data(DataMessage::parse(&mut payload)?)
            }
            type_id => RtmpMessage::Unknown {
                type_id,
                data: payload,
            },
        };

        Ok(message)
    }

    /// Message type id and payload for the chunk encoder
    pub fn encode(&self) -> (u8, Bytes) {
        let mut buf = BytesMut::with_capacity(16);
        let type_id = match self {
            RtmpMessage::SetChunkSize(size) => {
                buf.put_u32(*size);
                MSG_SET_CHUNK_SIZE
            }
            RtmpMessage::Abort { csid } => {
                buf.put_u32(*csid);
                MSG_ABORT
            }
            RtmpMessage::Acknowledgement(sequence) => {
                buf.put_u32(*sequence);
                MSG_ACKNOWLEDGEMENT
            }
            RtmpMessage::UserControl(event) => {
                event.write(&mut buf);
                MSG_USER_CONTROL
            }
            RtmpMessage::WindowAckSize(size) => {
                buf.put_u32(*size);
                MSG_WINDOW_ACK_SIZE
            }
            RtmpMessage::SetPeerBandwidth { size, limit_type } => {
                buf.put_u32(*size);
                buf.put_u8(*limit_type);
                MSG_SET_PEER_BANDWIDTH
            }
            RtmpMessage::Audio { data, .. } => return (MSG_AUDIO, data.clone()),
            RtmpMessage::Video { data, .. } => return (MSG_VIDEO, data.clone()),
            RtmpMessage::Command(cmd) => return (MSG_COMMAND_AMF0, cmd.encode()),
            RtmpMessage::Data(data) => return (MSG_DATA_AMF0, data.encode()),
            RtmpMessage::Unknown { type_id, data } => return (*type_id, data.clone()),
        };
        (type_id, buf.freeze())
    }
}

impl UserControlEvent {
    fn parse(payload: &mut Bytes) -> Result<Self> {
        if payload.remaining() < 2 {
            return Err(ProtocolError::Truncated("user control").into());
        }
        let event_type = payload.get_u16();

        let event = match event_type {
            UC_STREAM_BEGIN => UserControlEvent::StreamBegin(read_u32(payload, "user control")?),
            UC_STREAM_EOF => UserControlEvent::StreamEof(read_u32(payload, "user control")?),
            UC_SET_BUFFER_LENGTH => UserControlEvent::SetBufferLength {
                stream_id: read_u32(payload, "user control")?,
                buffer_ms: read_u32(payload, "user control")?,
            },
            UC_PING_REQUEST => UserControlEvent::PingRequest(read_u32(payload, "user control")?),
            UC_PING_RESPONSE => UserControlEvent::PingResponse(read_u32(payload, "user control")?),
            _ => UserControlEvent::Other {
                event_type,
                data: payload.split_off(0),
            },
        };
        Ok(event)
    }

    fn write(&self, buf: &mut BytesMut) {
        match self {
            UserControlEvent::StreamBegin(id) => {
                buf.put_u16(UC_STREAM_BEGIN);
                buf.put_u32(*id);
            }
            UserControlEvent::StreamEof(id) => {
                buf.put_u16(UC_STREAM_EOF);
                buf.put_u32(*id);
            }
            UserControlEvent::SetBufferLength {
                stream_id,
                buffer_ms,
            } => {
                buf.put_u16(UC_SET_BUFFER_LENGTH);
                buf.put_u32(*stream_id);
                buf.put_u32(*buffer_ms);
            }
            UserControlEvent::PingRequest(ts) => {
                buf.put_u16(UC_PING_REQUEST);
                buf.put_u32(*ts);
            }
            UserControlEvent::PingResponse(ts) => {
                buf.put_u16(UC_PING_RESPONSE);
                buf.put_u32(*ts);
            }
            UserControlEvent::Other { event_type, data } => {
                buf.put_u16(*event_type);
                buf.put_slice(data);
            }
        }
    }
}

impl Command {
    pub fn new(
        name: impl Into<String>,
        transaction_id: f64,
        command_object: AmfValue,
        arguments: Vec<AmfValue>,
    ) -> Self {
        Self {
            name: name.into(),
            transaction_id,
            command_object,
            arguments,
            stream_id: 0,
        }
    }

    /// `_result` reply to a transaction
    pub fn result(transaction_id: f64, properties: AmfValue, info: AmfValue) -> Self {
        Self::new(CMD_RESULT, transaction_id, properties, vec![info])
    }

    /// `_error` reply to a transaction
    pub fn error(transaction_id: f64, info: AmfValue) -> Self {
        Self::new(CMD_ERROR, transaction_id, AmfValue::Null, vec![info])
    }

    /// `onStatus` notification on a message stream
    pub fn on_status(stream_id: u32, level: &str, code: &str, description: &str) -> Self {
        let mut cmd = Self::new(
            CMD_ON_STATUS,
            0.0,
            AmfValue::Null,
            vec![status_info(level, code, description)],
        );
        cmd.stream_id = stream_id;
        cmd
    }

    /// String argument at `index` (after the command object)
    pub fn arg_str(&self, index: usize) -> Option<&str> {
        self.arguments.get(index).and_then(AmfValue::as_str)
    }

    fn parse(payload: &mut Bytes, stream_id: u32) -> Result<Self> {
        let mut decoder = Amf0Decoder::new();

        let name = match decoder.decode(payload)? {
            AmfValue::String(name) => name,
            other => {
                return Err(
                    ProtocolError::InvalidCommand(format!("expected name, got {other:?}")).into(),
                )
            }
        };

        // Some encoders omit everything after the name
        let transaction_id = if payload.has_remaining() {
            decoder.decode(payload)?.as_number().unwrap_or(0.0)
        } else {
            0.0
        };
        let command_object = if payload.has_remaining() {
            decoder.decode(payload)?
        } else {
            AmfValue::Null
        };
        let arguments = decoder.decode_all(payload)?;

        Ok(Self {
            name,
            transaction_id,
            command_object,
            arguments,
            stream_id,
        })
    }

    fn encode(&self) -> Bytes {
        let mut encoder = Amf0Encoder::new();
        encoder.encode(&AmfValue::string(self.name.as_str()));
        encoder.encode(&AmfValue::Number(self.transaction_id));
        encoder.encode(&self.command_object);
        for arg in &self.arguments {
            encoder.encode(arg);
        }
        encoder.finish()
    }
}

/// The `{level, code, description}` object carried by status replies
pub fn status_info(level: &str, code: &str, description: &str) -> AmfValue {
    AmfValue::object([
        ("level", AmfValue::string(level)),
        ("code", AmfValue::string(code)),
        ("description", AmfValue::string(description)),
    ])
}

impl DataMessage {
    /// Metadata payload to replay to viewers, if this message carries one
    ///
    /// Publishers send `@setDataFrame "onMetaData" {..}`; viewers expect the
    /// same thing without the `@setDataFrame` wrapper.
    pub fn metadata(&self) -> Option<Bytes> {
        match self.name.as_str() {
            CMD_SET_DATA_FRAME => {
                let (first, rest) = self.values.split_first()?;
                if first.as_str() != Some(CMD_ON_METADATA) {
                    return None;
                }
                let mut values = vec![AmfValue::string(CMD_ON_METADATA)];
                values.extend(rest.iter().cloned());
                Some(encode_all(&values))
            }
            CMD_ON_METADATA => Some(self.encode()),
            _ => None,
        }
    }

    fn parse(payload: &mut Bytes) -> Result<Self> {
        let mut decoder = Amf0Decoder::new();
        let name = decoder
            .decode(payload)?
            .as_str()
            .map(str::to_owned)
            .unwrap_or_default();
        let values = decoder.decode_all(payload)?;
        Ok(Self { name, values })
    }

    fn encode(&self) -> Bytes {
        let mut encoder = Amf0Encoder::new();
        encoder.encode(&AmfValue::string(self.name.as_str()));
        for value in &self.values {
            encoder.encode(value);
        }
        encoder.finish()
    }
}

fn read_u32(payload: &mut Bytes, what: &'static str) -> Result<u32> {
    if payload.remaining() < 4 {
        return Err(ProtocolError::Truncated(what).into());
    }
    Ok(payload.get_u32())
}

fn skip_amf3_format_byte(payload: &mut Bytes) {
    if payload.first() == Some(&0) {
        payload.advance(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(message_type: u8, payload: Bytes) -> RawMessage {
        RawMessage {
            csid: CSID_COMMAND,
            timestamp: 0,
            message_type,
            stream_id: 0,
            payload,
        }
    }

    fn reparse(message: &RtmpMessage) -> RtmpMessage {
        let (type_id, payload) = message.encode();
        RtmpMessage::from_raw(&raw(type_id, payload)).unwrap()
    }

    #[test]
    fn test_control_messages() {
        for message in [
            RtmpMessage::SetChunkSize(4096),
            RtmpMessage::WindowAckSize(DEFAULT_WINDOW_ACK_SIZE),
            RtmpMessage::SetPeerBandwidth {
                size: DEFAULT_PEER_BANDWIDTH,
                limit_type: BANDWIDTH_LIMIT_DYNAMIC,
            },
            RtmpMessage::UserControl(UserControlEvent::StreamBegin(1)),
            RtmpMessage::UserControl(UserControlEvent::StreamEof(1)),
            RtmpMessage::UserControl(UserControlEvent::SetBufferLength {
                stream_id: 1,
                buffer_ms: 3000,
            }),
        ] {
            assert_eq!(reparse(&message), message);
        }
    }

    #[test]
    fn test_stream_eof_wire_format() {
        let (type_id, payload) =
            RtmpMessage::UserControl(UserControlEvent::StreamEof(1)).encode();
        assert_eq!(type_id, MSG_USER_CONTROL);
        assert_eq!(&payload[..], &[0, 1, 0, 0, 0, 1]);
    }

    #[test]
    fn test_chunk_size_ignores_high_bit() {
        let message = RtmpMessage::from_raw(&raw(
            MSG_SET_CHUNK_SIZE,
            Bytes::from_static(&[0x80, 0, 0x10, 0]),
        ))
        .unwrap();
        assert_eq!(message, RtmpMessage::SetChunkSize(4096));
    }

    #[test]
    fn test_truncated_control_message() {
        let err = RtmpMessage::from_raw(&raw(MSG_WINDOW_ACK_SIZE, Bytes::from_static(&[0, 1])))
            .unwrap_err();
        assert!(err.to_string().contains("window ack size"));
    }

    #[test]
    fn test_publish_command() {
        let publish = Command::new(
            CMD_PUBLISH,
            5.0,
            AmfValue::Null,
            vec![AmfValue::string("secret?vhost=x"), AmfValue::string("live")],
        );

        match reparse(&RtmpMessage::Command(publish)) {
            RtmpMessage::Command(cmd) => {
                assert_eq!(cmd.name, CMD_PUBLISH);
                assert_eq!(cmd.transaction_id, 5.0);
                assert_eq!(cmd.arg_str(0), Some("secret?vhost=x"));
                assert_eq!(cmd.arg_str(1), Some("live"));
                assert_eq!(cmd.arg_str(2), None);
            }
            other => panic!("expected command, got {other:?}"),
        }
    }

    #[test]
    fn test_amf3_command_wrapper() {
        let body = Command::new("createStream", 2.0, AmfValue::Null, vec![]).encode();
        let mut payload = BytesMut::new();
        payload.put_u8(0);
        payload.put_slice(&body);

        let message = RtmpMessage::from_raw(&raw(MSG_COMMAND_AMF3, payload.freeze())).unwrap();
        assert!(matches!(message, RtmpMessage::Command(cmd) if cmd.name == "createStream"));
    }

    #[test]
    fn test_command_without_transaction() {
        let payload = encode_all(&[AmfValue::string("FCUnpublish")]);
        match RtmpMessage::from_raw(&raw(MSG_COMMAND_AMF0, payload)).unwrap() {
            RtmpMessage::Command(cmd) => {
                assert_eq!(cmd.transaction_id, 0.0);
                assert_eq!(cmd.command_object, AmfValue::Null);
                assert!(cmd.arguments.is_empty());
            }
            other => panic!("expected command, got {other:?}"),
        }
    }

    #[test]
    fn test_command_needs_string_name() {
        let payload = encode_all(&[AmfValue::Number(1.0)]);
        assert!(RtmpMessage::from_raw(&raw(MSG_COMMAND_AMF0, payload)).is_err());
    }

    #[test]
    fn test_connect_params() {
        let obj = AmfValue::object([
            ("app", AmfValue::string("live")),
            ("tcUrl", AmfValue::string("rtmp://localhost/live")),
            ("objectEncoding", AmfValue::Number(0.0)),
        ]);

        let params = ConnectParams::from_amf(&obj);
        assert_eq!(params.app, "live");
        assert_eq!(params.tc_url.as_deref(), Some("rtmp://localhost/live"));
        assert_eq!(ConnectParams::from_amf(&AmfValue::Null), ConnectParams::default());
    }

    #[test]
    fn test_on_status_shape() {
        let cmd = Command::on_status(1, "status", NS_PLAY_START, "Started");
        assert_eq!(cmd.stream_id, 1);

        let info = &cmd.arguments[0];
        let keys: Vec<_> = info
            .as_properties()
            .unwrap()
            .iter()
            .map(|(k, _)| k.as_str())
            .collect();
        assert_eq!(keys, ["level", "code", "description"]);
        assert_eq!(info.get("code").and_then(AmfValue::as_str), Some(NS_PLAY_START));
    }

    #[test]
    fn test_set_data_frame_metadata_is_unwrapped() {
        let meta = AmfValue::EcmaArray(vec![("width".into(), AmfValue::Number(1280.0))]);
        let data = DataMessage {
            name: CMD_SET_DATA_FRAME.into(),
            values: vec![AmfValue::string(CMD_ON_METADATA), meta.clone()],
        };

        let mut payload = data.metadata().unwrap();
        let values = Amf0Decoder::new().decode_all(&mut payload).unwrap();
        assert_eq!(values, vec![AmfValue::string(CMD_ON_METADATA), meta]);

        let other = DataMessage {
            name: "onCuePoint".into(),
            values: vec![],
        };
        assert!(other.metadata().is_none());
    }

    #[test]
    fn test_media_keeps_timestamp() {
        let message = RtmpMessage::from_raw(&RawMessage {
            csid: CSID_VIDEO,
            timestamp: 1234,
            message_type: MSG_VIDEO,
            stream_id: 1,
            payload: Bytes::from_static(&[0x17, 0x01]),
        })
        .unwrap();

        assert_eq!(
            message,
            RtmpMessage::Video {
                timestamp: 1234,
                data: Bytes::from_static(&[0x17, 0x01]),
            }
        );
    }
}
