//! Media packets flowing from the publisher to viewers

use bytes::Bytes;

/// What a packet carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Video,
    Audio,
    /// `onMetaData` data message
    Metadata,
}

/// One audio/video/metadata message
///
/// Cloning only bumps the payload's reference count, so every viewer queue
/// shares the publisher's buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaPacket {
    pub kind: PacketKind,
    /// Milliseconds, as sent by the publisher
    pub timestamp: u32,
    pub data: Bytes,
    pub keyframe: bool,
    /// Decoder configuration (AVC/AAC sequence header)
    pub sequence_header: bool,
}

impl MediaPacket {
    /// Classify an FLV video tag body
    ///
    /// Byte 0 is frame type (high nibble) and codec (low nibble). For AVC,
    /// byte 1 is the packet type, 0 being the sequence header. Enhanced RTMP
    /// sets the high bit of byte 0 and carries the packet type in the low
    /// nibble instead.
    pub fn video(timestamp: u32, data: Bytes) -> Self {
        let (keyframe, sequence_header) = match data.first() {
            Some(&b0) if b0 & 0x80 != 0 => ((b0 >> 4) & 0x07 == 1, b0 & 0x0F == 0),
            Some(&b0) => (b0 >> 4 == 1, b0 & 0x0F == 7 && data.get(1) == Some(&0)),
            None => (false, false),
        };

        Self {
            kind: PacketKind::Video,
            timestamp,
            data,
            keyframe,
            sequence_header,
        }
    }

    /// Classify an FLV audio tag body (AAC sequence header is format 10, type 0)
    pub fn audio(timestamp: u32, data: Bytes) -> Self {
        let sequence_header =
            matches!(data.first(), Some(&b0) if b0 >> 4 == 10) && data.get(1) == Some(&0);

        Self {
            kind: PacketKind::Audio,
            timestamp,
            data,
            keyframe: false,
            sequence_header,
        }
    }

    /// Encoded `onMetaData` payload
    pub fn metadata(data: Bytes) -> Self {
        Self {
            kind: PacketKind::Metadata,
            timestamp: 0,
            data,
            keyframe: false,
            sequence_header: false,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_avc_classification() {
        let header = MediaPacket::video(0, Bytes::from_static(&[0x17, 0x00, 0, 0, 0]));
        assert!(header.keyframe);
        assert!(header.sequence_header);

        let keyframe = MediaPacket::video(40, Bytes::from_static(&[0x17, 0x01]));
        assert!(keyframe.keyframe);
        assert!(!keyframe.sequence_header);

        let inter = MediaPacket::video(80, Bytes::from_static(&[0x27, 0x01]));
        assert!(!inter.keyframe);
        assert!(!inter.sequence_header);
    }

    #[test]
    fn test_enhanced_video_header() {
        // ExHeader bit, keyframe, PacketTypeSequenceStart
        let packet = MediaPacket::video(0, Bytes::from_static(&[0x90, b'h', b'v', b'c', b'1']));
        assert!(packet.keyframe);
        assert!(packet.sequence_header);
    }

    #[test]
    fn test_aac_classification() {
        let header = MediaPacket::audio(0, Bytes::from_static(&[0xAF, 0x00, 0x12, 0x10]));
        assert!(header.sequence_header);

        let raw = MediaPacket::audio(23, Bytes::from_static(&[0xAF, 0x01, 0x21]));
        assert!(!raw.sequence_header);

        let mp3 = MediaPacket::audio(0, Bytes::from_static(&[0x2F, 0x00]));
        assert!(!mp3.sequence_header);
    }

    #[test]
    fn test_empty_payloads() {
        assert!(!MediaPacket::video(0, Bytes::new()).keyframe);
        assert!(!MediaPacket::audio(0, Bytes::new()).sequence_header);
        assert!(MediaPacket::metadata(Bytes::new()).is_empty());
    }
}
