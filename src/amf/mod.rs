//! AMF0 serialization for RTMP command and data messages

pub mod amf0;
pub mod value;

pub use amf0::{encode_all, Amf0Decoder, Amf0Encoder};
pub use value::AmfValue;
