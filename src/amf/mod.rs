//! Action Message Format codecs
//!
//! AMF0 carries RTMP command and data messages. AMF3 appears only behind the
//! AMF0 AVM+ marker and is decoded on demand.

pub mod amf0;
pub mod amf3;
pub mod value;

pub use amf0::{Amf0Decoder, Amf0Encoder};
pub use amf3::Amf3Decoder;
pub use value::{AmfObject, AmfValue};
