//! Media packets
//!
//! A [`Packet`] is the unit moved from a producer to consumers. Payloads are
//! `Bytes`, so duplicating a packet for every consumer only bumps a
//! reference count.

use bytes::Bytes;

use super::flv;
use crate::amf::{amf0, AmfValue};
use crate::error::AmfError;

/// Data message name some encoders prepend to `onMetaData`
const SET_DATA_FRAME: &str = "@setDataFrame";

/// Packet kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Audio,
    Video,
    /// AMF0 data message (`onMetaData` and friends)
    Metadata,
}

/// One media or data unit
#[derive(Debug, Clone)]
pub struct Packet {
    pub kind: PacketKind,
    /// Timestamp in the producer's clock (milliseconds for RTMP)
    pub timestamp: u32,
    /// FLV tag body or AMF0 data message
    pub data: Bytes,
    /// Video keyframe; starts a GOP
    pub is_keyframe: bool,
    /// Decoder configuration (AVC/HEVC record, AAC AudioSpecificConfig)
    pub is_sequence_header: bool,
}

impl Packet {
    /// Video packet, classified from its FLV header
    pub fn video(timestamp: u32, data: Bytes) -> Self {
        let is_sequence_header = flv::is_video_sequence_header(&data);
        Self {
            kind: PacketKind::Video,
            timestamp,
            is_keyframe: flv::is_video_keyframe(&data) && !is_sequence_header,
            is_sequence_header,
            data,
        }
    }

    /// Audio packet, classified from its FLV header
    pub fn audio(timestamp: u32, data: Bytes) -> Self {
        Self {
            kind: PacketKind::Audio,
            timestamp,
            is_keyframe: false,
            is_sequence_header: flv::is_audio_sequence_header(&data),
            data,
        }
    }

    pub fn metadata(timestamp: u32, data: Bytes) -> Self {
        Self {
            kind: PacketKind::Metadata,
            timestamp,
            data,
            is_keyframe: false,
            is_sequence_header: false,
        }
    }

    pub fn is_video(&self) -> bool {
        self.kind == PacketKind::Video
    }

    pub fn is_audio(&self) -> bool {
        self.kind == PacketKind::Audio
    }

    pub fn is_metadata(&self) -> bool {
        self.kind == PacketKind::Metadata
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Decode the AMF0 values of a metadata packet
    ///
    /// A leading `@setDataFrame` is dropped so the result starts with the
    /// handler name (`onMetaData`).
    pub fn metadata_values(&self) -> Result<Vec<AmfValue>, AmfError> {
        let mut values = amf0::decode_all(&self.data)?;
        if values.first().and_then(AmfValue::as_str) == Some(SET_DATA_FRAME) {
            values.remove(0);
        }
        Ok(values)
    }
}
