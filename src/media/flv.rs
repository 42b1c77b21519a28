//! FLV audio/video payload headers
//!
//! RTMP audio and video messages carry an FLV tag body without the tag
//! header. The first byte (or two) tells whether the payload is a keyframe
//! and whether it is a decoder configuration record, which is all the hub
//! needs to decide where a packet goes in the catch-up cache.
//!
//! Video data:
//! ```text
//! legacy:   | FrameType(4) | CodecID(4) | AVCPacketType(8) | ...
//! enhanced: | 1 | FrameType(3) | PacketType(4) | FourCC(32) | ...
//! ```
//!
//! Audio data:
//! ```text
//! | SoundFormat(4) | SoundRate(2) | SoundSize(1) | SoundType(1) | AACPacketType(8) | ...
//! ```

/// Video frame type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoFrameType {
    Keyframe = 1,
    InterFrame = 2,
    DisposableInterFrame = 3,
    /// Reserved for server use
    GeneratedKeyframe = 4,
    /// Video info/command frame
    VideoInfoFrame = 5,
}

impl VideoFrameType {
    /// Frame type of the first payload byte, legacy or enhanced
    pub fn from_byte(b: u8) -> Option<Self> {
        let bits = if is_enhanced_video(b) {
            (b >> 4) & 0x07
        } else {
            (b >> 4) & 0x0F
        };
        match bits {
            1 => Some(VideoFrameType::Keyframe),
            2 => Some(VideoFrameType::InterFrame),
            3 => Some(VideoFrameType::DisposableInterFrame),
            4 => Some(VideoFrameType::GeneratedKeyframe),
            5 => Some(VideoFrameType::VideoInfoFrame),
            _ => None,
        }
    }

    pub fn is_keyframe(&self) -> bool {
        matches!(
            self,
            VideoFrameType::Keyframe | VideoFrameType::GeneratedKeyframe
        )
    }
}

/// Legacy video codec id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    SorensonH263 = 2,
    ScreenVideo = 3,
    Vp6 = 4,
    Vp6Alpha = 5,
    ScreenVideoV2 = 6,
    Avc = 7,
    /// Non-standard id used by several Chinese CDNs before enhanced RTMP
    Hevc = 12,
    Av1 = 13,
}

impl VideoCodec {
    pub fn from_byte(b: u8) -> Option<Self> {
        if is_enhanced_video(b) {
            return None;
        }
        match b & 0x0F {
            2 => Some(VideoCodec::SorensonH263),
            3 => Some(VideoCodec::ScreenVideo),
            4 => Some(VideoCodec::Vp6),
            5 => Some(VideoCodec::Vp6Alpha),
            6 => Some(VideoCodec::ScreenVideoV2),
            7 => Some(VideoCodec::Avc),
            12 => Some(VideoCodec::Hevc),
            13 => Some(VideoCodec::Av1),
            _ => None,
        }
    }

    /// Codecs whose payload carries an AVCPacketType byte
    fn has_packet_type(&self) -> bool {
        matches!(self, VideoCodec::Avc | VideoCodec::Hevc | VideoCodec::Av1)
    }
}

/// Sound format (upper 4 bits of the first audio byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    LinearPcmPlatform = 0,
    Adpcm = 1,
    Mp3 = 2,
    LinearPcmLe = 3,
    Nellymoser16kMono = 4,
    Nellymoser8kMono = 5,
    Nellymoser = 6,
    G711ALaw = 7,
    G711MuLaw = 8,
    Aac = 10,
    Speex = 11,
    Mp38k = 14,
    DeviceSpecific = 15,
}

impl AudioFormat {
    pub fn from_byte(b: u8) -> Option<Self> {
        match (b >> 4) & 0x0F {
            0 => Some(AudioFormat::LinearPcmPlatform),
            1 => Some(AudioFormat::Adpcm),
            2 => Some(AudioFormat::Mp3),
            3 => Some(AudioFormat::LinearPcmLe),
            4 => Some(AudioFormat::Nellymoser16kMono),
            5 => Some(AudioFormat::Nellymoser8kMono),
            6 => Some(AudioFormat::Nellymoser),
            7 => Some(AudioFormat::G711ALaw),
            8 => Some(AudioFormat::G711MuLaw),
            10 => Some(AudioFormat::Aac),
            11 => Some(AudioFormat::Speex),
            14 => Some(AudioFormat::Mp38k),
            15 => Some(AudioFormat::DeviceSpecific),
            _ => None,
        }
    }
}

/// Enhanced RTMP sets the top bit of the first video byte
fn is_enhanced_video(b: u8) -> bool {
    b & 0x80 != 0
}

/// Enhanced RTMP video packet type carrying the decoder configuration
const ENHANCED_SEQUENCE_START: u8 = 0;

/// Whether a video payload starts a GOP
pub fn is_video_keyframe(data: &[u8]) -> bool {
    data.first()
        .and_then(|b| VideoFrameType::from_byte(*b))
        .map(|ft| ft.is_keyframe())
        .unwrap_or(false)
}

/// Whether a video payload is a decoder configuration record
/// (AVC/HEVC/AV1 sequence header, legacy or enhanced)
pub fn is_video_sequence_header(data: &[u8]) -> bool {
    match data {
        [first, ..] if is_enhanced_video(*first) => first & 0x0F == ENHANCED_SEQUENCE_START,
        [first, packet_type, ..] => {
            VideoCodec::from_byte(*first).is_some_and(|c| c.has_packet_type()) && *packet_type == 0
        }
        _ => false,
    }
}

/// Whether an audio payload is an AAC AudioSpecificConfig
pub fn is_audio_sequence_header(data: &[u8]) -> bool {
    match data {
        [first, packet_type, ..] => {
            AudioFormat::from_byte(*first) == Some(AudioFormat::Aac) && *packet_type == 0
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_frame_type() {
        assert_eq!(VideoFrameType::from_byte(0x17), Some(VideoFrameType::Keyframe));
        assert_eq!(VideoFrameType::from_byte(0x27), Some(VideoFrameType::InterFrame));
        assert_eq!(VideoFrameType::from_byte(0x07), None);
        // enhanced keyframe, packet type 1 (coded frames)
        assert_eq!(VideoFrameType::from_byte(0x91), Some(VideoFrameType::Keyframe));
    }

    #[test]
    fn test_keyframe_detection() {
        assert!(is_video_keyframe(&[0x17, 0x01]));
        assert!(is_video_keyframe(&[0x47]));
        assert!(!is_video_keyframe(&[0x27, 0x01]));
        assert!(!is_video_keyframe(&[]));
    }

    #[test]
    fn test_video_sequence_header() {
        assert!(is_video_sequence_header(&[0x17, 0x00, 0x00, 0x00, 0x00]));
        assert!(is_video_sequence_header(&[0x1C, 0x00]));
        assert!(!is_video_sequence_header(&[0x17, 0x01]));
        // H.263 has no packet type byte
        assert!(!is_video_sequence_header(&[0x12, 0x00]));
        assert!(!is_video_sequence_header(&[0x17]));

        // enhanced: keyframe + SequenceStart, fourcc hvc1
        assert!(is_video_sequence_header(&[0x90, b'h', b'v', b'c', b'1']));
        assert!(!is_video_sequence_header(&[0x91, b'h', b'v', b'c', b'1']));
    }

    #[test]
    fn test_audio_sequence_header() {
        assert!(is_audio_sequence_header(&[0xAF, 0x00, 0x12, 0x10]));
        assert!(!is_audio_sequence_header(&[0xAF, 0x01]));
        // MP3 never has a config record
        assert!(!is_audio_sequence_header(&[0x2F, 0x00]));
        assert!(!is_audio_sequence_header(&[0xAF]));
    }

    #[test]
    fn test_audio_format() {
        assert_eq!(AudioFormat::from_byte(0xAF), Some(AudioFormat::Aac));
        assert_eq!(AudioFormat::from_byte(0x2F), Some(AudioFormat::Mp3));
        assert_eq!(AudioFormat::from_byte(0x9F), None);
    }
}
