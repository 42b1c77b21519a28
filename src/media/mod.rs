//! Media handling
//!
//! This module provides:
//! - FLV audio/video payload header inspection
//! - The packet type relayed by the hub
//! - The catch-up cache served to late joiners

pub mod cache;
pub mod flv;
pub mod packet;

pub use cache::CatchUpCache;
pub use flv::{AudioFormat, VideoCodec, VideoFrameType};
pub use packet::{Packet, PacketKind};
