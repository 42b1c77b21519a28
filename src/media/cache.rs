//! Catch-up cache for late joiners
//!
//! A consumer that attaches mid-stream needs, before any live packet:
//! 1. the last metadata message
//! 2. the video and audio decoder configuration
//! 3. every packet since a keyframe
//!
//! The cache keeps exactly that. Retention is bounded by GOP count rather
//! than bytes, so catch-up latency follows the encoder's keyframe interval.

use std::collections::VecDeque;

use super::packet::{Packet, PacketKind};
use crate::error::EndpointError;
use crate::hub::endpoint::Consumer;

/// Hard cap on packets in one GOP
const MAX_PACKETS_PER_GOP: usize = 1500;

/// Per-stream catch-up state
///
/// Owned by a single pump task; not synchronized.
#[derive(Debug)]
pub struct CatchUpCache {
    metadata: Option<Packet>,
    video_config: Option<Packet>,
    audio_config: Option<Packet>,
    /// Oldest GOP first
    gops: VecDeque<Vec<Packet>>,
    /// Maximum number of GOPs retained
    retention: usize,
    /// Current GOP exceeded the cap; media is dropped until the next keyframe
    overflowed: bool,
}

impl CatchUpCache {
    /// Create a cache retaining up to `retention` GOPs (0 keeps only the
    /// metadata and config slots)
    pub fn new(retention: usize) -> Self {
        Self {
            metadata: None,
            video_config: None,
            audio_config: None,
            gops: VecDeque::with_capacity(retention + 1),
            retention,
            overflowed: false,
        }
    }

    /// Record a packet
    pub fn write(&mut self, packet: Packet) {
        match packet.kind {
            PacketKind::Metadata => self.metadata = Some(packet),
            PacketKind::Video if packet.is_sequence_header => self.video_config = Some(packet),
            PacketKind::Audio if packet.is_sequence_header => self.audio_config = Some(packet),
            PacketKind::Video | PacketKind::Audio => self.write_media(packet),
        }
    }

    fn write_media(&mut self, packet: Packet) {
        if self.retention == 0 {
            return;
        }

        if packet.is_keyframe {
            self.overflowed = false;
            if self.gops.len() == self.retention {
                self.gops.pop_front();
            }
            self.gops.push_back(Vec::new());
        } else if self.overflowed {
            return;
        }

        // Nothing before the first keyframe is decodable
        let Some(gop) = self.gops.back_mut() else {
            return;
        };

        if gop.len() < MAX_PACKETS_PER_GOP {
            gop.push(packet);
            return;
        }

        // Late joiners must never see a GOP with a hole; keep nothing until
        // the next keyframe
        tracing::warn!(
            limit = MAX_PACKETS_PER_GOP,
            "GOP too long, discarding cached GOPs until next keyframe"
        );
        self.gops.clear();
        self.overflowed = true;
    }

    /// Packets in flush order: metadata, video config, audio config, then
    /// every retained GOP oldest-first
    pub fn packets(&self) -> impl Iterator<Item = &Packet> {
        self.metadata
            .iter()
            .chain(self.video_config.iter())
            .chain(self.audio_config.iter())
            .chain(self.gops.iter().flatten())
    }

    /// Write the cached state into a consumer, stopping at the first error
    pub async fn flush_into(&self, consumer: &dyn Consumer) -> Result<(), EndpointError> {
        for packet in self.packets() {
            consumer.write(packet.clone()).await?;
        }
        Ok(())
    }

    pub fn gop_count(&self) -> usize {
        self.gops.len()
    }

    /// Total packets a flush would write
    pub fn len(&self) -> usize {
        self.packets().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has_metadata(&self) -> bool {
        self.metadata.is_some()
    }

    pub fn clear(&mut self) {
        self.metadata = None;
        self.video_config = None;
        self.audio_config = None;
        self.gops.clear();
        self.overflowed = false;
    }
}

impl Default for CatchUpCache {
    fn default() -> Self {
        Self::new(1)
    }
}
