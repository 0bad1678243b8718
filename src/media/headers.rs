//! Codec header cache for late-joiner support
//!
//! When a new sink attaches to an existing stream it needs the decoder
//! configuration before any frame is useful:
//! 1. Stream metadata and initialization segments
//! 2. The video sequence header (e.g. SPS/PPS)
//! 3. The audio sequence header (e.g. AudioSpecificConfig)
//!
//! The cache keeps the latest admitted packet of each class so a sink can be
//! primed without waiting for the publisher to resend them.

use super::packet::{PacketKind, PacketRef};

/// Latest decoder configuration packets of a source
#[derive(Debug, Default)]
pub struct HeaderCache {
    video_header: Option<PacketRef>,
    audio_header: Option<PacketRef>,
    metadata: Option<PacketRef>,
    init_segment: Option<PacketRef>,
}

impl HeaderCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the packet if it carries decoder configuration
    ///
    /// Returns true if the packet was cached.
    pub fn update(&mut self, pkt: &PacketRef) -> bool {
        if !pkt.is_header {
            return false;
        }

        let slot = match pkt.kind {
            PacketKind::Video => &mut self.video_header,
            PacketKind::Audio => &mut self.audio_header,
            PacketKind::Metadata => &mut self.metadata,
            PacketKind::InitSegment => &mut self.init_segment,
        };
        *slot = Some(PacketRef::clone(pkt));
        true
    }

    pub fn video_header(&self) -> Option<&PacketRef> {
        self.video_header.as_ref()
    }

    pub fn audio_header(&self) -> Option<&PacketRef> {
        self.audio_header.as_ref()
    }

    pub fn metadata(&self) -> Option<&PacketRef> {
        self.metadata.as_ref()
    }

    pub fn init_segment(&self) -> Option<&PacketRef> {
        self.init_segment.as_ref()
    }

    /// Whether any decoder configuration has been seen
    pub fn is_empty(&self) -> bool {
        self.video_header.is_none()
            && self.audio_header.is_none()
            && self.metadata.is_none()
            && self.init_segment.is_none()
    }

    /// Cached headers admitted before `start`, in index order
    ///
    /// Headers at or after `start` reach the sink through normal ring
    /// catch-up, so replaying only the older ones keeps a sink's delivered
    /// indices non-decreasing.
    pub fn replay_before(&self, start: u64) -> Vec<PacketRef> {
        let mut headers: Vec<PacketRef> = [
            &self.metadata,
            &self.init_segment,
            &self.video_header,
            &self.audio_header,
        ]
        .into_iter()
        .flatten()
        .filter(|pkt| pkt.index < start)
        .cloned()
        .collect();

        headers.sort_by_key(|pkt| pkt.index);
        headers
    }

    /// Clear all cached headers
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
