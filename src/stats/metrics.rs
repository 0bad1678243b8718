//! Statistics for sources and sinks

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

use crate::media::{MediaPacket, PacketKind};

/// Source-level statistics
///
/// Updated by the single writer while it holds the source state lock.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SourceStats {
    /// Packets admitted into the ring
    pub packets: u64,
    /// Payload bytes admitted
    pub bytes: u64,
    /// Video packets admitted
    pub video_packets: u64,
    /// Audio packets admitted
    pub audio_packets: u64,
    /// Sync points admitted
    pub keyframes: u64,
    /// Decoder configuration packets admitted
    pub headers: u64,
    /// Packets refused at admission
    pub rejected: u64,
}

impl SourceStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for an admitted packet
    pub fn record(&mut self, pkt: &MediaPacket) {
        self.packets += 1;
        self.bytes += pkt.size() as u64;

        match pkt.kind {
            PacketKind::Video => self.video_packets += 1,
            PacketKind::Audio => self.audio_packets += 1,
            PacketKind::Metadata | PacketKind::InitSegment => {}
        }
        if pkt.is_keyframe {
            self.keyframes += 1;
        }
        if pkt.is_header {
            self.headers += 1;
        }
    }

    /// Account for a refused packet
    pub fn record_rejected(&mut self) {
        self.rejected += 1;
    }

    /// Average bitrate in bits per second over `duration`
    pub fn bitrate(&self, duration: Duration) -> u64 {
        let secs = duration.as_secs();
        if secs > 0 {
            (self.bytes * 8) / secs
        } else {
            0
        }
    }
}

/// Sink-level statistics
///
/// Counters are atomic because the delivery task and the source's fan-out
/// update them from different tasks.
#[derive(Debug, Default)]
pub struct SinkStats {
    delivered: AtomicU64,
    dropped: AtomicU64,
    resyncs: AtomicU64,
}

impl SinkStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_delivered(&self, count: usize) {
        self.delivered.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// A packet did not fit in the eager queue
    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// The sink fell behind the ring and jumped to a join point
    pub fn record_resync(&self) {
        self.resyncs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SinkStatsSnapshot {
        SinkStatsSnapshot {
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            resyncs: self.resyncs.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`SinkStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SinkStatsSnapshot {
    /// Packets handed to the consumer
    pub delivered: u64,
    /// Packets dropped from the eager queue (later filled from the ring)
    pub dropped: u64,
    /// Jumps to a join point after falling behind the ring
    pub resyncs: u64,
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    #[test]
    fn test_source_stats_new() {
        let stats = SourceStats::new();
        assert_eq!(stats.packets, 0);
        assert_eq!(stats.bytes, 0);
        assert_eq!(stats.rejected, 0);
    }

    #[test]
    fn test_source_stats_record() {
        let mut stats = SourceStats::new();

        stats.record(&MediaPacket::video(
            0,
            Bytes::from_static(&[0x17, 0x00, 0x00]),
            true,
            true,
        ));
        stats.record(&MediaPacket::video(33, Bytes::from(vec![0u8; 100]), true, false));
        stats.record(&MediaPacket::audio(20, Bytes::from(vec![0u8; 10]), false));
        stats.record(&MediaPacket::metadata(Bytes::from_static(b"meta")));
        stats.record_rejected();

        assert_eq!(stats.packets, 4);
        assert_eq!(stats.bytes, 3 + 100 + 10 + 4);
        assert_eq!(stats.video_packets, 2);
        assert_eq!(stats.audio_packets, 1);
        // Both video packets are flagged as keyframes, audio frames always are
        assert_eq!(stats.keyframes, 3);
        assert_eq!(stats.headers, 2);
        assert_eq!(stats.rejected, 1);
    }

    #[test]
    fn test_source_stats_bitrate() {
        let mut stats = SourceStats::new();
        stats.bytes = 1_000_000;

        // 1,000,000 bytes * 8 bits / 10 seconds = 800,000 bps
        assert_eq!(stats.bitrate(Duration::from_secs(10)), 800_000);
        assert_eq!(stats.bitrate(Duration::ZERO), 0);
    }

    #[test]
    fn test_sink_stats_snapshot() {
        let stats = SinkStats::new();
        stats.record_delivered(5);
        stats.record_delivered(2);
        stats.record_dropped();
        stats.record_resync();

        assert_eq!(
            stats.snapshot(),
            SinkStatsSnapshot {
                delivered: 7,
                dropped: 1,
                resyncs: 1,
            }
        );
    }
}
