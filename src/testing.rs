//! Shared fixtures for unit tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::bridge::{BridgeConfig, BridgeFactory};
use crate::media::{MediaPacket, MediaType, PacketRef, StreamKey};
use crate::runtime::Worker;
use crate::sink::MediaConsumer;
use crate::source::{MediaSource, SourceConfig, SourceContext, SourceStatus};

pub(crate) fn key(stream: &str) -> StreamKey {
    StreamKey::new("__defaultVhost__", "live", stream)
}

pub(crate) fn context_with(config: SourceConfig, bridges: BridgeConfig) -> SourceContext {
    SourceContext::new(
        Worker::current(),
        config,
        Arc::new(BridgeFactory::with_defaults(bridges)),
    )
}

pub(crate) fn context() -> SourceContext {
    context_with(SourceConfig::default(), BridgeConfig::default())
}

pub(crate) fn origin(stream: &str) -> Arc<MediaSource> {
    MediaSource::origin(key(stream), MediaType::Rtmp, context())
}

pub(crate) fn video_header() -> MediaPacket {
    MediaPacket::video(0, Bytes::from_static(&[0x17, 0x00, 0x01, 0x64]), true, true)
}

pub(crate) fn keyframe(ts: u64) -> MediaPacket {
    MediaPacket::video(ts, Bytes::from_static(&[0x17, 0x01, 0x00]), true, false)
}

pub(crate) fn frame(ts: u64) -> MediaPacket {
    MediaPacket::video(ts, Bytes::from_static(&[0x27, 0x01, 0x00]), false, false)
}

pub(crate) fn audio(ts: u64) -> MediaPacket {
    MediaPacket::audio(ts, Bytes::from_static(&[0xaf, 0x01, 0x21]), false)
}

/// Yield until `cond` holds
///
/// Only spawned tasks on the test's own runtime make progress in between,
/// so this works with a paused clock.
pub(crate) async fn eventually<F: Fn() -> bool>(what: &str, cond: F) {
    for _ in 0..10_000 {
        if cond() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("timed out waiting for {what}");
}

/// Let spawned tasks run for a while
pub(crate) async fn settle() {
    for _ in 0..200 {
        tokio::task::yield_now().await;
    }
}

/// Consumer that records everything it is handed
#[derive(Default)]
pub(crate) struct Recorder {
    packets: Mutex<Vec<PacketRef>>,
    statuses: Mutex<Vec<SourceStatus>>,
    closes: AtomicUsize,
    refuse_after: Option<usize>,
    gate: Option<Semaphore>,
}

impl Recorder {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Accepts `n` packets, then refuses
    pub(crate) fn refusing_after(n: usize) -> Arc<Self> {
        Arc::new(Self {
            refuse_after: Some(n),
            ..Self::default()
        })
    }

    /// Blocks each packet until [`Recorder::open`] releases it
    pub(crate) fn gated() -> Arc<Self> {
        Arc::new(Self {
            gate: Some(Semaphore::new(0)),
            ..Self::default()
        })
    }

    pub(crate) fn open(&self, permits: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(permits);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.packets.lock().len()
    }

    pub(crate) fn indices(&self) -> Vec<u64> {
        self.packets.lock().iter().map(|pkt| pkt.index).collect()
    }

    pub(crate) fn timestamps(&self) -> Vec<u64> {
        self.packets.lock().iter().map(|pkt| pkt.timestamp).collect()
    }

    pub(crate) fn packets(&self) -> Vec<PacketRef> {
        self.packets.lock().clone()
    }

    pub(crate) fn statuses(&self) -> Vec<SourceStatus> {
        self.statuses.lock().clone()
    }

    pub(crate) fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaConsumer for Recorder {
    async fn on_packet(&self, pkt: PacketRef) -> bool {
        if let Some(gate) = &self.gate {
            match gate.acquire().await {
                Ok(permit) => permit.forget(),
                Err(_) => return false,
            }
        }

        let mut packets = self.packets.lock();
        if self.refuse_after.is_some_and(|n| packets.len() >= n) {
            return false;
        }
        packets.push(pkt);
        true
    }

    fn on_source_status_changed(&self, status: SourceStatus) {
        self.statuses.lock().push(status);
    }

    fn on_close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}
