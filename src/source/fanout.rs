//! Producer side of the hub
//!
//! A `MediaSource` admits packets from one upstream (a publisher session or
//! a bridge), keeps them in a ring for catch-up, and fans them out to every
//! attached sink. It also owns the bridges derived from it.
//!
//! ```text
//!   publisher ──on_packet──► MediaSource ──┬──► MediaSink (eager) ──► RTMP player
//!                            ring, headers │
//!                            keyframes     ├──► MediaSink (lazy)  ──► HTTP-FLV
//!                                          │
//!                                          └──► MediaBridge "rtmp-flv"
//!                                                 └─► MediaSource (flv) ──► ...
//! ```
//!
//! Locking: the state mutex is never held across an await and never taken
//! while a sink's state is locked by the same thread; sinks are bound under
//! it, notified after it is released.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::config::SourceConfig;
use super::error::AdmissionError;
use super::status::SourceStatus;
use crate::bridge::{BridgeFactory, BridgeKind, BridgeSnapshot, MediaBridge};
use crate::buffer::{new_ring, KeyframeIndex, PacketRing};
use crate::media::{HeaderCache, MediaPacket, MediaType, PacketKind, PacketRef, StreamKey};
use crate::registry::SourceManager;
use crate::runtime::{WaitGroup, Worker};
use crate::sink::{MediaSink, SinkSnapshot};
use crate::stats::SourceStats;

static NEXT_SOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// What a source needs from its surroundings
#[derive(Clone)]
pub struct SourceContext {
    /// Worker that runs the source's background work
    pub worker: Worker,
    pub config: SourceConfig,
    /// Factory for bridges derived from the source
    pub bridges: Arc<BridgeFactory>,
}

impl SourceContext {
    pub fn new(worker: Worker, config: SourceConfig, bridges: Arc<BridgeFactory>) -> Self {
        Self {
            worker,
            config,
            bridges,
        }
    }
}

struct SourceInner {
    status: SourceStatus,
    sinks: HashMap<u64, Arc<MediaSink>>,
    bridges: HashMap<String, Arc<MediaBridge>>,
    keyframes: KeyframeIndex,
    headers: HeaderCache,
    has_video: bool,
    ready: bool,
    last_empty_at: Instant,
    session: Option<u64>,
    ever_bound: bool,
    unbound_since: Option<Instant>,
    resume_timer: Option<CancellationToken>,
    stats: SourceStats,
}

impl SourceInner {
    fn is_empty(&self) -> bool {
        self.sinks.is_empty() && self.bridges.is_empty()
    }
}

/// Fan-out hub for one stream in one media type
pub struct MediaSource {
    id: u64,
    key: StreamKey,
    media_type: MediaType,
    is_origin: bool,
    ctx: SourceContext,
    ring: Box<dyn PacketRing>,
    inner: Mutex<SourceInner>,
    registry: Mutex<Weak<SourceManager>>,
    closed: AtomicBool,
    cancel: CancellationToken,
    wg: WaitGroup,
    created_at: Instant,
}

impl MediaSource {
    /// Source fed by a publisher
    pub fn origin(key: StreamKey, media_type: MediaType, ctx: SourceContext) -> Arc<Self> {
        Self::build(key, media_type, true, ctx)
    }

    /// Source fed by a bridge
    pub fn derived(key: StreamKey, media_type: MediaType, ctx: SourceContext) -> Arc<Self> {
        Self::build(key, media_type, false, ctx)
    }

    fn build(
        key: StreamKey,
        media_type: MediaType,
        is_origin: bool,
        ctx: SourceContext,
    ) -> Arc<Self> {
        let ring = new_ring(ctx.config.ring_kind, ctx.config.ring_capacity);
        let now = Instant::now();
        let id = NEXT_SOURCE_ID.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(
            stream = %key,
            source = id,
            media_type = %media_type,
            is_origin,
            "Source created"
        );

        Arc::new(Self {
            id,
            inner: Mutex::new(SourceInner {
                status: SourceStatus::Init,
                sinks: HashMap::new(),
                bridges: HashMap::new(),
                keyframes: KeyframeIndex::new(ctx.config.keyframe_capacity),
                headers: HeaderCache::new(),
                has_video: false,
                ready: false,
                last_empty_at: now,
                session: None,
                ever_bound: false,
                unbound_since: None,
                resume_timer: None,
                stats: SourceStats::new(),
            }),
            key,
            media_type,
            is_origin,
            ring,
            ctx,
            registry: Mutex::new(Weak::new()),
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            wg: WaitGroup::new(),
            created_at: now,
        })
    }

    /// Process-unique id
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn key(&self) -> &StreamKey {
        &self.key
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    pub fn is_origin(&self) -> bool {
        self.is_origin
    }

    pub fn worker(&self) -> &Worker {
        &self.ctx.worker
    }

    pub fn context(&self) -> &SourceContext {
        &self.ctx
    }

    pub fn config(&self) -> &SourceConfig {
        &self.ctx.config
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn set_registry(&self, registry: Weak<SourceManager>) {
        *self.registry.lock() = registry;
    }

    /// Admit a packet and fan it out
    ///
    /// Returns the index assigned to the packet.
    pub fn on_packet(&self, pkt: MediaPacket) -> Result<u64, AdmissionError> {
        if self.is_closed() {
            return Err(AdmissionError::SourceClosed);
        }

        let (pkt, sinks, became_ready) = {
            let mut inner = self.inner.lock();
            if self.is_closed() {
                return Err(AdmissionError::SourceClosed);
            }
            if pkt.data.is_empty() {
                inner.stats.record_rejected();
                return Err(AdmissionError::EmptyPayload(pkt.kind));
            }

            let pkt = self.ring.push(pkt);

            if pkt.kind == PacketKind::Video {
                inner.has_video = true;
            }
            // With video present, joins must land on a video keyframe
            let is_join_point = pkt.is_keyframe
                && !pkt.is_header
                && match pkt.kind {
                    PacketKind::Video => true,
                    PacketKind::Audio => !inner.has_video,
                    PacketKind::Metadata | PacketKind::InitSegment => false,
                };
            if is_join_point {
                inner.keyframes.push(pkt.index);
                inner.keyframes.prune(self.ring.as_ref());
            }

            inner.headers.update(&pkt);
            inner.stats.record(&pkt);

            let became_ready = !inner.ready && (pkt.is_header || pkt.is_keyframe);
            if became_ready {
                inner.ready = true;
            }

            let sinks: Vec<Arc<MediaSink>> = inner.sinks.values().cloned().collect();
            (pkt, sinks, became_ready)
        };

        tracing::trace!(stream = %self.key, index = pkt.index, kind = ?pkt.kind, "Packet admitted");

        // Fresh media after a rebind also lifts a terminal status
        if became_ready && self.status() != SourceStatus::Ok {
            self.set_status(SourceStatus::Ok);
        }

        for sink in &sinks {
            sink.notify(&pkt);
        }

        Ok(pkt.index)
    }

    pub fn on_video_packet(&self, pkt: MediaPacket) -> Result<u64, AdmissionError> {
        debug_assert_eq!(pkt.kind, PacketKind::Video);
        self.on_packet(pkt)
    }

    pub fn on_audio_packet(&self, pkt: MediaPacket) -> Result<u64, AdmissionError> {
        debug_assert_eq!(pkt.kind, PacketKind::Audio);
        self.on_packet(pkt)
    }

    /// Admit stream metadata
    pub fn on_metadata(&self, data: bytes::Bytes) -> Result<u64, AdmissionError> {
        self.on_packet(MediaPacket::metadata(data))
    }

    /// Admit an initialization segment
    pub fn on_init_segment(&self, data: bytes::Bytes) -> Result<u64, AdmissionError> {
        self.on_packet(MediaPacket::init_segment(data))
    }

    pub fn get_pkts(&self, from: u64, max: usize) -> Vec<PacketRef> {
        self.ring.get_pkts(from, max)
    }

    /// One past the newest admitted index
    pub fn latest_index(&self) -> u64 {
        self.ring.latest_index()
    }

    /// Where a joining or resyncing sink starts
    ///
    /// A retained keyframe per the configured policy, otherwise the live edge.
    pub fn join_point(&self) -> u64 {
        let inner = self.inner.lock();
        inner
            .keyframes
            .join_point(self.ring.as_ref(), self.ctx.config.join_policy)
            .unwrap_or_else(|| self.ring.latest_index())
    }

    /// Attach a sink
    ///
    /// The sink starts at the join point after receiving the cached headers
    /// that precede it. Attaching to a closed source closes the sink.
    pub fn add_media_sink(self: &Arc<Self>, sink: Arc<MediaSink>) {
        let status = {
            let mut inner = self.inner.lock();
            if self.is_closed() {
                drop(inner);
                let worker = sink.worker().clone();
                worker.spawn(async move { sink.close().await });
                return;
            }

            let start = inner
                .keyframes
                .join_point(self.ring.as_ref(), self.ctx.config.join_policy)
                .unwrap_or_else(|| self.ring.latest_index());
            let headers = inner.headers.replay_before(start);

            if !sink.bind(self, start, headers) {
                tracing::warn!(stream = %self.key, sink = sink.id(), "Sink already attached or closed");
                return;
            }
            inner.sinks.insert(sink.id(), Arc::clone(&sink));

            tracing::debug!(
                stream = %self.key,
                sink = sink.id(),
                mode = sink.mode().as_str(),
                start,
                sinks = inner.sinks.len(),
                "Sink attached"
            );
            inner.status
        };

        if status != SourceStatus::Init {
            sink.on_source_status_changed(status);
        }
        sink.wakeup();
    }

    /// Detach a sink by id
    ///
    /// Returns false if no such sink was attached.
    pub fn remove_media_sink(&self, sink_id: u64) -> bool {
        let removed = {
            let mut inner = self.inner.lock();
            let removed = inner.sinks.remove(&sink_id);
            if removed.is_some() && inner.is_empty() {
                inner.last_empty_at = Instant::now();
            }
            removed
        };

        match removed {
            Some(sink) => {
                sink.detach();
                tracing::debug!(stream = %self.key, sink = sink_id, "Sink detached");
                true
            }
            None => false,
        }
    }

    pub fn sink_count(&self) -> usize {
        self.inner.lock().sinks.len()
    }

    /// True when no sinks or bridges have been attached for at least `d`
    pub fn has_no_sinks_for_time(&self, d: Duration) -> bool {
        let inner = self.inner.lock();
        inner.is_empty() && inner.last_empty_at.elapsed() >= d
    }

    /// Bridge for translation `id` ("from-to"), created on first request
    ///
    /// Returns `None` for an unknown, disabled or mismatched kind, or when the
    /// source is closed.
    pub fn get_or_create_bridge(
        self: &Arc<Self>,
        id: &str,
        app: &str,
        stream: &str,
    ) -> Option<Arc<MediaBridge>> {
        let kind: BridgeKind = id.parse().ok()?;

        let bridge = {
            let mut inner = self.inner.lock();
            if self.is_closed() {
                return None;
            }
            if let Some(bridge) = inner.bridges.get(id) {
                return Some(Arc::clone(bridge));
            }

            let bridge = self
                .ctx
                .bridges
                .create(kind, self, &self.key.domain, app, stream)?;
            inner.bridges.insert(id.to_string(), Arc::clone(&bridge));
            bridge
        };

        bridge.init(self);
        tracing::info!(stream = %self.key, bridge = %id, "Bridge created");
        Some(bridge)
    }

    pub fn get_bridge(&self, id: &str) -> Option<Arc<MediaBridge>> {
        self.inner.lock().bridges.get(id).cloned()
    }

    pub fn bridge_count(&self) -> usize {
        self.inner.lock().bridges.len()
    }

    /// Forget and close a bridge
    pub async fn remove_bridge(&self, id: &str) -> bool {
        let removed = {
            let mut inner = self.inner.lock();
            let removed = inner.bridges.remove(id);
            if removed.is_some() && inner.is_empty() {
                inner.last_empty_at = Instant::now();
            }
            removed
        };

        match removed {
            Some(bridge) => {
                bridge.close().await;
                true
            }
            None => false,
        }
    }

    /// Drop `bridge` from the map if it is still the registered instance
    pub(crate) fn forget_bridge(&self, bridge: &Arc<MediaBridge>) {
        let mut inner = self.inner.lock();
        let registered = inner
            .bridges
            .get(bridge.id())
            .is_some_and(|current| Arc::ptr_eq(current, bridge));
        if registered {
            inner.bridges.remove(bridge.id());
            if inner.is_empty() {
                inner.last_empty_at = Instant::now();
            }
        }
    }

    pub fn status(&self) -> SourceStatus {
        self.inner.lock().status
    }

    /// Change status and tell every sink
    ///
    /// Ignored after close or when unchanged.
    pub fn set_status(&self, status: SourceStatus) {
        let sinks: Vec<Arc<MediaSink>> = {
            let mut inner = self.inner.lock();
            if self.is_closed() || inner.status == status {
                return;
            }
            inner.status = status;
            inner.sinks.values().cloned().collect()
        };

        tracing::debug!(stream = %self.key, status = %status, sinks = sinks.len(), "Status changed");

        for sink in &sinks {
            sink.on_source_status_changed(status);
        }
    }

    /// Whether decoder configuration or a sync point has been admitted
    pub fn is_stream_ready(&self) -> bool {
        self.inner.lock().ready
    }

    /// Bind the publishing session, returning the previously bound one
    ///
    /// Cancels a pending resume timeout. A different upstream replacing an
    /// earlier one starts from an empty ring so sinks do not mix the two.
    pub fn bind_session(&self, session_id: u64) -> Option<u64> {
        let mut inner = self.inner.lock();
        if let Some(timer) = inner.resume_timer.take() {
            timer.cancel();
        }

        let previous = inner.session.replace(session_id);
        let resumed = inner.unbound_since.take().is_some();
        if inner.ever_bound && previous != Some(session_id) {
            self.ring.clear();
            inner.keyframes.clear();
            inner.headers.clear();
            inner.has_video = false;
            inner.ready = false;
        }
        inner.ever_bound = true;

        tracing::info!(
            stream = %self.key,
            session_id,
            previous = ?previous,
            resumed,
            "Publisher bound"
        );
        previous
    }

    /// Unbind the publishing session and schedule a close after `timeout`
    ///
    /// Returns false if `session_id` is not the bound session.
    pub fn unbind_session(self: &Arc<Self>, session_id: u64, timeout: Duration) -> bool {
        let token = {
            let mut inner = self.inner.lock();
            if inner.session != Some(session_id) {
                tracing::warn!(
                    stream = %self.key,
                    expected = ?inner.session,
                    actual = session_id,
                    "Publisher unbind mismatch"
                );
                return false;
            }
            inner.session = None;
            inner.unbound_since = Some(Instant::now());

            let token = self.cancel.child_token();
            if let Some(previous) = inner.resume_timer.replace(token.clone()) {
                previous.cancel();
            }
            token
        };

        tracing::info!(
            stream = %self.key,
            session_id,
            resume_timeout_ms = timeout.as_millis() as u64,
            "Publisher unbound, waiting for resume"
        );

        let weak = Arc::downgrade(self);
        let cancelled = token.clone();
        self.wg.spawn_on(&self.ctx.worker, async move {
            tokio::select! {
                _ = cancelled.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    let Some(source) = weak.upgrade() else {
                        return;
                    };
                    // Closing waits on this task, so hand it to a fresh one
                    let worker = source.ctx.worker.clone();
                    worker.spawn(async move {
                        if token.is_cancelled() || source.session().is_some() {
                            return;
                        }
                        tracing::info!(stream = %source.key, "Resume timeout expired, closing source");
                        source.close().await;
                    });
                }
            }
        });

        true
    }

    /// Currently bound publishing session
    pub fn session(&self) -> Option<u64> {
        self.inner.lock().session
    }

    /// How long the source has been without a publisher
    pub fn unbound_for(&self) -> Option<Duration> {
        let inner = self.inner.lock();
        if inner.session.is_some() {
            return None;
        }
        Some(inner.unbound_since.unwrap_or(self.created_at).elapsed())
    }

    /// Close sinks and bridges, wait for background work, deregister
    ///
    /// Sink closes are handed to each sink's worker and not awaited. Idempotent.
    /// Boxed because closing a bridge closes its downstream source in turn.
    pub fn close(self: &Arc<Self>) -> BoxFuture<'static, ()> {
        let this = Arc::clone(self);
        async move {
            if this.closed.swap(true, Ordering::AcqRel) {
                return;
            }
            this.cancel.cancel();

            let (sinks, bridges) = {
                let mut inner = this.inner.lock();
                if let Some(timer) = inner.resume_timer.take() {
                    timer.cancel();
                }
                inner.last_empty_at = Instant::now();
                (
                    std::mem::take(&mut inner.sinks),
                    std::mem::take(&mut inner.bridges),
                )
            };

            // Each sink waits for its own consumer; a stuck one must not hold us up
            for sink in sinks.into_values() {
                sink.detach();
                let worker = sink.worker().clone();
                worker.spawn(async move { sink.close().await });
            }

            for bridge in bridges.into_values() {
                bridge.close().await;
            }

            this.wg.wait().await;

            if this.is_origin {
                let registry = this.registry.lock().upgrade();
                if let Some(registry) = registry {
                    registry.remove_source_if(&this.key, this.id).await;
                }
            }

            tracing::info!(
                stream = %this.key,
                source = this.id,
                media_type = %this.media_type,
                "Source closed"
            );
        }
        .boxed()
    }

    pub fn stats(&self) -> SourceStats {
        self.inner.lock().stats.clone()
    }

    pub fn snapshot(&self) -> SourceSnapshot {
        let (base, sinks, bridges) = {
            let inner = self.inner.lock();
            let base = SourceSnapshot {
                id: self.id,
                key: self.key.clone(),
                media_type: self.media_type,
                is_origin: self.is_origin,
                status: inner.status,
                ready: inner.ready,
                closed: self.is_closed(),
                session: inner.session,
                latest_index: self.ring.latest_index(),
                oldest_index: self.ring.oldest_index(),
                keyframes: inner.keyframes.len(),
                uptime_ms: self.created_at.elapsed().as_millis() as u64,
                bitrate: inner.stats.bitrate(self.created_at.elapsed()),
                stats: inner.stats.clone(),
                sinks: Vec::new(),
                bridges: Vec::new(),
            };
            let sinks: Vec<Arc<MediaSink>> = inner.sinks.values().cloned().collect();
            let bridges: Vec<Arc<MediaBridge>> = inner.bridges.values().cloned().collect();
            (base, sinks, bridges)
        };

        let mut sinks: Vec<SinkSnapshot> = sinks.iter().map(|sink| sink.snapshot()).collect();
        sinks.sort_by_key(|sink| sink.id);
        let mut bridges: Vec<BridgeSnapshot> = bridges.iter().map(|bridge| bridge.snapshot()).collect();
        bridges.sort_by(|a, b| a.id.cmp(&b.id));

        SourceSnapshot {
            sinks,
            bridges,
            ..base
        }
    }

    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self.snapshot())
    }

    /// Snapshot taken on the source's own worker
    pub async fn sync_to_json(self: &Arc<Self>) -> crate::Result<serde_json::Value> {
        let this = Arc::clone(self);
        Ok(self.ctx.worker.dispatch(move || this.to_json()).await??)
    }
}

impl std::fmt::Debug for MediaSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaSource")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("media_type", &self.media_type)
            .field("is_origin", &self.is_origin)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Serializable view of a source and everything derived from it
#[derive(Debug, Clone, Serialize)]
pub struct SourceSnapshot {
    pub id: u64,
    pub key: StreamKey,
    pub media_type: MediaType,
    pub is_origin: bool,
    pub status: SourceStatus,
    pub ready: bool,
    pub closed: bool,
    pub session: Option<u64>,
    pub latest_index: u64,
    pub oldest_index: u64,
    pub keyframes: usize,
    pub uptime_ms: u64,
    /// Average admitted bits per second since creation
    pub bitrate: u64,
    pub stats: SourceStats,
    pub sinks: Vec<SinkSnapshot>,
    pub bridges: Vec<BridgeSnapshot>,
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::bridge::{BridgeConfig, Passthrough};
    use crate::buffer::JoinPolicy;
    use crate::sink::MediaConsumer;
    use crate::testing::{
        audio, context_with, eventually, frame, key, keyframe, origin, settle, video_header,
        Recorder,
    };

    fn lazy(recorder: &Arc<Recorder>) -> Arc<MediaSink> {
        MediaSink::lazy(Worker::current(), Arc::clone(recorder) as Arc<dyn MediaConsumer>, 8)
    }

    #[tokio::test]
    async fn test_admission_assigns_indices() {
        let source = origin("s");
        assert_eq!(source.status(), SourceStatus::Init);
        assert!(!source.is_stream_ready());

        assert_eq!(source.on_video_packet(frame(0)), Ok(0));
        assert_eq!(source.status(), SourceStatus::Init);

        assert_eq!(source.on_video_packet(video_header()), Ok(1));
        assert_eq!(source.on_metadata(Bytes::from_static(b"meta")), Ok(2));
        assert_eq!(source.on_init_segment(Bytes::from_static(b"init")), Ok(3));

        assert!(source.is_stream_ready());
        assert_eq!(source.status(), SourceStatus::Ok);
        assert_eq!(source.latest_index(), 4);
        assert_eq!(source.stats().headers, 3);
    }

    #[tokio::test]
    async fn test_admission_errors() {
        let source = origin("s");

        let empty = MediaPacket::video(0, Bytes::new(), true, false);
        assert_eq!(
            source.on_video_packet(empty),
            Err(AdmissionError::EmptyPayload(PacketKind::Video))
        );
        assert_eq!(source.latest_index(), 0);
        assert_eq!(source.stats().rejected, 1);

        source.close().await;
        assert_eq!(
            source.on_video_packet(keyframe(0)),
            Err(AdmissionError::SourceClosed)
        );

        // Status changes after close are ignored
        source.set_status(SourceStatus::Gone);
        assert_eq!(source.status(), SourceStatus::Init);
    }

    #[tokio::test]
    async fn test_late_joiner_gets_headers_then_keyframe() {
        let config = SourceConfig::default().ring_capacity(8);
        let source = MediaSource::origin(
            key("s"),
            MediaType::Rtmp,
            context_with(config, BridgeConfig::default()),
        );

        // 0: header, 1: keyframe, 5: keyframe; ring keeps 2..10
        source.on_video_packet(video_header()).unwrap();
        source.on_video_packet(keyframe(0)).unwrap();
        for ts in 1..4 {
            source.on_video_packet(frame(ts)).unwrap();
        }
        source.on_video_packet(keyframe(100)).unwrap();
        for ts in 101..105 {
            source.on_video_packet(frame(ts)).unwrap();
        }
        assert_eq!(source.join_point(), 5);

        let recorder = Recorder::new();
        source.add_media_sink(lazy(&recorder));

        eventually("catch-up", || recorder.len() == 6).await;
        assert_eq!(recorder.indices(), vec![0, 5, 6, 7, 8, 9]);
        assert!(recorder.packets()[0].is_header);
        assert!(recorder.packets()[1].is_keyframe);
    }

    #[tokio::test]
    async fn test_join_without_keyframe_starts_at_live_edge() {
        let source = origin("s");
        for ts in 0..3 {
            source.on_video_packet(frame(ts)).unwrap();
        }
        assert_eq!(source.join_point(), 3);

        let recorder = Recorder::new();
        source.add_media_sink(lazy(&recorder));
        source.on_video_packet(keyframe(3)).unwrap();

        eventually("live packet", || recorder.len() == 1).await;
        assert_eq!(recorder.indices(), vec![3]);
    }

    #[tokio::test]
    async fn test_audio_only_stream_joins_on_audio() {
        let config = SourceConfig::default().join_policy(JoinPolicy::LatestKeyframe);
        let source = MediaSource::origin(
            key("s"),
            MediaType::Rtmp,
            context_with(config, BridgeConfig::default()),
        );
        for ts in 0..4 {
            source.on_audio_packet(audio(ts * 23)).unwrap();
        }
        assert_eq!(source.join_point(), 3);

        // Once video shows up, joins wait for a video keyframe
        source.on_video_packet(keyframe(100)).unwrap();
        source.on_audio_packet(audio(123)).unwrap();
        source.on_video_packet(frame(140)).unwrap();
        assert_eq!(source.join_point(), 4);
    }

    #[tokio::test]
    async fn test_sequence_header_is_not_a_join_point() {
        let source = origin("s");
        source.on_video_packet(video_header()).unwrap();
        source.on_video_packet(frame(0)).unwrap();

        assert_eq!(source.join_point(), 2);
    }

    #[tokio::test]
    async fn test_status_broadcast_and_replay() {
        let source = origin("s");
        let early = Recorder::new();
        source.add_media_sink(lazy(&early));

        source.set_status(SourceStatus::NotFound);
        source.set_status(SourceStatus::NotFound);

        let late = Recorder::new();
        source.add_media_sink(lazy(&late));

        assert_eq!(early.statuses(), vec![SourceStatus::NotFound]);
        assert_eq!(late.statuses(), vec![SourceStatus::NotFound]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_has_no_sinks_for_time() {
        let source = origin("s");
        let idle = Duration::from_secs(1);
        assert!(!source.has_no_sinks_for_time(idle));

        tokio::time::advance(idle).await;
        assert!(source.has_no_sinks_for_time(idle));

        let recorder = Recorder::new();
        let sink = lazy(&recorder);
        source.add_media_sink(Arc::clone(&sink));
        assert!(!source.has_no_sinks_for_time(Duration::ZERO));

        tokio::time::advance(idle * 2).await;
        assert!(!source.has_no_sinks_for_time(idle));

        assert!(source.remove_media_sink(sink.id()));
        assert!(!source.remove_media_sink(sink.id()));
        assert!(!source.has_no_sinks_for_time(idle));

        tokio::time::advance(idle).await;
        assert!(source.has_no_sinks_for_time(idle));
    }

    #[tokio::test]
    async fn test_bridge_created_once() {
        let config = BridgeConfig::default().disable("flv-rtmp".parse().unwrap());
        let source = MediaSource::origin(
            key("s"),
            MediaType::Rtmp,
            context_with(SourceConfig::default(), config),
        );

        let first = source.get_or_create_bridge("rtmp-flv", "live", "s").unwrap();
        let second = source.get_or_create_bridge("rtmp-flv", "live", "s").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(source.bridge_count(), 1);
        assert_eq!(first.downstream().media_type(), MediaType::Flv);
        assert_eq!(source.sink_count(), 1);

        // Unknown, mismatched and malformed ids
        assert!(source.get_or_create_bridge("rtmp-hls", "live", "s").is_none());
        assert!(source.get_or_create_bridge("flv-rtmp", "live", "s").is_none());
        assert!(source.get_or_create_bridge("nonsense", "live", "s").is_none());
        assert_eq!(source.bridge_count(), 1);

        assert!(source.remove_bridge("rtmp-flv").await);
        assert!(!source.remove_bridge("rtmp-flv").await);
        assert!(first.is_closed());
        assert!(first.downstream().is_closed());
        assert_eq!(source.sink_count(), 0);
    }

    #[tokio::test]
    async fn test_bridges_per_id_are_independent() {
        let factory = BridgeFactory::with_defaults(BridgeConfig::default());
        factory
            .register("rtmp-ts".parse().unwrap(), || Box::new(Passthrough))
            .unwrap();
        let ctx = SourceContext::new(Worker::current(), SourceConfig::default(), Arc::new(factory));
        let source = MediaSource::origin(key("s"), MediaType::Rtmp, ctx);

        let flv = source.get_or_create_bridge("rtmp-flv", "live", "s").unwrap();
        let ts = source.get_or_create_bridge("rtmp-ts", "live", "s").unwrap();
        assert!(!Arc::ptr_eq(&flv, &ts));
        assert!(!Arc::ptr_eq(flv.downstream(), ts.downstream()));
        assert_eq!(flv.downstream().media_type(), MediaType::Flv);
        assert_eq!(ts.downstream().media_type(), MediaType::Ts);
        assert_eq!(source.bridge_count(), 2);
        assert_eq!(source.sink_count(), 2);

        let flv_viewer = Recorder::new();
        let ts_viewer = Recorder::new();
        flv.downstream().add_media_sink(lazy(&flv_viewer));
        ts.downstream().add_media_sink(lazy(&ts_viewer));
        source.on_video_packet(keyframe(0)).unwrap();
        eventually("both bridges", || flv_viewer.len() == 1 && ts_viewer.len() == 1).await;

        assert!(source.remove_bridge("rtmp-flv").await);
        assert!(flv.downstream().is_closed());
        assert!(!ts.is_closed());
        assert!(!ts.downstream().is_closed());
        assert!(Arc::ptr_eq(&source.get_bridge("rtmp-ts").unwrap(), &ts));

        source.on_video_packet(frame(40)).unwrap();
        eventually("surviving bridge", || ts_viewer.len() == 2).await;
        assert_eq!(flv_viewer.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bridge_alone_keeps_source_busy() {
        let source = origin("s");
        let idle = Duration::from_secs(1);
        let bridge = source.get_or_create_bridge("rtmp-flv", "live", "s").unwrap();

        // Leave only the bridge entry behind
        assert!(source.remove_media_sink(bridge.upstream_sink().id()));
        assert_eq!(source.sink_count(), 0);
        assert_eq!(source.bridge_count(), 1);

        tokio::time::advance(idle * 2).await;
        assert!(!source.has_no_sinks_for_time(idle));

        assert!(source.remove_bridge("rtmp-flv").await);
        assert!(!source.has_no_sinks_for_time(idle));

        tokio::time::advance(idle).await;
        assert!(source.has_no_sinks_for_time(idle));
    }

    #[tokio::test]
    async fn test_session_binding() {
        let source = origin("s");

        assert_eq!(source.bind_session(1), None);
        assert_eq!(source.session(), Some(1));
        assert!(source.unbound_for().is_none());

        assert!(!source.unbind_session(2, Duration::from_secs(5)));
        assert!(source.unbind_session(1, Duration::from_secs(5)));
        assert_eq!(source.session(), None);
        assert!(source.unbound_for().is_some());

        source.on_video_packet(keyframe(0)).unwrap();
        assert!(source.is_stream_ready());

        // A new upstream starts clean but indices keep counting
        assert_eq!(source.bind_session(2), None);
        assert!(!source.is_stream_ready());
        assert_eq!(source.latest_index(), 1);
        assert!(source.get_pkts(0, 8).is_empty());
        assert_eq!(source.on_video_packet(keyframe(40)), Ok(1));

        source.close().await;
    }

    #[tokio::test]
    async fn test_rebound_source_returns_to_ok() {
        let source = origin("s");
        let viewer = Recorder::new();
        source.add_media_sink(lazy(&viewer));

        source.bind_session(1);
        source.on_video_packet(video_header()).unwrap();
        source.on_video_packet(keyframe(0)).unwrap();
        source.set_status(SourceStatus::Gone);
        assert!(source.unbind_session(1, Duration::from_secs(5)));

        source.bind_session(2);
        assert_eq!(source.status(), SourceStatus::Gone);
        source.on_video_packet(video_header()).unwrap();
        source.on_video_packet(keyframe(40)).unwrap();

        assert!(source.is_stream_ready());
        assert_eq!(source.status(), SourceStatus::Ok);
        assert_eq!(
            viewer.statuses(),
            vec![SourceStatus::Ok, SourceStatus::Gone, SourceStatus::Ok]
        );
        source.close().await;
    }

    #[tokio::test]
    async fn test_add_sink_to_closed_source_closes_it() {
        let source = origin("s");
        source.close().await;

        let recorder = Recorder::new();
        let sink = lazy(&recorder);
        source.add_media_sink(Arc::clone(&sink));
        settle().await;

        assert!(sink.is_closed());
        assert_eq!(recorder.closes(), 1);
        assert_eq!(source.sink_count(), 0);
    }

    #[tokio::test]
    async fn test_close_cascades_once() {
        let source = origin("s");
        let recorder = Recorder::new();
        let sink = lazy(&recorder);
        source.add_media_sink(Arc::clone(&sink));
        let bridge = source.get_or_create_bridge("rtmp-flv", "live", "s").unwrap();
        let viewer = Recorder::new();
        bridge.downstream().add_media_sink(lazy(&viewer));

        source.close().await;
        source.close().await;

        assert!(bridge.is_closed());
        assert!(bridge.downstream().is_closed());
        assert_eq!(source.bridge_count(), 0);

        eventually("sinks closed", || recorder.closes() == 1 && viewer.closes() == 1).await;
        assert!(sink.is_closed());
        settle().await;
        assert_eq!(recorder.closes(), 1);
        assert_eq!(viewer.closes(), 1);
    }

    #[tokio::test]
    async fn test_close_does_not_wait_for_stuck_consumer() {
        let registry = Arc::new(SourceManager::new());
        let source = origin("s");
        registry.add_source(Arc::clone(&source)).await.unwrap();

        let recorder = Recorder::gated();
        let sink = lazy(&recorder);
        source.add_media_sink(Arc::clone(&sink));
        source.on_video_packet(keyframe(0)).unwrap();
        settle().await;

        tokio::time::timeout(Duration::from_millis(500), source.close())
            .await
            .expect("close blocked on a consumer");
        assert!(registry.get_source(source.key()).await.is_none());
        assert_eq!(recorder.closes(), 0);

        // The sink finishes its own close once the consumer returns
        recorder.open(1);
        eventually("sink closed", || recorder.closes() == 1).await;
        assert!(sink.is_closed());
    }

    #[tokio::test]
    async fn test_snapshot_to_json() {
        let source = origin("s");
        source.on_video_packet(keyframe(0)).unwrap();
        let recorder = Recorder::new();
        source.add_media_sink(lazy(&recorder));
        eventually("delivery", || recorder.len() == 1).await;

        let json = source.to_json().unwrap();
        assert_eq!(json["status"], "OK");
        assert_eq!(json["is_origin"], true);
        assert_eq!(json["latest_index"], 1);
        assert_eq!(json["sinks"][0]["mode"], "lazy");
        assert_eq!(json["sinks"][0]["next_index"], 1);

        let synced = source.sync_to_json().await.unwrap();
        assert_eq!(synced["id"], source.id());
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_reports_bitrate() {
        let source = origin("s");
        let payload = Bytes::from(vec![0x17; 1000]);
        source
            .on_video_packet(MediaPacket::video(0, payload, true, false))
            .unwrap();
        assert_eq!(source.snapshot().bitrate, 0);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(source.snapshot().bitrate, 4000);
        assert_eq!(source.to_json().unwrap()["bitrate"], 4000);
    }
}
