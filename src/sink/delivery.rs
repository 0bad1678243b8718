//! Sink delivery loops
//!
//! A sink tracks where its consumer is in the source's ring and moves
//! packets to it from a single task, so a consumer never sees two calls at
//! once and never sees indices go backwards.
//!
//! ```text
//!   eager:  source ──try_send──► [bounded queue] ──► run_eager ──► consumer
//!                                     │ full                ▲
//!                                     └─ drop, count ───────┘ gap filled from ring
//!
//!   lazy:   source ──wakeup──► drain (one at a time) ──get_pkts──► consumer
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use super::consumer::MediaConsumer;
use crate::media::PacketRef;
use crate::runtime::{WaitGroup, Worker};
use crate::source::{MediaSource, SourceStatus};
use crate::stats::{SinkStats, SinkStatsSnapshot};

static NEXT_SINK_ID: AtomicU64 = AtomicU64::new(1);

/// How packets reach the consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Every admitted packet is queued for the sink as it arrives
    Eager { queue_capacity: usize },
    /// The sink is woken and pulls batches from the ring
    Lazy { batch_size: usize },
}

impl DeliveryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryMode::Eager { .. } => "eager",
            DeliveryMode::Lazy { .. } => "lazy",
        }
    }
}

#[derive(Default)]
struct SinkState {
    source: Weak<MediaSource>,
    bound: bool,
    next_index: u64,
    last_delivered: Option<u64>,
    pending_headers: VecDeque<PacketRef>,
    eager_tx: Option<mpsc::Sender<PacketRef>>,
    codec_ready: bool,
}

/// Consumer endpoint attached to a source
pub struct MediaSink {
    id: u64,
    worker: Worker,
    consumer: Arc<dyn MediaConsumer>,
    mode: DeliveryMode,
    batch_size: usize,
    state: Mutex<SinkState>,
    draining: AtomicBool,
    overflowed: AtomicBool,
    closed: AtomicBool,
    close_notified: AtomicBool,
    cancel: CancellationToken,
    wg: WaitGroup,
    stats: SinkStats,
}

impl MediaSink {
    /// Sink that queues every admitted packet
    pub fn eager(
        worker: Worker,
        consumer: Arc<dyn MediaConsumer>,
        queue_capacity: usize,
    ) -> Arc<Self> {
        let queue_capacity = queue_capacity.max(1);
        Self::with_mode(
            worker,
            consumer,
            DeliveryMode::Eager { queue_capacity },
            queue_capacity,
        )
    }

    /// Sink that pulls batches from the ring when woken
    pub fn lazy(worker: Worker, consumer: Arc<dyn MediaConsumer>, batch_size: usize) -> Arc<Self> {
        let batch_size = batch_size.max(1);
        Self::with_mode(
            worker,
            consumer,
            DeliveryMode::Lazy { batch_size },
            batch_size,
        )
    }

    fn with_mode(
        worker: Worker,
        consumer: Arc<dyn MediaConsumer>,
        mode: DeliveryMode,
        batch_size: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_SINK_ID.fetch_add(1, Ordering::Relaxed),
            worker,
            consumer,
            mode,
            batch_size,
            state: Mutex::new(SinkState::default()),
            draining: AtomicBool::new(false),
            overflowed: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            close_notified: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            wg: WaitGroup::new(),
            stats: SinkStats::new(),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn worker(&self) -> &Worker {
        &self.worker
    }

    pub fn mode(&self) -> DeliveryMode {
        self.mode
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Source this sink is attached to, if any
    pub fn source(&self) -> Option<Arc<MediaSource>> {
        self.state.lock().source.upgrade()
    }

    /// Next ring index the consumer will receive
    pub fn next_index(&self) -> u64 {
        self.state.lock().next_index
    }

    /// Index of the last packet handed to the consumer
    pub fn last_delivered(&self) -> Option<u64> {
        self.state.lock().last_delivered
    }

    /// Whether decoder configuration or a sync point has been delivered
    pub fn is_codec_ready(&self) -> bool {
        self.state.lock().codec_ready
    }

    pub fn stats(&self) -> SinkStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn snapshot(&self) -> SinkSnapshot {
        let state = self.state.lock();
        SinkSnapshot {
            id: self.id,
            mode: self.mode.as_str(),
            next_index: state.next_index,
            last_delivered: state.last_delivered,
            codec_ready: state.codec_ready,
            stats: self.stats.snapshot(),
        }
    }

    /// Attach to `source` starting at `start`
    ///
    /// Called by the source while it holds its own state lock, which is why
    /// the sink never calls into the source with its lock held. Returns false
    /// if the sink is closed or already attached somewhere.
    pub(crate) fn bind(
        self: &Arc<Self>,
        source: &Arc<MediaSource>,
        start: u64,
        headers: Vec<PacketRef>,
    ) -> bool {
        if self.is_closed() {
            return false;
        }

        let mut state = self.state.lock();
        if state.bound {
            return false;
        }
        state.bound = true;
        state.source = Arc::downgrade(source);
        state.next_index = start;
        state.pending_headers = headers.into();

        if let DeliveryMode::Eager { queue_capacity } = self.mode {
            let (tx, rx) = mpsc::channel(queue_capacity);
            state.eager_tx = Some(tx);
            drop(state);

            let sink = Arc::clone(self);
            self.wg.spawn_on(&self.worker, sink.run_eager(rx));
        }

        true
    }

    /// Forget the source without closing the consumer
    pub(crate) fn detach(&self) {
        let mut state = self.state.lock();
        state.source = Weak::new();
        state.eager_tx = None;
    }

    /// A packet was admitted by the source
    pub(crate) fn notify(self: &Arc<Self>, pkt: &PacketRef) {
        match self.mode {
            DeliveryMode::Eager { .. } => {
                let state = self.state.lock();
                let Some(tx) = state.eager_tx.as_ref() else {
                    return;
                };

                match tx.try_send(PacketRef::clone(pkt)) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        self.stats.record_dropped();
                        self.overflowed.store(true, Ordering::Release);
                        tracing::trace!(sink = self.id, index = pkt.index, "Eager queue full");
                    }
                    Err(TrySendError::Closed(_)) => {}
                }
            }
            DeliveryMode::Lazy { .. } => self.wakeup(),
        }
    }

    /// Start a drain unless one is already running
    ///
    /// Eager sinks catch up from their own delivery task, so this only
    /// affects lazy sinks.
    pub fn wakeup(self: &Arc<Self>) {
        if self.is_closed() || !matches!(self.mode, DeliveryMode::Lazy { .. }) {
            return;
        }

        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let sink = Arc::clone(self);
            self.wg.spawn_on(&self.worker, sink.drain());
        }
    }

    pub(crate) fn on_source_status_changed(&self, status: SourceStatus) {
        if !self.is_closed() {
            self.consumer.on_source_status_changed(status);
        }
    }

    /// Stop delivery, detach, wait for in-flight work, then notify the consumer
    ///
    /// Idempotent. Must not be awaited from inside the consumer; return false
    /// from a delivery callback instead.
    pub async fn close(&self) {
        if self.shutdown() {
            tracing::debug!(sink = self.id, "Sink closed");
        }
        self.wg.wait().await;
        self.notify_close();
    }

    /// Wait until no delivery is in flight
    pub async fn wait_idle(&self) {
        self.wg.wait().await;
    }

    /// Close from inside the delivery task
    fn abort(&self) {
        if self.shutdown() {
            tracing::debug!(sink = self.id, "Consumer refused packet, sink closed");
        }
        self.notify_close();
    }

    fn shutdown(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.cancel.cancel();

        let source = {
            let mut state = self.state.lock();
            state.eager_tx = None;
            std::mem::take(&mut state.source)
        };
        if let Some(source) = source.upgrade() {
            source.remove_media_sink(self.id);
        }
        true
    }

    fn notify_close(&self) {
        if !self.close_notified.swap(true, Ordering::AcqRel) {
            self.consumer.on_close();
        }
    }

    async fn run_eager(self: Arc<Self>, mut rx: mpsc::Receiver<PacketRef>) {
        if !self.catch_up(None).await {
            self.abort();
            return;
        }

        loop {
            let pkt = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                pkt = rx.recv() => match pkt {
                    Some(pkt) => pkt,
                    None => break,
                },
            };

            if !self.deliver_live(pkt).await {
                self.abort();
                break;
            }

            if rx.is_empty()
                && self.overflowed.swap(false, Ordering::AcqRel)
                && !self.catch_up(None).await
            {
                self.abort();
                break;
            }
        }
    }

    /// Deliver a queued packet, filling any gap before it from the ring
    async fn deliver_live(&self, pkt: PacketRef) -> bool {
        let next = self.next_index();
        if pkt.index > next && !self.catch_up(Some(pkt.index)).await {
            return false;
        }

        if pkt.index < self.next_index() || self.is_closed() {
            return true;
        }
        self.deliver(std::slice::from_ref(&pkt)).await
    }

    async fn drain(self: Arc<Self>) {
        loop {
            if !self.catch_up(None).await {
                self.abort();
                return;
            }

            self.draining.store(false, Ordering::Release);

            // A wakeup may have been swallowed while the flag was still set
            if self.is_closed() || !self.has_backlog() {
                return;
            }
            if self
                .draining
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return;
            }
        }
    }

    fn has_backlog(&self) -> bool {
        let (source, next) = {
            let state = self.state.lock();
            if !state.pending_headers.is_empty() {
                return true;
            }
            (state.source.clone(), state.next_index)
        };

        source
            .upgrade()
            .is_some_and(|source| next < source.latest_index())
    }

    /// Deliver everything readable up to `until` (exclusive), or up to the
    /// live edge when `until` is `None`
    ///
    /// Returns false when the consumer refused a packet.
    async fn catch_up(&self, until: Option<u64>) -> bool {
        loop {
            if self.is_closed() {
                return true;
            }
            let Some(batch) = self.read_batch(until) else {
                return true;
            };
            if batch.is_empty() {
                return true;
            }
            if !self.deliver(&batch).await {
                return false;
            }
        }
    }

    /// Next run of packets for the consumer
    ///
    /// Pending headers come first. `None` means the sink is detached; an
    /// empty batch means there is nothing new. A sink whose next index has
    /// been overwritten jumps to the source's join point.
    fn read_batch(&self, until: Option<u64>) -> Option<Vec<PacketRef>> {
        let (source, mut next) = {
            let mut state = self.state.lock();
            if !state.pending_headers.is_empty() {
                return Some(state.pending_headers.drain(..).collect());
            }
            (state.source.upgrade()?, state.next_index)
        };

        loop {
            let latest = source.latest_index();
            let end = until.map_or(latest, |until| until.min(latest));
            if next >= end {
                return Some(Vec::new());
            }

            let max = (end - next).min(self.batch_size as u64) as usize;
            let batch = source.get_pkts(next, max);
            if !batch.is_empty() {
                return Some(batch);
            }

            let mut target = source.join_point();
            if target <= next {
                target = latest;
            }

            self.state.lock().next_index = target;
            self.stats.record_resync();
            tracing::warn!(
                sink = self.id,
                stream = %source.key(),
                from = next,
                to = target,
                "Sink fell behind the ring, resyncing"
            );
            next = target;
        }
    }

    async fn deliver(&self, batch: &[PacketRef]) -> bool {
        let accepted = match batch {
            [pkt] => self.consumer.on_packet(PacketRef::clone(pkt)).await,
            _ => self.consumer.on_packets(batch).await,
        };
        if !accepted {
            return false;
        }

        let mut state = self.state.lock();
        for pkt in batch {
            state.next_index = state.next_index.max(pkt.index + 1);
            state.last_delivered = Some(
                state
                    .last_delivered
                    .map_or(pkt.index, |last| last.max(pkt.index)),
            );
            if pkt.is_header || pkt.is_keyframe {
                state.codec_ready = true;
            }
        }
        drop(state);

        self.stats.record_delivered(batch.len());
        true
    }
}

impl std::fmt::Debug for MediaSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaSink")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Serializable view of a sink
#[derive(Debug, Clone, Serialize)]
pub struct SinkSnapshot {
    pub id: u64,
    pub mode: &'static str,
    pub next_index: u64,
    pub last_delivered: Option<u64>,
    pub codec_ready: bool,
    pub stats: SinkStatsSnapshot,
}
