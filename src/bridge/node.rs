//! Bridge node: upstream sink, translator, downstream source
//!
//! ```text
//!   parent MediaSource (rtmp)
//!        │ lazy MediaSink
//!        ▼
//!   BridgeConsumer ──translate──► downstream MediaSource (flv) ──► sinks
//! ```
//!
//! The bridge lives in its parent's bridge map until its downstream has had
//! no sinks and no bridges of its own for the idle timeout.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::config::BridgeConfig;
use super::translator::{BridgeKind, Translator};
use crate::media::{MediaPacket, PacketRef, StreamKey};
use crate::runtime::{WaitGroup, Worker};
use crate::sink::{MediaConsumer, MediaSink};
use crate::source::{AdmissionError, MediaSource, SourceContext, SourceSnapshot, SourceStatus};
use crate::stats::SinkStatsSnapshot;

/// Consumer side of a bridge: translates and admits into the downstream
struct BridgeConsumer {
    kind: BridgeKind,
    accepting: AtomicBool,
    downstream: Weak<MediaSource>,
    translator: Mutex<Box<dyn Translator>>,
}

impl BridgeConsumer {
    fn forward(&self, pkts: &[PacketRef]) -> bool {
        if !self.accepting.load(Ordering::Acquire) {
            return true;
        }
        let Some(downstream) = self.downstream.upgrade() else {
            return false;
        };

        let mut out: Vec<MediaPacket> = Vec::new();
        {
            let mut translator = self.translator.lock();
            for pkt in pkts {
                if let Err(e) = translator.translate(pkt, &mut out) {
                    tracing::warn!(
                        bridge = %self.kind,
                        index = pkt.index,
                        error = %e,
                        "Translation failed, packet skipped"
                    );
                }
            }
        }

        for pkt in out {
            match downstream.on_packet(pkt) {
                Ok(_) => {}
                Err(AdmissionError::SourceClosed) => return false,
                Err(e) => {
                    tracing::trace!(bridge = %self.kind, error = %e, "Translated packet refused");
                }
            }
        }
        true
    }
}

#[async_trait]
impl MediaConsumer for BridgeConsumer {
    async fn on_packet(&self, pkt: PacketRef) -> bool {
        self.forward(std::slice::from_ref(&pkt))
    }

    async fn on_packets(&self, pkts: &[PacketRef]) -> bool {
        self.forward(pkts)
    }

    fn on_source_status_changed(&self, status: SourceStatus) {
        if let Some(downstream) = self.downstream.upgrade() {
            downstream.set_status(status);
        }
    }
}

/// On-demand translation node between two sources
pub struct MediaBridge {
    id: String,
    kind: BridgeKind,
    worker: Worker,
    config: BridgeConfig,
    downstream: Arc<MediaSource>,
    consumer: Arc<BridgeConsumer>,
    upstream_sink: Arc<MediaSink>,
    parent: Mutex<Weak<MediaSource>>,
    closed: AtomicBool,
    cancel: CancellationToken,
    wg: WaitGroup,
    created_at: Instant,
}

impl MediaBridge {
    pub(crate) fn new(
        kind: BridgeKind,
        translator: Box<dyn Translator>,
        key: StreamKey,
        ctx: SourceContext,
        config: BridgeConfig,
    ) -> Arc<Self> {
        let worker = ctx.worker.clone();
        let batch_size = ctx.config.sink_batch_size;
        let downstream = MediaSource::derived(key, kind.to, ctx);

        let consumer = Arc::new(BridgeConsumer {
            kind,
            accepting: AtomicBool::new(true),
            downstream: Arc::downgrade(&downstream),
            translator: Mutex::new(translator),
        });
        let upstream_sink = MediaSink::lazy(
            worker.clone(),
            Arc::clone(&consumer) as Arc<dyn MediaConsumer>,
            batch_size,
        );

        Arc::new(Self {
            id: kind.to_string(),
            kind,
            worker,
            config,
            downstream,
            consumer,
            upstream_sink,
            parent: Mutex::new(Weak::new()),
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            wg: WaitGroup::new(),
            created_at: Instant::now(),
        })
    }

    /// Translation id, e.g. `"rtmp-flv"`
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> BridgeKind {
        self.kind
    }

    /// Source carrying the translated stream
    pub fn downstream(&self) -> &Arc<MediaSource> {
        &self.downstream
    }

    /// Sink reading from the parent source
    pub fn upstream_sink(&self) -> &Arc<MediaSink> {
        &self.upstream_sink
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Attach to `parent` and start the idle timer
    pub(crate) fn init(self: &Arc<Self>, parent: &Arc<MediaSource>) {
        *self.parent.lock() = Arc::downgrade(parent);
        parent.add_media_sink(Arc::clone(&self.upstream_sink));

        let weak = Arc::downgrade(self);
        let cancel = self.cancel.clone();
        let idle_timeout = self.config.idle_timeout;
        let check_interval = self.config.check_interval;

        self.wg.spawn_on(&self.worker, async move {
            let mut ticker =
                tokio::time::interval_at(Instant::now() + check_interval, check_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let Some(bridge) = weak.upgrade() else {
                    break;
                };
                if !bridge.downstream.has_no_sinks_for_time(idle_timeout) {
                    continue;
                }

                tracing::info!(
                    bridge = %bridge.id,
                    stream = %bridge.downstream.key(),
                    idle_secs = idle_timeout.as_secs(),
                    "Bridge idle, tearing down"
                );
                // Closing waits on this task, so hand it to a fresh one
                let worker = bridge.worker.clone();
                worker.spawn(async move {
                    let parent = bridge.parent.lock().upgrade();
                    match parent {
                        Some(parent) => {
                            parent.remove_bridge(&bridge.id).await;
                        }
                        None => bridge.close().await,
                    }
                });
                break;
            }
        });
    }

    /// Stop translating and release both ends
    ///
    /// Idempotent. Waits for in-flight translation before closing the
    /// downstream so no packet is admitted into a closed source.
    pub async fn close(self: &Arc<Self>) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.consumer.accepting.store(false, Ordering::Release);
        self.upstream_sink.wait_idle().await;
        self.downstream.close().await;
        self.upstream_sink.close().await;

        self.cancel.cancel();
        self.wg.wait().await;

        let parent = self.parent.lock().upgrade();
        if let Some(parent) = parent {
            parent.forget_bridge(self);
        }

        tracing::info!(
            bridge = %self.id,
            stream = %self.downstream.key(),
            lifetime_secs = self.created_at.elapsed().as_secs(),
            "Bridge closed"
        );
    }

    pub fn snapshot(&self) -> BridgeSnapshot {
        BridgeSnapshot {
            id: self.id.clone(),
            closed: self.is_closed(),
            upstream: self.upstream_sink.stats(),
            downstream: self.downstream.snapshot(),
        }
    }
}

impl std::fmt::Debug for MediaBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaBridge")
            .field("id", &self.id)
            .field("downstream", &self.downstream)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Serializable view of a bridge
#[derive(Debug, Clone, Serialize)]
pub struct BridgeSnapshot {
    pub id: String,
    pub closed: bool,
    /// Delivery stats of the sink reading the parent
    pub upstream: SinkStatsSnapshot,
    pub downstream: SourceSnapshot,
}
