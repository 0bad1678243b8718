//! Hub facade
//!
//! Wires the worker pool, bridge factory and registry together and gives
//! protocol layers the four calls they need: publish, unpublish, resolve
//! and play.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::bridge::BridgeFactory;
use crate::error::{Error, Result};
use crate::media::{MediaType, StreamKey};
use crate::registry::{PublishClaim, RegistryError, SourceManager};
use crate::runtime::{Worker, WorkerPool};
use crate::server::config::ServerConfig;
use crate::sink::MediaSink;
use crate::source::{MediaSource, SourceContext};

/// Live media hub
pub struct MediaServer {
    config: ServerConfig,
    workers: WorkerPool,
    registry: Arc<SourceManager>,
    bridges: Arc<BridgeFactory>,
    next_session_id: AtomicU64,
}

impl MediaServer {
    /// Start a hub with its own worker threads and the default bridges
    pub fn new(config: ServerConfig) -> Result<Self> {
        let workers = WorkerPool::new(config.workers)?;
        let bridges = Arc::new(BridgeFactory::with_defaults(config.bridge.clone()));
        Ok(Self::with_workers(config, workers, bridges))
    }

    /// Build a hub on an existing pool and bridge factory
    pub fn with_workers(
        config: ServerConfig,
        workers: WorkerPool,
        bridges: Arc<BridgeFactory>,
    ) -> Self {
        let registry = Arc::new(SourceManager::with_config(config.registry.clone()));

        Self {
            config,
            workers,
            registry,
            bridges,
            next_session_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get a reference to the source registry
    pub fn registry(&self) -> &Arc<SourceManager> {
        &self.registry
    }

    pub fn bridges(&self) -> &Arc<BridgeFactory> {
        &self.bridges
    }

    /// Worker for a new session's sink
    pub fn next_worker(&self) -> Worker {
        self.workers.next_worker()
    }

    /// Allocate a session id
    pub fn next_session_id(&self) -> u64 {
        self.next_session_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Claim `key` for a publishing session
    ///
    /// Creates the origin on the next worker, or resumes / rebinds the
    /// existing one per the registry's policy.
    pub async fn publish(
        &self,
        key: StreamKey,
        media_type: MediaType,
        session_id: u64,
    ) -> Result<PublishClaim> {
        let ctx = SourceContext::new(
            self.workers.next_worker(),
            self.config.source.clone(),
            Arc::clone(&self.bridges),
        );
        let origin_key = key.clone();

        let claim = self
            .registry
            .claim(&key, session_id, move || {
                MediaSource::origin(origin_key, media_type, ctx)
            })
            .await?;
        Ok(claim)
    }

    /// The publishing session went away
    ///
    /// The origin stays up for the resume timeout, then closes.
    pub fn unpublish(&self, source: &Arc<MediaSource>, session_id: u64) -> bool {
        source.unbind_session(session_id, self.config.registry.stream_resume_timeout)
    }

    /// Source carrying `key` in `media_type`
    ///
    /// Walks the bridge chain from the origin, creating missing bridges on
    /// the worker of the source they hang off.
    pub async fn resolve(&self, key: &StreamKey, media_type: MediaType) -> Result<Arc<MediaSource>> {
        let origin = self
            .registry
            .get_source(key)
            .await
            .ok_or_else(|| RegistryError::StreamNotFound(key.clone()))?;

        let route = self
            .bridges
            .route(origin.media_type(), media_type)
            .ok_or(Error::NoRoute {
                from: origin.media_type(),
                to: media_type,
            })?;

        let mut current = origin;
        for kind in route {
            let id = kind.to_string();
            let parent = Arc::clone(&current);
            let app = key.app.clone();
            let stream = key.stream.clone();

            let bridge = current
                .worker()
                .dispatch(move || parent.get_or_create_bridge(&id, &app, &stream))
                .await?
                .ok_or_else(|| Error::BridgeUnavailable(kind.to_string()))?;
            current = Arc::clone(bridge.downstream());
        }

        Ok(current)
    }

    /// Attach `sink` to `key` in `media_type`
    pub async fn play(
        &self,
        key: &StreamKey,
        media_type: MediaType,
        sink: Arc<MediaSink>,
    ) -> Result<Arc<MediaSource>> {
        let source = self.resolve(key, media_type).await?;
        source.add_media_sink(sink);
        Ok(source)
    }

    /// Run registry maintenance until `shutdown` resolves, then close
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tracing::info!(workers = self.workers.len(), "Media hub running");

        let cleanup_handle = self.registry.spawn_cleanup_task();
        shutdown.await;
        tracing::info!("Shutdown signal received");

        cleanup_handle.abort();
        self.close().await;
        Ok(())
    }

    /// Close every source, bridge and sink
    pub async fn close(&self) {
        self.registry.close().await;
    }
}
