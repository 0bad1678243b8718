//! Source registry implementation
//!
//! Maps stream keys to origin sources. Publishing goes through
//! [`SourceManager::claim`], which creates, resumes or rebinds the origin in
//! one step under the write lock so two publishers can never both win.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;

use super::config::{RegistryConfig, RepublishPolicy};
use super::error::RegistryError;
use crate::media::StreamKey;
use crate::source::MediaSource;

/// Outcome of a successful publish claim
#[derive(Debug, Clone)]
pub struct PublishClaim {
    /// Origin now bound to the claiming session
    pub source: Arc<MediaSource>,
    /// Session that was bound before, when the claim replaced it
    pub previous_session: Option<u64>,
    /// True when an unbound origin was picked up within its resume window
    pub resumed: bool,
}

/// Central registry for all origin sources
///
/// Thread-safe via `RwLock`; at most one origin per stream key.
pub struct SourceManager {
    sources: RwLock<HashMap<StreamKey, Arc<MediaSource>>>,
    config: RegistryConfig,
    closed: AtomicBool,
}

impl SourceManager {
    /// Create a registry with default configuration
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a registry with custom configuration
    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            sources: RwLock::new(HashMap::new()),
            config,
            closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Register an origin source under its key
    ///
    /// Fails if the key is taken, the source is not an origin, or the
    /// registry is closed.
    pub async fn add_source(self: &Arc<Self>, source: Arc<MediaSource>) -> Result<(), RegistryError> {
        let key = source.key().clone();
        if !source.is_origin() {
            return Err(RegistryError::NotOrigin(key));
        }

        let mut sources = self.sources.write().await;
        if self.is_closed() {
            return Err(RegistryError::RegistryClosed);
        }
        if sources.contains_key(&key) {
            return Err(RegistryError::StreamAlreadyPublishing(key));
        }

        source.set_registry(Arc::downgrade(self));
        sources.insert(key.clone(), source);

        tracing::info!(stream = %key, sources = sources.len(), "Source registered");
        Ok(())
    }

    /// Remove the source registered under `key`
    ///
    /// The caller decides whether to close it.
    pub async fn remove_source(&self, key: &StreamKey) -> Option<Arc<MediaSource>> {
        let removed = self.sources.write().await.remove(key);
        if removed.is_some() {
            tracing::info!(stream = %key, "Source removed");
        }
        removed
    }

    /// Remove `key` only if it still maps to source `id`
    pub(crate) async fn remove_source_if(&self, key: &StreamKey, id: u64) -> bool {
        let mut sources = self.sources.write().await;
        if sources.get(key).is_some_and(|source| source.id() == id) {
            sources.remove(key);
            tracing::info!(stream = %key, source = id, "Source deregistered");
            true
        } else {
            false
        }
    }

    pub async fn get_source(&self, key: &StreamKey) -> Option<Arc<MediaSource>> {
        self.sources.read().await.get(key).cloned()
    }

    /// Bind `session_id` as the publisher of `key`
    ///
    /// - no live source: `make` builds a new origin, which is registered
    /// - unbound source (publisher reconnecting): the session resumes it
    /// - bound source: rejected or rebound according to the republish policy
    pub async fn claim<F>(
        self: &Arc<Self>,
        key: &StreamKey,
        session_id: u64,
        make: F,
    ) -> Result<PublishClaim, RegistryError>
    where
        F: FnOnce() -> Arc<MediaSource>,
    {
        let mut sources = self.sources.write().await;
        if self.is_closed() {
            return Err(RegistryError::RegistryClosed);
        }

        if let Some(existing) = sources.get(key).cloned() {
            if !existing.is_closed() {
                return match existing.session() {
                    None => {
                        existing.bind_session(session_id);
                        tracing::info!(stream = %key, session_id, "Publisher resumed stream");
                        Ok(PublishClaim {
                            source: existing,
                            previous_session: None,
                            resumed: true,
                        })
                    }
                    Some(current) if current == session_id => Ok(PublishClaim {
                        source: existing,
                        previous_session: Some(current),
                        resumed: false,
                    }),
                    Some(current) => match self.config.republish_policy {
                        RepublishPolicy::Reject => {
                            tracing::warn!(
                                stream = %key,
                                session_id,
                                current,
                                "Publish rejected, stream already has a publisher"
                            );
                            Err(RegistryError::StreamAlreadyPublishing(key.clone()))
                        }
                        RepublishPolicy::Replace => {
                            let previous = existing.bind_session(session_id);
                            tracing::info!(
                                stream = %key,
                                session_id,
                                previous = ?previous,
                                "Publisher replaced"
                            );
                            Ok(PublishClaim {
                                source: existing,
                                previous_session: previous,
                                resumed: false,
                            })
                        }
                    },
                };
            }

            sources.remove(key);
            tracing::debug!(stream = %key, "Replacing closed source");
        }

        let source = make();
        if !source.is_origin() {
            return Err(RegistryError::NotOrigin(key.clone()));
        }
        source.bind_session(session_id);
        source.set_registry(Arc::downgrade(self));
        sources.insert(key.clone(), Arc::clone(&source));

        tracing::info!(stream = %key, session_id, "Publisher registered (new stream)");

        Ok(PublishClaim {
            source,
            previous_session: None,
            resumed: false,
        })
    }

    /// All registered sources, ordered by key
    pub async fn sources(&self) -> Vec<Arc<MediaSource>> {
        let mut sources: Vec<Arc<MediaSource>> =
            self.sources.read().await.values().cloned().collect();
        sources.sort_by_key(|source| source.key().to_string());
        sources
    }

    /// Get total number of sources
    pub async fn source_count(&self) -> usize {
        self.sources.read().await.len()
    }

    /// Run cleanup once
    ///
    /// Removes and closes sources that are already closed or have been
    /// without a publisher longer than `idle_source_timeout`.
    pub async fn cleanup(&self) {
        let expired: Vec<Arc<MediaSource>> = {
            let mut sources = self.sources.write().await;
            let keys: Vec<StreamKey> = sources
                .iter()
                .filter(|(_, source)| {
                    source.is_closed()
                        || source
                            .unbound_for()
                            .is_some_and(|idle| idle > self.config.idle_source_timeout)
                })
                .map(|(key, _)| key.clone())
                .collect();

            keys.iter().filter_map(|key| sources.remove(key)).collect()
        };

        for source in expired {
            tracing::info!(stream = %source.key(), "Source removed by cleanup");
            source.close().await;
        }
    }

    /// Spawn background cleanup task
    ///
    /// The task exits once the registry is closed.
    pub fn spawn_cleanup_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        let interval = registry.config.cleanup_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if registry.is_closed() {
                    break;
                }
                registry.cleanup().await;
            }
        })
    }

    /// Close every source and refuse further registrations
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let sources: Vec<Arc<MediaSource>> = {
            let mut sources = self.sources.write().await;
            sources.drain().map(|(_, source)| source).collect()
        };

        tracing::info!(sources = sources.len(), "Closing registry");

        for source in sources {
            source.close().await;
        }
    }

    /// JSON view of every source, each taken on its own worker
    pub async fn sync_to_json(&self) -> crate::Result<serde_json::Value> {
        let sources = self.sources().await;
        let mut items = Vec::with_capacity(sources.len());
        for source in &sources {
            items.push(source.sync_to_json().await?);
        }

        let count = items.len();
        Ok(serde_json::json!({
            "count": count,
            "sources": items,
        }))
    }
}

impl Default for SourceManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::media::MediaType;
    use crate::testing::{context, key, keyframe, settle};

    fn make(stream: &str) -> impl FnOnce() -> Arc<MediaSource> {
        let key = key(stream);
        move || MediaSource::origin(key, MediaType::Rtmp, context())
    }

    #[tokio::test]
    async fn test_claim_new_stream() {
        let registry = Arc::new(SourceManager::new());
        let key = key("test_stream");

        let claim = registry.claim(&key, 1, make("test_stream")).await.unwrap();
        assert!(!claim.resumed);
        assert_eq!(claim.previous_session, None);
        assert_eq!(claim.source.session(), Some(1));
        assert_eq!(registry.source_count().await, 1);

        // Can't claim with another publisher
        let result = registry.claim(&key, 2, make("test_stream")).await;
        assert!(matches!(
            result,
            Err(RegistryError::StreamAlreadyPublishing(_))
        ));
    }

    #[tokio::test]
    async fn test_claim_replace_policy() {
        let config = RegistryConfig::default().republish_policy(RepublishPolicy::Replace);
        let registry = Arc::new(SourceManager::with_config(config));
        let key = key("test_stream");

        let first = registry.claim(&key, 1, make("test_stream")).await.unwrap();
        first.source.on_video_packet(keyframe(0)).unwrap();

        let second = registry.claim(&key, 2, make("test_stream")).await.unwrap();
        assert!(Arc::ptr_eq(&first.source, &second.source));
        assert_eq!(second.previous_session, Some(1));
        assert_eq!(second.source.session(), Some(2));
        // New upstream starts from an empty ring
        assert!(!second.source.is_stream_ready());
    }

    #[tokio::test]
    async fn test_add_source_rejects_duplicates_and_derived() {
        let registry = Arc::new(SourceManager::new());

        let source = MediaSource::origin(key("a"), MediaType::Rtmp, context());
        registry.add_source(Arc::clone(&source)).await.unwrap();

        let duplicate = MediaSource::origin(key("a"), MediaType::Rtmp, context());
        assert!(matches!(
            registry.add_source(duplicate).await,
            Err(RegistryError::StreamAlreadyPublishing(_))
        ));

        let derived = MediaSource::derived(key("b"), MediaType::Flv, context());
        assert!(matches!(
            registry.add_source(derived).await,
            Err(RegistryError::NotOrigin(_))
        ));

        let found = registry.get_source(&key("a")).await.unwrap();
        assert!(Arc::ptr_eq(&found, &source));
        assert!(registry.get_source(&key("b")).await.is_none());
    }

    #[tokio::test]
    async fn test_close_deregisters_origin() {
        let registry = Arc::new(SourceManager::new());
        let claim = registry.claim(&key("s"), 1, make("s")).await.unwrap();

        claim.source.close().await;
        assert_eq!(registry.source_count().await, 0);

        // The key is free again
        registry.claim(&key("s"), 2, make("s")).await.unwrap();
        assert_eq!(registry.source_count().await, 1);
    }

    #[tokio::test]
    async fn test_remove_source_if_checks_identity() {
        let registry = Arc::new(SourceManager::new());
        let claim = registry.claim(&key("s"), 1, make("s")).await.unwrap();

        assert!(!registry.remove_source_if(&key("s"), claim.source.id() + 1000).await);
        assert!(registry.remove_source_if(&key("s"), claim.source.id()).await);
        assert!(registry.remove_source(&key("s")).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_window() {
        let config = RegistryConfig::default().stream_resume_timeout(Duration::from_millis(100));
        let registry = Arc::new(SourceManager::with_config(config));
        let key = key("test_stream");

        let claim = registry.claim(&key, 1, make("test_stream")).await.unwrap();
        let timeout = registry.config().stream_resume_timeout;
        assert!(claim.source.unbind_session(1, timeout));

        // Publisher comes back within the window
        tokio::time::sleep(Duration::from_millis(50)).await;
        let resumed = registry.claim(&key, 2, make("test_stream")).await.unwrap();
        assert!(resumed.resumed);
        assert!(Arc::ptr_eq(&claim.source, &resumed.source));

        tokio::time::sleep(Duration::from_millis(200)).await;
        settle().await;
        assert!(!claim.source.is_closed());
        assert_eq!(registry.source_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_timeout_removes_source() {
        let config = RegistryConfig::default().stream_resume_timeout(Duration::from_millis(100));
        let registry = Arc::new(SourceManager::with_config(config));
        let key = key("test_stream");

        let claim = registry.claim(&key, 1, make("test_stream")).await.unwrap();
        claim
            .source
            .unbind_session(1, registry.config().stream_resume_timeout);

        tokio::time::sleep(Duration::from_millis(150)).await;
        settle().await;

        assert!(claim.source.is_closed());
        assert_eq!(registry.source_count().await, 0);

        // A later publisher gets a fresh source
        let fresh = registry.claim(&key, 2, make("test_stream")).await.unwrap();
        assert!(!fresh.resumed);
        assert!(!Arc::ptr_eq(&claim.source, &fresh.source));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_reaps_unbound_sources() {
        let config = RegistryConfig::default().idle_source_timeout(Duration::from_millis(100));
        let registry = Arc::new(SourceManager::with_config(config));

        let source = MediaSource::origin(key("idle"), MediaType::Rtmp, context());
        registry.add_source(Arc::clone(&source)).await.unwrap();
        registry.claim(&key("live"), 1, make("live")).await.unwrap();

        registry.cleanup().await;
        assert_eq!(registry.source_count().await, 2);

        tokio::time::sleep(Duration::from_millis(150)).await;
        registry.cleanup().await;

        assert_eq!(registry.source_count().await, 1);
        assert!(source.is_closed());
        assert!(registry.get_source(&key("live")).await.is_some());
    }

    #[tokio::test]
    async fn test_close_registry() {
        let registry = Arc::new(SourceManager::new());
        let claim = registry.claim(&key("s"), 1, make("s")).await.unwrap();

        registry.close().await;
        assert!(claim.source.is_closed());
        assert_eq!(registry.source_count().await, 0);
        assert!(matches!(
            registry.claim(&key("t"), 2, make("t")).await,
            Err(RegistryError::RegistryClosed)
        ));
    }

    #[tokio::test]
    async fn test_sync_to_json() {
        let registry = Arc::new(SourceManager::new());
        let claim = registry.claim(&key("s"), 7, make("s")).await.unwrap();
        claim.source.on_video_packet(keyframe(0)).unwrap();

        let json = registry.sync_to_json().await.unwrap();
        assert_eq!(json["count"], 1);
        assert_eq!(json["sources"][0]["session"], 7);
        assert_eq!(json["sources"][0]["status"], "OK");
        assert_eq!(json["sources"][0]["key"]["stream"], "s");
    }
}
