//! Translator registry and bridge construction

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::RwLock;

use super::config::BridgeConfig;
use super::node::MediaBridge;
use super::translator::{BridgeKind, Passthrough, Translator};
use crate::error::{Error, Result};
use crate::media::{MediaType, StreamKey};
use crate::source::MediaSource;

type TranslatorCtor = Arc<dyn Fn() -> Box<dyn Translator> + Send + Sync>;

/// Builds bridges for registered, enabled translations
pub struct BridgeFactory {
    config: BridgeConfig,
    translators: RwLock<HashMap<BridgeKind, TranslatorCtor>>,
}

impl BridgeFactory {
    /// Factory with no translations registered
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            translators: RwLock::new(HashMap::new()),
        }
    }

    /// Factory with the RTMP/FLV passthrough pair registered
    pub fn with_defaults(config: BridgeConfig) -> Self {
        let factory = Self::new(config);
        let pairs = [
            BridgeKind::new(MediaType::Rtmp, MediaType::Flv),
            BridgeKind::new(MediaType::Flv, MediaType::Rtmp),
        ];
        let mut translators = factory.translators.write();
        for kind in pairs {
            translators.insert(kind, Arc::new(|| Box::new(Passthrough) as Box<dyn Translator>));
        }
        drop(translators);
        factory
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Register (or replace) the translator for `kind`
    pub fn register<F>(&self, kind: BridgeKind, ctor: F) -> Result<()>
    where
        F: Fn() -> Box<dyn Translator> + Send + Sync + 'static,
    {
        if kind.from == kind.to {
            return Err(Error::InvalidBridgeKind(kind.to_string()));
        }

        let replaced = self.translators.write().insert(kind, Arc::new(ctor)).is_some();
        tracing::debug!(bridge = %kind, replaced, "Translator registered");
        Ok(())
    }

    /// Whether a bridge of `kind` can be created
    pub fn supports(&self, kind: &BridgeKind) -> bool {
        !self.config.is_disabled(kind) && self.translators.read().contains_key(kind)
    }

    /// Registered, enabled translations
    pub fn kinds(&self) -> Vec<BridgeKind> {
        let mut kinds: Vec<BridgeKind> = self
            .translators
            .read()
            .keys()
            .filter(|kind| !self.config.is_disabled(kind))
            .copied()
            .collect();
        kinds.sort_by_key(|kind| kind.to_string());
        kinds
    }

    /// Shortest chain of translations from `from` to `to`
    ///
    /// Empty when the types already match, `None` when unreachable.
    pub fn route(&self, from: MediaType, to: MediaType) -> Option<Vec<BridgeKind>> {
        if from == to {
            return Some(Vec::new());
        }

        let kinds = self.kinds();
        let mut previous: HashMap<MediaType, BridgeKind> = HashMap::new();
        let mut seen: HashSet<MediaType> = HashSet::from([from]);
        let mut queue = VecDeque::from([from]);

        while let Some(current) = queue.pop_front() {
            for kind in kinds.iter().filter(|kind| kind.from == current) {
                if !seen.insert(kind.to) {
                    continue;
                }
                previous.insert(kind.to, *kind);

                if kind.to == to {
                    let mut chain = Vec::new();
                    let mut at = to;
                    while let Some(step) = previous.get(&at) {
                        chain.push(*step);
                        at = step.from;
                    }
                    chain.reverse();
                    return Some(chain);
                }
                queue.push_back(kind.to);
            }
        }

        None
    }

    /// Build a bridge reading from `upstream`
    ///
    /// `None` when the kind is unknown, disabled, or does not start at the
    /// upstream's media type. The bridge is not attached yet; the upstream
    /// source does that once it has recorded the bridge.
    pub fn create(
        &self,
        kind: BridgeKind,
        upstream: &Arc<MediaSource>,
        domain: &str,
        app: &str,
        stream: &str,
    ) -> Option<Arc<MediaBridge>> {
        if kind.from != upstream.media_type() || self.config.is_disabled(&kind) {
            return None;
        }
        let ctor = self.translators.read().get(&kind).cloned()?;

        Some(MediaBridge::new(
            kind,
            ctor(),
            StreamKey::new(domain, app, stream),
            upstream.context().clone(),
            self.config.clone(),
        ))
    }
}

impl std::fmt::Debug for BridgeFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeFactory")
            .field("kinds", &self.kinds())
            .field("config", &self.config)
            .finish()
    }
}
