//! Server configuration

use std::time::Duration;

use crate::bridge::BridgeConfig;
use crate::registry::RegistryConfig;
use crate::source::SourceConfig;

/// Hub configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Number of worker event loops
    pub workers: usize,

    /// Defaults for every source created by the hub
    pub source: SourceConfig,

    /// Bridge lifecycle
    pub bridge: BridgeConfig,

    /// Registry behaviour (resume window, cleanup, republish)
    pub registry: RegistryConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            source: SourceConfig::default(),
            bridge: BridgeConfig::default(),
            registry: RegistryConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Set the number of workers (at least one)
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Set source defaults
    pub fn source(mut self, source: SourceConfig) -> Self {
        self.source = source;
        self
    }

    /// Set bridge options
    pub fn bridge(mut self, bridge: BridgeConfig) -> Self {
        self.bridge = bridge;
        self
    }

    /// Set registry options
    pub fn registry(mut self, registry: RegistryConfig) -> Self {
        self.registry = registry;
        self
    }

    /// Set the ring capacity of every source
    pub fn ring_capacity(mut self, capacity: usize) -> Self {
        self.source = self.source.ring_capacity(capacity);
        self
    }

    /// Set how long an origin waits for its publisher to return
    pub fn stream_resume_timeout(mut self, timeout: Duration) -> Self {
        self.registry = self.registry.stream_resume_timeout(timeout);
        self
    }

    /// Set how long an unused bridge is kept
    pub fn bridge_idle_timeout(mut self, timeout: Duration) -> Self {
        self.bridge = self.bridge.idle_timeout(timeout);
        self
    }
}
