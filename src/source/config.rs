//! Source configuration

use crate::buffer::{JoinPolicy, RingKind};

/// Per-source buffering and delivery options
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Packets retained for catch-up
    pub ring_capacity: usize,

    /// Ring implementation
    pub ring_kind: RingKind,

    /// Keyframe positions remembered for fast join
    pub keyframe_capacity: usize,

    /// Packets handed to a lazy sink per pull
    pub sink_batch_size: usize,

    /// Pending packets an eager sink may queue before overflow
    pub eager_queue_capacity: usize,

    /// Where a joining sink starts
    pub join_policy: JoinPolicy,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            ring_capacity: 1024,
            ring_kind: RingKind::LockFree,
            keyframe_capacity: 32,
            sink_batch_size: 64,
            eager_queue_capacity: 256,
            join_policy: JoinPolicy::OldestKeyframe,
        }
    }
}

impl SourceConfig {
    /// Set the ring capacity
    pub fn ring_capacity(mut self, capacity: usize) -> Self {
        self.ring_capacity = capacity.max(1);
        self
    }

    /// Select the ring implementation
    pub fn ring_kind(mut self, kind: RingKind) -> Self {
        self.ring_kind = kind;
        self
    }

    /// Set how many keyframe positions are remembered
    pub fn keyframe_capacity(mut self, capacity: usize) -> Self {
        self.keyframe_capacity = capacity.max(1);
        self
    }

    /// Set the lazy sink batch size
    pub fn sink_batch_size(mut self, size: usize) -> Self {
        self.sink_batch_size = size.max(1);
        self
    }

    /// Set the eager sink queue capacity
    pub fn eager_queue_capacity(mut self, capacity: usize) -> Self {
        self.eager_queue_capacity = capacity.max(1);
        self
    }

    /// Set the join policy
    pub fn join_policy(mut self, policy: JoinPolicy) -> Self {
        self.join_policy = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SourceConfig::default();

        assert_eq!(config.ring_capacity, 1024);
        assert_eq!(config.ring_kind, RingKind::LockFree);
        assert_eq!(config.join_policy, JoinPolicy::OldestKeyframe);
    }

    #[test]
    fn test_builder_clamps_zero() {
        let config = SourceConfig::default()
            .ring_capacity(0)
            .sink_batch_size(0)
            .eager_queue_capacity(0)
            .keyframe_capacity(0);

        assert_eq!(config.ring_capacity, 1);
        assert_eq!(config.sink_batch_size, 1);
        assert_eq!(config.eager_queue_capacity, 1);
        assert_eq!(config.keyframe_capacity, 1);
    }

    #[test]
    fn test_builder_chaining() {
        let config = SourceConfig::default()
            .ring_capacity(256)
            .ring_kind(RingKind::Locked)
            .join_policy(JoinPolicy::LatestKeyframe);

        assert_eq!(config.ring_capacity, 256);
        assert_eq!(config.ring_kind, RingKind::Locked);
        assert_eq!(config.join_policy, JoinPolicy::LatestKeyframe);
    }
}
