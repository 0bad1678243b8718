//! Keyframe index for fast join
//!
//! A new sink must start at a group-of-pictures boundary, otherwise the
//! decoder renders garbage until the next keyframe. The index remembers the
//! ring positions of recent sync points so the join point can be computed
//! without scanning the ring.

use std::collections::VecDeque;

use super::PacketRing;

/// Which retained keyframe a joining sink starts from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinPolicy {
    /// Oldest retained keyframe: longest decodable catch-up
    #[default]
    OldestKeyframe,
    /// Newest retained keyframe: lowest latency
    LatestKeyframe,
}

/// Bounded circular buffer of keyframe indices
#[derive(Debug)]
pub struct KeyframeIndex {
    indices: VecDeque<u64>,
    capacity: usize,
}

impl KeyframeIndex {
    /// Create an index remembering at most `capacity` keyframes
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            indices: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record a keyframe at `index`
    pub fn push(&mut self, index: u64) {
        if self.indices.len() == self.capacity {
            self.indices.pop_front();
        }
        self.indices.push_back(index);
    }

    /// Drop entries the ring no longer holds
    pub fn prune(&mut self, ring: &dyn PacketRing) {
        while let Some(&front) = self.indices.front() {
            if ring.get(front).is_some() {
                break;
            }
            self.indices.pop_front();
        }
    }

    /// Keyframe a joining sink should start from, if any is still retained
    pub fn join_point(&self, ring: &dyn PacketRing, policy: JoinPolicy) -> Option<u64> {
        let retained = |index: &&u64| ring.get(**index).is_some();
        match policy {
            JoinPolicy::OldestKeyframe => self.indices.iter().find(retained).copied(),
            JoinPolicy::LatestKeyframe => self.indices.iter().rev().find(retained).copied(),
        }
    }

    /// Most recent keyframe index, retained or not
    pub fn last(&self) -> Option<u64> {
        self.indices.back().copied()
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn clear(&mut self) {
        self.indices.clear();
    }
}
