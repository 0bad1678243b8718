//! Packet history for catch-up delivery and fast join
//!
//! A source admits every packet into a fixed-capacity ring addressed by
//! `index % capacity`. Readers ask for an index and either get exactly that
//! packet or nothing:
//!
//! ```text
//!   latest_index() = 12, capacity = 8
//!
//!   slot:   0    1    2    3    4    5    6    7
//!   index: [8]  [9]  [10] [11] [4]  [5]  [6]  [7]
//!                          ▲                 ▲
//!                     newest (11)       oldest (4)
//!
//!   get(3)  -> None   (overwritten by 11)
//!   get(12) -> None   (not admitted yet)
//! ```
//!
//! Absence is never an error: a reader that finds its next index gone
//! resynchronizes from the keyframe index.

pub mod keyframe;
pub mod lock_free;
pub mod sequence;

pub use keyframe::{JoinPolicy, KeyframeIndex};
pub use lock_free::LockFreeSeqPktBuf;
pub use sequence::SequencePktBuf;

use crate::media::{MediaPacket, PacketRef};

/// Bounded, index-addressed packet history
///
/// Writes are single-writer: only the owning source admits packets. Reads may
/// come from any thread.
pub trait PacketRing: Send + Sync {
    /// Admit a packet, assigning it the next index
    fn push(&self, packet: MediaPacket) -> PacketRef;

    /// Packet stored at `index`, if it is still retained
    fn get(&self, index: u64) -> Option<PacketRef>;

    /// One past the newest admitted index
    ///
    /// Monotonic non-decreasing, including across [`PacketRing::clear`].
    fn latest_index(&self) -> u64;

    /// Drop all retained packets
    ///
    /// Must not race with [`PacketRing::push`]; the owning source only calls
    /// it while holding its state lock.
    fn clear(&self);

    /// Number of slots
    fn capacity(&self) -> usize;

    /// Admit a packet and return its index
    fn add(&self, packet: MediaPacket) -> u64 {
        self.push(packet).index
    }

    /// Oldest index that wraparound has not overwritten yet
    fn oldest_index(&self) -> u64 {
        self.latest_index().saturating_sub(self.capacity() as u64)
    }

    /// Contiguous run of at most `max` packets starting exactly at `from`
    ///
    /// Empty when `from` itself is absent. Stops early at the first missing
    /// index so the caller never sees a hole inside a batch.
    fn get_pkts(&self, from: u64, max: usize) -> Vec<PacketRef> {
        let end = self.latest_index().min(from.saturating_add(max as u64));
        let mut batch = Vec::new();

        for index in from..end {
            match self.get(index) {
                Some(pkt) => batch.push(pkt),
                None => break,
            }
        }

        batch
    }
}

/// Which ring implementation a source uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RingKind {
    /// One mutex around the whole ring
    Locked,
    /// Atomically swapped slots, an atomic head and a two-slab clear
    #[default]
    LockFree,
}

/// Build a ring of the requested kind
pub fn new_ring(kind: RingKind, capacity: usize) -> Box<dyn PacketRing> {
    match kind {
        RingKind::Locked => Box::new(SequencePktBuf::new(capacity)),
        RingKind::LockFree => Box::new(LockFreeSeqPktBuf::new(capacity)),
    }
}
