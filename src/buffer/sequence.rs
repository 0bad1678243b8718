//! Mutex-guarded packet ring

use std::sync::Arc;

use parking_lot::Mutex;

use super::PacketRing;
use crate::media::{MediaPacket, PacketRef};

struct Inner {
    slots: Vec<Option<PacketRef>>,
    next_index: u64,
}

/// Ring buffer with a single lock around slots and head
///
/// Simple and obviously correct; readers and the writer serialize on the
/// same lock.
pub struct SequencePktBuf {
    inner: Mutex<Inner>,
    capacity: usize,
}

impl SequencePktBuf {
    /// Create a ring with `capacity` slots (at least one)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                slots: vec![None; capacity],
                next_index: 0,
            }),
            capacity,
        }
    }

    fn slot(&self, index: u64) -> usize {
        (index % self.capacity as u64) as usize
    }
}

impl PacketRing for SequencePktBuf {
    fn push(&self, mut packet: MediaPacket) -> PacketRef {
        let mut inner = self.inner.lock();
        let index = inner.next_index;
        packet.index = index;

        let pkt = Arc::new(packet);
        let slot = self.slot(index);
        inner.slots[slot] = Some(Arc::clone(&pkt));
        inner.next_index = index + 1;
        pkt
    }

    fn get(&self, index: u64) -> Option<PacketRef> {
        let inner = self.inner.lock();
        if index >= inner.next_index {
            return None;
        }

        inner.slots[self.slot(index)]
            .as_ref()
            .filter(|pkt| pkt.index == index)
            .cloned()
    }

    fn latest_index(&self) -> u64 {
        self.inner.lock().next_index
    }

    fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.slots.iter_mut().for_each(|slot| *slot = None);
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}
