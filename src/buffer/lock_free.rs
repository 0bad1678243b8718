//! Single-writer packet ring with independent slot access
//!
//! The head counter is atomic and every slot is an atomically swapped
//! `Arc`, so neither readers on other workers nor the writer ever take a
//! lock. A reader validates what it finds by the packet's own index: a slot
//! that has been overwritten reports absence, never a newer or older packet.
//!
//! `clear()` swaps between two slabs:
//!
//! ```text
//!   active ──► slab[0]  (live packets)        slab[1]  (empty)
//!   clear():   active ──► slab[1]             slab[0] emptied
//! ```
//!
//! Readers that loaded the old slab index just before the swap may still
//! observe a retained packet; its index check keeps the result correct.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;

use super::PacketRing;
use crate::media::{MediaPacket, PacketRef};

struct Slab {
    slots: Box<[ArcSwapOption<MediaPacket>]>,
}

impl Slab {
    fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| ArcSwapOption::empty()).collect(),
        }
    }

    fn empty(&self) {
        for slot in self.slots.iter() {
            slot.store(None);
        }
    }
}

/// Ring buffer for one writer and many concurrent readers
pub struct LockFreeSeqPktBuf {
    slabs: [Slab; 2],
    active: AtomicUsize,
    next_index: AtomicU64,
    capacity: usize,
}

impl LockFreeSeqPktBuf {
    /// Create a ring with `capacity` slots (at least one)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slabs: [Slab::new(capacity), Slab::new(capacity)],
            active: AtomicUsize::new(0),
            next_index: AtomicU64::new(0),
            capacity,
        }
    }

    fn slot(&self, index: u64) -> usize {
        (index % self.capacity as u64) as usize
    }

    fn active_slab(&self) -> &Slab {
        &self.slabs[self.active.load(Ordering::Acquire)]
    }
}

impl PacketRing for LockFreeSeqPktBuf {
    fn push(&self, mut packet: MediaPacket) -> PacketRef {
        // Single writer: nobody else advances the head between load and store
        let index = self.next_index.load(Ordering::Relaxed);
        packet.index = index;

        let pkt = Arc::new(packet);
        self.active_slab().slots[self.slot(index)].store(Some(Arc::clone(&pkt)));

        // Publish only after the slot holds the packet
        self.next_index.store(index + 1, Ordering::Release);
        pkt
    }

    fn get(&self, index: u64) -> Option<PacketRef> {
        if index >= self.next_index.load(Ordering::Acquire) {
            return None;
        }

        self.active_slab().slots[self.slot(index)]
            .load_full()
            .filter(|pkt| pkt.index == index)
    }

    fn latest_index(&self) -> u64 {
        self.next_index.load(Ordering::Acquire)
    }

    fn clear(&self) {
        let retired = self.active.load(Ordering::Acquire);
        let fresh = 1 - retired;

        self.slabs[fresh].empty();
        self.active.store(fresh, Ordering::Release);
        self.slabs[retired].empty();
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}
