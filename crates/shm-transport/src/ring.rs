//! Frame slot bookkeeping
//!
//! The producer cycles through N fixed-size slots laid out back-to-back in
//! shared memory. A slot stays unavailable from commit until the consumer's
//! processed acknowledgement comes back; a producer that finds its next slot
//! busy drops the frame instead of blocking the render thread.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};

/// Lifecycle of one frame slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Free for the writer
    Available,
    /// Written, waiting for the consumer
    Committed,
    /// Being read by the consumer
    Processing,
}

struct RingInner {
    states: Vec<SlotState>,
    next: usize,
    /// True while frames are being dropped; gates the overrun log
    dropping: bool,
}

/// Producer-side slot state machine
pub struct FrameRing {
    slot_size: usize,
    inner: Mutex<RingInner>,
    overruns: AtomicU64,
}

impl FrameRing {
    pub fn new(slots: usize, slot_size: usize) -> Self {
        Self {
            slot_size,
            inner: Mutex::new(RingInner {
                states: vec![SlotState::Available; slots],
                next: 0,
                dropping: false,
            }),
            overruns: AtomicU64::new(0),
        }
    }

    /// Size in bytes of one slot
    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    /// Number of slots
    pub fn slots(&self) -> usize {
        self.inner.lock().states.len()
    }

    /// Total region size the ring needs
    pub fn byte_len(&self) -> usize {
        self.slot_size * self.slots()
    }

    /// Byte offset of a slot within the region
    pub fn slot_offset(&self, index: usize) -> usize {
        index * self.slot_size
    }

    /// Claim the next slot for writing.
    ///
    /// Returns `None` (an overrun) when the next slot has not been released
    /// yet. Overruns are counted, and logged only when dropping starts.
    pub fn acquire(&self) -> Option<usize> {
        let mut inner = self.inner.lock();
        let index = inner.next;

        if inner.states[index] != SlotState::Available {
            self.overruns.fetch_add(1, Ordering::Relaxed);
            if !inner.dropping {
                inner.dropping = true;
                warn!(
                    slot = index,
                    "frame ring overrun, dropping frames until a slot frees up"
                );
            }
            return None;
        }

        if inner.dropping {
            inner.dropping = false;
            let dropped = self.overruns.load(Ordering::Relaxed);
            info!(total_dropped = dropped, "frame ring caught up, resuming");
        }

        Some(index)
    }

    /// Mark an acquired slot as written and advance to the next one.
    pub fn commit(&self, index: usize) {
        let mut inner = self.inner.lock();
        debug_assert_eq!(inner.states[index], SlotState::Available);
        inner.states[index] = SlotState::Committed;
        inner.next = (index + 1) % inner.states.len();
    }

    /// The consumer acknowledged a slot; make it writable again.
    pub fn release(&self, index: usize) {
        let mut inner = self.inner.lock();
        if index < inner.states.len() {
            inner.states[index] = SlotState::Available;
        }
    }

    /// Frames dropped because no slot was free
    pub fn overrun_count(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }
}
