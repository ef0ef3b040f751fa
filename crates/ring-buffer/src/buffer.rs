//! Lock-Free Ring Buffer Implementation
//!
//! Slots are atomic words so a lapping producer can never tear an entry the
//! consumer is reading. Ordering contract:
//!
//! - producer: slot store, then `Release` store of the write index
//! - consumer: `Acquire` load of the write index, then slot load, then
//!   `Release` store of the read index
//! - producer under [`OverflowPolicy::DropNewest`] loads the read index with
//!   `Acquire`, so a slot is only reused after the consumer finished with it

use crate::{Entry, OverflowPolicy, PushOutcome, RingError};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Default buffer capacity (1024 entries)
pub const DEFAULT_CAPACITY: usize = 1024;

/// Lock-free SPSC ring buffer for reduced entries
pub struct RingBuffer {
    /// Pre-allocated storage, one packed entry per slot
    slots: Box<[AtomicU64]>,
    /// Capacity of the buffer
    capacity: usize,
    /// Behavior when the producer catches up with the consumer
    policy: OverflowPolicy,
    /// Write index, mutated by the producer only
    head: AtomicUsize,
    /// Read index, mutated by the consumer only
    tail: AtomicUsize,
    /// Total entries stored (for statistics)
    total_written: AtomicUsize,
}

impl RingBuffer {
    /// Create a new ring buffer with given capacity
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Result<Self, RingError> {
        if capacity < 2 {
            return Err(RingError::InvalidCapacity(capacity));
        }

        let slots: Vec<AtomicU64> = (0..capacity).map(|_| AtomicU64::new(0)).collect();
        Ok(Self {
            slots: slots.into_boxed_slice(),
            capacity,
            policy,
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            total_written: AtomicUsize::new(0),
        })
    }

    /// Split into the producer and consumer halves
    pub fn split(self) -> (Producer, Consumer) {
        let ring = Arc::new(self);
        (
            Producer {
                ring: Arc::clone(&ring),
            },
            Consumer { ring },
        )
    }

    /// Number of entries written but not yet read
    pub fn available(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        (head + self.capacity - tail) % self.capacity
    }

    /// Check if buffer is empty
    pub fn is_empty(&self) -> bool {
        self.available() == 0
    }

    /// Check if buffer is full
    pub fn is_full(&self) -> bool {
        self.available() == self.capacity - 1
    }

    /// Get the buffer capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get fill ratio (0.0 to 1.0)
    pub fn fill_ratio(&self) -> f64 {
        self.available() as f64 / self.capacity as f64
    }

    /// Get total entries stored (for statistics)
    pub fn total_written(&self) -> usize {
        self.total_written.load(Ordering::Relaxed)
    }

    fn push(&self, entry: Entry) -> PushOutcome {
        let head = self.head.load(Ordering::Relaxed);
        let next_head = (head + 1) % self.capacity;

        if self.policy == OverflowPolicy::DropNewest
            && next_head == self.tail.load(Ordering::Acquire)
        {
            return PushOutcome::Dropped;
        }

        self.slots[head].store(entry.pack(), Ordering::Relaxed);
        self.head.store(next_head, Ordering::Release);
        self.total_written.fetch_add(1, Ordering::Relaxed);

        if next_head == self.tail.load(Ordering::Acquire) {
            PushOutcome::Lapped
        } else {
            PushOutcome::Stored
        }
    }

    fn try_read(&self) -> Option<Entry> {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        if tail == head {
            return None;
        }

        let entry = Entry::unpack(self.slots[tail].load(Ordering::Relaxed));
        self.tail.store((tail + 1) % self.capacity, Ordering::Release);
        Some(entry)
    }
}

/// Write half of a [`RingBuffer`]; there is exactly one per buffer
pub struct Producer {
    ring: Arc<RingBuffer>,
}

impl Producer {
    /// Store an entry at the write index and publish it
    pub fn push(&mut self, entry: Entry) -> PushOutcome {
        self.ring.push(entry)
    }

    /// Number of entries written but not yet read
    pub fn available(&self) -> usize {
        self.ring.available()
    }

    /// Get the buffer capacity
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Get total entries stored
    pub fn total_written(&self) -> usize {
        self.ring.total_written()
    }
}

/// Read half of a [`RingBuffer`]; there is exactly one per buffer
pub struct Consumer {
    ring: Arc<RingBuffer>,
}

impl Consumer {
    /// Read the entry at the read index, if any. Never blocks.
    pub fn try_read(&mut self) -> Option<Entry> {
        self.ring.try_read()
    }

    /// Number of entries written but not yet read
    pub fn available(&self) -> usize {
        self.ring.available()
    }

    /// Slot the next [`try_read`](Self::try_read) reads from
    pub fn read_index(&self) -> usize {
        self.ring.tail.load(Ordering::Relaxed)
    }

    /// Check if buffer is empty
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Get the buffer capacity
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Get fill ratio (0.0 to 1.0)
    pub fn fill_ratio(&self) -> f64 {
        self.ring.fill_ratio()
    }
}
