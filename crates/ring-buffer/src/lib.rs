//! Lock-Free Ring Buffer
//!
//! Single-producer/single-consumer ring buffer for reduced ADC entries.
//! The producer half is meant to live in interrupt context, the consumer
//! half in the drain task.

mod buffer;

pub use buffer::{Consumer, Producer, RingBuffer, DEFAULT_CAPACITY};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Ring buffer errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RingError {
    /// Capacity too small to distinguish full from empty
    #[error("Ring capacity must be at least 2, got {0}")]
    InvalidCapacity(usize),
}

/// One reduced sample stored in the ring buffer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Primary measurement (averaged signal channels)
    pub primary: u16,
    /// Reference channel value for this block
    pub reference: u16,
    /// Auxiliary channel value
    pub auxiliary: u16,
}

impl Entry {
    /// Entry written in place of data when a block could not be converted
    pub const ERROR: Entry = Entry {
        primary: 0,
        reference: 0,
        auxiliary: 0,
    };

    /// Entry carrying only a primary value
    pub const fn primary(value: u16) -> Self {
        Self {
            primary: value,
            reference: 0,
            auxiliary: 0,
        }
    }

    /// Whether this is the error entry
    pub fn is_error(&self) -> bool {
        *self == Self::ERROR
    }

    pub(crate) fn pack(self) -> u64 {
        u64::from(self.primary)
            | (u64::from(self.reference) << 16)
            | (u64::from(self.auxiliary) << 32)
    }

    pub(crate) fn unpack(word: u64) -> Self {
        Self {
            primary: word as u16,
            reference: (word >> 16) as u16,
            auxiliary: (word >> 32) as u16,
        }
    }
}

/// What the producer does when the buffer is full
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Write anyway; the oldest unread slot is lost
    #[default]
    OverwriteOldest,
    /// Reject the new entry; unread data is kept
    DropNewest,
}

/// Result of a single producer push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Entry stored, no overflow
    Stored,
    /// Entry stored but the write index caught up with the read index
    Lapped,
    /// Buffer full, entry discarded
    Dropped,
}

impl PushOutcome {
    /// Whether this push has to be reported as an overflow
    pub fn is_overflow(&self) -> bool {
        !matches!(self, PushOutcome::Stored)
    }
}
