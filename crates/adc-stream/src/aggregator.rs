//! Interrupt-context producer
//!
//! Called from the ADC completion interrupt. Bounded work per call, no
//! allocation, no blocking, no logging.

use crate::session::{Counters, SessionShared, NOT_WAITING};
use crate::{ChannelLayout, ConversionFault};
use ring_buffer::{Entry, Producer, PushOutcome};
use std::sync::atomic::{fence, Ordering};
use std::sync::Arc;
use tracing::debug;

/// What happened to one hardware block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOutcome {
    /// Entry published
    Stored,
    /// Entry published, but an unread entry was lost
    Overflowed,
    /// Buffer full, entry dropped and counted
    Dropped,
    /// Conversion fault; error entry published in its place
    Faulted(ConversionFault),
    /// Session stopped, block ignored
    Discarded,
}

/// Reduces raw blocks into entries and publishes them
pub struct Aggregator {
    layout: ChannelLayout,
    producer: Producer,
    shared: Arc<SessionShared>,
}

impl Aggregator {
    pub(crate) fn new(layout: ChannelLayout, producer: Producer, shared: Arc<SessionShared>) -> Self {
        debug!(
            "Aggregator ready: {} channels x {} rows per block",
            layout.channels, layout.rows_per_block
        );
        Self {
            layout,
            producer,
            shared,
        }
    }

    /// Sample-ready callback: reduce one block and publish the entry
    pub fn on_block_ready(&mut self, raw: &[u16]) -> BlockOutcome {
        if self.shared.is_stopped() {
            Counters::bump(&self.shared.counters.blocks_discarded);
            return BlockOutcome::Discarded;
        }

        let expected = self.layout.block_len();
        if raw.len() != expected {
            return self.on_conversion_error(ConversionFault::BlockLength {
                expected,
                actual: raw.len(),
            });
        }

        let entry = self.layout.reduce(raw);
        self.shared.reference.update(entry.reference);
        Counters::bump(&self.shared.counters.blocks_reduced);

        match self.publish(entry) {
            PushOutcome::Stored => BlockOutcome::Stored,
            PushOutcome::Lapped => BlockOutcome::Overflowed,
            PushOutcome::Dropped => BlockOutcome::Dropped,
        }
    }

    /// Conversion-error callback: publish the error entry and count the fault
    pub fn on_conversion_error(&mut self, fault: ConversionFault) -> BlockOutcome {
        if self.shared.is_stopped() {
            Counters::bump(&self.shared.counters.blocks_discarded);
            return BlockOutcome::Discarded;
        }

        self.shared.loss.record_conversion_error();
        Counters::bump(&self.shared.counters.conversion_errors);
        self.publish(Entry::ERROR);
        BlockOutcome::Faulted(fault)
    }

    /// Entries waiting to be drained
    pub fn available(&self) -> usize {
        self.producer.available()
    }

    /// Current tracked reference value
    pub fn reference_value(&self) -> u32 {
        self.shared.reference.value()
    }

    fn publish(&mut self, entry: Entry) -> PushOutcome {
        let outcome = self.producer.push(entry);
        if outcome.is_overflow() {
            self.shared.loss.record_overflow();
            Counters::bump(&self.shared.counters.overflows);
        }

        // Pairs with the fence in the pump between its `wake_at` store and
        // its availability check: one side always sees the other.
        fence(Ordering::SeqCst);
        let wake_at = self.shared.wake_at.load(Ordering::Relaxed);
        if wake_at != NOT_WAITING
            && (self.shared.loss.is_pending() || self.producer.available() >= wake_at)
        {
            self.shared.data_ready.notify_one();
        }
        outcome
    }
}
