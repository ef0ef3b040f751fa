//! Transport sink interface
//!
//! The pump moves each filled [`TransferBuffer`] into the sink inside a
//! [`Transfer`]. The sink reports completion through a [`CompletionSignal`]
//! carrying the transfer's id.

use crate::loss::LossMarker;
use crate::session::{Counters, SessionShared};
use crate::{TransportError, SLOT_WIDTH};
use std::num::NonZeroU32;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Accepts one outbound transfer at a time and transmits it asynchronously
pub trait TransportSink {
    /// Start transmitting `transfer`. Must not block; completion is reported
    /// later through the session's [`CompletionSignal`].
    fn submit(&mut self, transfer: Transfer) -> Result<(), TransportError>;
}

impl<S: TransportSink + ?Sized> TransportSink for &mut S {
    fn submit(&mut self, transfer: Transfer) -> Result<(), TransportError> {
        (**self).submit(transfer)
    }
}

impl<S: TransportSink + ?Sized> TransportSink for Box<S> {
    fn submit(&mut self, transfer: Transfer) -> Result<(), TransportError> {
        (**self).submit(transfer)
    }
}

/// Identifies one submitted transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransferId(NonZeroU32);

impl TransferId {
    pub(crate) fn new(raw: NonZeroU32) -> Self {
        Self(raw)
    }

    /// Raw id, never zero
    pub fn get(&self) -> u32 {
        self.0.get()
    }
}

/// Fixed-capacity outbound byte block, filled one slot at a time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferBuffer {
    bytes: Box<[u8]>,
    len: usize,
}

impl TransferBuffer {
    /// Empty buffer holding up to `capacity_bytes`
    pub fn new(capacity_bytes: usize) -> Self {
        Self {
            bytes: vec![0u8; capacity_bytes].into_boxed_slice(),
            len: 0,
        }
    }

    /// Append one little-endian slot; false if the buffer is full
    pub fn push_slot(&mut self, value: u16) -> bool {
        if self.is_full() {
            return false;
        }
        self.bytes[self.len..self.len + SLOT_WIDTH].copy_from_slice(&value.to_le_bytes());
        self.len += SLOT_WIDTH;
        true
    }

    /// Whether another slot would not fit
    pub fn is_full(&self) -> bool {
        self.len + SLOT_WIDTH > self.bytes.len()
    }

    /// Slots written so far
    pub fn len_slots(&self) -> usize {
        self.len / SLOT_WIDTH
    }

    /// Slots the buffer can hold
    pub fn capacity_slots(&self) -> usize {
        self.bytes.len() / SLOT_WIDTH
    }

    /// Filled bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    /// Filled slots decoded back to values
    pub fn slots(&self) -> impl Iterator<Item = u16> + '_ {
        self.as_bytes()
            .chunks_exact(SLOT_WIDTH)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
    }
}

/// One outbound transfer, owned by the sink once submitted
#[derive(Debug)]
pub struct Transfer {
    id: TransferId,
    payload: TransferBuffer,
    loss: Vec<LossMarker>,
}

impl Transfer {
    pub(crate) fn new(id: TransferId, payload: TransferBuffer, loss: Vec<LossMarker>) -> Self {
        Self { id, payload, loss }
    }

    /// Id to pass to [`CompletionSignal::complete`]
    pub fn id(&self) -> TransferId {
        self.id
    }

    /// Bytes to transmit
    pub fn payload(&self) -> &TransferBuffer {
        &self.payload
    }

    /// Slots that carry a loss sentinel instead of a sample
    pub fn loss_markers(&self) -> &[LossMarker] {
        &self.loss
    }
}

/// Completion callback handed to the transport sink.
///
/// Safe to call from interrupt context. Completions for a transfer that is
/// not the one in flight are ignored.
#[derive(Clone)]
pub struct CompletionSignal {
    shared: Arc<SessionShared>,
}

impl CompletionSignal {
    pub(crate) fn new(shared: Arc<SessionShared>) -> Self {
        Self { shared }
    }

    /// Mark transfer `id` complete. Returns false for duplicate or stale ids.
    pub fn complete(&self, id: TransferId) -> bool {
        let cleared = self
            .shared
            .in_flight
            .compare_exchange(id.get(), 0, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();

        if cleared {
            Counters::bump(&self.shared.counters.transfers_completed);
            self.shared.tx_idle.notify_one();
        } else {
            Counters::bump(&self.shared.counters.stale_completions);
        }
        cleared
    }
}
