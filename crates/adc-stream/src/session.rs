//! Device session context
//!
//! Everything the interrupt handlers and the pump share lives in one
//! [`SessionShared`] behind an `Arc`. Nothing here takes a lock.

use crate::aggregator::Aggregator;
use crate::loss::LossCounters;
use crate::pump::StreamPump;
use crate::transport::CompletionSignal;
use crate::{AcquisitionConfig, PumpConfig, ReferenceTracker, SessionError};
use ring_buffer::RingBuffer;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::info;

/// Sentinel for `wake_at` while the pump is not waiting
pub(crate) const NOT_WAITING: usize = usize::MAX;

/// Running totals for a session
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) blocks_reduced: AtomicU64,
    pub(crate) blocks_discarded: AtomicU64,
    pub(crate) overflows: AtomicU64,
    pub(crate) conversion_errors: AtomicU64,
    pub(crate) entries_sent: AtomicU64,
    pub(crate) entries_dropped: AtomicU64,
    pub(crate) sentinel_slots: AtomicU64,
    pub(crate) transfers_submitted: AtomicU64,
    pub(crate) transfers_rejected: AtomicU64,
    pub(crate) transfers_completed: AtomicU64,
    pub(crate) stale_completions: AtomicU64,
}

impl Counters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

pub(crate) struct SessionShared {
    pub(crate) loss: LossCounters,
    pub(crate) reference: ReferenceTracker,
    /// Signalled by the producer when the pump's threshold is reached
    pub(crate) data_ready: Notify,
    /// Signalled by the completion handler when the flag is cleared
    pub(crate) tx_idle: Notify,
    /// Entries the pump is waiting for, or [`NOT_WAITING`]
    pub(crate) wake_at: AtomicUsize,
    /// Id of the transfer in flight; 0 when idle
    pub(crate) in_flight: AtomicU32,
    pub(crate) stopped: AtomicBool,
    pub(crate) counters: Counters,
}

impl SessionShared {
    fn new(initial_reference: u32) -> Self {
        Self {
            loss: LossCounters::default(),
            reference: ReferenceTracker::new(initial_reference),
            data_ready: Notify::new(),
            tx_idle: Notify::new(),
            wake_at: AtomicUsize::new(NOT_WAITING),
            in_flight: AtomicU32::new(0),
            stopped: AtomicBool::new(false),
            counters: Counters::default(),
        }
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub(crate) fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            info!("Session stopped, no further transfers will be handed off");
        }
        self.data_ready.notify_one();
        self.tx_idle.notify_one();
    }
}

/// One device session: producer, pump and control handle over shared state
pub struct Session {
    aggregator: Aggregator,
    pump: StreamPump,
    handle: SessionHandle,
}

impl Session {
    /// Validate the configuration and wire up a fresh session
    pub fn open(acquisition: AcquisitionConfig, pump: PumpConfig) -> Result<Self, SessionError> {
        acquisition.validate()?;
        pump.validate()?;

        let ring = RingBuffer::new(acquisition.ring_capacity, acquisition.overflow_policy)?;
        let (producer, consumer) = ring.split();
        let shared = Arc::new(SessionShared::new(acquisition.initial_reference));

        info!(
            "Opening session: ring={} entries ({:?}), transfer={} bytes ({} slots)",
            acquisition.ring_capacity,
            acquisition.overflow_policy,
            pump.packet_bytes(),
            pump.packet_slots()
        );

        Ok(Self {
            aggregator: Aggregator::new(acquisition.layout, producer, Arc::clone(&shared)),
            pump: StreamPump::new(consumer, &pump, Arc::clone(&shared)),
            handle: SessionHandle { shared },
        })
    }

    /// Control handle for this session
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Split into the interrupt-side aggregator, the pump and the handle
    pub fn into_parts(self) -> (Aggregator, StreamPump, SessionHandle) {
        (self.aggregator, self.pump, self.handle)
    }
}

/// Cloneable handle to a running session
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<SessionShared>,
}

impl SessionHandle {
    /// Completion callback for the transport sink
    pub fn completion_signal(&self) -> CompletionSignal {
        CompletionSignal::new(Arc::clone(&self.shared))
    }

    /// Stop accepting new transfers (bus reset or disconnect)
    pub fn stop(&self) {
        self.shared.stop();
    }

    /// Whether the session has been stopped
    pub fn is_stopped(&self) -> bool {
        self.shared.is_stopped()
    }

    /// Whether a transfer has been handed off and not completed
    pub fn is_transmitting(&self) -> bool {
        self.shared.in_flight.load(Ordering::Acquire) != 0
    }

    /// Whether losses are waiting to be reported by the pump
    pub fn loss_pending(&self) -> bool {
        self.shared.loss.is_pending()
    }

    /// Current tracked reference value
    pub fn reference_value(&self) -> u32 {
        self.shared.reference.value()
    }

    /// Snapshot of the running totals
    pub fn stats(&self) -> SessionStats {
        let c = &self.shared.counters;
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        SessionStats {
            blocks_reduced: load(&c.blocks_reduced),
            blocks_discarded: load(&c.blocks_discarded),
            overflows: load(&c.overflows),
            conversion_errors: load(&c.conversion_errors),
            entries_sent: load(&c.entries_sent),
            entries_dropped: load(&c.entries_dropped),
            sentinel_slots: load(&c.sentinel_slots),
            transfers_submitted: load(&c.transfers_submitted),
            transfers_rejected: load(&c.transfers_rejected),
            transfers_completed: load(&c.transfers_completed),
            stale_completions: load(&c.stale_completions),
            reference_value: self.reference_value(),
        }
    }
}

/// Snapshot of session totals
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    /// Blocks reduced into an entry
    pub blocks_reduced: u64,
    /// Blocks ignored after the session stopped
    pub blocks_discarded: u64,
    /// Ring overflows (lapped or dropped entries)
    pub overflows: u64,
    /// Blocks replaced by the error entry
    pub conversion_errors: u64,
    /// Entries copied into transfers
    pub entries_sent: u64,
    /// Entries lost with rejected transfers
    pub entries_dropped: u64,
    /// Loss sentinels written in-band
    pub sentinel_slots: u64,
    pub transfers_submitted: u64,
    pub transfers_rejected: u64,
    pub transfers_completed: u64,
    /// Completions for a transfer that was not in flight
    pub stale_completions: u64,
    /// Tracked reference value at snapshot time
    pub reference_value: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChannelLayout, ConfigError};

    #[test]
    fn test_open_rejects_bad_layout() {
        let acquisition = AcquisitionConfig {
            layout: ChannelLayout {
                channels: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        let err = Session::open(acquisition, PumpConfig::default()).err();
        assert_eq!(
            err,
            Some(SessionError::Config(ConfigError::EmptyLayoutField("channels")))
        );
    }

    #[test]
    fn test_open_rejects_tiny_ring() {
        let acquisition = AcquisitionConfig {
            ring_capacity: 1,
            ..Default::default()
        };
        assert!(matches!(
            Session::open(acquisition, PumpConfig::default()),
            Err(SessionError::Ring(_))
        ));
    }

    #[test]
    fn test_fresh_session_state() {
        let session = Session::open(AcquisitionConfig::default(), PumpConfig::default()).unwrap();
        let handle = session.handle();

        assert!(!handle.is_stopped());
        assert!(!handle.is_transmitting());
        assert!(!handle.loss_pending());
        assert_eq!(handle.reference_value(), crate::defaults::INITIAL_REFERENCE);
        assert_eq!(handle.stats().transfers_submitted, 0);

        handle.stop();
        handle.stop();
        assert!(handle.is_stopped());
    }
}
