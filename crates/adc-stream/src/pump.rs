//! Stream pump: drains the ring into transfers
//!
//! ```text
//! WaitingForData -> Draining -> WaitingForTransmit -> WaitingForData ...
//! ```
//!
//! The pump suspends only while waiting for data or for the previous
//! transfer to complete. Partial packets and the staged transfer are kept in
//! the pump, so dropping a pending [`StreamPump::step`] future loses nothing.

use crate::loss::{LossMarker, LossReport};
use crate::readout::{Measurement, MeasurementReadout};
use crate::session::{Counters, SessionShared, NOT_WAITING};
use crate::transport::{Transfer, TransferBuffer, TransferId, TransportSink};
use crate::{PumpConfig, PumpError, TransportError};
use ring_buffer::Consumer;
use std::num::NonZeroU32;
use std::sync::atomic::{fence, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Pump state machine position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpState {
    /// Parked until enough entries or a loss report are pending
    WaitingForData,
    /// Copying entries into the current packet
    Draining,
    /// Packet full, parked until the previous transfer completes
    WaitingForTransmit,
}

/// Result of one pump iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Transfer accepted by the sink
    Submitted(TransferId),
    /// Transfer refused by the sink and dropped
    Rejected(TransferId),
    /// Session stopped before a transfer could be handed off
    Stopped,
}

/// Cooperative drain task
pub struct StreamPump {
    consumer: Consumer,
    shared: Arc<SessionShared>,
    packet_bytes: usize,
    state: PumpState,
    filling: TransferBuffer,
    markers: Vec<LossMarker>,
    next_id: NonZeroU32,
}

impl StreamPump {
    pub(crate) fn new(consumer: Consumer, config: &PumpConfig, shared: Arc<SessionShared>) -> Self {
        let packet_bytes = config.packet_bytes();
        Self {
            consumer,
            shared,
            packet_bytes,
            state: PumpState::WaitingForData,
            filling: TransferBuffer::new(packet_bytes),
            markers: Vec::new(),
            next_id: NonZeroU32::MIN,
        }
    }

    /// Current state machine position
    pub fn state(&self) -> PumpState {
        self.state
    }

    /// Entries buffered in the ring
    pub fn available(&self) -> usize {
        self.consumer.available()
    }

    /// Drain every unread entry with all fields and take the pending losses.
    ///
    /// Entries already copied into a partial packet stay there.
    pub fn read_out(&mut self) -> MeasurementReadout {
        let mut measurements = Vec::with_capacity(self.consumer.available());
        loop {
            let index = self.consumer.read_index();
            let Some(entry) = self.consumer.try_read() else {
                break;
            };
            if entry.is_error() {
                warn!("{}: conversion error entry", index);
            } else {
                debug!(
                    "{}:{}-{}-{}",
                    index, entry.primary, entry.reference, entry.auxiliary
                );
            }
            measurements.push(Measurement { index, entry });
        }

        let losses = self.shared.loss.take();
        if losses.overflows > 0 {
            info!("Overflow: {}", losses.overflows);
        }
        MeasurementReadout {
            measurements,
            losses,
        }
    }

    /// Run until the session is stopped or the transport closes
    pub async fn run<S>(&mut self, sink: &mut S) -> Result<(), PumpError>
    where
        S: TransportSink + ?Sized,
    {
        info!(
            "Starting stream pump ({} slots per transfer)",
            self.filling.capacity_slots()
        );

        loop {
            match self.step(sink).await? {
                StepOutcome::Stopped => break,
                StepOutcome::Submitted(id) => trace!("Transfer {} in flight", id.get()),
                StepOutcome::Rejected(_) => {}
            }
        }

        info!("Stream pump stopped");
        Ok(())
    }

    /// Run the state machine until one transfer is handed off or the session stops
    pub async fn step<S>(&mut self, sink: &mut S) -> Result<StepOutcome, PumpError>
    where
        S: TransportSink + ?Sized,
    {
        loop {
            match self.state {
                PumpState::WaitingForData => {
                    if !self.wait_for_data().await {
                        return Ok(StepOutcome::Stopped);
                    }
                    self.state = PumpState::Draining;
                }
                PumpState::Draining => {
                    self.state = if self.drain() {
                        PumpState::WaitingForTransmit
                    } else {
                        PumpState::WaitingForData
                    };
                }
                PumpState::WaitingForTransmit => {
                    if !self.wait_for_idle().await {
                        return Ok(StepOutcome::Stopped);
                    }
                    let outcome = self.hand_off(sink)?;
                    self.state = PumpState::WaitingForData;
                    return Ok(outcome);
                }
            }
        }
    }

    /// Entries still needed to finish the current packet, capped to what the
    /// ring can ever hold at once
    fn wanted(&self) -> usize {
        let missing = self.filling.capacity_slots() - self.filling.len_slots();
        missing.min(self.consumer.capacity() - 1).max(1)
    }

    /// Wait until enough entries or a loss report is pending. False if stopped.
    async fn wait_for_data(&self) -> bool {
        let wanted = self.wanted();
        loop {
            if self.shared.is_stopped() {
                self.shared.wake_at.store(NOT_WAITING, Ordering::Relaxed);
                return false;
            }

            self.shared.wake_at.store(wanted, Ordering::Relaxed);
            fence(Ordering::SeqCst);
            if self.shared.loss.is_pending() || self.consumer.available() >= wanted {
                self.shared.wake_at.store(NOT_WAITING, Ordering::Relaxed);
                return true;
            }

            trace!("Waiting for {} entries", wanted);
            self.shared.data_ready.notified().await;
        }
    }

    /// Fill the current packet. True once it is full, false if the ring ran dry.
    fn drain(&mut self) -> bool {
        while !self.filling.is_full() {
            if self.shared.loss.is_pending() {
                let report = self.shared.loss.take();
                if !report.is_empty() {
                    let slot = self.filling.len_slots();
                    self.filling.push_slot(report.sentinel());
                    self.markers.push(LossMarker::new(slot, report));

                    Counters::bump(&self.shared.counters.sentinel_slots);
                    metrics::counter!("adc_stream_loss_sentinels").increment(1);
                    metrics::counter!("adc_stream_overflows").increment(u64::from(report.overflows));
                    metrics::counter!("adc_stream_conversion_errors")
                        .increment(u64::from(report.conversion_errors));
                    warn!(
                        slot,
                        overflows = report.overflows,
                        conversion_errors = report.conversion_errors,
                        "Sample loss marked in outbound stream"
                    );
                    continue;
                }
            }

            match self.consumer.try_read() {
                Some(entry) => {
                    self.filling.push_slot(entry.primary);
                    self.shared
                        .counters
                        .entries_sent
                        .fetch_add(1, Ordering::Relaxed);
                }
                None => return false,
            }
        }
        true
    }

    /// Wait for the previous transfer to complete. False if stopped.
    async fn wait_for_idle(&self) -> bool {
        loop {
            if self.shared.is_stopped() {
                return false;
            }
            if self.shared.in_flight.load(Ordering::Acquire) == 0 {
                return true;
            }

            trace!("Waiting for transfer completion");
            self.shared.tx_idle.notified().await;
        }
    }

    fn allocate_id(&mut self) -> TransferId {
        let id = self.next_id;
        self.next_id = id.checked_add(1).unwrap_or(NonZeroU32::MIN);
        TransferId::new(id)
    }

    fn hand_off<S>(&mut self, sink: &mut S) -> Result<StepOutcome, PumpError>
    where
        S: TransportSink + ?Sized,
    {
        let id = self.allocate_id();
        let payload = std::mem::replace(&mut self.filling, TransferBuffer::new(self.packet_bytes));
        let markers = std::mem::take(&mut self.markers);

        // What the host loses if this transfer never arrives
        let carried = markers
            .iter()
            .fold(LossReport::default(), |acc, &m| acc.merge(m.into()));
        let samples = payload.len_slots() - markers.len();

        // Set before submitting so an immediate completion is not lost
        self.shared.in_flight.store(id.get(), Ordering::Release);

        match sink.submit(Transfer::new(id, payload, markers)) {
            Ok(()) => {
                Counters::bump(&self.shared.counters.transfers_submitted);
                metrics::counter!("adc_stream_packets_submitted").increment(1);
                debug!("Submitted transfer {}", id.get());
                Ok(StepOutcome::Submitted(id))
            }
            Err(TransportError::Closed) => {
                self.clear_in_flight(id);
                warn!("Transport closed, stopping session");
                self.shared.stop();
                Err(PumpError::Transport(TransportError::Closed))
            }
            Err(e) => {
                self.clear_in_flight(id);
                // Reported again in front of the next transfer
                let dropped = u16::try_from(samples).unwrap_or(u16::MAX);
                self.shared.loss.restore(carried, dropped);
                self.shared
                    .counters
                    .entries_dropped
                    .fetch_add(samples as u64, Ordering::Relaxed);

                Counters::bump(&self.shared.counters.transfers_rejected);
                metrics::counter!("adc_stream_packets_rejected").increment(1);
                warn!("Transfer {} dropped with {} samples: {}", id.get(), samples, e);
                Ok(StepOutcome::Rejected(id))
            }
        }
    }

    fn clear_in_flight(&self, id: TransferId) {
        let _ = self.shared.in_flight.compare_exchange(
            id.get(),
            0,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        AcquisitionConfig, Aggregator, ChannelLayout, CompletionSignal, ConversionFault, Session,
        SessionHandle,
    };
    use ring_buffer::OverflowPolicy;
    use std::time::Duration;
    use tokio::time::timeout;

    #[derive(Default)]
    struct RecordingSink {
        transfers: Vec<Transfer>,
        fail_next: Option<TransportError>,
    }

    impl RecordingSink {
        fn slots(&self, index: usize) -> Vec<u16> {
            self.transfers[index].payload().slots().collect()
        }
    }

    impl TransportSink for RecordingSink {
        fn submit(&mut self, transfer: Transfer) -> Result<(), TransportError> {
            if let Some(err) = self.fail_next.take() {
                return Err(err);
            }
            self.transfers.push(transfer);
            Ok(())
        }
    }

    fn open(
        capacity: usize,
        slots: usize,
        policy: OverflowPolicy,
    ) -> (Aggregator, StreamPump, SessionHandle) {
        let acquisition = AcquisitionConfig {
            ring_capacity: capacity,
            overflow_policy: policy,
            layout: ChannelLayout {
                channels: 3,
                primary: 0..1,
                reference: 1,
                auxiliary: 2,
                rows_per_block: 1,
                oversampling_gain: 1,
            },
            initial_reference: 0,
        };
        Session::open(acquisition, PumpConfig::with_slots(slots))
            .unwrap()
            .into_parts()
    }

    fn produce(aggregator: &mut Aggregator, values: impl IntoIterator<Item = u16>) {
        for value in values {
            aggregator.on_block_ready(&[value, 0, 0]);
        }
    }

    async fn blocks(pump: &mut StreamPump, sink: &mut RecordingSink) -> bool {
        timeout(Duration::from_millis(10), pump.step(sink)).await.is_err()
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_packet_in_order() {
        let (mut aggregator, mut pump, _handle) = open(8, 4, OverflowPolicy::OverwriteOldest);
        let mut sink = RecordingSink::default();

        produce(&mut aggregator, [10, 20, 30, 40, 50]);

        let outcome = pump.step(&mut sink).await.unwrap();
        assert!(matches!(outcome, StepOutcome::Submitted(_)));
        assert_eq!(sink.slots(0), vec![10, 20, 30, 40]);
        assert!(sink.transfers[0].loss_markers().is_empty());
        assert_eq!(pump.available(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_full_packet() {
        let (mut aggregator, mut pump, _handle) = open(8, 4, OverflowPolicy::OverwriteOldest);
        let mut sink = RecordingSink::default();

        produce(&mut aggregator, [1, 2, 3]);
        assert!(blocks(&mut pump, &mut sink).await);
        assert_eq!(pump.state(), PumpState::WaitingForData);

        produce(&mut aggregator, [4]);
        pump.step(&mut sink).await.unwrap();
        assert_eq!(sink.slots(0), vec![1, 2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lap_marks_sentinel() {
        let (mut aggregator, mut pump, handle) = open(4, 4, OverflowPolicy::OverwriteOldest);
        let mut sink = RecordingSink::default();

        produce(&mut aggregator, [1, 2, 3, 4, 5]);
        assert!(handle.stats().overflows >= 1);

        // Sentinel plus the one surviving entry; the rest has to arrive first
        assert!(blocks(&mut pump, &mut sink).await);
        produce(&mut aggregator, [6, 7]);
        pump.step(&mut sink).await.unwrap();

        let transfer = &sink.transfers[0];
        assert_eq!(sink.slots(0), vec![1, 5, 6, 7]);
        assert_eq!(
            transfer.loss_markers(),
            &[LossMarker {
                slot: 0,
                overflows: 1,
                conversion_errors: 0
            }]
        );
        assert!(!handle.loss_pending());
        assert_eq!(handle.stats().sentinel_slots, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_newest_keeps_oldest() {
        let (mut aggregator, mut pump, _handle) = open(4, 4, OverflowPolicy::DropNewest);
        let mut sink = RecordingSink::default();

        produce(&mut aggregator, [1, 2, 3, 4, 5]);

        pump.step(&mut sink).await.unwrap();
        assert_eq!(sink.slots(0), vec![2, 1, 2, 3]);
        assert_eq!(sink.transfers[0].loss_markers()[0].overflows, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_conversion_error_reported_separately() {
        let (mut aggregator, mut pump, _handle) = open(8, 4, OverflowPolicy::OverwriteOldest);
        let mut sink = RecordingSink::default();

        aggregator.on_conversion_error(ConversionFault::Hardware(1));
        produce(&mut aggregator, [7, 8]);

        pump.step(&mut sink).await.unwrap();
        assert_eq!(sink.slots(0), vec![1, 0, 7, 8]);
        assert_eq!(
            sink.transfers[0].loss_markers(),
            &[LossMarker {
                slot: 0,
                overflows: 0,
                conversion_errors: 1
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_early_completion_no_wait() {
        let (mut aggregator, mut pump, handle) = open(16, 2, OverflowPolicy::OverwriteOldest);
        let signal = handle.completion_signal();
        let mut sink = RecordingSink::default();

        produce(&mut aggregator, [1, 2, 3, 4]);

        pump.step(&mut sink).await.unwrap();
        assert!(handle.is_transmitting());
        assert!(signal.complete(sink.transfers[0].id()));
        assert!(!handle.is_transmitting());

        pump.step(&mut sink).await.unwrap();
        assert_eq!(sink.transfers.len(), 2);
        assert_eq!(sink.slots(1), vec![3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_completion_blocks() {
        let (mut aggregator, mut pump, handle) = open(16, 2, OverflowPolicy::OverwriteOldest);
        let signal = handle.completion_signal();
        let mut sink = RecordingSink::default();

        produce(&mut aggregator, [1, 2, 3, 4]);
        pump.step(&mut sink).await.unwrap();

        assert!(blocks(&mut pump, &mut sink).await);
        assert_eq!(pump.state(), PumpState::WaitingForTransmit);
        assert_eq!(sink.transfers.len(), 1);

        signal.complete(sink.transfers[0].id());
        pump.step(&mut sink).await.unwrap();
        assert_eq!(sink.transfers.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_completion_ignored() {
        let (mut aggregator, mut pump, handle) = open(16, 2, OverflowPolicy::OverwriteOldest);
        let signal = handle.completion_signal();
        let mut sink = RecordingSink::default();

        produce(&mut aggregator, [1, 2, 3, 4, 5, 6]);

        pump.step(&mut sink).await.unwrap();
        let first = sink.transfers[0].id();
        assert!(signal.complete(first));
        assert!(!signal.complete(first));

        pump.step(&mut sink).await.unwrap();
        let second = sink.transfers[1].id();
        assert_ne!(first, second);

        // Late duplicate of the first must not release the second
        assert!(!signal.complete(first));
        assert!(handle.is_transmitting());
        assert!(blocks(&mut pump, &mut sink).await);
        assert_eq!(sink.transfers.len(), 2);

        assert!(signal.complete(second));
        pump.step(&mut sink).await.unwrap();
        assert_eq!(sink.transfers.len(), 3);
        assert_eq!(handle.stats().stale_completions, 2);
        assert_eq!(handle.stats().transfers_completed, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_transfer_dropped() {
        let (mut aggregator, mut pump, handle) = open(16, 2, OverflowPolicy::OverwriteOldest);
        let mut sink = RecordingSink {
            fail_next: Some(TransportError::Rejected("endpoint stalled".into())),
            ..Default::default()
        };

        produce(&mut aggregator, [1, 2, 3, 4]);

        let outcome = pump.step(&mut sink).await.unwrap();
        assert!(matches!(outcome, StepOutcome::Rejected(_)));
        assert!(!handle.is_transmitting());

        // Both dropped samples come back as overflows ahead of the next data
        pump.step(&mut sink).await.unwrap();
        assert_eq!(sink.slots(0), vec![2, 3]);
        assert_eq!(sink.transfers[0].loss_markers()[0].overflows, 2);
        assert_eq!(pump.available(), 1);
        assert_eq!(handle.stats().transfers_rejected, 1);
        assert_eq!(handle.stats().entries_dropped, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_transfer_keeps_lap_report() {
        let (mut aggregator, mut pump, handle) = open(4, 2, OverflowPolicy::OverwriteOldest);
        let mut sink = RecordingSink {
            fail_next: Some(TransportError::Rejected("endpoint stalled".into())),
            ..Default::default()
        };

        produce(&mut aggregator, [1, 2, 3, 4, 5]);
        let outcome = pump.step(&mut sink).await.unwrap();
        assert!(matches!(outcome, StepOutcome::Rejected(_)));
        assert!(handle.loss_pending());

        produce(&mut aggregator, [6, 7]);
        pump.step(&mut sink).await.unwrap();

        // Lap (1) plus the rejected sample (5)
        assert_eq!(sink.transfers.len(), 1);
        assert_eq!(sink.slots(0), vec![2, 6]);
        assert_eq!(
            sink.transfers[0].loss_markers(),
            &[LossMarker {
                slot: 0,
                overflows: 2,
                conversion_errors: 0
            }]
        );
        assert!(!handle.loss_pending());
    }

    #[test]
    fn test_read_out_drains_all_fields() {
        let (mut aggregator, mut pump, handle) = open(4, 2, OverflowPolicy::OverwriteOldest);

        aggregator.on_block_ready(&[10, 2000, 900]);
        aggregator.on_conversion_error(ConversionFault::Hardware(7));
        aggregator.on_block_ready(&[30, 2004, 910]);

        let readout = pump.read_out();
        let indices: Vec<usize> = readout.measurements.iter().map(|m| m.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(readout.measurements[2].entry.reference, 2004);
        assert_eq!(readout.measurements[2].entry.auxiliary, 910);
        assert_eq!(readout.error_count(), 1);
        assert_eq!(readout.losses.conversion_errors, 1);

        assert_eq!(pump.available(), 0);
        assert!(!handle.loss_pending());
        assert!(pump.read_out().measurements.is_empty());
    }

    #[test]
    fn test_read_out_reports_and_resets_overflow() {
        let (mut aggregator, mut pump, handle) = open(4, 2, OverflowPolicy::DropNewest);

        produce(&mut aggregator, [1, 2, 3, 4, 5]);

        let readout = pump.read_out();
        assert_eq!(readout.measurements.len(), 3);
        assert_eq!(readout.losses.overflows, 2);
        assert!(!handle.loss_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_transport_stops_session() {
        let (mut aggregator, mut pump, handle) = open(16, 2, OverflowPolicy::OverwriteOldest);
        let mut sink = RecordingSink {
            fail_next: Some(TransportError::Closed),
            ..Default::default()
        };

        produce(&mut aggregator, [1, 2]);

        let err = pump.run(&mut sink).await.unwrap_err();
        assert_eq!(err, PumpError::Transport(TransportError::Closed));
        assert!(handle.is_stopped());
        assert!(!handle.is_transmitting());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_wakes_waiting_pump() {
        let (mut aggregator, mut pump, handle) = open(16, 2, OverflowPolicy::OverwriteOldest);

        produce(&mut aggregator, [1, 2, 3]);

        let task = tokio::spawn(async move {
            let mut sink = RecordingSink::default();
            pump.run(&mut sink).await.map(|_| sink.transfers.len())
        });

        // One transfer goes out, then the pump parks waiting for a second packet
        tokio::time::sleep(Duration::from_millis(5)).await;
        handle.stop();

        assert_eq!(task.await.unwrap(), Ok(1));
        assert_eq!(aggregator.on_block_ready(&[9, 0, 0]), crate::BlockOutcome::Discarded);
    }

    struct ImmediateSink {
        signal: CompletionSignal,
        values: Vec<u16>,
    }

    impl TransportSink for ImmediateSink {
        fn submit(&mut self, transfer: Transfer) -> Result<(), TransportError> {
            let sentinels: Vec<usize> = transfer.loss_markers().iter().map(|m| m.slot).collect();
            self.values.extend(
                transfer
                    .payload()
                    .slots()
                    .enumerate()
                    .filter(|(slot, _)| !sentinels.contains(slot))
                    .map(|(_, value)| value),
            );
            self.signal.complete(transfer.id());
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_producer_never_repeats() {
        let (mut aggregator, mut pump, handle) = open(64, 8, OverflowPolicy::DropNewest);
        let mut sink = ImmediateSink {
            signal: handle.completion_signal(),
            values: Vec::new(),
        };

        let task = tokio::spawn(async move {
            pump.run(&mut sink).await.map(|_| sink.values)
        });

        let producer = std::thread::spawn(move || {
            for value in 1..=4000u16 {
                aggregator.on_block_ready(&[value, 0, 0]);
                if value % 16 == 0 {
                    std::thread::yield_now();
                }
            }
        });
        producer.join().unwrap();

        for _ in 0..200 {
            if handle.stats().transfers_submitted > 0 && handle.stats().entries_sent >= 56 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        handle.stop();

        let values = task.await.unwrap().unwrap();
        assert!(!values.is_empty());
        assert!(values.windows(2).all(|w| w[0] < w[1]));
    }
}
