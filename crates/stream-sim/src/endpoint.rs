//! Simulated bulk IN endpoint and host reader

use crate::settings::EndpointConfig;
use adc_stream::{CompletionSignal, Transfer, TransportError, TransportSink};
use serde::Serialize;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Device side: accepts transfers and queues them for the host
pub struct SimulatedEndpoint {
    tx: mpsc::UnboundedSender<Transfer>,
    reject_every: Option<u64>,
    submissions: u64,
}

impl TransportSink for SimulatedEndpoint {
    fn submit(&mut self, transfer: Transfer) -> Result<(), TransportError> {
        self.submissions += 1;
        if let Some(every) = self.reject_every {
            if every > 0 && self.submissions % every == 0 {
                return Err(TransportError::Rejected("simulated endpoint stall".into()));
            }
        }
        self.tx.send(transfer).map_err(|_| TransportError::Closed)
    }
}

/// Host side totals
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HostStats {
    pub transfers: u64,
    pub bytes: u64,
    pub samples: u64,
    pub sentinel_slots: u64,
    pub overflows: u64,
    pub conversion_errors: u64,
    pub min_sample: Option<u16>,
    pub max_sample: Option<u16>,
}

impl HostStats {
    fn record(&mut self, transfer: &Transfer) {
        let markers = transfer.loss_markers();
        self.transfers += 1;
        self.bytes += transfer.payload().as_bytes().len() as u64;

        for marker in markers {
            self.sentinel_slots += 1;
            self.overflows += u64::from(marker.overflows);
            self.conversion_errors += u64::from(marker.conversion_errors);
        }

        for (slot, value) in transfer.payload().slots().enumerate() {
            if markers.iter().any(|m| m.slot == slot) {
                continue;
            }
            self.samples += 1;
            self.min_sample = Some(self.min_sample.map_or(value, |m| m.min(value)));
            self.max_sample = Some(self.max_sample.map_or(value, |m| m.max(value)));
        }
    }
}

/// Host side: completes each transfer after the configured latency
pub struct HostReader {
    rx: mpsc::UnboundedReceiver<Transfer>,
    signal: CompletionSignal,
    latency: Duration,
    report_interval: Duration,
    stats: HostStats,
}

/// Create a connected endpoint/host pair
pub fn connect(config: &EndpointConfig, signal: CompletionSignal) -> (SimulatedEndpoint, HostReader) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        SimulatedEndpoint {
            tx,
            reject_every: config.reject_every,
            submissions: 0,
        },
        HostReader {
            rx,
            signal,
            latency: Duration::from_micros(config.transfer_latency_us),
            report_interval: Duration::from_millis(config.report_interval_ms.max(1)),
            stats: HostStats::default(),
        },
    )
}

impl HostReader {
    /// Read transfers until the endpoint is dropped
    pub async fn run(mut self) -> HostStats {
        let mut window_start = Instant::now();
        let mut window_transfers = 0u64;
        let mut window_bytes = 0u64;

        while let Some(transfer) = self.rx.recv().await {
            tokio::time::sleep(self.latency).await;

            if !transfer.loss_markers().is_empty() {
                warn!(
                    "Transfer {} carries {} loss marker(s)",
                    transfer.id().get(),
                    transfer.loss_markers().len()
                );
            }
            self.stats.record(&transfer);
            window_transfers += 1;
            window_bytes += transfer.payload().as_bytes().len() as u64;

            if !self.signal.complete(transfer.id()) {
                debug!("Completion for transfer {} ignored", transfer.id().get());
            }

            let elapsed = window_start.elapsed();
            if elapsed >= self.report_interval {
                info!(
                    "received {:5} transfers and {:8} bytes in {:8} us, {:10.1} B/s",
                    window_transfers,
                    window_bytes,
                    elapsed.as_micros(),
                    window_bytes as f64 / elapsed.as_secs_f64()
                );
                window_start = Instant::now();
                window_transfers = 0;
                window_bytes = 0;
            }
        }

        info!(
            "Host reader done: {} transfers, {} bytes",
            self.stats.transfers, self.stats.bytes
        );
        self.stats
    }
}
