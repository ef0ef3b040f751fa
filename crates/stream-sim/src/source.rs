//! Synthetic sample source
//!
//! Stands in for the ADC + DMA engine: a dedicated thread produces one block
//! per interval and calls the aggregator the way the completion interrupt
//! would.

use crate::settings::SourceConfig;
use adc_stream::{Aggregator, BlockOutcome, ChannelLayout, ConversionFault, SessionHandle};
use std::f64::consts::TAU;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info};

const ADC_MAX: f64 = 4095.0;

/// Generates interleaved 12-bit sample blocks
pub struct SyntheticSource {
    config: SourceConfig,
    layout: ChannelLayout,
    block: Vec<u16>,
    rows_emitted: u64,
    blocks: u64,
}

impl SyntheticSource {
    pub fn new(config: SourceConfig, layout: ChannelLayout) -> Self {
        Self {
            block: vec![0; layout.block_len()],
            config,
            layout,
            rows_emitted: 0,
            blocks: 0,
        }
    }

    /// Produce the next block, or the fault the hardware would report instead
    pub fn next_block(&mut self) -> Result<&[u16], ConversionFault> {
        self.blocks += 1;
        if let Some(every) = self.config.fault_every {
            if every > 0 && self.blocks % every == 0 {
                self.rows_emitted += self.layout.rows_per_block as u64;
                return Err(ConversionFault::Hardware(self.blocks as u32));
            }
        }

        let period = f64::from(self.config.period_rows.max(1));
        let baseline = f64::from(self.config.baseline);
        let amplitude = f64::from(self.config.amplitude);

        for row in self.block.chunks_exact_mut(self.layout.channels) {
            let phase = (self.rows_emitted % self.config.period_rows.max(1) as u64) as f64 / period;
            let signal = (baseline + amplitude * (TAU * phase).sin()).clamp(0.0, ADC_MAX) as u16;

            row.fill(signal);
            row[self.layout.reference] = self.config.reference_raw;
            // Slow ramp on the auxiliary channel
            row[self.layout.auxiliary] = (940.0 + 60.0 * phase) as u16;
            self.rows_emitted += 1;
        }
        Ok(&self.block)
    }

    /// Blocks produced so far, faults included
    pub fn blocks(&self) -> u64 {
        self.blocks
    }

    /// Run on a dedicated thread until the session stops. Returns the block count.
    pub fn spawn(
        mut self,
        mut aggregator: Aggregator,
        handle: SessionHandle,
        interval: Duration,
    ) -> std::io::Result<JoinHandle<u64>> {
        std::thread::Builder::new()
            .name("sample-source".into())
            .spawn(move || {
                info!("Sample source running, one block every {:?}", interval);
                let mut next = Instant::now();

                while !handle.is_stopped() {
                    let outcome = match self.next_block() {
                        Ok(block) => aggregator.on_block_ready(block),
                        Err(fault) => aggregator.on_conversion_error(fault),
                    };
                    if let BlockOutcome::Faulted(fault) = outcome {
                        debug!("Injected fault: {}", fault);
                    }

                    next += interval;
                    std::thread::sleep(next.saturating_duration_since(Instant::now()));
                }

                info!("Sample source stopped after {} blocks", self.blocks);
                self.blocks
            })
    }
}
