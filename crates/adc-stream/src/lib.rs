//! ADC Bulk Streaming Pipeline
//!
//! Reduces raw ADC blocks into entries from interrupt context, buffers them
//! in a lock-free ring, and drains the ring into fixed-size USB bulk IN
//! transfers with at most one transfer in flight.
//!
//! ```text
//! SampleSource -> Aggregator (ISR) -> RingBuffer -> StreamPump (task) -> TransportSink
//! ```
//!
//! A [`Session`] owns all shared state for one device session. On USB reset
//! the session is stopped and a new one is opened.

mod aggregator;
mod config;
mod error;
mod layout;
mod loss;
mod pump;
mod readout;
mod reference;
mod session;
mod transport;

pub use aggregator::{Aggregator, BlockOutcome};
pub use config::{AcquisitionConfig, PumpConfig};
pub use error::{ConfigError, ConversionFault, PumpError, SessionError, TransportError};
pub use layout::ChannelLayout;
pub use loss::{LossMarker, LossReport};
pub use pump::{PumpState, StepOutcome, StreamPump};
pub use readout::{Measurement, MeasurementReadout};
pub use reference::ReferenceTracker;
pub use session::{Session, SessionHandle, SessionStats};
pub use transport::{CompletionSignal, Transfer, TransferBuffer, TransferId, TransportSink};

pub use ring_buffer::{Entry, OverflowPolicy};

/// Bytes per serialized slot in the outbound stream (little-endian `u16`)
pub const SLOT_WIDTH: usize = 2;

/// Compile-time defaults for the hardware this pipeline was built for
pub mod defaults {
    use std::ops::Range;

    /// Ring buffer capacity in entries
    pub const RING_CAPACITY: usize = ring_buffer::DEFAULT_CAPACITY;
    /// Channels converted per scan row
    pub const CHANNELS: usize = 10;
    /// Channels summed into the primary measurement
    pub const PRIMARY_CHANNELS: Range<usize> = 0..8;
    /// Internal reference voltage channel
    pub const REFERENCE_CHANNEL: usize = 8;
    /// Temperature sensor channel
    pub const AUXILIARY_CHANNEL: usize = 9;
    /// Rows per half of the circular DMA buffer
    pub const ROWS_PER_BLOCK: usize = 1024;
    /// Scales 12-bit samples to a 16-bit oversampled value
    pub const OVERSAMPLING_GAIN: u32 = 16;
    /// 2^16 / 3.0 V * 1.21 V
    pub const INITIAL_REFERENCE: u32 = 26433;
    /// Bulk IN endpoint max packet size in bytes
    pub const ENDPOINT_PACKET_SIZE: usize = 64;
    /// Packets per transfer
    pub const BURST_MULTIPLIER: usize = 4;
}
