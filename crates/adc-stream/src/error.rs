//! Pipeline Error Types

use ring_buffer::RingError;
use thiserror::Error;

/// Invalid configuration, detected when a session is opened
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A layout field is zero or empty
    #[error("Channel layout field {0} must be non-zero")]
    EmptyLayoutField(&'static str),

    /// A channel index points past the row
    #[error("{field} channel {index} is out of range for {channels} channels")]
    ChannelOutOfRange {
        field: &'static str,
        index: usize,
        channels: usize,
    },

    /// Block size does not fit in memory
    #[error("Block of {rows} rows x {channels} channels is too large")]
    BlockTooLarge { rows: usize, channels: usize },

    /// Packet geometry is unusable
    #[error("Invalid packet geometry: {0}")]
    PacketGeometry(String),
}

/// Hardware reported a block that cannot be reduced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConversionFault {
    /// Conversion error raised by the ADC driver
    #[error("ADC conversion error (code {0})")]
    Hardware(u32),

    /// Completed block has an unexpected number of samples
    #[error("Sample block has {actual} samples, expected {expected}")]
    BlockLength { expected: usize, actual: usize },
}

/// Errors reported by a transport sink on submission
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Transfer refused; the pump drops it and continues
    #[error("Transfer rejected: {0}")]
    Rejected(String),

    /// Endpoint torn down (bus reset or disconnect)
    #[error("Transport closed")]
    Closed,
}

/// Errors that end the stream pump
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PumpError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Errors opening a session
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Ring buffer error: {0}")]
    Ring(#[from] RingError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}
