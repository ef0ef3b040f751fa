//! Pipeline configuration

use crate::{defaults, ChannelLayout, ConfigError, SLOT_WIDTH};
use ring_buffer::OverflowPolicy;
use serde::{Deserialize, Serialize};

/// Producer-side configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Ring buffer capacity in entries
    pub ring_capacity: usize,
    /// What to do when the producer catches up with the consumer
    pub overflow_policy: OverflowPolicy,
    /// Raw block layout
    pub layout: ChannelLayout,
    /// Starting value of the reference tracker
    pub initial_reference: u32,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            ring_capacity: defaults::RING_CAPACITY,
            overflow_policy: OverflowPolicy::default(),
            layout: ChannelLayout::default(),
            initial_reference: defaults::INITIAL_REFERENCE,
        }
    }
}

impl AcquisitionConfig {
    /// Check the block layout
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.layout.validate()
    }
}

/// Drain-side configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PumpConfig {
    /// Bulk IN endpoint max packet size in bytes
    pub endpoint_packet_size: usize,
    /// Endpoint packets per transfer
    pub burst_multiplier: usize,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            endpoint_packet_size: defaults::ENDPOINT_PACKET_SIZE,
            burst_multiplier: defaults::BURST_MULTIPLIER,
        }
    }
}

impl PumpConfig {
    /// Configuration for a transfer of exactly `slots` entries
    pub fn with_slots(slots: usize) -> Self {
        Self {
            endpoint_packet_size: slots * SLOT_WIDTH,
            burst_multiplier: 1,
        }
    }

    /// Bytes handed to the transport per transfer
    pub fn packet_bytes(&self) -> usize {
        self.endpoint_packet_size * self.burst_multiplier
    }

    /// Entry slots per transfer
    pub fn packet_slots(&self) -> usize {
        self.packet_bytes() / SLOT_WIDTH
    }

    /// Check that a transfer is non-empty, whole slots, and addressable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint_packet_size == 0 || self.burst_multiplier == 0 {
            return Err(ConfigError::PacketGeometry(format!(
                "packet size {} x burst {} is empty",
                self.endpoint_packet_size, self.burst_multiplier
            )));
        }
        if self.endpoint_packet_size % SLOT_WIDTH != 0 {
            return Err(ConfigError::PacketGeometry(format!(
                "packet size {} is not a multiple of the {}-byte slot",
                self.endpoint_packet_size, SLOT_WIDTH
            )));
        }
        if self
            .endpoint_packet_size
            .checked_mul(self.burst_multiplier)
            .is_none()
        {
            return Err(ConfigError::PacketGeometry(format!(
                "packet size {} x burst {} overflows",
                self.endpoint_packet_size, self.burst_multiplier
            )));
        }
        Ok(())
    }
}
