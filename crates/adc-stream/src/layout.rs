//! Channel Layout and Block Reduction

use crate::defaults;
use crate::ConfigError;
use ring_buffer::Entry;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// How raw samples in a block map onto entry fields.
///
/// A block is `rows_per_block` scan rows of `channels` interleaved samples.
/// Each field is reduced as `sum * oversampling_gain / (rows * group_size)`,
/// saturated to `u16`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelLayout {
    /// Samples per scan row
    pub channels: usize,
    /// Channels summed into the primary measurement
    pub primary: Range<usize>,
    /// Reference channel index
    pub reference: usize,
    /// Auxiliary channel index
    pub auxiliary: usize,
    /// Scan rows per completed block
    pub rows_per_block: usize,
    /// Gain applied to each mean (1 = plain mean)
    pub oversampling_gain: u32,
}

impl Default for ChannelLayout {
    fn default() -> Self {
        Self {
            channels: defaults::CHANNELS,
            primary: defaults::PRIMARY_CHANNELS,
            reference: defaults::REFERENCE_CHANNEL,
            auxiliary: defaults::AUXILIARY_CHANNEL,
            rows_per_block: defaults::ROWS_PER_BLOCK,
            oversampling_gain: defaults::OVERSAMPLING_GAIN,
        }
    }
}

impl ChannelLayout {
    /// Check that every index fits the row
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channels == 0 {
            return Err(ConfigError::EmptyLayoutField("channels"));
        }
        if self.rows_per_block == 0 {
            return Err(ConfigError::EmptyLayoutField("rows_per_block"));
        }
        if self.oversampling_gain == 0 {
            return Err(ConfigError::EmptyLayoutField("oversampling_gain"));
        }
        if self.primary.is_empty() {
            return Err(ConfigError::EmptyLayoutField("primary"));
        }
        if self.rows_per_block.checked_mul(self.channels).is_none() {
            return Err(ConfigError::BlockTooLarge {
                rows: self.rows_per_block,
                channels: self.channels,
            });
        }

        let checks = [
            ("primary", self.primary.end - 1),
            ("reference", self.reference),
            ("auxiliary", self.auxiliary),
        ];
        for (field, index) in checks {
            if index >= self.channels {
                return Err(ConfigError::ChannelOutOfRange {
                    field,
                    index,
                    channels: self.channels,
                });
            }
        }
        Ok(())
    }

    /// Number of samples in one complete block
    pub fn block_len(&self) -> usize {
        self.rows_per_block * self.channels
    }

    /// Reduce one complete block to an entry.
    ///
    /// `raw` must hold exactly [`block_len`](Self::block_len) samples.
    pub fn reduce(&self, raw: &[u16]) -> Entry {
        debug_assert_eq!(raw.len(), self.block_len());

        let mut primary = 0u64;
        let mut reference = 0u64;
        let mut auxiliary = 0u64;

        for row in raw.chunks_exact(self.channels) {
            primary += row[self.primary.clone()]
                .iter()
                .map(|&s| u64::from(s))
                .sum::<u64>();
            reference += u64::from(row[self.reference]);
            auxiliary += u64::from(row[self.auxiliary]);
        }

        Entry {
            primary: self.scale(primary, self.primary.len()),
            reference: self.scale(reference, 1),
            auxiliary: self.scale(auxiliary, 1),
        }
    }

    fn scale(&self, sum: u64, group: usize) -> u16 {
        let count = (self.rows_per_block * group) as u64;
        let value = sum.saturating_mul(u64::from(self.oversampling_gain)) / count;
        value.min(u64::from(u16::MAX)) as u16
    }
}
