//! Reference value tracking

use std::sync::atomic::{AtomicU32, Ordering};

/// Exponential moving average of the reference channel.
///
/// `new = (3 * old + sample) / 4` in integer arithmetic. Written only by the
/// producer; readable from anywhere.
#[derive(Debug)]
pub struct ReferenceTracker {
    value: AtomicU32,
}

impl ReferenceTracker {
    /// Tracker starting at `initial`
    pub fn new(initial: u32) -> Self {
        Self {
            value: AtomicU32::new(initial),
        }
    }

    /// Fold one sample into the average and return the new value
    pub(crate) fn update(&self, sample: u16) -> u32 {
        let old = u64::from(self.value.load(Ordering::Relaxed));
        let new = ((old * 3 + u64::from(sample)) >> 2) as u32;
        self.value.store(new, Ordering::Release);
        new
    }

    /// Current tracked value
    pub fn value(&self) -> u32 {
        self.value.load(Ordering::Acquire)
    }
}
