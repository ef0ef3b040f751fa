//! Sample loss bookkeeping
//!
//! Overflows and conversion errors are counted separately so a consumer can
//! tell them apart. Both counters saturate instead of wrapping.

use serde::Serialize;
use std::sync::atomic::{AtomicU16, Ordering};

/// Saturating loss counters shared by producer and pump
#[derive(Debug, Default)]
pub(crate) struct LossCounters {
    overflows: AtomicU16,
    conversion_errors: AtomicU16,
}

impl LossCounters {
    pub(crate) fn record_overflow(&self) {
        saturating_increment(&self.overflows);
    }

    pub(crate) fn record_conversion_error(&self) {
        saturating_increment(&self.conversion_errors);
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.overflows.load(Ordering::Acquire) != 0
            || self.conversion_errors.load(Ordering::Acquire) != 0
    }

    /// Read and reset both counters
    pub(crate) fn take(&self) -> LossReport {
        LossReport {
            overflows: self.overflows.swap(0, Ordering::AcqRel),
            conversion_errors: self.conversion_errors.swap(0, Ordering::AcqRel),
        }
    }

    /// Put back losses that never reached the host, plus `dropped` samples
    /// counted as overflows
    pub(crate) fn restore(&self, report: LossReport, dropped: u16) {
        saturating_add(&self.overflows, report.overflows.saturating_add(dropped));
        saturating_add(&self.conversion_errors, report.conversion_errors);
    }
}

fn saturating_increment(counter: &AtomicU16) {
    // Err only when already saturated
    let _ = counter.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_add(1));
}

fn saturating_add(counter: &AtomicU16, amount: u16) {
    if amount == 0 {
        return;
    }
    let _ = counter.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
        Some(n.saturating_add(amount))
    });
}

/// Losses taken from the counters in one read-and-reset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LossReport {
    /// Entries lapped or dropped by the producer, or lost with a rejected transfer
    pub overflows: u16,
    /// Blocks replaced by the error entry
    pub conversion_errors: u16,
}

impl LossReport {
    /// Whether nothing was lost
    pub fn is_empty(&self) -> bool {
        self.overflows == 0 && self.conversion_errors == 0
    }

    pub(crate) fn merge(self, other: LossReport) -> Self {
        Self {
            overflows: self.overflows.saturating_add(other.overflows),
            conversion_errors: self.conversion_errors.saturating_add(other.conversion_errors),
        }
    }

    /// Value written in-band in place of a sample
    pub fn sentinel(&self) -> u16 {
        self.overflows.saturating_add(self.conversion_errors)
    }
}

/// Out-of-band description of one sentinel slot in a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LossMarker {
    /// Slot index within the transfer
    pub slot: usize,
    pub overflows: u16,
    pub conversion_errors: u16,
}

impl From<LossMarker> for LossReport {
    fn from(marker: LossMarker) -> Self {
        Self {
            overflows: marker.overflows,
            conversion_errors: marker.conversion_errors,
        }
    }
}

impl LossMarker {
    pub(crate) fn new(slot: usize, report: LossReport) -> Self {
        Self {
            slot,
            overflows: report.overflows,
            conversion_errors: report.conversion_errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_resets() {
        let counters = LossCounters::default();
        assert!(!counters.is_pending());

        counters.record_overflow();
        counters.record_overflow();
        counters.record_conversion_error();
        assert!(counters.is_pending());

        let report = counters.take();
        assert_eq!(report.overflows, 2);
        assert_eq!(report.conversion_errors, 1);
        assert_eq!(report.sentinel(), 3);

        assert!(!counters.is_pending());
        assert!(counters.take().is_empty());
    }

    #[test]
    fn test_counters_saturate() {
        let counters = LossCounters::default();
        for _ in 0..(u32::from(u16::MAX) + 10) {
            counters.record_overflow();
        }
        counters.record_conversion_error();

        let report = counters.take();
        assert_eq!(report.overflows, u16::MAX);
        assert_eq!(report.sentinel(), u16::MAX);
    }

    #[test]
    fn test_restore_merges_with_new_losses() {
        let counters = LossCounters::default();
        counters.record_overflow();

        let report = LossReport {
            overflows: 2,
            conversion_errors: 1,
        };
        counters.restore(report, 5);

        let merged = counters.take();
        assert_eq!(merged.overflows, 8);
        assert_eq!(merged.conversion_errors, 1);

        counters.restore(LossReport::default(), 0);
        assert!(!counters.is_pending());
    }

    #[test]
    fn test_restore_saturates() {
        let counters = LossCounters::default();
        counters.restore(
            LossReport {
                overflows: u16::MAX - 1,
                conversion_errors: 0,
            },
            10,
        );
        assert_eq!(counters.take().overflows, u16::MAX);
    }
}
