//! Measurement readout
//!
//! Alternative to streaming: drain whatever is still unread in the ring with
//! every entry field, and take the pending losses with it.

use crate::loss::LossReport;
use ring_buffer::Entry;
use serde::Serialize;

/// One unread entry and the ring slot it was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Measurement {
    pub index: usize,
    pub entry: Entry,
}

/// Entries and losses taken in one pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MeasurementReadout {
    pub measurements: Vec<Measurement>,
    pub losses: LossReport,
}

impl MeasurementReadout {
    /// Entries that stand in for a failed conversion
    pub fn error_count(&self) -> usize {
        self.measurements
            .iter()
            .filter(|m| m.entry.is_error())
            .count()
    }

    /// Most recent entry read
    pub fn latest(&self) -> Option<Entry> {
        self.measurements.last().map(|m| m.entry)
    }

    /// Mean of each field over the non-error entries
    pub fn mean(&self) -> Option<Entry> {
        let valid: Vec<&Entry> = self
            .measurements
            .iter()
            .map(|m| &m.entry)
            .filter(|e| !e.is_error())
            .collect();
        if valid.is_empty() {
            return None;
        }

        let n = valid.len() as u64;
        let avg = |field: fn(&Entry) -> u16| {
            (valid.iter().map(|e| u64::from(field(e))).sum::<u64>() / n) as u16
        };
        Some(Entry {
            primary: avg(|e| e.primary),
            reference: avg(|e| e.reference),
            auxiliary: avg(|e| e.auxiliary),
        })
    }
}
