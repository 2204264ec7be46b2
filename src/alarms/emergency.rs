//! # Emergency-signal aggregation.
//!
//! ```text
//! signals ─► enabled only ─► read ─┬─ slot 0  ─► global set ─► any true ─► halt every slot
//!                                  └─ slot N  ─► OR per slot ─────────────► halt flagged slots
//! ```
//!
//! ## Rules
//! - Disabled signals are never read.
//! - A failed read counts as `false` and is logged.
//! - A global halt makes the per-slot flags irrelevant for this tick.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::warn;

use crate::ports::EmergencySignalSource;

use super::config::EmergencySignalConfig;

/// Result of reading every emergency input once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EmergencyAssessment {
    /// Any global (slot 0) signal is high.
    pub global: bool,
    /// OR-combined per-slot flags (slot 0 excluded).
    pub slots: BTreeMap<u16, bool>,
    /// Reads that failed during this pass.
    pub read_errors: usize,
}

impl EmergencyAssessment {
    /// Slots whose own flag is high.
    pub fn flagged_slots(&self) -> Vec<u16> {
        self.slots
            .iter()
            .filter(|(_, high)| **high)
            .map(|(slot, _)| *slot)
            .collect()
    }
}

/// Reads every enabled signal and aggregates them.
pub async fn assess(
    signals: &[EmergencySignalConfig],
    source: &dyn EmergencySignalSource,
) -> EmergencyAssessment {
    let mut out = EmergencyAssessment::default();

    for signal in signals.iter().filter(|s| s.enabled) {
        let high = match source.read_signal(signal).await {
            Ok(v) => v,
            Err(e) => {
                warn!(slot = signal.slot, address = %signal.address, error = %e, "emergency signal read failed");
                out.read_errors += 1;
                false
            }
        };

        if signal.is_global() {
            out.global |= high;
        } else {
            *out.slots.entry(signal.slot).or_insert(false) |= high;
        }
    }
    out
}

/// Latest emergency state seen by the alarm loop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EmergencyStatus {
    /// Station-wide halt active (slot-independent).
    pub slot_independent: bool,
    /// Slots halted by their own signal.
    pub slots: Vec<u16>,
}
