//! # Bit-level change detection.
//!
//! [`AlarmEvaluator`] owns the active-alarm map and the last bit array of every
//! block. It is moved into the alarm loop task, which makes it single-writer.
//!
//! ```text
//! previous[block] ─┐
//!                  ├─► diff per position ─► changed bit i ─► code = layout(block, i)
//! current bits ────┘                                           │
//!            ┌──────────────────────────────────────────────────┘
//!            ├─ rising, no record   ─► lookup meta ─► new record ─► active + change
//!            ├─ any, record exists  ─► update status/time       ─► change
//!            │                         (falling: removed from active)
//!            └─ falling, no record  ─► ignored
//! previous[block] = current
//! ```

use std::collections::{BTreeMap, HashMap};

use chrono::Local;
use tracing::{debug, error, warn};

use crate::ports::AlarmCatalog;

use super::config::AlarmBlockConfig;
use super::layout::alarm_code;
use super::record::AlarmRecord;

/// Active alarms and per-block bit history.
#[derive(Debug, Default)]
pub struct AlarmEvaluator {
    active: BTreeMap<u32, AlarmRecord>,
    previous: HashMap<u32, Vec<bool>>,
}

impl AlarmEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Active records ordered by code.
    pub fn active(&self) -> Vec<AlarmRecord> {
        self.active.values().cloned().collect()
    }

    pub fn is_active(&self, code: u32) -> bool {
        self.active.contains_key(&code)
    }

    /// Last bits stored for `block`.
    pub fn previous(&self, block: u32) -> Option<&[bool]> {
        self.previous.get(&block).map(Vec::as_slice)
    }

    /// Compares `current` with the stored array of `block` and returns the changed
    /// records (new, updated and closing ones) in bit order.
    pub async fn evaluate_block(
        &mut self,
        layout: &[AlarmBlockConfig],
        block: u32,
        current: Vec<bool>,
        catalog: &dyn AlarmCatalog,
    ) -> Vec<AlarmRecord> {
        let mut changes = Vec::new();
        let previous = self.previous.remove(&block).unwrap_or_default();

        for (bit, &now) in current.iter().enumerate() {
            let before = previous.get(bit).copied().unwrap_or(false);
            if before == now {
                continue;
            }

            let code = match alarm_code(layout, block, bit) {
                Ok(code) => code,
                Err(e) => {
                    error!(block, bit, error = %e, "alarm code derivation failed");
                    continue;
                }
            };

            if let Some(record) = self.active.get_mut(&code) {
                record.status = now;
                record.time = Local::now();
                let snapshot = record.clone();
                if !now {
                    self.active.remove(&code);
                }
                changes.push(snapshot);
                continue;
            }

            if !now {
                debug!(code, "bit cleared without an active record");
                continue;
            }

            match catalog.lookup(code).await {
                Ok(Some(meta)) => {
                    let record = AlarmRecord::raised(code, block, bit, meta);
                    self.active.insert(code, record.clone());
                    changes.push(record);
                }
                Ok(None) => {
                    error!(code, block, bit, "alarm code is not configured; record skipped");
                }
                Err(e) => {
                    warn!(code, error = %e, "alarm lookup failed; record skipped");
                }
            }
        }

        self.previous.insert(block, current);
        changes
    }
}
