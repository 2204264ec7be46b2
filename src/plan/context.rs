//! # Cycle identity and shared variables.
//!
//! [`CycleContext`] identifies one cycle instance. The orchestrator owns it; branch
//! executors and behaviors receive a frozen `Arc` snapshot taken at cycle start.

use std::collections::BTreeMap;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::verdict::Verdict;

/// Identity, timing and variables of one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleContext {
    /// Unique id of this cycle instance.
    pub cycle_id: Uuid,
    pub station_id: u32,
    pub slot_id: u16,
    /// Unit under test.
    #[serde(default)]
    pub serial_number: String,
    /// Production/work order.
    #[serde(default)]
    pub order_id: String,
    /// History record id assigned by persistence (0 = none yet).
    #[serde(default)]
    pub history_id: u64,
    pub started_at: Option<DateTime<Local>>,
    pub finished_at: Option<DateTime<Local>>,
    /// Runtime variables, refreshed from persistence at start.
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    pub verdict: Option<Verdict>,
}

impl CycleContext {
    /// Creates a context for a unit on a slot.
    pub fn new(station_id: u32, slot_id: u16, serial_number: impl Into<String>) -> Self {
        Self {
            cycle_id: Uuid::new_v4(),
            station_id,
            slot_id,
            serial_number: serial_number.into(),
            order_id: String::new(),
            history_id: 0,
            started_at: None,
            finished_at: None,
            variables: BTreeMap::new(),
            verdict: None,
        }
    }

    pub fn with_order(mut self, order_id: impl Into<String>) -> Self {
        self.order_id = order_id.into();
        self
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    /// Seconds elapsed between cycle start and `at` (0 before start).
    pub fn offset_secs(&self, at: DateTime<Local>) -> f64 {
        match self.started_at {
            Some(start) => (at - start).num_milliseconds() as f64 / 1000.0,
            None => 0.0,
        }
    }
}
