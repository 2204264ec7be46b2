//! # Station runtime configuration.
//!
//! Provides [`Config`], the settings shared by a [`Station`](crate::Station) and the
//! cycles it starts.
//!
//! Config is used in two ways:
//! 1. **Station creation**: `Station::builder(config)`
//! 2. **Cycle creation**: every `CycleOrchestrator` receives a copy
//!
//! ## Sentinel values
//! - `grace = 0s` → branches still running after a cancel are aborted at once
//! - `max_branches` is clamped to `1..=MAX_BRANCHES`
//!
//! ## JSON
//! ```json
//! {
//!   "station_id": 1, "grace_ms": 5000, "retry_delay_ms": 5000,
//!   "bus_capacity": 1024, "max_branches": 5, "abort_cycles_on_alarm": true
//! }
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::durations;

/// Hard limit of parallel branches in one cycle.
pub const MAX_BRANCHES: u8 = 5;

/// Configuration of the station runtime.
///
/// ## Field semantics
/// - `station_id`: written into every cycle started by a slot runner
/// - `grace`: wait for cycles (shutdown) and for branches (after a cancel) to stop
/// - `retry_delay`: pause of a slot runner after its trigger failed
/// - `bus_capacity`: Event bus ring buffer size (min 1; clamped by Bus)
/// - `max_branches`: highest branch number a plan may use
/// - `abort_cycles_on_alarm`: raised alarms stop every running cycle
///
/// ## Notes
/// All fields are public. Prefer the helper accessors over checking sentinels inline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub station_id: u32,

    /// Maximum time to wait for cycles or branches to stop after cancellation.
    ///
    /// - Station shutdown returns `RuntimeError::GraceExceeded` when it runs out.
    /// - A cycle aborts branch tasks that ignore cancellation longer than this.
    #[serde(rename = "grace_ms", with = "durations::millis")]
    pub grace: Duration,

    /// Pause before a slot runner waits on its trigger again after a trigger error.
    #[serde(rename = "retry_delay_ms", with = "durations::millis")]
    pub retry_delay: Duration,

    /// Capacity of the event bus broadcast channel ring buffer.
    ///
    /// Slow subscribers that lag behind more than `bus_capacity` messages will
    /// receive `Lagged` and skip older items.
    pub bus_capacity: usize,

    /// Branches `1..=max_branches` are run; higher numbers are ignored.
    pub max_branches: u8,

    /// Stop every running cycle with EMERGENCY_ABORT when an alarm is raised.
    pub abort_cycles_on_alarm: bool,
}

impl Config {
    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    /// Returns `max_branches` clamped to `1..=MAX_BRANCHES`.
    #[inline]
    pub fn branch_limit(&self) -> u8 {
        self.max_branches.clamp(1, MAX_BRANCHES)
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `station_id = 1`
    /// - `grace = 5s`
    /// - `retry_delay = 5s`
    /// - `bus_capacity = 1024`
    /// - `max_branches = 5`
    /// - `abort_cycles_on_alarm = true`
    fn default() -> Self {
        Self {
            station_id: 1,
            grace: Duration::from_secs(5),
            retry_delay: Duration::from_secs(5),
            bus_capacity: 1024,
            max_branches: MAX_BRANCHES,
            abort_cycles_on_alarm: true,
        }
    }
}
