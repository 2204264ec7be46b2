//! # Slot status tracker with sequence-based ordering.
//!
//! Maintains the station's view of what each slot is doing, built only from bus
//! events. Event sequence numbers protect it from out-of-order delivery.
//!
//! ## Architecture
//! ```text
//! Orchestrators ──► Bus ──► Station listener ──► SubscriberSet ──► SlotMonitor::update()
//!                                                                      │
//!                                                                      ▼
//!                                                       HashMap<u16, SlotState>
//!                                                       (slot → {seq, status, verdict})
//! ```
//!
//! ## Rules
//! - `SlotWaiting` → `Waiting`
//! - `CycleStarted` → `Running`
//! - `CycleCompleted` with OK/NOK → `Stopped`; any other verdict → `Error`
//! - `CycleSkipped` → `Error`
//! - `EmergencyStop` for a slot → `Error`
//! - Events with `seq <= last_seq` for the slot are **rejected** (stale)
//! - Slots never seen are `Waiting`

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::events::{Event, EventKind};
use crate::plan::Verdict;
use crate::subscribers::Subscribe;

/// What a slot is doing, as seen from events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    /// No cycle seen yet, or waiting for the next unit.
    Waiting,
    Running,
    /// Last cycle completed with OK or NOK.
    Stopped,
    /// Last cycle was aborted, emergency-stopped or could not start.
    Error,
}

/// Snapshot entry of one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SlotState {
    pub status: SlotStatus,
    /// Verdict of the last completed cycle.
    pub verdict: Option<Verdict>,
    #[serde(skip)]
    last_seq: u64,
}

impl Default for SlotState {
    fn default() -> Self {
        Self {
            status: SlotStatus::Waiting,
            verdict: None,
            last_seq: 0,
        }
    }
}

/// Thread-safe tracker of slot status.
pub struct SlotMonitor {
    state: RwLock<HashMap<u16, SlotState>>,
    capacity: usize,
}

impl SlotMonitor {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(HashMap::new()),
            capacity: 2048,
        }
    }

    /// Configures the queue capacity for this subscriber.
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Applies `ev` if it is newer than the last event seen for its slot.
    ///
    /// Returns `true` when the slot status changed.
    /// ```text
    /// update(CycleCompleted, seq=100) → Stopped, last_seq=100
    /// update(CycleStarted,   seq=99)  → rejected (stale)
    /// ```
    pub async fn update(&self, ev: &Event) -> bool {
        let Some(slot) = ev.slot else {
            return false;
        };
        let next = match ev.kind {
            EventKind::SlotWaiting => SlotStatus::Waiting,
            EventKind::CycleStarted => SlotStatus::Running,
            EventKind::CycleCompleted => match ev.verdict {
                Some(Verdict::Ok | Verdict::Nok) => SlotStatus::Stopped,
                _ => SlotStatus::Error,
            },
            EventKind::CycleSkipped | EventKind::EmergencyStop => SlotStatus::Error,
            _ => return false,
        };

        let mut state = self.state.write().await;
        let entry = state.entry(slot).or_default();
        if ev.seq <= entry.last_seq {
            return false;
        }
        entry.last_seq = ev.seq;
        if matches!(ev.kind, EventKind::CycleCompleted | EventKind::CycleSkipped) {
            entry.verdict = ev.verdict;
        }
        let changed = entry.status != next;
        entry.status = next;
        changed
    }

    /// Status of `slot` (`Waiting` when never seen).
    pub async fn status(&self, slot: u16) -> SlotStatus {
        self.state
            .read()
            .await
            .get(&slot)
            .map(|s| s.status)
            .unwrap_or(SlotStatus::Waiting)
    }

    /// Sorted copy of every known slot.
    pub async fn snapshot(&self) -> BTreeMap<u16, SlotState> {
        self.state
            .read()
            .await
            .iter()
            .map(|(slot, s)| (*slot, *s))
            .collect()
    }

    /// Slots currently running a cycle, sorted.
    pub async fn running(&self) -> Vec<u16> {
        let mut slots: Vec<u16> = self
            .state
            .read()
            .await
            .iter()
            .filter(|(_, s)| s.status == SlotStatus::Running)
            .map(|(slot, _)| *slot)
            .collect();
        slots.sort_unstable();
        slots
    }
}

impl Default for SlotMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Subscribe for SlotMonitor {
    async fn on_event(&self, ev: &Event) {
        self.update(ev).await;
    }

    fn name(&self) -> &'static str {
        "SlotMonitor"
    }

    fn queue_capacity(&self) -> usize {
        self.capacity
    }
}
