//! # Slot-Cycle Registry: which cycle currently runs on which slot.
//!
//! The registry is the only path from the outside world (alarm engine, station,
//! operator screens) into running cycles:
//!
//! ```text
//! CycleOrchestrator::run()
//!     ├─► register(handle)       slot busy? ──► SlotBusy
//!     │      ...cycle runs...
//!     └─► unregister(slot, id)   only if the stored handle is still this cycle
//!
//! AlarmEngine  ──► cancel(slot) / cancel_all()   ──► handle.cancel_current_operation()
//! Station      ──► alarm_all()                   ──► handle.alarm_alert()
//! ```
//!
//! ## Rules
//! - At most one cycle per slot.
//! - Handles are cloned out of the lock before being signalled.
//! - Cancelling an empty slot is a no-op returning `false`.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::error::RuntimeError;

use super::handle::CycleHandle;

static GLOBAL: Lazy<Arc<SlotCycleRegistry>> = Lazy::new(SlotCycleRegistry::new);

/// Concurrent map slot → running cycle.
#[derive(Debug, Default)]
pub struct SlotCycleRegistry {
    cycles: RwLock<HashMap<u16, CycleHandle>>,
}

impl SlotCycleRegistry {
    /// Creates an empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Process-wide registry shared by stations that do not bring their own.
    pub fn global() -> Arc<Self> {
        GLOBAL.clone()
    }

    /// Registers the cycle of `handle.slot()`.
    pub async fn register(&self, handle: CycleHandle) -> Result<(), RuntimeError> {
        let slot = handle.slot();
        let mut cycles = self.cycles.write().await;
        if cycles.contains_key(&slot) {
            return Err(RuntimeError::SlotBusy { slot });
        }
        debug!(slot, cycle = %handle.cycle_id(), "cycle registered");
        cycles.insert(slot, handle);
        Ok(())
    }

    /// Removes the slot entry if it still belongs to `cycle_id`.
    pub async fn unregister(&self, slot: u16, cycle_id: Uuid) -> bool {
        let mut cycles = self.cycles.write().await;
        match cycles.get(&slot) {
            Some(h) if h.cycle_id() == cycle_id => {
                cycles.remove(&slot);
                debug!(slot, cycle = %cycle_id, "cycle unregistered");
                true
            }
            _ => false,
        }
    }

    /// Cancels the cycle on `slot`; `false` when the slot is empty or already stopping.
    pub async fn cancel(&self, slot: u16) -> bool {
        match self.get(slot).await {
            Some(h) => h.cancel_current_operation(),
            None => false,
        }
    }

    /// Cancels every registered cycle; returns the slots actually cancelled.
    pub async fn cancel_all(&self) -> Vec<u16> {
        let handles = self.handles().await;
        handles
            .into_iter()
            .filter(|h| h.cancel_current_operation())
            .map(|h| h.slot())
            .collect()
    }

    /// Alarm-stops every registered cycle; returns the slots actually stopped.
    pub async fn alarm_all(&self) -> Vec<u16> {
        let handles = self.handles().await;
        handles
            .into_iter()
            .filter(|h| h.alarm_alert())
            .map(|h| h.slot())
            .collect()
    }

    pub async fn get(&self, slot: u16) -> Option<CycleHandle> {
        self.cycles.read().await.get(&slot).cloned()
    }

    pub async fn is_busy(&self, slot: u16) -> bool {
        self.cycles.read().await.contains_key(&slot)
    }

    /// Sorted list of busy slots.
    pub async fn slots(&self) -> Vec<u16> {
        let mut slots: Vec<u16> = self.cycles.read().await.keys().copied().collect();
        slots.sort_unstable();
        slots
    }

    async fn handles(&self) -> Vec<CycleHandle> {
        let mut handles: Vec<CycleHandle> = self.cycles.read().await.values().cloned().collect();
        handles.sort_by_key(CycleHandle::slot);
        handles
    }
}
