//! # Cycle handle: the cancellable face of a running cycle.
//!
//! A [`CycleHandle`] is what the Slot-Cycle Registry stores. It exposes the two
//! external stop requests of a cycle and nothing else:
//!
//! ```text
//! Registry::cancel(slot) ──► handle.cancel_current_operation()
//! Station alarm relay    ──► handle.alarm_alert()
//!                                 │
//!                                 ├─► sticky verdict := EMERGENCY_ABORT (first sticky wins)
//!                                 ├─► alarm flag (alarm_alert only)
//!                                 └─► cycle token.cancel() ──► executors unwind
//!                                                         └─► orchestrator finalizes
//! ```
//!
//! ## Rules
//! - Stop requests on a cycle that is not running are ignored.
//! - The cycle token is never reset; a cancelled cycle instance stays cancelled.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::events::{Bus, Event, EventKind};
use crate::plan::Verdict;

/// Cycle verdict that can be set once and never overwritten.
#[derive(Debug, Default)]
pub(crate) struct StickyVerdict(AtomicU8);

impl StickyVerdict {
    /// Stores `v` unless a verdict is already set; returns whether it was stored.
    pub(crate) fn set(&self, v: Verdict) -> bool {
        self.0
            .compare_exchange(0, v.code(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn get(&self) -> Option<Verdict> {
        Verdict::from_code(self.0.load(Ordering::Acquire))
    }
}

#[derive(Debug)]
struct CycleShared {
    cycle_id: Uuid,
    slot: u16,
    token: CancellationToken,
    started: AtomicBool,
    running: AtomicBool,
    alarm: AtomicBool,
    verdict: StickyVerdict,
    bus: Bus,
}

/// Cheap cloneable handle to one cycle instance.
#[derive(Clone, Debug)]
pub struct CycleHandle {
    shared: Arc<CycleShared>,
}

impl CycleHandle {
    pub(crate) fn new(cycle_id: Uuid, slot: u16, bus: Bus) -> Self {
        Self {
            shared: Arc::new(CycleShared {
                cycle_id,
                slot,
                token: CancellationToken::new(),
                started: AtomicBool::new(false),
                running: AtomicBool::new(false),
                alarm: AtomicBool::new(false),
                verdict: StickyVerdict::default(),
                bus,
            }),
        }
    }

    pub fn cycle_id(&self) -> Uuid {
        self.shared.cycle_id
    }

    pub fn slot(&self) -> u16 {
        self.shared.slot
    }

    /// Between a successful start and finalization.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.token.is_cancelled()
    }

    /// Sticky verdict set by an abort or a stop request.
    pub fn sticky_verdict(&self) -> Option<Verdict> {
        self.shared.verdict.get()
    }

    /// Stops the cycle with EMERGENCY_ABORT; returns whether this call cancelled it.
    pub fn cancel_current_operation(&self) -> bool {
        self.stop(Verdict::EmergencyAbort, "cancel")
    }

    /// Like [`cancel_current_operation`](Self::cancel_current_operation), and flags
    /// every branch's current action as interrupted by an alarm.
    pub fn alarm_alert(&self) -> bool {
        if !self.is_running() {
            return false;
        }
        self.shared.alarm.store(true, Ordering::Release);
        self.stop(Verdict::EmergencyAbort, "alarm")
    }

    fn stop(&self, verdict: Verdict, reason: &'static str) -> bool {
        if !self.is_running() || self.shared.token.is_cancelled() {
            return false;
        }
        self.shared.verdict.set(verdict);
        self.shared.token.cancel();
        info!(slot = self.shared.slot, cycle = %self.shared.cycle_id, reason, "cycle cancelled");
        self.shared.bus.publish(
            Event::new(EventKind::CycleCancelled)
                .with_slot(self.shared.slot)
                .with_cycle(self.shared.cycle_id.to_string())
                .with_verdict(verdict)
                .with_reason(reason),
        );
        true
    }

    /// Stops the cycle with ABORTED (Abort action reached).
    pub(crate) fn abort(&self) -> bool {
        self.shared.verdict.set(Verdict::Aborted);
        if self.shared.token.is_cancelled() {
            return false;
        }
        self.shared.token.cancel();
        true
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.shared.token
    }

    pub(crate) fn alarm_raised(&self) -> bool {
        self.shared.alarm.load(Ordering::Acquire)
    }

    /// Marks the instance started; `false` when it already was.
    pub(crate) fn try_start(&self) -> bool {
        self.shared
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.shared.running.store(running, Ordering::Release);
    }
}
