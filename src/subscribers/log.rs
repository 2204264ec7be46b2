//! # LogWriter: events rendered through `tracing`.
//!
//! A minimal subscriber that turns every [`Event`] into one `tracing` record. Use it
//! on a bench station or in demos; production stations usually log through their
//! own subscriber.
//!
//! ## Example output (fmt layer)
//! ```text
//! INFO  [cycle-started] slot=4 cycle=6a1f...
//! DEBUG [action-starting] slot=4 branch=1 step=3 action="measure 5V" attempt=1
//! WARN  [action-retrying] slot=4 branch=1 step=3 action="measure 5V" attempt=1 reason=failed
//! INFO  [goto] slot=4 branch=1 step=10 reason="from=9 to=3"
//! WARN  [alarm-raised] code=3 description="guard open"
//! INFO  [cycle-completed] slot=4 verdict=OK
//! ```

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let slot = e.slot;
        let branch = e.branch;
        let step = e.step;
        let action = e.action.as_deref();
        let verdict = e.verdict.map(|v| v.as_label());
        let reason = e.reason.as_deref();

        match e.kind {
            EventKind::ShutdownRequested => info!("[shutdown-requested]"),
            EventKind::AllStoppedWithin => info!("[all-stopped-within-grace]"),
            EventKind::GraceExceeded => warn!(?slot, "[grace-exceeded]"),
            EventKind::SlotWaiting => debug!(?slot, "[slot-waiting]"),
            EventKind::CycleSkipped => warn!(?slot, ?verdict, ?reason, "[cycle-skipped]"),
            EventKind::CycleStarted => info!(?slot, cycle = ?e.cycle, "[cycle-started]"),
            EventKind::CycleCompleted => info!(?slot, ?verdict, "[cycle-completed]"),
            EventKind::CycleCancelled => warn!(?slot, ?verdict, ?reason, "[cycle-cancelled]"),
            EventKind::CycleAborted => warn!(?slot, ?branch, "[cycle-aborted]"),
            EventKind::PlanDiscontinuity => warn!(?slot, dropped = ?reason, "[plan-discontinuity]"),
            EventKind::BranchStarted => debug!(?slot, ?branch, "[branch-started]"),
            EventKind::BranchCompleted => debug!(?slot, ?branch, ?verdict, stop = ?reason, "[branch-completed]"),
            EventKind::ActionStarting => {
                debug!(?slot, ?branch, ?step, ?action, attempt = ?e.attempt, "[action-starting]")
            }
            EventKind::ActionFinished => {
                debug!(?slot, ?branch, ?step, ?action, ?verdict, "[action-finished]")
            }
            EventKind::ActionRetrying => {
                warn!(?slot, ?branch, ?step, ?action, attempt = ?e.attempt, ?reason, "[action-retrying]")
            }
            EventKind::ActionTimeout => {
                warn!(?slot, ?branch, ?step, ?action, timeout_ms = ?e.timeout_ms, "[action-timeout]")
            }
            EventKind::ActionFailed => warn!(?slot, ?branch, ?step, ?action, ?reason, "[action-failed]"),
            EventKind::GotoJump => info!(?slot, ?branch, ?step, ?reason, "[goto]"),
            EventKind::RendezvousArrived => debug!(?slot, ?branch, group = ?e.group, "[rendezvous-arrived]"),
            EventKind::RendezvousReleased => debug!(?slot, group = ?e.group, "[rendezvous-released]"),
            EventKind::AlarmRaised | EventKind::AlarmCleared => {
                let label = if e.kind == EventKind::AlarmRaised {
                    "[alarm-raised]"
                } else {
                    "[alarm-cleared]"
                };
                match e.alarm.as_deref() {
                    Some(a) => warn!(code = a.code, description = %a.description, "{label}"),
                    None => warn!("{label}"),
                }
            }
            EventKind::EmergencyStop => warn!(?slot, ?reason, "[emergency-stop]"),
            EventKind::SubscriberOverflow => warn!(subscriber = ?action, ?reason, "[subscriber-overflow]"),
            EventKind::SubscriberPanicked => warn!(subscriber = ?action, ?reason, "[subscriber-panicked]"),
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
