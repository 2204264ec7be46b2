//! # Runtime events emitted by the station, orchestrators, executors and the alarm engine.
//!
//! The [`EventKind`] enum classifies event types across six categories:
//! - **Slot events**: a slot runner waiting for a unit or refusing to start a cycle
//! - **Cycle events**: start, completion, cancellation and abort of a cycle
//! - **Branch/action events**: execution flow inside a branch (attempts, retries, jumps)
//! - **Rendezvous events**: arrivals and group releases
//! - **Alarm events**: alarm raised/cleared and emergency stops
//! - **Runtime events**: shutdown and subscriber health
//!
//! The [`Event`] struct carries additional metadata such as timestamps, slot, cycle id,
//! branch, action name, verdict and alarm record.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//! Use `seq` to restore the exact order when events are delivered out of order.
//!
//! ## Example
//! ```rust
//! use stationvisor::{Event, EventKind, Verdict};
//!
//! let ev = Event::new(EventKind::ActionFinished)
//!     .with_slot(3)
//!     .with_branch(1)
//!     .with_action("measure-voltage")
//!     .with_verdict(Verdict::Nok)
//!     .with_attempt(3);
//!
//! assert_eq!(ev.kind, EventKind::ActionFinished);
//! assert_eq!(ev.action.as_deref(), Some("measure-voltage"));
//! assert_eq!(ev.verdict, Some(Verdict::Nok));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

use crate::alarms::AlarmRecord;
use crate::plan::Verdict;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets:
    /// - `action`: subscriber name
    /// - `reason`: panic info/message
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets:
    /// - `action`: subscriber name
    /// - `reason`: reason string (e.g., "full", "closed")
    SubscriberOverflow,

    // === Shutdown events ===
    /// Shutdown requested (OS signal observed or explicit call).
    ShutdownRequested,

    /// All cycles stopped within configured grace period.
    AllStoppedWithin,

    /// Grace period exceeded; some cycles did not stop in time.
    ///
    /// Sets:
    /// - `reason`: stuck slots
    GraceExceeded,

    // === Slot events ===
    /// Slot runner waits for its start trigger.
    ///
    /// Sets:
    /// - `slot`
    SlotWaiting,

    /// A start request did not lead to a cycle (unit not identified, no plan,
    /// station degraded). The verdict is still stored as the final result.
    ///
    /// Sets:
    /// - `slot`, `cycle`
    /// - `verdict`: DEVICE_IDENTIFICATION_ERROR, INVALID_TESTPLAN or DEGRADED
    /// - `reason`: failure description
    CycleSkipped,

    // === Cycle events ===
    /// Cycle accepted and registered; branches are about to start.
    ///
    /// Sets:
    /// - `slot`, `cycle`
    CycleStarted,

    /// Cycle finalized (always the last cycle event).
    ///
    /// Sets:
    /// - `slot`, `cycle`
    /// - `verdict`: final cycle verdict
    CycleCompleted,

    /// Cycle scope cancelled from outside (registry cancel or alarm alert).
    ///
    /// Sets:
    /// - `slot`, `cycle`
    /// - `reason`: "alarm" or "cancel"
    CycleCancelled,

    /// An Abort action stopped the cycle.
    ///
    /// Sets:
    /// - `slot`, `cycle`, `branch`, `step`, `action`
    CycleAborted,

    /// Plan uses branch numbers after a gap; those branches are not run.
    ///
    /// Sets:
    /// - `slot`, `cycle`
    /// - `reason`: dropped branch numbers
    PlanDiscontinuity,

    // === Branch / action events ===
    /// Branch executor spawned.
    ///
    /// Sets:
    /// - `slot`, `cycle`, `branch`
    BranchStarted,

    /// Branch executor finished.
    ///
    /// Sets:
    /// - `slot`, `cycle`, `branch`
    /// - `verdict`: branch aggregate
    /// - `reason`: stop reason label
    BranchCompleted,

    /// Attempt of an action is starting.
    ///
    /// Sets:
    /// - `slot`, `cycle`, `branch`, `step`, `action`, `attempt`
    ActionStarting,

    /// Action stored with its final verdict.
    ///
    /// Sets:
    /// - `slot`, `cycle`, `branch`, `step`, `action`, `attempt`
    /// - `verdict`
    ActionFinished,

    /// Another attempt follows.
    ///
    /// Sets:
    /// - `slot`, `cycle`, `branch`, `step`, `action`, `attempt` (the failed one)
    /// - `reason`: outcome label
    ActionRetrying,

    /// Attempt exceeded its timeout.
    ///
    /// Sets:
    /// - `slot`, `cycle`, `branch`, `step`, `action`, `attempt`
    /// - `timeout_ms`
    ActionTimeout,

    /// Attempt failed with an error.
    ///
    /// Sets:
    /// - `slot`, `cycle`, `branch`, `step`, `action`, `attempt`
    /// - `reason`: error message
    ActionFailed,

    /// Cursor rewritten by a jump.
    ///
    /// Sets:
    /// - `slot`, `cycle`, `branch`, `step` (source), `action`
    /// - `reason`: "from=<pos> to=<pos>"
    GotoJump,

    // === Rendezvous events ===
    /// A branch arrived at a rendezvous point.
    ///
    /// Sets:
    /// - `cycle`, `branch`, `group`
    RendezvousArrived,

    /// Every participant arrived; gates reopened.
    ///
    /// Sets:
    /// - `cycle`, `group`
    RendezvousReleased,

    // === Alarm events ===
    /// Alarm bit went high.
    ///
    /// Sets:
    /// - `alarm`: the record
    AlarmRaised,

    /// Alarm bit went low (closing event).
    ///
    /// Sets:
    /// - `alarm`: the record
    AlarmCleared,

    /// Emergency signal observed high.
    ///
    /// Sets:
    /// - `slot`: flagged slot (absent = global halt)
    EmergencyStop,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Slot identifier.
    pub slot: Option<u16>,
    /// Cycle id.
    pub cycle: Option<Arc<str>>,
    /// Branch number.
    pub branch: Option<u8>,
    /// Declared step of the action.
    pub step: Option<u32>,
    /// Action name (or subscriber name for subscriber events).
    pub action: Option<Arc<str>>,
    /// Attempt count (starting from 1).
    pub attempt: Option<u32>,
    /// Attempt timeout in milliseconds (compact).
    pub timeout_ms: Option<u32>,
    /// Verdict of an action, branch or cycle.
    pub verdict: Option<Verdict>,
    /// Rendezvous group.
    pub group: Option<Arc<str>>,
    /// Human-readable reason (errors, overflow details, etc.).
    pub reason: Option<Arc<str>>,
    /// Alarm record for alarm events.
    pub alarm: Option<Arc<AlarmRecord>>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            slot: None,
            cycle: None,
            branch: None,
            step: None,
            action: None,
            attempt: None,
            timeout_ms: None,
            verdict: None,
            group: None,
            reason: None,
            alarm: None,
        }
    }

    #[inline]
    pub fn with_slot(mut self, slot: u16) -> Self {
        self.slot = Some(slot);
        self
    }

    #[inline]
    pub fn with_cycle(mut self, cycle: impl Into<Arc<str>>) -> Self {
        self.cycle = Some(cycle.into());
        self
    }

    #[inline]
    pub fn with_branch(mut self, branch: u8) -> Self {
        self.branch = Some(branch);
        self
    }

    #[inline]
    pub fn with_step(mut self, step: u32) -> Self {
        self.step = Some(step);
        self
    }

    #[inline]
    pub fn with_action(mut self, action: impl Into<Arc<str>>) -> Self {
        self.action = Some(action.into());
        self
    }

    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches a timeout duration (stored as milliseconds).
    #[inline]
    pub fn with_timeout(mut self, d: Duration) -> Self {
        let ms = d.as_millis().min(u128::from(u32::MAX)) as u32;
        self.timeout_ms = Some(ms);
        self
    }

    #[inline]
    pub fn with_verdict(mut self, verdict: Verdict) -> Self {
        self.verdict = Some(verdict);
        self
    }

    #[inline]
    pub fn with_group(mut self, group: impl Into<Arc<str>>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    #[inline]
    pub fn with_alarm(mut self, record: AlarmRecord) -> Self {
        self.alarm = Some(Arc::new(record));
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_action(subscriber)
            .with_reason(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_action(subscriber)
            .with_reason(info)
    }

    #[inline]
    pub fn is_subscriber_event(&self) -> bool {
        matches!(
            self.kind,
            EventKind::SubscriberOverflow | EventKind::SubscriberPanicked
        )
    }
}
