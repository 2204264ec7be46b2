//! # stationvisor
//!
//! **Stationvisor** is the runtime of a manufacturing test station: it executes test
//! cycles on independent slots and watches the station's PLC alarm bits and
//! emergency-stop inputs.
//!
//! A cycle runs a test plan split into up to five parallel branches. Each branch
//! steps through its actions with retries, timeouts, jumps, operator dialogs,
//! rendezvous points and dynamically inserted follow-up actions. Every action result
//! is persisted, and every cycle ends with exactly one verdict that is persisted and
//! exported, even when it was stopped by an emergency.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!     ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!     │ slot 1 cycle │   │ slot 2 cycle │   │ slot 3 cycle │
//!     │ (plan + UUT) │   │ (plan + UUT) │   │ (plan + UUT) │
//!     └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!            ▼                  ▼                  ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Station                                                          │
//! │  - Bus (broadcast events)                                         │
//! │  - SlotMonitor (slot status from events, sequence-ordered)        │
//! │  - SubscriberSet (fans out to user subscribers)                   │
//! │  - SlotCycleRegistry (slot → running cycle)                       │
//! │  - AlarmEngine (optional; alarm bits + emergency stops)           │
//! └──────┬──────────────────┬──────────────────┬───────────────┬──────┘
//!        ▼                  ▼                  ▼               │
//!  ┌─────────────────┐ ┌─────────────────┐ ┌─────────────────┐ │
//!  │CycleOrchestrator│ │CycleOrchestrator│ │CycleOrchestrator│ │
//!  │ BranchExecutor×N│ │ BranchExecutor×N│ │ BranchExecutor×N│ │
//!  └┬────────────────┘ └┬────────────────┘ └┬────────────────┘ │
//!   │ CycleStarted      │ ActionStarting    │ GotoJump         │ AlarmRaised
//!   │ ActionRetrying    │ ActionFinished    │ CycleCompleted   │ EmergencyStop
//!   ▼                   ▼                   ▼                  ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                        Bus (broadcast channel)                    │
//! │                    (capacity: Config::bus_capacity)               │
//! └─────────────────────────────────┬─────────────────────────────────┘
//!                                   ▼
//!                       ┌────────────────────────┐
//!                       │    station listener    │
//!                       └───┬────────────────┬───┘
//!                           ▼                ▼
//!                    SubscriberSet      alarm relay
//!                  (per-sub queues)  (AlarmRaised ─► alarm_all)
//! ```
//!
//! ### Branch lifecycle
//! ```text
//! for each action at cursor:
//!   ├─► disabled ─► BYPASSED
//!   ├─► attempt loop (1 + max_retries):
//!   │       ├─ Abort       ─► ABORTED, cycle cancelled
//!   │       ├─ Rendezvous  ─► wait for the group
//!   │       └─ behavior    ─► Success / Failed / FailedTimeout / GoToMark / Exception
//!   ├─► verdict (negate) ─► group recompute ─► persist
//!   ├─► after-conditions (dialog, wait, jump to mark)
//!   └─► after-actions inserted behind the cursor
//! ```
//!
//! ## Features
//! | Area              | Description                                                      | Key types / traits                            |
//! |-------------------|------------------------------------------------------------------|-----------------------------------------------|
//! | **Plans**         | Deserializable plan data and pluggable behaviors.                | [`ActionDefinition`], [`ActionBehavior`]      |
//! | **Cycles**        | Run one cycle, collect its report.                               | [`CycleOrchestrator`], [`CycleReport`]        |
//! | **Station**       | Slots, admission, alarm relay, graceful shutdown.                | [`Station`], [`StationBuilder`]               |
//! | **Slot runners**  | Trigger, identify, run, repeat on one slot.                      | [`Station::start_slot`], [`SlotSource`]       |
//! | **Alarms**        | Alarm bit evaluation and emergency stops.                        | [`AlarmEngine`], [`AlarmRecord`]              |
//! | **Collaborators** | PLC, persistence, telemetry, prompts, export.                    | [`ports`], [`memory`]                         |
//! | **Subscriber API**| Hook into runtime events.                                        | [`Subscribe`], [`SlotMonitor`]                |
//! | **Errors**        | Typed errors for runtime, actions, alarm layout, collaborators.  | [`RuntimeError`], [`ActionError`]             |
//!
//! ## Optional features
//! - `logging`: exports a simple built-in [`LogWriter`] rendering events through `tracing`.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use stationvisor::{
//!     ActionContext, ActionDefinition, ActionError, ActionFn, ActionKind, ActionOutput,
//!     BehaviorCatalog, Config, CycleContext, CycleDeps, CycleOrchestrator, Bus,
//!     SlotCycleRegistry, Verdict,
//! };
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let catalog = BehaviorCatalog::new().with(ActionFn::arc("flash", |ctx: ActionContext| async move {
//!         if ctx.attempt < 2 {
//!             return Err(ActionError::fail("checksum mismatch"));
//!         }
//!         Ok(ActionOutput::success())
//!     }));
//!
//!     let plan = vec![
//!         ActionDefinition::new("flash", 1, 1).with_retries(1).with_mark("flash"),
//!         ActionDefinition::new("scan label", 2, 1)
//!             .with_kind(ActionKind::PromptUser { message: "scan the label".into() }),
//!     ];
//!
//!     let cycle = CycleOrchestrator::new(
//!         Config::default(),
//!         CycleContext::new(1, 2, "SN-0042"),
//!         plan,
//!         CycleDeps::in_memory(Arc::new(catalog)),
//!         SlotCycleRegistry::new(),
//!         Bus::default(),
//!     );
//!     let report = cycle.run().await?;
//!
//!     assert_eq!(report.verdict, Verdict::Ok);
//!     assert_eq!(report.branch(1).unwrap().action("flash").unwrap().retries(), 1);
//!     Ok(())
//! }
//! ```
mod core;
mod durations;
mod error;
mod events;
mod plan;

pub mod alarms;
pub mod memory;
pub mod ports;
pub mod subscribers;

// ---- Public re-exports ----

pub use alarms::{
    AlarmBlockConfig, AlarmDeps, AlarmEngine, AlarmEngineConfig, AlarmMeta, AlarmRecord,
    EmergencySignalConfig, EmergencyStatus,
};
pub use core::{
    ActionRecord, BranchReport, BranchStop, Config, CycleDeps, CycleHandle, CycleOrchestrator,
    CycleReport, MAX_BRANCHES, SlotCycleRegistry, SlotSource, Station, StationBuilder,
};
pub use error::{ActionError, AlarmError, ExternalError, RuntimeError};
pub use events::{Bus, Event, EventKind};
pub use plan::{
    ActionBehavior, ActionCatalog, ActionContext, ActionDefinition, ActionFn, ActionId,
    ActionKind, ActionOutput, ActionSequence, ActionState, AfterConditions, BehaviorCatalog,
    BehaviorRef, CycleContext, ExportedValue, GotoMode, GroupMembership, PlanAction, StepOutcome,
    Verdict, resolve_behavior,
};
pub use subscribers::{SlotMonitor, SlotStatus, Subscribe, SubscriberSet};

// Optional: expose a simple built-in logger subscriber (demo/reference).
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
