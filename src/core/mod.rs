//! Runtime core: stations, cycles and branches.
//!
//! Public API: [`Station`] and [`StationBuilder`], [`CycleOrchestrator`] for running
//! a single cycle directly, [`SlotCycleRegistry`] and [`CycleHandle`] for stop
//! requests, and the report types.
//!
//! Internal modules:
//! - `executor`: per-branch action state machine (retries, goto, after-actions);
//! - `runner`: executes one attempt with timeout/cancellation and event publishing;
//! - `goto`: jump resolution and sequence rewriting;
//! - `gate`, `rendezvous`: barrier between branches;
//! - `handle`, `registry`: stop requests from outside a cycle;
//! - `slot_runner`: per-slot loop from start trigger to finished cycle;
//! - `shutdown`: cross-platform shutdown signal handling.

mod builder;
mod config;
mod executor;
mod gate;
mod goto;
mod handle;
mod orchestrator;
mod registry;
mod rendezvous;
mod report;
mod runner;
mod shutdown;
mod slot_runner;
mod station;

pub use builder::StationBuilder;
pub use config::{Config, MAX_BRANCHES};
pub use handle::CycleHandle;
pub use orchestrator::{CycleDeps, CycleOrchestrator};
pub use registry::SlotCycleRegistry;
pub use report::{ActionRecord, BranchReport, BranchStop, CycleReport};
pub use slot_runner::SlotSource;
pub use station::Station;
