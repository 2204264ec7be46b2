//! Runtime events: types and broadcast bus.
//!
//! This module groups the event **data model** and the **bus** used to
//! publish/subscribe to runtime events emitted by the station, orchestrators,
//! branch executors, the rendezvous coordinator and the alarm engine.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `CycleOrchestrator`, `BranchExecutor`, `runner::run_attempt`,
//!   `RendezvousCoordinator`, `AlarmEngine`, `Station`, `SubscriberSet` workers.
//! - **Consumers**: `Station` listener (fans out to `SubscriberSet`, relays alarms to
//!   running cycles).

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
