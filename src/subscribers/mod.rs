//! # Event subscribers.
//!
//! This module provides the [`Subscribe`] trait, the [`SubscriberSet`] fan-out and
//! the built-in subscribers for events broadcast through the [`Bus`](crate::Bus).
//!
//! ## Architecture
//! ```text
//! Orchestrator / Executor / AlarmEngine ── publish(Event) ──► Bus ──► Station listener
//!                                                                          │
//!                                                                    SubscriberSet::emit
//!                                                                          │
//!                                                  ┌──────────────┬────────┴─────┬──────────┐
//!                                                  ▼              ▼              ▼          ▼
//!                                             SlotMonitor     LogWriter      HMI/MES     custom
//! ```
//!
//! ## Subscriber types
//! - **Passive subscribers**: observe and react (logging, HMI updates, lamps)
//! - **Stateful subscribers**: maintain state derived from events ([`SlotMonitor`])

mod set;
mod slot_monitor;
mod subscribe;

#[cfg(feature = "logging")]
mod log;

pub use set::SubscriberSet;
pub use slot_monitor::{SlotMonitor, SlotState, SlotStatus};
pub use subscribe::Subscribe;

#[cfg(feature = "logging")]
pub use log::LogWriter;
