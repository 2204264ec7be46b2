//! # Station: slots, cycles, alarms and graceful shutdown.
//!
//! The [`Station`] owns the event bus, a [`SubscriberSet`], a [`SlotMonitor`], the
//! Slot-Cycle Registry and an optional [`AlarmEngine`]. Cycles are started either
//! one at a time with [`Station::start_cycle`] or continuously by a slot runner
//! ([`Station::start_slot`]); everything is stopped on shutdown.
//!
//! ## Key responsibilities
//! - subscribe to the [`Bus`] and **fan out** events via [`SubscriberSet`]
//! - relay raised alarms to every running cycle (`abort_cycles_on_alarm`)
//! - admit at most one cycle per slot ("drop if running")
//! - handle OS signals and stop with a configurable [`Config::grace`]
//!
//! ## High-level architecture
//! ```text
//! start_cycle(context, plan)
//!     ├─ slot task or runner unfinished? ─► SlotBusy
//!     └─ spawn CycleOrchestrator::run() ─► CycleHandle returned
//!
//! start_slot(slot, source)
//!     ├─ slot task or runner unfinished? ─► SlotBusy
//!     └─ spawn SlotRunner::run()  (trigger → identify → cycle → repeat)
//!
//! Event flow:
//!   Orchestrator / Executor / AlarmEngine ── publish ──► Bus ──► listener
//!                                                                 ├─► SubscriberSet::emit(&Event)
//!                                                                 └─► AlarmRaised ─► registry.alarm_all()
//!
//! Shutdown path:
//!   shutdown()
//!     └─► Bus.publish(ShutdownRequested)
//!     └─► alarm_engine.stop()
//!     └─► slot runners cancelled          → no new cycles
//!     └─► registry.cancel_all()           → every cycle ends EMERGENCY_ABORT
//!     └─► wait for cycle tasks and runners (grace):
//!            ├─ all joined   → Bus.publish(AllStoppedWithin)
//!            └─ grace ran out → Bus.publish(GraceExceeded), tasks aborted
//!                               RuntimeError::GraceExceeded { stuck slots }
//! ```
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use stationvisor::{
//!     ActionContext, ActionDefinition, ActionError, ActionFn, ActionOutput, BehaviorCatalog,
//!     Config, CycleContext, CycleDeps, Station, Verdict,
//! };
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let catalog = BehaviorCatalog::new().with(ActionFn::arc("measure", |_ctx: ActionContext| async {
//!         Ok::<_, ActionError>(ActionOutput::success().with_export("voltage", "12.1"))
//!     }));
//!
//!     let station = Station::builder(Config::default())
//!         .with_cycle_deps(CycleDeps::in_memory(Arc::new(catalog)))
//!         .build();
//!
//!     let plan = vec![ActionDefinition::new("measure", 1, 1).with_retries(2)];
//!     station.start_cycle(CycleContext::new(1, 3, "SN-0001"), plan)?;
//!
//!     let report = station.join(3).await.expect("cycle report");
//!     assert_eq!(report.verdict, Verdict::Ok);
//!     station.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::{join, join_all};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::alarms::{AlarmEngine, EmergencySignalConfig};
use crate::error::RuntimeError;
use crate::events::{Bus, Event, EventKind};
use crate::plan::{ActionDefinition, CycleContext};
use crate::subscribers::{SlotMonitor, SubscriberSet};

use super::builder::StationBuilder;
use super::config::Config;
use super::handle::CycleHandle;
use super::orchestrator::{CycleDeps, CycleOrchestrator};
use super::registry::SlotCycleRegistry;
use super::report::CycleReport;
use super::shutdown;
use super::slot_runner::{SlotRunner, SlotSource};

type CycleTask = JoinHandle<Option<CycleReport>>;

/// A test station with independently running slots.
pub struct Station {
    cfg: Config,
    bus: Bus,
    subs: Arc<SubscriberSet>,
    monitor: Arc<SlotMonitor>,
    registry: Arc<SlotCycleRegistry>,
    deps: CycleDeps,
    alarms: Option<(Arc<AlarmEngine>, Vec<EmergencySignalConfig>)>,
    cycles: Mutex<HashMap<u16, CycleTask>>,
    runners: Mutex<HashMap<u16, JoinHandle<()>>>,
    runners_token: CancellationToken,
    token: CancellationToken,
}

impl Station {
    /// Starts building a station.
    pub fn builder(cfg: Config) -> StationBuilder {
        StationBuilder::new(cfg)
    }

    pub(super) fn new_internal(
        cfg: Config,
        bus: Bus,
        subs: Arc<SubscriberSet>,
        monitor: Arc<SlotMonitor>,
        registry: Arc<SlotCycleRegistry>,
        deps: CycleDeps,
        alarms: Option<(Arc<AlarmEngine>, Vec<EmergencySignalConfig>)>,
    ) -> Self {
        let token = CancellationToken::new();
        Self {
            cfg,
            bus,
            subs,
            monitor,
            registry,
            deps,
            alarms,
            cycles: Mutex::new(HashMap::new()),
            runners: Mutex::new(HashMap::new()),
            runners_token: token.child_token(),
            token,
        }
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn registry(&self) -> &Arc<SlotCycleRegistry> {
        &self.registry
    }

    pub fn monitor(&self) -> &Arc<SlotMonitor> {
        &self.monitor
    }

    pub fn alarm_engine(&self) -> Option<&Arc<AlarmEngine>> {
        self.alarms.as_ref().map(|(engine, _)| engine)
    }

    /// Subscribes to the bus and forwards events to subscribers and the alarm relay.
    pub(super) fn spawn_listener(&self) {
        let mut rx = self.bus.subscribe();
        let subs = Arc::clone(&self.subs);
        let registry = Arc::clone(&self.registry);
        let relay = self.cfg.abort_cycles_on_alarm;
        let token = self.token.clone();

        tokio::spawn(async move {
            loop {
                let ev = tokio::select! {
                    _ = token.cancelled() => break,
                    r = rx.recv() => match r {
                        Ok(ev) => ev,
                        Err(RecvError::Lagged(n)) => {
                            warn!(skipped = n, "station listener lagged behind the bus");
                            continue;
                        }
                        Err(RecvError::Closed) => break,
                    },
                };
                subs.emit(&ev);
                if relay && ev.kind == EventKind::AlarmRaised {
                    let stopped = registry.alarm_all().await;
                    if !stopped.is_empty() {
                        warn!(slots = ?stopped, "alarm raised; cycles stopped");
                    }
                }
            }
        });
    }

    /// Starts the alarm engine (if configured) and enables block polling.
    pub async fn start_alarms(&self) -> Result<(), RuntimeError> {
        let Some((engine, signals)) = &self.alarms else {
            return Ok(());
        };
        engine.start(signals.clone()).await?;
        engine.enable();
        Ok(())
    }

    /// Spawns a cycle on `context.slot_id`; `SlotBusy` while the slot's last cycle runs.
    pub fn start_cycle(
        &self,
        context: CycleContext,
        plan: Vec<ActionDefinition>,
    ) -> Result<CycleHandle, RuntimeError> {
        let slot = context.slot_id;
        let mut cycles = self.cycles.lock().unwrap_or_else(PoisonError::into_inner);
        if cycles.get(&slot).is_some_and(|t| !t.is_finished()) || self.runner_active(slot) {
            return Err(RuntimeError::SlotBusy { slot });
        }

        let orch = CycleOrchestrator::new(
            self.cfg.clone(),
            context,
            plan,
            self.deps.clone(),
            Arc::clone(&self.registry),
            self.bus.clone(),
        );
        let handle = orch.handle();
        let task = tokio::spawn(async move {
            match orch.run().await {
                Ok(report) => Some(report),
                Err(e) => {
                    warn!(slot, error = %e, "cycle rejected");
                    None
                }
            }
        });
        cycles.insert(slot, task);
        Ok(handle)
    }

    /// Spawns a runner that keeps testing units on `slot` until shutdown.
    ///
    /// `SlotBusy` while a cycle started with [`start_cycle`](Self::start_cycle) or
    /// another runner owns the slot.
    pub fn start_slot(&self, slot: u16, source: SlotSource) -> Result<(), RuntimeError> {
        // Lock order: cycles, then runners.
        let cycles = self.cycles.lock().unwrap_or_else(PoisonError::into_inner);
        let mut runners = self.runners.lock().unwrap_or_else(PoisonError::into_inner);
        if cycles.get(&slot).is_some_and(|t| !t.is_finished())
            || runners.get(&slot).is_some_and(|t| !t.is_finished())
        {
            return Err(RuntimeError::SlotBusy { slot });
        }

        let runner = SlotRunner {
            slot,
            cfg: self.cfg.clone(),
            deps: self.deps.clone(),
            source,
            registry: Arc::clone(&self.registry),
            bus: self.bus.clone(),
        };
        runners.insert(slot, tokio::spawn(runner.run(self.runners_token.child_token())));
        Ok(())
    }

    fn runner_active(&self, slot: u16) -> bool {
        self.runners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&slot)
            .is_some_and(|t| !t.is_finished())
    }

    /// Waits for the last cycle started on `slot`; `None` when there is none or it was rejected.
    pub async fn join(&self, slot: u16) -> Option<CycleReport> {
        let task = self
            .cycles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&slot)?;
        match task.await {
            Ok(report) => report,
            Err(e) => {
                error!(slot, error = %e, "cycle task failed");
                None
            }
        }
    }

    /// Cancels the cycle on `slot` with EMERGENCY_ABORT.
    pub async fn cancel_cycle(&self, slot: u16) -> bool {
        self.registry.cancel(slot).await
    }

    /// Stops every running cycle as if an alarm had been raised.
    pub async fn alarm_alert(&self) -> Vec<u16> {
        self.registry.alarm_all().await
    }

    /// Waits for a termination signal, then shuts down.
    pub async fn run_until_shutdown(&self) -> Result<(), RuntimeError> {
        if let Err(e) = shutdown::wait_for_shutdown_signal().await {
            warn!(error = %e, "signal listener failed; shutting down");
        }
        self.shutdown().await
    }

    /// Stops alarms, slot runners and cycles, waiting up to [`Config::grace`] for them to finish.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        info!("station shutdown requested");
        self.bus.publish(Event::new(EventKind::ShutdownRequested));

        if let Some((engine, _)) = &self.alarms {
            engine.stop().await;
        }
        self.runners_token.cancel();
        self.registry.cancel_all().await;

        let tasks: Vec<(u16, CycleTask)> = self
            .cycles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        let runners: Vec<(u16, JoinHandle<()>)> = self
            .runners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        let aborts: Vec<_> = tasks
            .iter()
            .map(|(slot, t)| (*slot, t.abort_handle()))
            .chain(runners.iter().map(|(slot, t)| (*slot, t.abort_handle())))
            .collect();

        let grace = self.cfg.grace;
        let done = join(
            join_all(tasks.into_iter().map(|(_, t)| t)),
            join_all(runners.into_iter().map(|(_, t)| t)),
        );
        let result = match tokio::time::timeout(grace, done).await {
            Ok(_) => {
                self.bus.publish(Event::new(EventKind::AllStoppedWithin));
                Ok(())
            }
            Err(_) => {
                let mut stuck: Vec<u16> = aborts
                    .iter()
                    .filter(|(_, a)| !a.is_finished())
                    .map(|(slot, _)| *slot)
                    .collect();
                stuck.sort_unstable();
                stuck.dedup();
                for (_, abort) in &aborts {
                    abort.abort();
                }
                warn!(?grace, ?stuck, "cycles did not stop within grace");
                self.bus.publish(Event::new(EventKind::GraceExceeded));
                Err(RuntimeError::GraceExceeded {
                    grace,
                    stuck: stuck.iter().map(|s| format!("slot-{s}")).collect(),
                })
            }
        };
        self.token.cancel();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ActionError;
    use crate::plan::{ActionContext, ActionFn, ActionOutput, BehaviorCatalog, Verdict};
    use crate::subscribers::SlotStatus;
    use std::time::Duration;

    fn catalog() -> BehaviorCatalog {
        BehaviorCatalog::new()
            .with(ActionFn::arc("ok", |_ctx: ActionContext| async {
                Ok::<_, ActionError>(ActionOutput::success())
            }))
            .with(ActionFn::arc("wait", |ctx: ActionContext| async move {
                ctx.token.cancelled().await;
                Err::<ActionOutput, _>(ActionError::Canceled)
            }))
    }

    fn station() -> Arc<Station> {
        Station::builder(Config::default())
            .with_cycle_deps(CycleDeps::in_memory(Arc::new(catalog())))
            .build()
    }

    #[tokio::test]
    async fn test_cycle_runs_and_monitor_follows() {
        let st = station();
        st.start_cycle(CycleContext::new(1, 2, "SN"), vec![ActionDefinition::new("ok", 1, 1)])
            .unwrap();
        let report = st.join(2).await.unwrap();
        assert_eq!(report.verdict, Verdict::Ok);

        for _ in 0..50 {
            if st.monitor().status(2).await == SlotStatus::Stopped {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(st.monitor().status(2).await, SlotStatus::Stopped);
        assert!(st.shutdown().await.is_ok());
    }

    #[tokio::test]
    async fn test_second_cycle_on_busy_slot_is_dropped() {
        let st = station();
        let plan = vec![ActionDefinition::new("wait", 1, 1)];
        let handle = st.start_cycle(CycleContext::new(1, 5, "A"), plan.clone()).unwrap();
        assert!(matches!(
            st.start_cycle(CycleContext::new(1, 5, "B"), plan),
            Err(RuntimeError::SlotBusy { slot: 5 })
        ));

        while !handle.is_running() {
            tokio::task::yield_now().await;
        }
        assert!(st.cancel_cycle(5).await);
        assert_eq!(st.join(5).await.unwrap().verdict, Verdict::EmergencyAbort);
    }

    #[tokio::test]
    async fn test_shutdown_stops_running_cycles() {
        let st = station();
        let handle = st
            .start_cycle(CycleContext::new(1, 1, "A"), vec![ActionDefinition::new("wait", 1, 1)])
            .unwrap();
        while !handle.is_running() {
            tokio::task::yield_now().await;
        }
        assert!(st.shutdown().await.is_ok());
        assert!(handle.is_cancelled());
        assert_eq!(handle.sticky_verdict(), Some(Verdict::EmergencyAbort));
    }
}
