//! # SlotRunner: one slot, one unit after another.
//!
//! Drives a single slot for the lifetime of the station: waits for the start
//! trigger, identifies the unit, loads its plan and runs a [`CycleOrchestrator`],
//! then waits for the next unit.
//!
//! ## Architecture
//! ```text
//! Station::start_slot(slot, source) ──► SlotRunner::run(token)
//!
//! loop {
//!   ├─► publish SlotWaiting
//!   ├─► trigger.wait_start(slot)        (cancellable)
//!   │     └─ Err ─► warn, sleep(retry_delay), continue
//!   ├─► identifier.identify(request)
//!   │     └─ Err ─► skip(DEVICE_IDENTIFICATION_ERROR)
//!   ├─► plans.load_plan(ctx)
//!   │     └─ Err ─► skip(INVALID_TESTPLAN)
//!   ├─► plans.is_degraded(station)
//!   │     └─ true ─► skip(DEGRADED)
//!   └─► CycleOrchestrator::run()        (token cancel → cancel_current_operation)
//! }
//!
//! skip(verdict) ─► history.update_cycle_final_result ─► publish CycleSkipped
//! ```
//!
//! ## Rules
//! - Cycles on one slot run **sequentially**; the next trigger is awaited only
//!   after the previous cycle finalized.
//! - A skipped start stores its verdict but runs no action and exports nothing.
//! - Cancellation is observed while waiting for the trigger, during the retry pause
//!   and before a cycle is created. A running cycle is stopped with EMERGENCY_ABORT
//!   and still finalized.

use std::fmt::Display;
use std::sync::Arc;

use chrono::Local;
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::events::{Bus, Event, EventKind};
use crate::plan::{CycleContext, Verdict};
use crate::ports::{IdentifierRef, PlanSourceRef, StartRequest, TriggerRef};

use super::config::Config;
use super::orchestrator::{CycleDeps, CycleOrchestrator};
use super::registry::SlotCycleRegistry;
use super::report::CycleReport;

/// Where a slot gets its units and plans from.
#[derive(Clone)]
pub struct SlotSource {
    pub trigger: TriggerRef,
    pub identifier: IdentifierRef,
    pub plans: PlanSourceRef,
}

/// Runs cycles on one slot until cancelled.
pub(crate) struct SlotRunner {
    pub(crate) slot: u16,
    pub(crate) cfg: Config,
    pub(crate) deps: CycleDeps,
    pub(crate) source: SlotSource,
    pub(crate) registry: Arc<SlotCycleRegistry>,
    pub(crate) bus: Bus,
}

impl SlotRunner {
    pub(crate) async fn run(self, token: CancellationToken) {
        info!(slot = self.slot, "slot runner started");
        loop {
            if token.is_cancelled() {
                break;
            }
            self.bus.publish(Event::new(EventKind::SlotWaiting).with_slot(self.slot));

            let request = select! {
                biased;
                _ = token.cancelled() => break,
                r = self.source.trigger.wait_start(self.slot) => r,
            };

            match request {
                Ok(request) => self.serve(request, &token).await,
                Err(e) => {
                    warn!(slot = self.slot, error = %e, delay = ?self.cfg.retry_delay, "start trigger failed");
                    select! {
                        _ = token.cancelled() => break,
                        _ = time::sleep(self.cfg.retry_delay) => {}
                    }
                }
            }
        }
        info!(slot = self.slot, "slot runner stopped");
    }

    async fn serve(&self, request: StartRequest, token: &CancellationToken) {
        let mut ctx = CycleContext::new(self.cfg.station_id, self.slot, request.serial_number.as_str());

        let unit = match self.source.identifier.identify(&request).await {
            Ok(unit) => unit,
            Err(e) => return self.skip(ctx, Verdict::DeviceIdentificationError, e).await,
        };
        ctx.serial_number = unit.serial_number;
        ctx.order_id = unit.order_id;

        let plan = match self.source.plans.load_plan(&ctx).await {
            Ok(plan) => plan,
            Err(e) => return self.skip(ctx, Verdict::InvalidTestplan, e).await,
        };
        match self.source.plans.is_degraded(self.cfg.station_id).await {
            Ok(true) => return self.skip(ctx, Verdict::Degraded, "station degraded").await,
            Ok(false) => {}
            Err(e) => warn!(slot = self.slot, error = %e, "degradation state unknown; starting cycle"),
        }

        if token.is_cancelled() {
            return;
        }
        let orch = CycleOrchestrator::new(
            self.cfg.clone(),
            ctx,
            plan,
            self.deps.clone(),
            Arc::clone(&self.registry),
            self.bus.clone(),
        );
        let handle = orch.handle();
        let cycle = orch.run();
        tokio::pin!(cycle);

        // `run` marks the handle running before its first await, so polling it
        // first guarantees the stop below is not ignored.
        let result = select! {
            biased;
            r = &mut cycle => r,
            _ = token.cancelled() => {
                handle.cancel_current_operation();
                cycle.await
            }
        };
        match result {
            Ok(report) => debug!(slot = self.slot, verdict = %report.verdict, "slot cycle finished"),
            Err(e) => warn!(slot = self.slot, error = %e, "cycle rejected"),
        }
    }

    async fn skip(&self, mut ctx: CycleContext, verdict: Verdict, reason: impl Display) {
        let reason = reason.to_string();
        warn!(slot = self.slot, serial = %ctx.serial_number, %verdict, %reason, "cycle not started");

        let now = Local::now();
        ctx.started_at = Some(now);
        ctx.finished_at = Some(now);
        ctx.verdict = Some(verdict);
        let report = CycleReport {
            context: ctx,
            verdict,
            branches: Vec::new(),
            discontinuity: Vec::new(),
        };
        if let Err(e) = self.deps.history.update_cycle_final_result(&report).await {
            warn!(slot = self.slot, error = %e, "final result not stored");
        }
        self.bus.publish(
            Event::new(EventKind::CycleSkipped)
                .with_slot(self.slot)
                .with_cycle(report.context.cycle_id.to_string())
                .with_verdict(verdict)
                .with_reason(reason),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ActionError;
    use crate::memory::{AutoPrompt, MemoryExporter, MemoryHistory, QueuedTrigger, StaticIdentifier, StaticPlans};
    use crate::plan::{ActionContext, ActionDefinition, ActionFn, ActionOutput, BehaviorCatalog};
    use std::time::Duration;

    struct Rig {
        trigger: Arc<QueuedTrigger>,
        plans: Arc<StaticPlans>,
        history: Arc<MemoryHistory>,
        exporter: Arc<MemoryExporter>,
        runner: SlotRunner,
    }

    fn rig() -> Rig {
        let catalog = BehaviorCatalog::new()
            .with(ActionFn::arc("ok", |_ctx: ActionContext| async {
                Ok::<_, ActionError>(ActionOutput::success())
            }))
            .with(ActionFn::arc("hold", |ctx: ActionContext| async move {
                ctx.token.cancelled().await;
                Err::<ActionOutput, _>(ActionError::Canceled)
            }));
        let trigger = Arc::new(QueuedTrigger::new());
        let plans = Arc::new(
            StaticPlans::new()
                .with("ORD-1", vec![ActionDefinition::new("ok", 1, 1)])
                .with("ORD-HOLD", vec![ActionDefinition::new("hold", 1, 1)])
                .with("ORD-EMPTY", Vec::new()),
        );
        let identifier = StaticIdentifier::new()
            .with("SN-1", "ORD-1")
            .with("SN-HOLD", "ORD-HOLD")
            .with("SN-EMPTY", "ORD-EMPTY")
            .with("SN-LOST", "ORD-MISSING");
        let history = Arc::new(MemoryHistory::new());
        let exporter = Arc::new(MemoryExporter::new());
        let runner = SlotRunner {
            slot: 2,
            cfg: Config {
                station_id: 7,
                retry_delay: Duration::from_millis(200),
                ..Config::default()
            },
            deps: CycleDeps {
                catalog: Arc::new(catalog),
                history: history.clone(),
                prompt: Arc::new(AutoPrompt::accepting()),
                exporter: exporter.clone(),
            },
            source: SlotSource {
                trigger: trigger.clone(),
                identifier: Arc::new(identifier),
                plans: plans.clone(),
            },
            registry: SlotCycleRegistry::new(),
            bus: Bus::new(256),
        };
        Rig {
            trigger,
            plans,
            history,
            exporter,
            runner,
        }
    }

    async fn until(mut done: impl FnMut() -> bool) {
        while !done() {
            time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn verdicts(history: &MemoryHistory) -> Vec<Verdict> {
        history.final_results().iter().map(|r| r.verdict).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_plan_and_station_failures_skip_the_cycle() {
        let rig = rig();
        let token = CancellationToken::new();
        let task = tokio::spawn(rig.runner.run(token.clone()));

        rig.trigger.push(2, "SN-LOST");
        rig.trigger.push(2, "SN-EMPTY");
        until(|| rig.history.final_results().len() == 2).await;

        rig.plans.set_degraded(true);
        rig.trigger.push(2, "SN-1");
        until(|| rig.history.final_results().len() == 3).await;

        assert_eq!(
            verdicts(&rig.history),
            vec![Verdict::InvalidTestplan, Verdict::InvalidTestplan, Verdict::Degraded]
        );
        let results = rig.history.final_results();
        assert_eq!(results[0].context.order_id, "ORD-MISSING");
        assert_eq!(results[2].context.station_id, 7);
        // the empty plan ran as a cycle; the other two never started one
        assert_eq!(rig.exporter.reports().len(), 1);

        token.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_failure_is_retried() {
        let rig = rig();
        let token = CancellationToken::new();
        let task = tokio::spawn(rig.runner.run(token.clone()));

        rig.trigger.push_failure(2);
        rig.trigger.push(2, "SN-1");
        until(|| rig.history.final_results().len() == 1).await;
        assert_eq!(verdicts(&rig.history), vec![Verdict::Ok]);
        assert_eq!(rig.trigger.pending(2), 0);

        token.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_running_cycle_and_loop() {
        let rig = rig();
        let registry = rig.runner.registry.clone();
        let token = CancellationToken::new();
        let task = tokio::spawn(rig.runner.run(token.clone()));

        rig.trigger.push(2, "SN-HOLD");
        while !registry.is_busy(2).await {
            time::sleep(Duration::from_millis(10)).await;
        }
        token.cancel();
        task.await.unwrap();

        assert_eq!(verdicts(&rig.history), vec![Verdict::EmergencyAbort]);
        assert!(!registry.is_busy(2).await);

        rig.trigger.push(2, "SN-1");
        assert_eq!(rig.trigger.pending(2), 1);
    }
}
