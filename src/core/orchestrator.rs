//! # Cycle orchestrator: runs one test cycle on one slot.
//!
//! The [`CycleOrchestrator`] owns a cycle from admission to export. It splits the plan
//! into branches, runs one [`BranchExecutor`] per branch under a shared cancellation
//! scope, and turns their reports into a [`CycleReport`].
//!
//! ```text
//! run()
//!   ├─► try_start / scope check          ─► CycleAlreadyStarted / CycleCancelled
//!   ├─► registry.register(handle)        ─► SlotBusy
//!   ├─► refresh variables, stamp start   ─► CycleStarted
//!   ├─► partition plan by branch 1..=N   (stop at first empty branch ─► PlanDiscontinuity)
//!   ├─► Rendezvous::spawn()
//!   ├─► JoinSet: one executor task per branch (panics ─► BranchStop::Panicked)
//!   │
//!   ├─► supervise:
//!   │     abort_rx (Abort action)  ─► handle.abort() ─► CycleAborted ─► scope cancelled
//!   │     scope cancelled          ─► wait up to grace ─► abort_all ─► GraceExceeded
//!   │     all joined               ─► done
//!   │
//!   ├─► verdict: sticky (ABORTED / EMERGENCY_ABORT) or all branches OK ? OK : NOK
//!   ├─► history.update_cycle_final_result + exporter.export
//!   └─► CycleCompleted, registry.unregister
//! ```
//!
//! ## Rules
//! - Branches are numbered densely from 1; a gap drops every later branch and is
//!   reported, never silently ignored.
//! - A plan with no runnable branch ends with INVALID_TESTPLAN.
//! - The final verdict is always persisted and exported, whatever stopped the cycle.

use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Local;
use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::RuntimeError;
use crate::events::{Bus, Event, EventKind};
use crate::memory::{AutoPrompt, MemoryExporter, MemoryHistory};
use crate::plan::{
    ActionCatalog, ActionDefinition, ActionKind, ActionSequence, CycleContext, Verdict,
    resolve_behavior,
};
use crate::ports::{ExporterRef, HistoryRef, PromptRef};

use super::config::Config;
use super::executor::{BranchEnv, BranchExecutor};
use super::handle::CycleHandle;
use super::registry::SlotCycleRegistry;
use super::rendezvous::Rendezvous;
use super::report::{BranchReport, BranchStop, CycleReport};

/// Collaborators a cycle talks to.
#[derive(Clone)]
pub struct CycleDeps {
    pub catalog: Arc<dyn ActionCatalog>,
    pub history: HistoryRef,
    pub prompt: PromptRef,
    pub exporter: ExporterRef,
}

impl CycleDeps {
    /// In-memory history and exporter, prompts answered with "accepted".
    pub fn in_memory(catalog: Arc<dyn ActionCatalog>) -> Self {
        Self {
            catalog,
            history: Arc::new(MemoryHistory::new()),
            prompt: Arc::new(AutoPrompt::accepting()),
            exporter: Arc::new(MemoryExporter::new()),
        }
    }
}

/// Plan split into runnable branches.
#[derive(Debug, Default)]
struct Partition {
    branches: Vec<(u8, Vec<ActionDefinition>)>,
    /// Non-empty branches dropped behind a gap.
    dropped: Vec<u8>,
}

/// Groups plan actions by branch `1..=max`, ordered by step, stopping at the first empty branch.
fn partition(plan: &[ActionDefinition], max: u8) -> Partition {
    let mut out = Partition::default();
    let mut gap = false;
    for branch in 1..=max {
        let mut defs: Vec<ActionDefinition> =
            plan.iter().filter(|d| d.branch == branch).cloned().collect();
        if defs.is_empty() {
            gap = true;
            continue;
        }
        if gap {
            out.dropped.push(branch);
            continue;
        }
        defs.sort_by_key(|d| d.step);
        out.branches.push((branch, defs));
    }
    out
}

/// Runs one cycle instance. Create a new orchestrator per cycle.
pub struct CycleOrchestrator {
    cfg: Config,
    context: CycleContext,
    plan: Vec<ActionDefinition>,
    deps: CycleDeps,
    registry: Arc<SlotCycleRegistry>,
    bus: Bus,
    handle: CycleHandle,
}

impl CycleOrchestrator {
    pub fn new(
        cfg: Config,
        context: CycleContext,
        plan: Vec<ActionDefinition>,
        deps: CycleDeps,
        registry: Arc<SlotCycleRegistry>,
        bus: Bus,
    ) -> Self {
        let handle = CycleHandle::new(context.cycle_id, context.slot_id, bus.clone());
        Self {
            cfg,
            context,
            plan,
            deps,
            registry,
            bus,
            handle,
        }
    }

    /// Handle for stop requests; valid before, during and after [`run`](Self::run).
    pub fn handle(&self) -> CycleHandle {
        self.handle.clone()
    }

    pub fn slot(&self) -> u16 {
        self.context.slot_id
    }

    /// Runs the cycle to completion and returns its report.
    pub async fn run(&self) -> Result<CycleReport, RuntimeError> {
        let slot = self.context.slot_id;
        if !self.handle.try_start() {
            return Err(RuntimeError::CycleAlreadyStarted { slot });
        }
        if self.handle.is_cancelled() {
            return Err(RuntimeError::CycleCancelled { slot });
        }
        // Running before visible, so a stop through the registry is never dropped.
        self.handle.set_running(true);
        if let Err(e) = self.registry.register(self.handle.clone()).await {
            self.handle.set_running(false);
            return Err(e);
        }

        let report = self.execute().await;

        self.handle.set_running(false);
        self.registry.unregister(slot, self.handle.cycle_id()).await;
        Ok(report)
    }

    async fn execute(&self) -> CycleReport {
        let mut ctx = self.context.clone();
        match self.deps.history.load_variables(&ctx).await {
            Ok(vars) => ctx.variables.extend(vars),
            Err(e) => warn!(slot = ctx.slot_id, error = %e, "variables not refreshed"),
        }
        ctx.started_at = Some(Local::now());
        info!(slot = ctx.slot_id, cycle = %ctx.cycle_id, serial = %ctx.serial_number, "cycle started");
        self.bus.publish(self.event(EventKind::CycleStarted));

        let part = partition(&self.plan, self.cfg.branch_limit());
        if !part.dropped.is_empty() {
            warn!(slot = ctx.slot_id, dropped = ?part.dropped, "branch numbering has a gap; later branches dropped");
            self.bus.publish(
                self.event(EventKind::PlanDiscontinuity)
                    .with_reason(format!("{:?}", part.dropped)),
            );
        }

        let ctx = Arc::new(ctx);
        let branches = if part.branches.is_empty() {
            warn!(slot = ctx.slot_id, "plan has no runnable branch");
            Vec::new()
        } else {
            self.run_branches(&ctx, part.branches).await
        };

        let verdict = match self.handle.sticky_verdict() {
            Some(v) if v.is_sticky() => v,
            _ if branches.is_empty() => Verdict::InvalidTestplan,
            _ if branches.iter().all(|b| b.verdict == Verdict::Ok) => Verdict::Ok,
            _ => Verdict::Nok,
        };

        let mut context = Arc::unwrap_or_clone(ctx);
        context.finished_at = Some(Local::now());
        context.verdict = Some(verdict);
        let report = CycleReport {
            context,
            verdict,
            branches,
            discontinuity: part.dropped,
        };
        self.finalize(&report).await;
        report
    }

    async fn run_branches(
        &self,
        ctx: &Arc<CycleContext>,
        plan: Vec<(u8, Vec<ActionDefinition>)>,
    ) -> Vec<BranchReport> {
        let points: Vec<(String, u8)> = plan
            .iter()
            .flat_map(|(branch, defs)| {
                defs.iter().filter_map(move |d| match &d.kind {
                    ActionKind::Rendezvous { group } => Some((group.clone(), *branch)),
                    _ => None,
                })
            })
            .collect();
        let rendezvous = Rendezvous::new(points, self.event(EventKind::RendezvousArrived), self.bus.clone()).spawn();

        let (abort_tx, mut abort_rx) = mpsc::unbounded_channel();
        let env = BranchEnv {
            cycle: Arc::clone(ctx),
            handle: self.handle.clone(),
            catalog: Arc::clone(&self.deps.catalog),
            history: Arc::clone(&self.deps.history),
            prompt: Arc::clone(&self.deps.prompt),
            rendezvous,
            abort_tx,
            bus: self.bus.clone(),
        };

        let mut expected = BTreeSet::new();
        let mut set = JoinSet::new();
        for (branch, defs) in plan {
            let seq = self.sequence(branch, defs);
            let executor = BranchExecutor::new(branch, seq, env.clone());
            expected.insert(branch);
            set.spawn(async move {
                match AssertUnwindSafe(executor.run()).catch_unwind().await {
                    Ok(report) => report,
                    Err(_) => {
                        error!(branch, "branch task panicked");
                        BranchReport::lost(branch, BranchStop::Panicked)
                    }
                }
            });
        }
        drop(env);

        let mut reports = Vec::with_capacity(expected.len());
        let timed_out = self.supervise(&mut set, &mut abort_rx, &mut reports).await;

        let missing = if timed_out {
            BranchStop::EmergencyAbort
        } else {
            BranchStop::Panicked
        };
        for branch in expected {
            if !reports.iter().any(|r| r.branch == branch) {
                reports.push(BranchReport::lost(branch, missing));
            }
        }
        reports.sort_by_key(|r| r.branch);
        reports
    }

    /// Instantiates the branch's actions; unresolvable behaviors are skipped.
    fn sequence(&self, branch: u8, defs: Vec<ActionDefinition>) -> ActionSequence {
        let mut seq = ActionSequence::new();
        for def in defs {
            match resolve_behavior(&*self.deps.catalog, &def) {
                Some(behavior) => {
                    seq.push(Arc::new(def), behavior);
                }
                None => {
                    warn!(branch, action = %def.name, key = def.behavior_key(), "no behavior for action; skipped");
                }
            }
        }
        debug!(branch, actions = seq.len(), "branch built");
        seq
    }

    /// Collects branch reports until all are joined; returns `true` when the grace ran out.
    async fn supervise(
        &self,
        set: &mut JoinSet<BranchReport>,
        abort_rx: &mut mpsc::UnboundedReceiver<u8>,
        reports: &mut Vec<BranchReport>,
    ) -> bool {
        let token = self.handle.token().clone();
        loop {
            tokio::select! {
                biased;
                Some(branch) = abort_rx.recv() => self.on_abort(branch),
                _ = token.cancelled() => break,
                joined = set.join_next() => match joined {
                    Some(Ok(report)) => reports.push(report),
                    Some(Err(e)) => warn!(error = %e, "branch task failed"),
                    None => return false,
                },
            }
        }

        let grace = self.cfg.grace;
        let drain = async {
            while let Some(joined) = set.join_next().await {
                if let Ok(report) = joined {
                    reports.push(report);
                }
            }
        };
        if tokio::time::timeout(grace, drain).await.is_ok() {
            return false;
        }

        warn!(slot = self.context.slot_id, ?grace, remaining = set.len(), "branches did not stop within grace; aborting");
        self.bus.publish(self.event(EventKind::GraceExceeded));
        set.abort_all();
        while let Some(joined) = set.join_next().await {
            if let Ok(report) = joined {
                reports.push(report);
            }
        }
        true
    }

    fn on_abort(&self, branch: u8) {
        if self.handle.abort() {
            info!(slot = self.context.slot_id, branch, "abort action reached; cycle aborted");
            self.bus.publish(
                self.event(EventKind::CycleAborted)
                    .with_branch(branch)
                    .with_verdict(Verdict::Aborted),
            );
        }
    }

    async fn finalize(&self, report: &CycleReport) {
        if let Err(e) = self.deps.history.update_cycle_final_result(report).await {
            error!(slot = self.context.slot_id, error = %e, "final result not stored");
        }
        if let Err(e) = self.deps.exporter.export(report).await {
            error!(slot = self.context.slot_id, error = %e, "result export failed");
        }
        info!(slot = self.context.slot_id, cycle = %self.context.cycle_id, verdict = %report.verdict, "cycle completed");
        self.bus.publish(
            self.event(EventKind::CycleCompleted)
                .with_verdict(report.verdict),
        );
    }

    fn event(&self, kind: EventKind) -> Event {
        Event::new(kind)
            .with_slot(self.context.slot_id)
            .with_cycle(self.context.cycle_id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ActionError;
    use crate::plan::{ActionContext, ActionFn, ActionOutput, BehaviorCatalog, BehaviorRef};
    use std::time::Duration;

    fn plan_entry(name: &str, branch: u8, step: u32) -> ActionDefinition {
        ActionDefinition::new(name, branch, step)
    }

    struct Fixture {
        history: Arc<MemoryHistory>,
        exporter: Arc<MemoryExporter>,
        registry: Arc<SlotCycleRegistry>,
        deps: CycleDeps,
        bus: Bus,
    }

    fn fixture(catalog: BehaviorCatalog) -> Fixture {
        let history = Arc::new(MemoryHistory::new().with_variable("line", "L2"));
        let exporter = Arc::new(MemoryExporter::new());
        Fixture {
            deps: CycleDeps {
                catalog: Arc::new(catalog),
                history: history.clone(),
                prompt: Arc::new(AutoPrompt::accepting()),
                exporter: exporter.clone(),
            },
            history,
            exporter,
            registry: SlotCycleRegistry::new(),
            bus: Bus::new(256),
        }
    }

    fn catalog() -> BehaviorCatalog {
        BehaviorCatalog::new()
            .with(ActionFn::arc("ok", |_ctx: ActionContext| async {
                Ok::<_, ActionError>(ActionOutput::success())
            }))
            .with(ActionFn::arc("nok", |_ctx: ActionContext| async {
                Ok::<_, ActionError>(ActionOutput::failed())
            }))
    }

    fn orchestrator(f: &Fixture, plan: Vec<ActionDefinition>) -> CycleOrchestrator {
        CycleOrchestrator::new(
            Config::default(),
            CycleContext::new(1, 4, "SN-42"),
            plan,
            f.deps.clone(),
            f.registry.clone(),
            f.bus.clone(),
        )
    }

    fn hang() -> BehaviorRef {
        ActionFn::arc("hang", |ctx: ActionContext| async move {
            ctx.token.cancelled().await;
            Err::<ActionOutput, _>(ActionError::Canceled)
        })
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_right_after_registration_is_honoured() {
        let f = fixture(catalog().with(hang()));
        let orch = orchestrator(&f, vec![plan_entry("hang", 1, 1)]);
        let registry = f.registry.clone();
        let cycle = tokio::spawn(async move { orch.run().await });

        while registry.get(4).await.is_none() {
            tokio::task::yield_now().await;
        }
        assert!(registry.cancel(4).await);

        let report = cycle.await.unwrap().unwrap();
        assert_eq!(report.verdict, Verdict::EmergencyAbort);
        assert!(!registry.is_busy(4).await);
    }

    #[tokio::test]
    async fn test_rejected_registration_leaves_handle_idle() {
        let f = fixture(catalog());
        let holder = orchestrator(&f, vec![plan_entry("ok", 1, 1)]);
        f.registry.register(holder.handle()).await.unwrap();

        let orch = orchestrator(&f, vec![plan_entry("ok", 1, 1)]);
        let err = orch.run().await.unwrap_err();
        assert!(matches!(err, RuntimeError::SlotBusy { slot: 4 }));
        assert!(!orch.handle().is_running());
        assert!(!orch.handle().cancel_current_operation());
    }

    #[test]
    fn test_partition_stops_at_first_gap() {
        let plan = vec![
            plan_entry("a", 1, 2),
            plan_entry("b", 1, 1),
            plan_entry("c", 3, 1),
            plan_entry("d", 4, 1),
        ];
        let part = partition(&plan, 5);
        assert_eq!(part.branches.len(), 1);
        let names: Vec<&str> = part.branches[0].1.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert_eq!(part.dropped, vec![3, 4]);
    }

    #[tokio::test]
    async fn test_ok_cycle_is_persisted_exported_and_unregistered() {
        let f = fixture(catalog());
        let orch = orchestrator(&f, vec![plan_entry("ok", 1, 1), plan_entry("ok", 2, 1)]);
        let report = orch.run().await.unwrap();

        assert_eq!(report.verdict, Verdict::Ok);
        assert_eq!(report.branches.len(), 2);
        assert_eq!(report.context.variables.get("line").map(String::as_str), Some("L2"));
        assert!(report.context.started_at.is_some() && report.context.finished_at.is_some());
        assert_eq!(f.history.final_results().len(), 1);
        assert_eq!(f.exporter.reports().len(), 1);
        assert!(!f.registry.is_busy(4).await);
        assert!(!orch.handle().is_running());
    }

    #[tokio::test]
    async fn test_second_run_is_rejected() {
        let f = fixture(catalog());
        let orch = orchestrator(&f, vec![plan_entry("ok", 1, 1)]);
        orch.run().await.unwrap();
        assert!(matches!(
            orch.run().await,
            Err(RuntimeError::CycleAlreadyStarted { slot: 4 })
        ));
    }

    #[tokio::test]
    async fn test_busy_slot_is_rejected() {
        let f = fixture(catalog());
        let first = orchestrator(&f, vec![plan_entry("ok", 1, 1)]);
        f.registry.register(first.handle()).await.unwrap();

        let second = orchestrator(&f, vec![plan_entry("ok", 1, 1)]);
        assert!(matches!(second.run().await, Err(RuntimeError::SlotBusy { slot: 4 })));
    }

    #[tokio::test]
    async fn test_empty_plan_is_invalid() {
        let f = fixture(catalog());
        let report = orchestrator(&f, vec![plan_entry("ok", 2, 1)]).run().await.unwrap();
        assert_eq!(report.verdict, Verdict::InvalidTestplan);
        assert_eq!(report.discontinuity, vec![2]);
        assert_eq!(f.exporter.reports()[0].verdict, Verdict::InvalidTestplan);
    }

    #[tokio::test]
    async fn test_one_nok_branch_fails_cycle() {
        let f = fixture(catalog());
        let report = orchestrator(&f, vec![plan_entry("ok", 1, 1), plan_entry("nok", 2, 1)])
            .run()
            .await
            .unwrap();
        assert_eq!(report.verdict, Verdict::Nok);
        assert_eq!(report.branch(1).unwrap().verdict, Verdict::Ok);
        assert_eq!(report.branch(2).unwrap().verdict, Verdict::Nok);
    }

    #[tokio::test]
    async fn test_abort_stops_siblings() {
        let slow = ActionFn::arc("slow", |ctx: ActionContext| async move {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(30)) => Ok(ActionOutput::success()),
                _ = ctx.token.cancelled() => Err(ActionError::Canceled),
            }
        });
        let f = fixture(catalog().with(slow));
        let plan = vec![
            plan_entry("stop", 1, 1).with_kind(ActionKind::Abort),
            plan_entry("slow", 2, 1),
            plan_entry("ok", 2, 2),
        ];
        let mut rx = f.bus.subscribe();
        let report = orchestrator(&f, plan).run().await.unwrap();

        assert_eq!(report.verdict, Verdict::Aborted);
        assert_eq!(report.branch(1).unwrap().stop, BranchStop::Aborted);
        let sibling = report.branch(2).unwrap();
        assert_eq!(sibling.stop, BranchStop::Aborted);
        assert_eq!(sibling.action("slow").unwrap().verdict, Verdict::Aborted);
        assert_eq!(sibling.action("ok").unwrap().attempts, 0);

        let mut aborted = false;
        while let Ok(ev) = rx.try_recv() {
            aborted |= ev.kind == EventKind::CycleAborted;
        }
        assert!(aborted);
    }

    #[tokio::test]
    async fn test_panicking_action_stops_its_branch() {
        let boom = ActionFn::arc("boom", |_ctx: ActionContext| async {
            if true {
                panic!("driver crashed");
            }
            Ok::<_, ActionError>(ActionOutput::success())
        });
        let f = fixture(catalog().with(boom));
        let report = orchestrator(&f, vec![plan_entry("boom", 1, 1), plan_entry("ok", 2, 1)])
            .run()
            .await
            .unwrap();
        // the panic is caught per attempt, so the branch stops with an exception
        assert_eq!(report.branch(1).unwrap().stop, BranchStop::Exception);
        assert_eq!(report.verdict, Verdict::Nok);
    }
}
