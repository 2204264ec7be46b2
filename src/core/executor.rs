//! # Branch executor: the per-branch action state machine.
//!
//! One executor owns one [`ActionSequence`] and a cursor. Nothing else touches the
//! sequence while the branch runs.
//!
//! ```text
//! loop over cursor:
//!   disabled ─────────────────────────────────────► BYPASSED, persist, next
//!   scope cancelled ──────────────────────────────► EMERGENCY_ABORT, persist, stop
//!   attempt loop (1 + max_retries attempts):
//!     Abort       ─► ABORTED ─► abort request ─► wait for scope ─► persist, stop
//!     Rendezvous  ─► arrive(group) ─► gate closed ─► Success
//!     otherwise   ─► run_attempt()
//!                      OperationCanceled ─► EMERGENCY_ABORT, persist, stop
//!                      GoToMark (goto kind) ─► goto_action() ─► jump? ─┐
//!     gate.wait()  (cancel ─► EMERGENCY_ABORT, persist, stop)         │
//!     jump ◄──────────────────────────────────────────────────────────┘ persist, cursor = new
//!     retry? ─► RETRYING
//!   verdict = outcome (negated) ─► group recompute ─► persist
//!   Exception ─► stop
//!   after-conditions (dialog, wait, goto mark) ─► jump?
//!   after-actions inserted at cursor + 1..
//!   next
//! ```
//!
//! ## Rules
//! - Retries continue while the outcome is not final, attempts <= `max_retries`
//!   and the scope is not cancelled.
//! - Every action leaving the executor is persisted exactly once per execution.
//! - After-actions never get after-conditions or after-actions of their own.
//! - A stop caused by a sibling's Abort action records ABORTED instead of
//!   EMERGENCY_ABORT.

use std::sync::Arc;

use chrono::Local;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::events::{Bus, Event, EventKind};
use crate::plan::{
    ActionCatalog, ActionContext, ActionDefinition, ActionId, ActionKind, ActionOutput,
    ActionSequence, BehaviorRef, CycleContext, PlanAction, StepOutcome, Verdict, resolve_behavior,
};
use crate::ports::{
    ActionDetail, HistoryRef, ParentLink, PromptRef, PromptRequest, SubActionDetail,
};

use super::gate::Gate;
use super::goto::{after_condition_goto, goto_action};
use super::handle::CycleHandle;
use super::rendezvous::RendezvousClient;
use super::report::{ActionRecord, BranchReport, BranchStop};
use super::runner::run_attempt;

/// Shared collaborators of every branch of one cycle.
#[derive(Clone)]
pub(crate) struct BranchEnv {
    pub(crate) cycle: Arc<CycleContext>,
    pub(crate) handle: CycleHandle,
    pub(crate) catalog: Arc<dyn ActionCatalog>,
    pub(crate) history: HistoryRef,
    pub(crate) prompt: PromptRef,
    pub(crate) rendezvous: RendezvousClient,
    pub(crate) abort_tx: mpsc::UnboundedSender<u8>,
    pub(crate) bus: Bus,
}

enum Flow {
    Next,
    Jump(usize),
    Stop(BranchStop),
}

pub(crate) struct BranchExecutor {
    branch: u8,
    seq: ActionSequence,
    cursor: usize,
    gate: Gate,
    env: BranchEnv,
}

impl BranchExecutor {
    pub(crate) fn new(branch: u8, seq: ActionSequence, env: BranchEnv) -> Self {
        Self {
            branch,
            seq,
            cursor: 0,
            gate: Gate::default(),
            env,
        }
    }

    /// Runs the branch to its end or to a stop and reports it.
    pub(crate) async fn run(mut self) -> BranchReport {
        self.env.bus.publish(self.event(EventKind::BranchStarted));
        debug!(branch = self.branch, actions = self.seq.len(), "branch started");

        let stop = self.run_actions().await;
        self.env.rendezvous.depart(self.branch);

        let report = self.report(stop);
        debug!(branch = self.branch, verdict = %report.verdict, stop = stop.as_label(), "branch finished");
        self.env.bus.publish(
            self.event(EventKind::BranchCompleted)
                .with_verdict(report.verdict)
                .with_reason(stop.as_label()),
        );
        report
    }

    async fn run_actions(&mut self) -> BranchStop {
        while self.cursor < self.seq.len() {
            let pos = self.cursor;
            let Some(action) = self.seq.at(pos) else {
                break;
            };
            let id = action.id;
            let def = Arc::clone(&action.def);
            let behavior = Arc::clone(&action.behavior);

            if !def.enabled {
                debug!(branch = self.branch, action = %def.name, "disabled; bypassed");
                self.stamp_now(id, Verdict::Bypassed);
                self.persist(id, None).await;
                self.cursor = pos + 1;
                continue;
            }

            if self.env.handle.is_cancelled() {
                return self.stop_cancelled(id).await;
            }

            match self.execute(pos, id, &def, &behavior).await {
                Flow::Next => self.cursor = pos + 1,
                Flow::Jump(new) => {
                    self.env.bus.publish(
                        self.action_event(EventKind::GotoJump, &def)
                            .with_reason(format!("from={pos} to={new}")),
                    );
                    self.cursor = new;
                }
                Flow::Stop(stop) => return stop,
            }
        }
        BranchStop::Completed
    }

    async fn execute(
        &mut self,
        pos: usize,
        id: ActionId,
        def: &Arc<ActionDefinition>,
        behavior: &BehaviorRef,
    ) -> Flow {
        let token = self.env.handle.token().clone();
        let mut attempts = 0u32;
        let mut outcome;
        let mut output: Option<ActionOutput>;

        loop {
            attempts += 1;
            if let Some(a) = self.seq.get_mut(id) {
                a.state.attempts = attempts;
                a.state.started_at = Some(Local::now());
                a.state.result = Verdict::Nok;
            }
            self.env.bus.publish(
                self.action_event(EventKind::ActionStarting, def)
                    .with_attempt(attempts),
            );

            let mut jump = None;
            match &def.kind {
                ActionKind::Abort => {
                    info!(branch = self.branch, action = %def.name, "abort action reached");
                    self.set_result(id, Verdict::Aborted);
                    let _ = self.env.abort_tx.send(self.branch);
                    token.cancelled().await;
                    self.finish(id);
                    self.persist(id, None).await;
                    return Flow::Stop(BranchStop::Aborted);
                }
                ActionKind::Rendezvous { group } => {
                    let release = self.env.rendezvous.arrive(group, self.branch);
                    self.gate.close(release);
                    outcome = StepOutcome::Success;
                    output = None;
                }
                _ => {
                    let ctx = ActionContext {
                        cycle: Arc::clone(&self.env.cycle),
                        action: Arc::clone(def),
                        branch: self.branch,
                        attempt: attempts,
                        token: token.clone(),
                        prompt: Arc::clone(&self.env.prompt),
                    };
                    let attempt = run_attempt(&**behavior, ctx, &self.env.handle, &self.env.bus).await;
                    outcome = attempt.outcome;
                    output = attempt.output;

                    if outcome == StepOutcome::OperationCanceled {
                        return Flow::Stop(self.stop_cancelled(id).await);
                    }
                    if outcome == StepOutcome::GoToMark && def.kind.is_goto() {
                        self.set_result(id, Verdict::Ok);
                        jump = goto_action(&mut self.seq, pos);
                        if jump.is_none() {
                            debug!(branch = self.branch, action = %def.name, "jump not taken");
                            outcome = StepOutcome::Success;
                        }
                    }
                }
            }

            if self.gate.wait(&token).await.is_err() {
                return Flow::Stop(self.stop_cancelled(id).await);
            }

            if let Some(new) = jump {
                self.finish(id);
                self.persist(id, output.as_ref()).await;
                return Flow::Jump(new);
            }

            let retry = !outcome.is_final() && attempts <= def.max_retries && !token.is_cancelled();
            if !retry {
                break;
            }
            warn!(branch = self.branch, action = %def.name, attempt = attempts, outcome = outcome.as_label(), "retrying");
            self.set_result(id, Verdict::Retrying);
            self.env.bus.publish(
                self.action_event(EventKind::ActionRetrying, def)
                    .with_attempt(attempts)
                    .with_reason(outcome.as_label()),
            );
        }

        let mut verdict = outcome.verdict();
        if def.negate_result {
            verdict = verdict.negated();
        }
        self.set_result(id, verdict);
        self.finish(id);
        self.recompute_group(pos);
        self.persist(id, output.as_ref()).await;

        if outcome == StepOutcome::Exception {
            warn!(branch = self.branch, action = %def.name, "exception; branch stopped");
            return Flow::Stop(BranchStop::Exception);
        }

        let is_after = self.seq.get(id).is_some_and(|a| a.is_after_action());
        let result = self.result(id);
        if is_after
            || result == Verdict::EmergencyAbort
            || matches!(def.kind, ActionKind::ConditionalGoTo { .. })
        {
            return Flow::Next;
        }
        self.after(pos, id, def, result).await
    }

    /// After-conditions, then after-actions.
    async fn after(&mut self, pos: usize, id: ActionId, def: &ActionDefinition, result: Verdict) -> Flow {
        let (cond, templates) = match result {
            Verdict::Ok => (def.after_ok.as_ref(), &def.after_ok_actions),
            Verdict::Nok => (def.after_nok.as_ref(), &def.after_nok_actions),
            _ => return Flow::Next,
        };
        let token = self.env.handle.token().clone();

        if let Some(cond) = cond {
            if !cond.dialog.trim().is_empty() {
                let request = PromptRequest {
                    station_id: self.env.cycle.station_id,
                    slot_id: self.env.cycle.slot_id,
                    title: def.name.clone(),
                    message: cond.dialog.clone(),
                };
                tokio::select! {
                    r = self.env.prompt.prompt_user(request) => {
                        if let Err(e) = r {
                            warn!(branch = self.branch, action = %def.name, error = %e, "after-condition dialog failed");
                        }
                    }
                    _ = token.cancelled() => return Flow::Stop(self.cancel_stop()),
                }
            }
            if !cond.wait.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(cond.wait) => {}
                    _ = token.cancelled() => return Flow::Stop(self.cancel_stop()),
                }
            }
            if let Some(new) = after_condition_goto(&mut self.seq, pos, cond, result == Verdict::Ok) {
                return Flow::Jump(new);
            }
        }

        let mut at = pos + 1;
        for template in templates {
            let Some(behavior) = resolve_behavior(&*self.env.catalog, template) else {
                warn!(branch = self.branch, parent = %def.name, action = %template.name, "after-action has no behavior; skipped");
                continue;
            };
            let mut child = template.clone();
            child.branch = self.branch;
            self.seq.insert_at(at, Arc::new(child), behavior, id);
            at += 1;
        }
        Flow::Next
    }

    /// Forces the group's last member to NOK when any member is not OK.
    fn recompute_group(&mut self, pos: usize) {
        let Some(group) = self.seq.at(pos).and_then(|a| a.def.group) else {
            return;
        };
        if !group.is_last() {
            return;
        }
        let failed = (0..=group.last_step as usize)
            .filter_map(|back| pos.checked_sub(back))
            .filter_map(|p| self.seq.at(p))
            .any(|m| m.def.group.is_some() && m.state.result != Verdict::Ok);
        if failed {
            if let Some(a) = self.seq.at_mut(pos) {
                a.state.result = Verdict::Nok;
            }
        }
    }

    async fn stop_cancelled(&mut self, id: ActionId) -> BranchStop {
        let stop = self.cancel_stop();
        let verdict = match stop {
            BranchStop::Aborted => Verdict::Aborted,
            _ => Verdict::EmergencyAbort,
        };
        if let Some(a) = self.seq.get_mut(id) {
            a.state.started_at.get_or_insert_with(Local::now);
            a.state.result = verdict;
        }
        self.finish(id);
        self.persist(id, None).await;
        stop
    }

    fn cancel_stop(&self) -> BranchStop {
        match self.env.handle.sticky_verdict() {
            Some(Verdict::Aborted) => BranchStop::Aborted,
            _ => BranchStop::EmergencyAbort,
        }
    }

    fn set_result(&mut self, id: ActionId, verdict: Verdict) {
        if let Some(a) = self.seq.get_mut(id) {
            a.state.result = verdict;
        }
    }

    fn result(&self, id: ActionId) -> Verdict {
        self.seq.get(id).map(|a| a.state.result).unwrap_or_default()
    }

    fn finish(&mut self, id: ActionId) {
        if let Some(a) = self.seq.get_mut(id) {
            a.state.finished_at = Some(Local::now());
        }
    }

    fn stamp_now(&mut self, id: ActionId, verdict: Verdict) {
        let now = Local::now();
        if let Some(a) = self.seq.get_mut(id) {
            a.state.started_at = Some(now);
            a.state.finished_at = Some(now);
            a.state.result = verdict;
        }
    }

    /// Stores the action (or sub-action) detail and publishes `ActionFinished`.
    async fn persist(&mut self, id: ActionId, output: Option<&ActionOutput>) {
        let Some(action) = self.seq.get(id) else {
            return;
        };
        let cycle = &self.env.cycle;
        let now = Local::now();
        let started = action.state.started_at.unwrap_or(now);
        let finished = action.state.finished_at.unwrap_or(now);

        let detail = ActionDetail {
            cycle_id: cycle.cycle_id,
            history_id: cycle.history_id,
            station_id: cycle.station_id,
            action_uid: action.def.uid.clone(),
            name: action.def.name.clone(),
            branch: self.branch,
            step: action.def.step,
            verdict: action.state.result,
            started_at: started,
            total_secs: (finished - started).num_milliseconds() as f64 / 1000.0,
            offset_start_s: cycle.offset_secs(started),
            offset_end_s: cycle.offset_secs(finished),
            retries: action.state.retries(),
            ignore_result: action.def.ignore_result,
            negate_result: action.def.negate_result,
            data: output.and_then(|o| o.data.clone()),
            exported: output.map(|o| o.exported.clone()).unwrap_or_default(),
        };

        let parent = action.parent.and_then(|p| self.seq.get(p)).map(|p| ParentLink {
            action_uid: p.def.uid.clone(),
            detail_id: p.state.detail_id.unwrap_or(0),
            branch: p.def.branch,
            step: p.def.step,
        });

        let event = self
            .action_event(EventKind::ActionFinished, &action.def)
            .with_attempt(action.state.attempts)
            .with_verdict(action.state.result);

        let stored = match parent {
            Some(parent) => {
                self.env
                    .history
                    .insert_sub_action_detail(&SubActionDetail { parent, detail })
                    .await
            }
            None => self.env.history.insert_action_detail(&detail).await,
        };
        match stored {
            Ok(detail_id) => {
                if let Some(a) = self.seq.get_mut(id) {
                    a.state.detail_id = Some(detail_id);
                }
            }
            Err(e) => warn!(branch = self.branch, error = %e, "action detail not stored"),
        }
        self.env.bus.publish(event);
    }

    fn report(&self, stop: BranchStop) -> BranchReport {
        let record = |a: &PlanAction| {
            let parent = a.parent.and_then(|p| self.seq.get(p));
            ActionRecord::from_action(a, parent)
        };
        let mut actions: Vec<ActionRecord> = self.seq.iter().map(record).collect();
        actions.extend(self.seq.iter_all().filter(|a| a.state.removed).map(record));

        let verdict = if self.seq.iter().all(|a| a.calculated_result().counts_as_ok()) {
            Verdict::Ok
        } else {
            Verdict::Nok
        };
        BranchReport {
            branch: self.branch,
            verdict,
            stop,
            actions,
        }
    }

    fn event(&self, kind: EventKind) -> Event {
        Event::new(kind)
            .with_slot(self.env.cycle.slot_id)
            .with_cycle(self.env.cycle.cycle_id.to_string())
            .with_branch(self.branch)
    }

    fn action_event(&self, kind: EventKind, def: &ActionDefinition) -> Event {
        self.event(kind)
            .with_step(def.step)
            .with_action(def.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rendezvous::Rendezvous;
    use crate::error::ActionError;
    use crate::memory::{AutoPrompt, MemoryHistory};
    use crate::plan::{ActionFn, AfterConditions, BehaviorCatalog};
    use std::sync::atomic::{AtomicU32, Ordering};
    use uuid::Uuid;

    struct Harness {
        env: BranchEnv,
        history: Arc<MemoryHistory>,
        abort_rx: mpsc::UnboundedReceiver<u8>,
    }

    fn harness(catalog: BehaviorCatalog) -> Harness {
        let bus = Bus::new(256);
        let history = Arc::new(MemoryHistory::new());
        let handle = CycleHandle::new(Uuid::new_v4(), 1, bus.clone());
        handle.set_running(true);
        let (abort_tx, abort_rx) = mpsc::unbounded_channel();
        let env = BranchEnv {
            cycle: Arc::new(CycleContext::new(1, 1, "SN")),
            handle,
            catalog: Arc::new(catalog),
            history: history.clone(),
            prompt: Arc::new(AutoPrompt::accepting()),
            rendezvous: Rendezvous::new(Vec::new(), Event::new(EventKind::RendezvousArrived), bus.clone()).spawn(),
            abort_tx,
            bus,
        };
        Harness {
            env,
            history,
            abort_rx,
        }
    }

    fn ok_fn() -> BehaviorRef {
        ActionFn::arc("ok", |_ctx: ActionContext| async {
            Ok::<_, ActionError>(ActionOutput::success())
        })
    }

    fn nok_fn() -> BehaviorRef {
        ActionFn::arc("nok", |_ctx: ActionContext| async {
            Ok::<_, ActionError>(ActionOutput::failed())
        })
    }

    fn build(env: &BranchEnv, defs: Vec<ActionDefinition>) -> BranchExecutor {
        let mut seq = ActionSequence::new();
        for def in defs {
            let behavior = resolve_behavior(&*env.catalog, &def).unwrap();
            seq.push(Arc::new(def), behavior);
        }
        BranchExecutor::new(1, seq, env.clone())
    }

    fn catalog() -> BehaviorCatalog {
        BehaviorCatalog::new().with(ok_fn()).with(nok_fn())
    }

    #[tokio::test]
    async fn test_disabled_actions_are_bypassed_and_branch_ok() {
        let h = harness(catalog());
        let ex = build(
            &h.env,
            vec![
                ActionDefinition::new("a", 1, 1).with_behavior("nok").disabled(),
                ActionDefinition::new("b", 1, 2).with_behavior("nok").disabled(),
            ],
        );
        let report = ex.run().await;

        assert_eq!(report.verdict, Verdict::Ok);
        assert_eq!(report.stop, BranchStop::Completed);
        let details = h.history.action_details();
        assert_eq!(details.len(), 2);
        assert!(details.iter().all(|d| d.verdict == Verdict::Bypassed && d.retries == 0));
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let failing = ActionFn::arc("flaky", move |_ctx: ActionContext| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<ActionOutput, _>(ActionError::fail("out of tolerance"))
            }
        });
        let h = harness(BehaviorCatalog::new().with(failing));
        let ex = build(&h.env, vec![ActionDefinition::new("flaky", 1, 1).with_retries(2)]);
        let report = ex.run().await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(report.verdict, Verdict::Nok);
        let details = h.history.action_details();
        assert_eq!(details.len(), 1);
        assert_eq!(details[0].verdict, Verdict::Nok);
        assert_eq!(details[0].retries, 2);
    }

    #[tokio::test]
    async fn test_self_reported_cancel_is_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let shy = ActionFn::arc("shy", move |_ctx: ActionContext| {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) == 0 {
                    return Err(ActionError::Canceled);
                }
                Ok(ActionOutput::success())
            }
        });
        let h = harness(catalog().with(shy));
        let ex = build(
            &h.env,
            vec![
                ActionDefinition::new("shy", 1, 1).with_retries(1),
                ActionDefinition::new("ok", 1, 2),
            ],
        );
        let report = ex.run().await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(report.stop, BranchStop::Completed);
        assert_eq!(report.verdict, Verdict::Ok);
        assert_eq!(report.action("ok").unwrap().attempts, 1);
        assert!(!h.env.handle.is_cancelled());
    }

    #[tokio::test]
    async fn test_exception_stops_branch() {
        let fatal = ActionFn::arc("broken", |_ctx: ActionContext| async {
            Err::<ActionOutput, _>(ActionError::fatal("driver lost"))
        });
        let h = harness(catalog().with(fatal));
        let ex = build(
            &h.env,
            vec![
                ActionDefinition::new("broken", 1, 1),
                ActionDefinition::new("ok", 1, 2),
            ],
        );
        let report = ex.run().await;

        assert_eq!(report.stop, BranchStop::Exception);
        assert_eq!(h.history.action_details().len(), 1);
        assert_eq!(report.action("ok").unwrap().attempts, 0);
    }

    #[tokio::test]
    async fn test_negate_and_ignore() {
        let h = harness(catalog());
        let ex = build(
            &h.env,
            vec![
                ActionDefinition::new("inv", 1, 1).with_behavior("nok").negating_result(),
                ActionDefinition::new("ign", 1, 2).with_behavior("nok").ignoring_result(),
            ],
        );
        let report = ex.run().await;

        assert_eq!(report.action("inv").unwrap().verdict, Verdict::Ok);
        let ign = report.action("ign").unwrap();
        assert_eq!(ign.verdict, Verdict::Nok);
        assert_eq!(ign.calculated, Verdict::Ok);
        assert_eq!(report.verdict, Verdict::Ok);
    }

    #[tokio::test]
    async fn test_after_actions_follow_parent_and_link_to_it() {
        let h = harness(catalog());
        let parent = ActionDefinition::new("measure", 1, 1)
            .with_behavior("nok")
            .with_after_nok_actions(vec![
                ActionDefinition::new("ok", 0, 1),
                ActionDefinition::new("missing", 0, 2),
            ])
            .with_after_ok_actions(vec![ActionDefinition::new("nok", 0, 1)]);
        let ex = build(&h.env, vec![parent, ActionDefinition::new("ok", 1, 2)]);
        let report = ex.run().await;

        let names: Vec<&str> = report.actions.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["measure", "ok", "ok"]);
        assert_eq!(report.actions[1].parent.as_deref(), Some("measure@1.1"));

        let subs = h.history.sub_action_details();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].parent.action_uid, "measure@1.1");
        assert_eq!(subs[0].parent.detail_id, 1);
        assert_eq!(subs[0].detail.branch, 1);
    }

    #[tokio::test]
    async fn test_after_condition_goto_skips_after_actions() {
        let h = harness(catalog());
        let defs = vec![
            ActionDefinition::new("ok", 1, 1).with_mark("top"),
            ActionDefinition::new("check", 1, 2)
                .with_behavior("nok")
                .with_after_nok(AfterConditions {
                    goto_mark: "top".into(),
                    goto_retries: 0,
                    ..AfterConditions::default()
                })
                .with_after_nok_actions(vec![ActionDefinition::new("ok", 0, 1)]),
        ];
        let report = build(&h.env, defs).run().await;

        // check: first run jumps back, second run exhausts the budget and inserts the after-action
        assert_eq!(report.actions.len(), 3);
        assert_eq!(report.action("check").unwrap().goto_count, 1);
        assert_eq!(h.history.action_details().len(), 4);
    }

    #[tokio::test]
    async fn test_group_last_member_turns_nok() {
        let h = harness(catalog());
        let defs = vec![
            ActionDefinition::new("g1", 1, 1).with_behavior("nok").in_group(0, 2),
            ActionDefinition::new("g2", 1, 2).with_behavior("ok").in_group(1, 2),
            ActionDefinition::new("g3", 1, 3).with_behavior("ok").in_group(2, 2),
        ];
        let report = build(&h.env, defs).run().await;

        assert_eq!(report.action("g2").unwrap().verdict, Verdict::Ok);
        assert_eq!(report.action("g3").unwrap().verdict, Verdict::Nok);
    }

    #[tokio::test]
    async fn test_abort_requests_and_waits_for_scope() {
        let mut h = harness(catalog());
        let ex = build(
            &h.env,
            vec![
                ActionDefinition::new("stop", 1, 1).with_kind(ActionKind::Abort),
                ActionDefinition::new("ok", 1, 2),
            ],
        );
        let handle = h.env.handle.clone();
        let branch = tokio::spawn(ex.run());

        assert_eq!(h.abort_rx.recv().await, Some(1));
        handle.abort();
        let report = branch.await.unwrap();

        assert_eq!(report.stop, BranchStop::Aborted);
        assert_eq!(report.action("stop").unwrap().verdict, Verdict::Aborted);
        assert_eq!(report.action("ok").unwrap().attempts, 0);
    }

    #[tokio::test]
    async fn test_cancel_marks_current_action_emergency() {
        let (started_tx, mut started_rx) = mpsc::unbounded_channel();
        let hang = ActionFn::arc("hang", move |ctx: ActionContext| {
            let started = started_tx.clone();
            async move {
                let _ = started.send(());
                ctx.token.cancelled().await;
                Err::<ActionOutput, _>(ActionError::Canceled)
            }
        });
        let h = harness(BehaviorCatalog::new().with(hang));
        let ex = build(&h.env, vec![ActionDefinition::new("hang", 1, 1).with_retries(5)]);
        let handle = h.env.handle.clone();
        let branch = tokio::spawn(ex.run());

        started_rx.recv().await.unwrap();
        assert!(handle.cancel_current_operation());
        let report = branch.await.unwrap();

        assert_eq!(report.stop, BranchStop::EmergencyAbort);
        assert_eq!(report.action("hang").unwrap().attempts, 1);
        assert_eq!(h.history.action_details()[0].verdict, Verdict::EmergencyAbort);
    }
}
