//! # Run a single attempt of an action.
//!
//! Executes one attempt of an [`ActionBehavior`] with an optional timeout and maps
//! everything that can happen to a [`StepOutcome`].
//!
//! - **Execute ONE attempt** with a child of the cycle token
//! - **Apply timeout** if the action declares one (prompts never time out)
//! - **Observe cancellation** of the cycle scope while the attempt runs
//! - **Capture panics** of the behavior
//!
//! ## Outcome mapping
//!
//! ```text
//! Ok(output)                 → output.outcome
//! Err(Fail)                  → Failed
//! Err(Timeout) / elapsed     → FailedTimeout   (+ on_timeout hook, ActionTimeout event)
//! Err(Fatal) / panic         → Exception
//! scope cancelled            → OperationCanceled (+ on_alarm hook when alarm-stopped)
//! Err(Canceled), scope live  → Failed
//! ```
//!
//! ## Rules
//! - The child token is cancelled when the attempt ends, whatever the outcome.
//! - Child cancellation does **not** affect the cycle scope.
//! - Scope cancellation wins over a result that completes in the same poll.

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use tokio::time;
use tracing::{debug, warn};

use crate::error::ActionError;
use crate::events::{Bus, Event, EventKind};
use crate::plan::{ActionBehavior, ActionContext, ActionOutput, StepOutcome};

use super::handle::CycleHandle;

/// Result of one attempt.
#[derive(Debug)]
pub(crate) struct Attempt {
    pub(crate) outcome: StepOutcome,
    pub(crate) output: Option<ActionOutput>,
}

impl Attempt {
    fn bare(outcome: StepOutcome) -> Self {
        Self {
            outcome,
            output: None,
        }
    }
}

/// Executes a single attempt of `behavior`, publishing timeout/failure events to `bus`.
pub(crate) async fn run_attempt(
    behavior: &dyn ActionBehavior,
    mut ctx: ActionContext,
    cycle: &CycleHandle,
    bus: &Bus,
) -> Attempt {
    let scope = cycle.token().clone();
    let child = scope.child_token();
    ctx.token = child.clone();

    let def = ctx.action.clone();
    let attempt = ctx.attempt;
    let timeout = def.attempt_timeout();

    let body = AssertUnwindSafe(behavior.execute(ctx)).catch_unwind();
    let bounded = async {
        match timeout {
            Some(dur) => match time::timeout(dur, body).await {
                Ok(r) => Some(r),
                Err(_elapsed) => None,
            },
            None => Some(body.await),
        }
    };

    let res = tokio::select! {
        biased;
        _ = scope.cancelled() => Err(ActionError::Canceled),
        r = bounded => match r {
            None => Err(ActionError::Timeout { timeout: timeout.unwrap_or(Duration::ZERO) }),
            Some(Ok(r)) => r,
            Some(Err(panic)) => Err(ActionError::fatal(panic_message(&*panic))),
        },
    };
    child.cancel();

    match res {
        Ok(output) => {
            debug!(action = %def.name, attempt, outcome = output.outcome.as_label(), "attempt finished");
            Attempt {
                outcome: output.outcome,
                output: Some(output),
            }
        }
        Err(ActionError::Canceled) if scope.is_cancelled() => {
            if cycle.alarm_raised() {
                behavior.on_alarm(&def);
            }
            debug!(action = %def.name, attempt, "attempt cancelled");
            Attempt::bare(StepOutcome::OperationCanceled)
        }
        Err(ActionError::Timeout { timeout }) => {
            behavior.on_timeout(&def);
            warn!(action = %def.name, attempt, ?timeout, "attempt timed out");
            bus.publish(
                Event::new(EventKind::ActionTimeout)
                    .with_slot(cycle.slot())
                    .with_cycle(cycle.cycle_id().to_string())
                    .with_branch(def.branch)
                    .with_step(def.step)
                    .with_action(def.name.as_str())
                    .with_attempt(attempt)
                    .with_timeout(timeout),
            );
            Attempt::bare(StepOutcome::FailedTimeout)
        }
        Err(e) => {
            warn!(action = %def.name, attempt, error = %e, "attempt failed");
            bus.publish(
                Event::new(EventKind::ActionFailed)
                    .with_slot(cycle.slot())
                    .with_cycle(cycle.cycle_id().to_string())
                    .with_branch(def.branch)
                    .with_step(def.step)
                    .with_action(def.name.as_str())
                    .with_attempt(attempt)
                    .with_reason(e.as_message()),
            );
            let outcome = match e {
                ActionError::Fatal { .. } => StepOutcome::Exception,
                _ => StepOutcome::Failed,
            };
            Attempt::bare(outcome)
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panic: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panic: {s}")
    } else {
        "panic: unknown".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::AutoPrompt;
    use crate::plan::{ActionDefinition, ActionFn, CycleContext};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use uuid::Uuid;

    fn ctx(def: ActionDefinition) -> ActionContext {
        ActionContext {
            cycle: Arc::new(CycleContext::new(1, 1, "SN-1")),
            action: Arc::new(def),
            branch: 1,
            attempt: 1,
            token: tokio_util::sync::CancellationToken::new(),
            prompt: Arc::new(AutoPrompt::accepting()),
        }
    }

    fn running() -> CycleHandle {
        let h = CycleHandle::new(Uuid::new_v4(), 1, Bus::new(8));
        h.set_running(true);
        h
    }

    #[tokio::test]
    async fn test_errors_map_to_outcomes() {
        let h = running();
        let bus = Bus::new(8);

        let fail = ActionFn::new("f", |_ctx: ActionContext| async { Err::<ActionOutput, _>(ActionError::fail("low")) });
        let fatal = ActionFn::new("x", |_ctx: ActionContext| async { Err::<ActionOutput, _>(ActionError::fatal("io")) });
        let ok = ActionFn::new("ok", |_ctx: ActionContext| async { Ok::<_, ActionError>(ActionOutput::success()) });

        let def = ActionDefinition::new("m", 1, 1);
        assert_eq!(run_attempt(&fail, ctx(def.clone()), &h, &bus).await.outcome, StepOutcome::Failed);
        assert_eq!(run_attempt(&fatal, ctx(def.clone()), &h, &bus).await.outcome, StepOutcome::Exception);
        let done = run_attempt(&ok, ctx(def), &h, &bus).await;
        assert_eq!(done.outcome, StepOutcome::Success);
        assert!(done.output.is_some());
    }

    #[tokio::test]
    async fn test_panic_becomes_exception() {
        let h = running();
        let boom = ActionFn::new("boom", |_ctx: ActionContext| async {
            if true {
                panic!("fixture broke");
            }
            Ok::<_, ActionError>(ActionOutput::success())
        });
        let out = run_attempt(&boom, ctx(ActionDefinition::new("m", 1, 1)), &h, &Bus::new(8)).await;
        assert_eq!(out.outcome, StepOutcome::Exception);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_cancels_child_and_calls_hook() {
        struct Slow(Arc<AtomicBool>);

        #[async_trait::async_trait]
        impl ActionBehavior for Slow {
            fn name(&self) -> &str {
                "slow"
            }
            async fn execute(&self, ctx: ActionContext) -> Result<ActionOutput, ActionError> {
                ctx.token.cancelled().await;
                Err(ActionError::Canceled)
            }
            fn on_timeout(&self, _action: &ActionDefinition) {
                self.0.store(true, Ordering::SeqCst);
            }
        }

        let hit = Arc::new(AtomicBool::new(false));
        let h = running();
        let bus = Bus::new(8);
        let mut rx = bus.subscribe();
        let def = ActionDefinition::new("m", 1, 1).with_timeout(Duration::from_millis(50));

        let out = run_attempt(&Slow(hit.clone()), ctx(def), &h, &bus).await;
        assert_eq!(out.outcome, StepOutcome::FailedTimeout);
        assert!(hit.load(Ordering::SeqCst));
        assert!(!h.is_cancelled());
        assert_eq!(rx.recv().await.unwrap().kind, EventKind::ActionTimeout);
    }

    #[tokio::test]
    async fn test_self_reported_cancel_without_stop_is_failure() {
        let h = running();
        let bus = Bus::new(8);
        let mut rx = bus.subscribe();
        let quit = ActionFn::new("quit", |_ctx: ActionContext| async { Err::<ActionOutput, _>(ActionError::Canceled) });

        let out = run_attempt(&quit, ctx(ActionDefinition::new("m", 1, 1)), &h, &bus).await;
        assert_eq!(out.outcome, StepOutcome::Failed);
        assert!(!h.is_cancelled());
        assert_eq!(rx.recv().await.unwrap().kind, EventKind::ActionFailed);
    }

    #[tokio::test]
    async fn test_scope_cancel_is_operation_canceled() {
        let h = running();
        let pending = ActionFn::new("wait", |_ctx: ActionContext| async {
            futures::future::pending::<()>().await;
            Ok::<_, ActionError>(ActionOutput::success())
        });
        let h2 = h.clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            h2.alarm_alert();
        });
        let out = run_attempt(&pending, ctx(ActionDefinition::new("m", 1, 1)), &h, &Bus::new(8)).await;
        assert_eq!(out.outcome, StepOutcome::OperationCanceled);
    }
}
