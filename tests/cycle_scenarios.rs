use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use stationvisor::memory::{AutoPrompt, MemoryExporter, MemoryHistory};
use stationvisor::{
    ActionContext, ActionDefinition, ActionError, ActionFn, ActionKind, ActionOutput,
    BehaviorCatalog, Bus, Config, CycleContext, CycleDeps, CycleOrchestrator, EventKind,
    SlotCycleRegistry, Verdict,
};

struct Harness {
    deps: CycleDeps,
    history: Arc<MemoryHistory>,
    exporter: Arc<MemoryExporter>,
}

fn harness(catalog: BehaviorCatalog) -> Harness {
    let history = Arc::new(MemoryHistory::new());
    let exporter = Arc::new(MemoryExporter::new());
    let deps = CycleDeps {
        catalog: Arc::new(catalog),
        history: history.clone(),
        prompt: Arc::new(AutoPrompt::accepting()),
        exporter: exporter.clone(),
    };
    Harness {
        deps,
        history,
        exporter,
    }
}

fn orchestrator(h: &Harness, slot: u16, plan: Vec<ActionDefinition>, bus: Bus) -> CycleOrchestrator {
    CycleOrchestrator::new(
        Config::default(),
        CycleContext::new(1, slot, "SN-IT"),
        plan,
        h.deps.clone(),
        SlotCycleRegistry::new(),
        bus,
    )
}

/// Behavior counting its calls per action name.
fn counting(key: &'static str, calls: Arc<Mutex<HashMap<String, u32>>>) -> BehaviorCatalog {
    BehaviorCatalog::new().with(ActionFn::arc(key, move |ctx: ActionContext| {
        let calls = calls.clone();
        async move {
            *calls.lock().unwrap().entry(ctx.action.name.clone()).or_default() += 1;
            Ok::<_, ActionError>(ActionOutput::success())
        }
    }))
}

#[tokio::test]
async fn disabled_actions_are_bypassed_and_cycle_passes() {
    let calls = Arc::new(Mutex::new(HashMap::new()));
    let h = harness(counting("ok", calls.clone()));
    let plan = (1..=3)
        .map(|step| {
            ActionDefinition::new(format!("a{step}"), 1, step)
                .with_behavior("ok")
                .disabled()
        })
        .collect();

    let report = orchestrator(&h, 1, plan, Bus::new(64)).run().await.unwrap();

    assert_eq!(report.verdict, Verdict::Ok);
    assert!(calls.lock().unwrap().is_empty());
    let branch = report.branch(1).unwrap();
    assert_eq!(branch.actions.len(), 3);
    for a in &branch.actions {
        assert_eq!(a.verdict, Verdict::Bypassed);
        assert_eq!(a.retries(), 0);
    }
    assert_eq!(h.history.action_details().len(), 3);
    assert_eq!(h.exporter.reports().len(), 1);
}

#[tokio::test]
async fn failing_action_is_retried_then_fails_cycle() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let catalog = BehaviorCatalog::new().with(ActionFn::arc("flaky", move |_ctx: ActionContext| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<ActionOutput, _>(ActionError::fail("out of tolerance"))
        }
    }));
    let h = harness(catalog);
    let bus = Bus::new(256);
    let mut rx = bus.subscribe();

    let plan = vec![ActionDefinition::new("flaky", 1, 1).with_retries(2)];
    let report = orchestrator(&h, 1, plan, bus).run().await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(report.verdict, Verdict::Nok);
    let record = report.branch(1).unwrap().action("flaky").unwrap();
    assert_eq!(record.attempts, 3);
    assert_eq!(record.retries(), 2);
    assert_eq!(record.verdict, Verdict::Nok);

    let mut retrying = 0;
    while let Ok(ev) = rx.try_recv() {
        if ev.kind == EventKind::ActionRetrying {
            retrying += 1;
        }
    }
    assert_eq!(retrying, 2);
    assert_eq!(h.history.final_results()[0].verdict, Verdict::Nok);
}

#[tokio::test]
async fn backward_goto_reruns_from_mark() {
    let calls = Arc::new(Mutex::new(HashMap::new()));
    let h = harness(counting("count", calls.clone()));
    let mut plan: Vec<ActionDefinition> = (1..=9)
        .map(|step| ActionDefinition::new(format!("s{step}"), 1, step).with_behavior("count"))
        .collect();
    plan[3] = plan[3].clone().with_mark("m4");
    plan.push(
        ActionDefinition::new("jump", 1, 10)
            .with_kind(ActionKind::goto_mark("m4"))
            .with_retries(2),
    );

    let report = orchestrator(&h, 1, plan, Bus::new(256)).run().await.unwrap();

    assert_eq!(report.verdict, Verdict::Ok);
    let calls = calls.lock().unwrap();
    for step in 1..=3 {
        assert_eq!(calls[&format!("s{step}")], 1, "s{step}");
    }
    for step in 4..=9 {
        assert_eq!(calls[&format!("s{step}")], 2, "s{step}");
    }
    let branch = report.branch(1).unwrap();
    assert_eq!(branch.actions.len(), 10);
    assert!(branch.actions.iter().all(|a| a.verdict == Verdict::Ok));
    assert_eq!(branch.action("jump").unwrap().goto_count, 2);
    // s1..s3 once, s4..s9 twice, the jump once per pass
    assert_eq!(h.history.action_details().len(), 3 + 12 + 2);
}

#[tokio::test(start_paused = true)]
async fn rendezvous_holds_branches_until_all_arrive() {
    let slow_done = Arc::new(AtomicBool::new(false));
    let done = slow_done.clone();
    let seen = slow_done.clone();
    let catalog = BehaviorCatalog::new()
        .with(ActionFn::arc("fast", |_ctx: ActionContext| async {
            Ok::<_, ActionError>(ActionOutput::success())
        }))
        .with(ActionFn::arc("slow", move |_ctx: ActionContext| {
            let done = done.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                done.store(true, Ordering::SeqCst);
                Ok::<_, ActionError>(ActionOutput::success())
            }
        }))
        .with(ActionFn::arc("check", move |_ctx: ActionContext| {
            let seen = seen.clone();
            async move {
                if seen.load(Ordering::SeqCst) {
                    Ok::<_, ActionError>(ActionOutput::success())
                } else {
                    Ok(ActionOutput::failed())
                }
            }
        }));
    let h = harness(catalog);
    let sync = || ActionKind::Rendezvous {
        group: "sync".into(),
    };
    let plan = vec![
        ActionDefinition::new("fast", 1, 1),
        ActionDefinition::new("sync-1", 1, 2).with_kind(sync()),
        ActionDefinition::new("check", 1, 3),
        ActionDefinition::new("slow", 2, 1),
        ActionDefinition::new("sync-2", 2, 2).with_kind(sync()),
    ];

    let report = orchestrator(&h, 1, plan, Bus::new(256)).run().await.unwrap();

    assert!(slow_done.load(Ordering::SeqCst));
    assert_eq!(report.branches.len(), 2);
    assert_eq!(report.branch(1).unwrap().action("check").unwrap().verdict, Verdict::Ok);
    assert_eq!(report.verdict, Verdict::Ok);
}

#[tokio::test(start_paused = true)]
async fn abort_action_ends_cycle_aborted() {
    let catalog = BehaviorCatalog::new().with(ActionFn::arc("soak", |ctx: ActionContext| async move {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(30)) => Ok(ActionOutput::success()),
            _ = ctx.token.cancelled() => Err(ActionError::Canceled),
        }
    }));
    let h = harness(catalog);
    let plan = vec![
        ActionDefinition::new("stop line", 1, 1).with_kind(ActionKind::Abort),
        ActionDefinition::new("soak", 2, 1),
    ];

    let report = orchestrator(&h, 4, plan, Bus::new(256)).run().await.unwrap();

    assert_eq!(report.verdict, Verdict::Aborted);
    assert_eq!(report.branch(1).unwrap().action("stop line").unwrap().verdict, Verdict::Aborted);
    assert_eq!(report.branch(2).unwrap().action("soak").unwrap().verdict, Verdict::Aborted);
    assert_eq!(h.exporter.reports()[0].verdict, Verdict::Aborted);
}

#[tokio::test]
async fn branch_after_gap_is_not_run() {
    let calls = Arc::new(Mutex::new(HashMap::new()));
    let h = harness(counting("count", calls.clone()));
    let plan = vec![
        ActionDefinition::new("b1", 1, 1).with_behavior("count"),
        ActionDefinition::new("b3", 3, 1).with_behavior("count"),
    ];

    let report = orchestrator(&h, 1, plan, Bus::new(64)).run().await.unwrap();

    assert_eq!(report.verdict, Verdict::Ok);
    assert_eq!(report.discontinuity, vec![3]);
    assert_eq!(report.branches.len(), 1);
    assert!(!calls.lock().unwrap().contains_key("b3"));
}
