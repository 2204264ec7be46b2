use std::sync::Arc;
use std::time::Duration;

use stationvisor::memory::{
    AutoPrompt, MemoryExporter, MemoryHistory, QueuedTrigger, StaticIdentifier, StaticPlans,
};
use stationvisor::subscribers::SlotStatus;
use stationvisor::{
    ActionContext, ActionDefinition, ActionError, ActionFn, ActionOutput, BehaviorCatalog,
    Config, CycleDeps, CycleContext, RuntimeError, SlotSource, Station, Verdict,
};

struct Line {
    station: Arc<Station>,
    trigger: Arc<QueuedTrigger>,
    history: Arc<MemoryHistory>,
    exporter: Arc<MemoryExporter>,
}

fn line() -> (Line, SlotSource) {
    let catalog = BehaviorCatalog::new().with(ActionFn::arc("measure", |_ctx: ActionContext| async {
        Ok::<_, ActionError>(ActionOutput::success().with_export("current", "0.42"))
    }));
    let history = Arc::new(MemoryHistory::new());
    let exporter = Arc::new(MemoryExporter::new());
    let station = Station::builder(Config {
        station_id: 12,
        ..Config::default()
    })
    .with_cycle_deps(CycleDeps {
        catalog: Arc::new(catalog),
        history: history.clone(),
        prompt: Arc::new(AutoPrompt::accepting()),
        exporter: exporter.clone(),
    })
    .build();

    let trigger = Arc::new(QueuedTrigger::new());
    let source = SlotSource {
        trigger: trigger.clone(),
        identifier: Arc::new(
            StaticIdentifier::new()
                .with("SN-100", "ORD-A")
                .with("SN-101", "ORD-A"),
        ),
        plans: Arc::new(StaticPlans::new().with(
            "ORD-A",
            vec![
                ActionDefinition::new("measure", 1, 1),
                ActionDefinition::new("measure", 2, 1),
            ],
        )),
    };
    (
        Line {
            station,
            trigger,
            history,
            exporter,
        },
        source,
    )
}

async fn wait_results(history: &MemoryHistory, n: usize) {
    while history.final_results().len() < n {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test(start_paused = true)]
async fn slot_runs_consecutive_units_and_records_unknown_one() {
    let (line, source) = line();
    line.station.start_slot(3, source).unwrap();

    line.trigger.push(3, "SN-100");
    line.trigger.push(3, "SN-999");
    line.trigger.push(3, "SN-101");
    wait_results(&line.history, 3).await;

    let results = line.history.final_results();
    let summary: Vec<(&str, Verdict)> = results
        .iter()
        .map(|r| (r.context.serial_number.as_str(), r.verdict))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("SN-100", Verdict::Ok),
            ("SN-999", Verdict::DeviceIdentificationError),
            ("SN-101", Verdict::Ok),
        ]
    );
    assert!(results.iter().all(|r| r.context.slot_id == 3 && r.context.station_id == 12));
    assert_eq!(results[0].context.order_id, "ORD-A");
    assert_ne!(results[0].context.cycle_id, results[2].context.cycle_id);
    assert!(results[1].branches.is_empty());

    let exported: Vec<String> = line
        .exporter
        .reports()
        .iter()
        .map(|r| r.context.serial_number.clone())
        .collect();
    assert_eq!(exported, vec!["SN-100", "SN-101"]);
    // two branches per tested unit
    assert_eq!(line.history.action_details().len(), 4);

    while line.station.monitor().status(3).await != SlotStatus::Waiting {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(line.station.shutdown().await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn runner_owns_its_slot() {
    let (line, source) = line();
    line.station.start_slot(1, source.clone()).unwrap();

    assert!(matches!(
        line.station.start_slot(1, source),
        Err(RuntimeError::SlotBusy { slot: 1 })
    ));
    assert!(matches!(
        line.station.start_cycle(
            CycleContext::new(12, 1, "SN-100"),
            vec![ActionDefinition::new("measure", 1, 1)],
        ),
        Err(RuntimeError::SlotBusy { slot: 1 })
    ));

    assert!(line.station.shutdown().await.is_ok());
    line.trigger.push(1, "SN-100");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(line.history.final_results().is_empty());
    assert_eq!(line.trigger.pending(1), 1);
}
