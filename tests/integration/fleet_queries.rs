//! # Fleet queries
//!
//! Fan-out queries go through the engine's fleet client and must answer
//! while a maintenance run is blocked on a node that never responds. Daemon
//! info and restarts are served alongside an active run.

use ringctl::orchestrator::config::OrchestratorConfig;
use ringctl::orchestrator::fleet_view::FleetView;
use ringctl::orchestrator::metrics::{DaemonStatus, HeapUsage, MetricKind, MetricValue};
use ringctl::orchestrator::node_task::RemoteTaskState;
use ringctl::orchestrator::operations::CompactRequest;
use ringctl::orchestrator::plan::StepStatus;
use ringctl::orchestrator::startup::OrchestratorBuilder;
use ringctl::orchestrator::task_store::MemoryTaskStore;
use ringctl::test_harness::{daemon, ScriptedNodeAgent};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::integration::poll_until;

fn heap(mem_used: f64) -> MetricValue {
    MetricValue::Heap(HeapUsage {
        seconds_up: 60,
        mem_used,
        mem_max: 4096.0,
        exceptions: 0,
        load: "800 MB".to_string(),
    })
}

#[tokio::test]
async fn test_fleet_views_while_run_is_blocked() {
    let agent = Arc::new(ScriptedNodeAgent::new());
    for (name, used) in [("a", 100.0), ("c", 300.0)] {
        agent.set_metric(name, MetricKind::HeapUsage, heap(used));
        agent.set_metric(
            name,
            MetricKind::Unreachable,
            MetricValue::Endpoints(vec!["10.1.0.2".to_string()]),
        );
    }
    agent.set_metric(
        "c",
        MetricKind::Status,
        MetricValue::Status(DaemonStatus {
            mode: "JOINING".to_string(),
            ..Default::default()
        }),
    );
    agent.hang("b");

    let mut config = OrchestratorConfig::default();
    config.driver.tick_interval_ms = 10;
    config.agent.request_timeout_ms = 200;
    config.membership.daemons = vec![daemon("a"), daemon("b"), daemon("c")];

    let builder = OrchestratorBuilder::new(config)
        .with_store(Arc::new(MemoryTaskStore::new()))
        .with_agent(agent.clone());
    let engine = builder.create_engine().await.unwrap();
    let running = builder.build(engine).start();
    let engine = running.engine().clone();

    engine.compaction.start(CompactRequest::all_nodes()).await.unwrap();
    poll_until(Duration::from_secs(5), Duration::from_millis(10), || async {
        let status = engine.compaction.status();
        (status.phases[0].steps[1].status == StepStatus::Prepared).then_some(())
    })
    .await
    .expect("run did not reach node b");

    let usage = engine.fleet.heap_usage().await;
    assert_eq!(usage.len(), 2);
    assert_eq!(usage["c"].mem_used, 300.0);

    let started = Instant::now();
    let unreachable = engine.fleet.unreachable().await;
    assert!(started.elapsed() < Duration::from_millis(200));
    assert!(unreachable.contains("10.1.0.2"));

    match engine.fleet.fleet_view(MetricKind::Status).await {
        FleetView::PerNode(values) => {
            assert_eq!(values.len(), 1);
            assert!(values.contains_key("c"));
        }
        other => panic!("unexpected view {other:?}"),
    }

    let status = engine.fleet.node_status("c").await.unwrap().unwrap();
    assert_eq!(status.mode, "JOINING");
    assert!(engine.fleet.node_status("b").await.is_err());
    assert!(engine.fleet.node_status("z").await.unwrap().is_none());

    // The run itself is still waiting on node b
    assert!(engine.compaction.is_in_progress());

    engine.compaction.stop().await.unwrap();
    running.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_restart_and_info_during_run() {
    let agent = Arc::new(ScriptedNodeAgent::new());
    agent.set_default_state(RemoteTaskState::Running);

    let mut config = OrchestratorConfig::default();
    config.driver.tick_interval_ms = 10;
    config.membership.daemons = vec![daemon("a"), daemon("b")];

    let builder = OrchestratorBuilder::new(config)
        .with_store(Arc::new(MemoryTaskStore::new()))
        .with_agent(agent.clone())
        .with_killer(agent.clone());
    let engine = builder.create_engine().await.unwrap();
    let running = builder.build(engine).start();
    let engine = running.engine().clone();

    engine.compaction.start(CompactRequest::all_nodes()).await.unwrap();
    poll_until(Duration::from_secs(5), Duration::from_millis(10), || async {
        let status = engine.compaction.status();
        (status.phases[0].steps[0].status == StepStatus::InProgress).then_some(())
    })
    .await
    .expect("run did not reach node a");

    let infos = engine.daemons_info();
    assert_eq!(
        infos.iter().map(|info| info.name.as_str()).collect::<Vec<_>>(),
        vec!["a", "b"]
    );
    assert_eq!(engine.daemon_info("b").unwrap().hostname, "b.local");

    engine.restart_node("a").await.unwrap();
    assert!(engine.restart_node("missing").await.unwrap_err().is_not_found());
    assert_eq!(agent.kills(), vec!["a"]);

    // The restart does not disturb the run
    assert!(engine.compaction.is_in_progress());
    assert_eq!(agent.submission_count("a"), 1);

    engine.compaction.stop().await.unwrap();
    running.shutdown().await.unwrap();
}
