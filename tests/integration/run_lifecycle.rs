//! # Maintenance run life cycle
//!
//! Drives compaction and cleanup runs through a fully wired engine: the
//! builder restores persisted runs, the plan driver ticks them, and a second
//! engine over the same store picks up where the first one stopped.

use ringctl::orchestrator::config::OrchestratorConfig;
use ringctl::orchestrator::engine::Engine;
use ringctl::orchestrator::node_task::RemoteTaskState;
use ringctl::orchestrator::operations::{CleanupRequest, CompactRequest};
use ringctl::orchestrator::plan::StepStatus;
use ringctl::orchestrator::startup::OrchestratorBuilder;
use ringctl::orchestrator::task_store::{MemoryTaskStore, TaskStore};
use ringctl::orchestrator::RunResponse;
use ringctl::test_harness::{daemon, AgentReply, ScriptedNodeAgent};
use std::sync::Arc;
use std::time::Duration;

use crate::integration::poll_until;

const NODES: [&str; 3] = ["node-1", "node-2", "node-3"];

fn test_config() -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();
    config.driver.tick_interval_ms = 10;
    config.shutdown.timeout_secs = 5;
    config.membership.daemons = NODES.iter().map(|name| daemon(name)).collect();
    config
}

async fn build_engine(
    store: Arc<MemoryTaskStore>,
    agent: Arc<ScriptedNodeAgent>,
) -> (OrchestratorBuilder, Engine) {
    let builder = OrchestratorBuilder::new(test_config())
        .with_store(store)
        .with_agent(agent);
    let engine = builder.create_engine().await.expect("engine");
    (builder, engine)
}

async fn wait_complete(engine: &Engine) {
    let done = poll_until(Duration::from_secs(5), Duration::from_millis(10), || async {
        engine.compaction.is_complete().then_some(())
    })
    .await;
    assert!(done.is_some(), "compaction did not complete in time");
}

#[tokio::test]
async fn test_compaction_runs_serially_across_fleet() {
    let store = Arc::new(MemoryTaskStore::new());
    let agent = Arc::new(ScriptedNodeAgent::new());
    let (builder, engine) = build_engine(store.clone(), agent.clone()).await;
    let running = builder.build(engine).start();
    let engine = running.engine().clone();

    let response = engine
        .compaction
        .start_run(CompactRequest::new(
            vec!["*".to_string()],
            vec!["ks1".to_string()],
            vec!["users".to_string()],
        ))
        .await;
    assert_eq!(response, RunResponse::Accepted);

    wait_complete(&engine).await;
    assert_eq!(agent.submitted_daemons(), NODES.to_vec());

    let submitted = agent.submissions();
    assert!(submitted.iter().all(|task| task.name.starts_with("compact-")));

    let status = engine.compaction.status();
    assert!(!status.active);
    assert_eq!(status.context.as_ref().unwrap()["key_spaces"][0], "ks1");
    assert!(status.phases[0]
        .steps
        .iter()
        .all(|step| step.status == StepStatus::Complete));

    running.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_run_resumes_after_restart_without_duplicate_submissions() {
    let store = Arc::new(MemoryTaskStore::new());
    let agent = Arc::new(ScriptedNodeAgent::new());
    agent.set_default_state(RemoteTaskState::Running);

    let (builder, engine) = build_engine(store.clone(), agent.clone()).await;
    let running = builder.build(engine).start();
    running
        .engine()
        .compaction
        .start(CompactRequest::all_nodes())
        .await
        .unwrap();

    // node-1 is submitted and keeps running
    let submitted = poll_until(Duration::from_secs(5), Duration::from_millis(10), || async {
        let status = running.engine().compaction.status();
        (status.phases[0].steps[0].status == StepStatus::InProgress).then_some(())
    })
    .await;
    assert!(submitted.is_some());
    assert_eq!(agent.submission_count("node-1"), 1);
    running.shutdown().await.unwrap();

    // The replacement process sees the same run and lets node-1 finish
    agent.set_default_state(RemoteTaskState::Finished);
    let (builder, engine) = build_engine(store.clone(), agent.clone()).await;
    assert!(engine.compaction.is_in_progress());
    let running = builder.build(engine).start();

    wait_complete(running.engine()).await;
    assert_eq!(agent.submission_count("node-1"), 1);
    assert_eq!(agent.total_submissions(), 3);

    running.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_stop_run_clears_everything() {
    let store = Arc::new(MemoryTaskStore::new());
    let agent = Arc::new(ScriptedNodeAgent::new());
    agent.set_default_state(RemoteTaskState::Running);
    let (builder, engine) = build_engine(store.clone(), agent.clone()).await;
    let running = builder.build(engine).start();
    let engine = running.engine().clone();

    engine.compaction.start(CompactRequest::all_nodes()).await.unwrap();
    poll_until(Duration::from_secs(5), Duration::from_millis(10), || async {
        (agent.total_submissions() > 0).then_some(())
    })
    .await
    .expect("no submission");

    assert_eq!(engine.compaction.stop_run().await, RunResponse::Accepted);
    assert!(store.keys_with_prefix("").await.unwrap().is_empty());
    assert!(engine.compaction.status().phases.is_empty());

    running.shutdown().await.unwrap();

    // Nothing to resume afterwards
    let (_, engine) = build_engine(store, agent).await;
    assert!(!engine.compaction.is_in_progress());
}

#[tokio::test]
async fn test_failed_node_blocks_serial_run_until_stopped() {
    let store = Arc::new(MemoryTaskStore::new());
    let agent = Arc::new(ScriptedNodeAgent::new());
    agent.script("node-2", vec![AgentReply::State(RemoteTaskState::Failed)]);
    let (builder, engine) = build_engine(store, agent.clone()).await;
    let running = builder.build(engine).start();
    let engine = running.engine().clone();

    engine.compaction.start(CompactRequest::all_nodes()).await.unwrap();
    let failed = poll_until(Duration::from_secs(5), Duration::from_millis(10), || async {
        let status = engine.compaction.status();
        (status.phases[0].steps[1].status == StepStatus::Error).then_some(status)
    })
    .await
    .expect("node-2 did not fail");

    assert!(failed.active);
    assert_eq!(failed.phases[0].steps[0].status, StepStatus::Complete);
    assert_eq!(failed.phases[0].steps[2].status, StepStatus::Pending);
    assert_eq!(agent.submission_count("node-3"), 0);

    let rejected = engine.compaction.start_run(CompactRequest::all_nodes()).await;
    assert!(matches!(rejected, RunResponse::Rejected { .. }));

    running.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_compaction_and_cleanup_run_side_by_side() {
    let store = Arc::new(MemoryTaskStore::new());
    let agent = Arc::new(ScriptedNodeAgent::new());
    let (builder, engine) = build_engine(store.clone(), agent.clone()).await;
    let running = builder.build(engine).start();
    let engine = running.engine().clone();

    engine
        .compaction
        .start(CompactRequest::new(vec!["node-1".to_string()], vec![], vec![]))
        .await
        .unwrap();
    engine
        .cleanup
        .start(CleanupRequest {
            nodes: vec!["node-1".to_string(), "node-3".to_string(), "ghost".to_string()],
            ..Default::default()
        })
        .await
        .unwrap();

    let done = poll_until(Duration::from_secs(5), Duration::from_millis(10), || async {
        (engine.compaction.is_complete() && engine.cleanup.is_complete()).then_some(())
    })
    .await;
    assert!(done.is_some());

    assert_eq!(engine.cleanup.context().unwrap().nodes, vec!["node-1", "node-3"]);
    let keys = store.keys_with_prefix("tasks/").await.unwrap();
    assert_eq!(
        keys,
        vec!["tasks/cleanup-node-1", "tasks/cleanup-node-3", "tasks/compact-node-1"]
    );

    running.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_serve_with_shutdown_returns_on_signal() {
    let store = Arc::new(MemoryTaskStore::new());
    let agent = Arc::new(ScriptedNodeAgent::new());
    let (builder, engine) = build_engine(store, agent).await;
    let instance = builder.build(engine);

    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    let serving = tokio::spawn(instance.serve_with_shutdown(async move {
        let _ = rx.await;
    }));

    tokio::time::sleep(Duration::from_millis(30)).await;
    tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), serving)
        .await
        .expect("orchestrator did not stop")
        .unwrap()
        .unwrap();
}
