//! In-process fakes for exercising the orchestrator without a live cluster.
//!
//! `ScriptedNodeAgent` plays every node agent of a fleet: tests script the
//! status replies per daemon, mark daemons unreachable or hung, and inspect
//! which submissions were made.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use crate::error::{AgentError, StoreError};
use crate::orchestrator::membership::{DaemonRef, StaticMembership};
use crate::orchestrator::metrics::{MetricKind, MetricValue};
use crate::orchestrator::node_agent::{NodeAgent, SubmitOutcome, TaskKiller};
use crate::orchestrator::node_task::{NodeTaskStatus, RemoteTaskState, TaskDescription};
use crate::orchestrator::task_store::{MemoryTaskStore, TaskStore};

const DEFAULT_AGENT_PORT: u16 = 9100;

/// One scripted answer to a task status poll
#[derive(Debug, Clone)]
pub enum AgentReply {
    State(RemoteTaskState),
    /// Reports a state for some other submission of the same task name
    Foreign(RemoteTaskState),
    Unreachable,
}

#[derive(Default)]
struct AgentState {
    submissions: Vec<(String, TaskDescription)>,
    accepted: HashMap<String, Uuid>,
    scripts: HashMap<String, VecDeque<AgentReply>>,
    rejecting: HashMap<String, String>,
    unreachable: HashSet<String>,
    hung: HashSet<String>,
    delays: HashMap<String, Duration>,
    metrics: HashMap<(String, MetricKind), MetricValue>,
    kills: Vec<String>,
}

/// Fake node agent for the whole fleet
pub struct ScriptedNodeAgent {
    state: Mutex<AgentState>,
    default_state: Mutex<RemoteTaskState>,
}

impl Default for ScriptedNodeAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedNodeAgent {
    /// Tasks finish on the first poll unless a script says otherwise
    pub fn new() -> Self {
        Self {
            state: Mutex::new(AgentState::default()),
            default_state: Mutex::new(RemoteTaskState::Finished),
        }
    }

    pub fn set_default_state(&self, state: RemoteTaskState) {
        *self.default_state.lock().unwrap() = state;
    }

    /// Queues poll replies for a daemon; once drained the default state is reported
    pub fn script(&self, daemon: &str, replies: Vec<AgentReply>) {
        let mut state = self.state.lock().unwrap();
        state
            .scripts
            .entry(daemon.to_string())
            .or_default()
            .extend(replies);
    }

    pub fn reject(&self, daemon: &str, reason: &str) {
        let mut state = self.state.lock().unwrap();
        state
            .rejecting
            .insert(daemon.to_string(), reason.to_string());
    }

    pub fn set_unreachable(&self, daemon: &str, unreachable: bool) {
        let mut state = self.state.lock().unwrap();
        if unreachable {
            state.unreachable.insert(daemon.to_string());
        } else {
            state.unreachable.remove(daemon);
        }
    }

    /// Calls to this daemon never return
    pub fn hang(&self, daemon: &str) {
        self.state.lock().unwrap().hung.insert(daemon.to_string());
    }

    pub fn set_delay(&self, daemon: &str, delay: Duration) {
        self.state
            .lock()
            .unwrap()
            .delays
            .insert(daemon.to_string(), delay);
    }

    pub fn set_metric(&self, daemon: &str, kind: MetricKind, value: MetricValue) {
        self.state
            .lock()
            .unwrap()
            .metrics
            .insert((daemon.to_string(), kind), value);
    }

    pub fn submission_count(&self, daemon: &str) -> usize {
        let state = self.state.lock().unwrap();
        state
            .submissions
            .iter()
            .filter(|(name, _)| name == daemon)
            .count()
    }

    pub fn total_submissions(&self) -> usize {
        self.state.lock().unwrap().submissions.len()
    }

    /// Daemons in the order they received submissions
    pub fn submitted_daemons(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .submissions
            .iter()
            .map(|(daemon, _)| daemon.clone())
            .collect()
    }

    /// Daemons restarted through this agent, in order
    pub fn kills(&self) -> Vec<String> {
        self.state.lock().unwrap().kills.clone()
    }

    pub fn submissions(&self) -> Vec<TaskDescription> {
        let state = self.state.lock().unwrap();
        state
            .submissions
            .iter()
            .map(|(_, task)| task.clone())
            .collect()
    }

    /// Sleeps per the configured delay, forever for hung daemons
    async fn reach(&self, daemon: &str) -> Result<(), AgentError> {
        let (hung, delay, unreachable) = {
            let state = self.state.lock().unwrap();
            (
                state.hung.contains(daemon),
                state.delays.get(daemon).copied(),
                state.unreachable.contains(daemon),
            )
        };

        if hung {
            futures::future::pending::<()>().await;
        }
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if unreachable {
            return Err(AgentError::Unreachable(format!("{daemon} is down")));
        }
        Ok(())
    }
}

#[async_trait]
impl NodeAgent for ScriptedNodeAgent {
    async fn submit(
        &self,
        daemon: &DaemonRef,
        task: &TaskDescription,
    ) -> Result<SubmitOutcome, AgentError> {
        self.reach(&daemon.name).await?;

        let mut state = self.state.lock().unwrap();
        if let Some(reason) = state.rejecting.get(&daemon.name) {
            return Ok(SubmitOutcome::Rejected(reason.clone()));
        }
        state
            .submissions
            .push((daemon.name.clone(), task.clone()));
        state.accepted.insert(task.name.clone(), task.task_id);
        Ok(SubmitOutcome::Accepted)
    }

    async fn task_status(
        &self,
        daemon: &DaemonRef,
        task_name: &str,
    ) -> Result<NodeTaskStatus, AgentError> {
        self.reach(&daemon.name).await?;

        let default_state = *self.default_state.lock().unwrap();
        let mut state = self.state.lock().unwrap();
        let Some(task_id) = state.accepted.get(task_name).copied() else {
            return Err(AgentError::Status(404));
        };

        let reply = state
            .scripts
            .get_mut(&daemon.name)
            .and_then(|script| script.pop_front())
            .unwrap_or(AgentReply::State(default_state));

        match reply {
            AgentReply::State(remote) => Ok(NodeTaskStatus {
                task_id,
                state: remote,
                message: None,
            }),
            AgentReply::Foreign(remote) => Ok(NodeTaskStatus {
                task_id: Uuid::new_v4(),
                state: remote,
                message: Some("stale submission".to_string()),
            }),
            AgentReply::Unreachable => {
                Err(AgentError::Unreachable(format!("{} is down", daemon.name)))
            }
        }
    }

    async fn metric(
        &self,
        daemon: &DaemonRef,
        kind: &MetricKind,
    ) -> Result<MetricValue, AgentError> {
        self.reach(&daemon.name).await?;

        let state = self.state.lock().unwrap();
        state
            .metrics
            .get(&(daemon.name.clone(), kind.clone()))
            .cloned()
            .ok_or(AgentError::Status(404))
    }
}

#[async_trait]
impl TaskKiller for ScriptedNodeAgent {
    async fn kill(&self, daemon: &DaemonRef) -> Result<(), AgentError> {
        self.reach(&daemon.name).await?;
        self.state.lock().unwrap().kills.push(daemon.name.clone());
        Ok(())
    }
}

/// In-memory store whose operations can be made to fail on demand
#[derive(Default)]
pub struct FailingTaskStore {
    inner: MemoryTaskStore,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
    failing_keys: Mutex<HashSet<String>>,
}

impl FailingTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Only puts and deletes touching `key` fail
    pub fn fail_writes_to(&self, key: &str) {
        self.failing_keys.lock().unwrap().insert(key.to_string());
    }

    pub fn clear_failures(&self) {
        self.fail_writes(false);
        self.fail_reads(false);
        self.failing_keys.lock().unwrap().clear();
    }

    pub fn inner(&self) -> &MemoryTaskStore {
        &self.inner
    }

    fn check(flag: &AtomicBool, op: &str) -> Result<(), StoreError> {
        if flag.load(Ordering::SeqCst) {
            return Err(StoreError::Backend(format!("injected {op} failure")));
        }
        Ok(())
    }

    fn check_keys<'a>(&self, keys: impl IntoIterator<Item = &'a str>) -> Result<(), StoreError> {
        let failing = self.failing_keys.lock().unwrap();
        match keys.into_iter().find(|key| failing.contains(*key)) {
            Some(key) => Err(StoreError::Backend(format!("injected write failure on {key}"))),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl TaskStore for FailingTaskStore {
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        Self::check(&self.fail_writes, "put")?;
        self.check_keys([key])?;
        self.inner.put(key, value).await
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Self::check(&self.fail_reads, "get")?;
        self.inner.get(key).await
    }

    async fn delete(&self, keys: &[String]) -> Result<(), StoreError> {
        Self::check(&self.fail_writes, "delete")?;
        self.check_keys(keys.iter().map(String::as_str))?;
        self.inner.delete(keys).await
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        Self::check(&self.fail_reads, "list")?;
        self.inner.keys_with_prefix(prefix).await
    }
}

/// Daemon reference with a loopback-style address derived from its name
pub fn daemon(name: &str) -> DaemonRef {
    DaemonRef::new(name, format!("{name}.local"), DEFAULT_AGENT_PORT)
}

pub fn membership_of(names: &[&str]) -> Arc<StaticMembership> {
    Arc::new(StaticMembership::with_daemons(
        names.iter().map(|name| daemon(name)),
    ))
}
