use futures::future::join_all;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{AgentError, OrchestratorError};
use crate::orchestrator::membership::{DaemonRef, NodeMembership};
use crate::orchestrator::node_agent::{NodeAgent, SubmitOutcome};
use crate::orchestrator::node_task::{
    NodeTaskRecord, NodeTaskState, NodeTaskStatus, TaskDescription, TaskPayload,
};
use crate::orchestrator::request::OperationKind;
use crate::orchestrator::task_store::TaskStore;

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Collaborators a plan needs to advance
#[derive(Clone)]
pub struct PlanEnv {
    pub store: Arc<dyn TaskStore>,
    pub membership: Arc<dyn NodeMembership>,
    pub agent: Arc<dyn NodeAgent>,
    /// Upper bound on a single submit or poll issued by a step
    pub call_timeout: Duration,
}

impl PlanEnv {
    pub fn new(
        store: Arc<dyn TaskStore>,
        membership: Arc<dyn NodeMembership>,
        agent: Arc<dyn NodeAgent>,
    ) -> Self {
        Self {
            store,
            membership,
            agent,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    async fn submit_task(
        &self,
        daemon: &DaemonRef,
        task: &TaskDescription,
    ) -> Result<SubmitOutcome, AgentError> {
        tokio::time::timeout(self.call_timeout, self.agent.submit(daemon, task))
            .await
            .unwrap_or(Err(AgentError::Timeout))
    }

    async fn poll_task(
        &self,
        daemon: &DaemonRef,
        task_name: &str,
    ) -> Result<NodeTaskStatus, AgentError> {
        tokio::time::timeout(self.call_timeout, self.agent.task_status(daemon, task_name))
            .await
            .unwrap_or(Err(AgentError::Timeout))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Pending,
    Prepared,
    InProgress,
    Complete,
    Error,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StepStatus::Complete | StepStatus::Error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PhaseStatus {
    Pending,
    InProgress,
    Complete,
    Error,
}

/// Execution policy for the steps of a phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// One step at a time, in daemon name order
    Serial,
    /// Every step advances on every tick
    Parallel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSnapshot {
    pub name: String,
    pub daemon: String,
    pub status: StepStatus,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseSnapshot {
    pub name: String,
    pub strategy: Strategy,
    pub status: PhaseStatus,
    pub steps: Vec<StepSnapshot>,
}

/// Drives one node task record to completion.
///
/// `execute` is re-entrant: each call performs at most one transition and a
/// terminal step ignores further calls.
#[derive(Debug)]
pub struct NodeTaskStep {
    name: String,
    daemon: String,
    key: String,
    payload: TaskPayload,
    status: StepStatus,
    record: Option<NodeTaskRecord>,
    message: Option<String>,
}

impl NodeTaskStep {
    pub fn new(operation: OperationKind, daemon: &str, payload: TaskPayload) -> Self {
        Self {
            name: operation.task_name(daemon),
            daemon: daemon.to_string(),
            key: operation.task_key(daemon),
            payload,
            status: StepStatus::Pending,
            record: None,
            message: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn daemon(&self) -> &str {
        &self.daemon
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn status(&self) -> StepStatus {
        self.status
    }

    pub fn record(&self) -> Option<&NodeTaskRecord> {
        self.record.as_ref()
    }

    pub fn snapshot(&self) -> StepSnapshot {
        StepSnapshot {
            name: self.name.clone(),
            daemon: self.daemon.clone(),
            status: self.status,
            message: self.message.clone(),
        }
    }

    pub async fn execute(&mut self, env: &PlanEnv) -> StepStatus {
        let result = match self.status {
            StepStatus::Complete | StepStatus::Error => return self.status,
            StepStatus::Pending => self.prepare(env).await,
            StepStatus::Prepared => self.submit(env).await,
            StepStatus::InProgress => self.poll(env).await,
        };

        if let Err(e) = result {
            error!("Step {} failed: {e}", self.name);
            self.message = Some(e.to_string());
            self.set_status(StepStatus::Error);
        }
        self.status
    }

    fn set_status(&mut self, status: StepStatus) {
        if self.status != status {
            debug!("Step {}: {:?} -> {:?}", self.name, self.status, status);
            self.status = status;
        }
    }

    async fn prepare(&mut self, env: &PlanEnv) -> Result<(), OrchestratorError> {
        let Some(daemon) = env.membership.daemon_by_name(&self.daemon) else {
            warn!(
                "Daemon {} for {} does not exist, nothing to do",
                self.daemon, self.name
            );
            self.message = Some("daemon no longer registered".to_string());
            self.set_status(StepStatus::Complete);
            return Ok(());
        };

        let record = match env.store.get(&self.key).await? {
            Some(bytes) => {
                let record = NodeTaskRecord::decode(&bytes)?;
                info!(
                    "Found existing task {} in state {:?}",
                    record.name, record.state
                );
                record
            }
            None => {
                let record = NodeTaskRecord::create(&daemon, self.payload.clone());
                env.store.put(&self.key, record.encode()?).await?;
                info!("Created task {} for daemon {}", record.name, self.daemon);
                record
            }
        };

        self.set_status(StepStatus::Prepared);
        self.apply_record_state(&record);
        self.record = Some(record);
        Ok(())
    }

    async fn submit(&mut self, env: &PlanEnv) -> Result<(), OrchestratorError> {
        let Some(record) = self.record.clone() else {
            self.set_status(StepStatus::Pending);
            return Ok(());
        };

        match env
            .submit_task(&record.daemon_ref(), &record.description())
            .await
        {
            Ok(SubmitOutcome::Accepted) => {
                info!("Task {} accepted by {}", record.name, record.daemon);
                self.persist(env, record.with_state(NodeTaskState::Running, None))
                    .await?;
            }
            Ok(SubmitOutcome::Rejected(reason)) => {
                warn!("Task {} rejected by {}: {reason}", record.name, record.daemon);
                self.persist(env, record.with_state(NodeTaskState::Failed, Some(reason)))
                    .await?;
            }
            Err(e) => {
                warn!(
                    "Node agent for {} unavailable, submission of {} will be retried: {e}",
                    record.daemon, record.name
                );
                self.message = Some(e.to_string());
            }
        }
        Ok(())
    }

    async fn poll(&mut self, env: &PlanEnv) -> Result<(), OrchestratorError> {
        let Some(record) = self.record.clone() else {
            self.set_status(StepStatus::Pending);
            return Ok(());
        };

        match env.poll_task(&record.daemon_ref(), &record.name).await {
            Ok(status) => {
                if let Some(updated) = record.apply_status(&status) {
                    self.persist(env, updated).await?;
                }
            }
            Err(e) => {
                warn!(
                    "Failed to poll {} on {}, still in progress: {e}",
                    record.name, record.daemon
                );
            }
        }
        Ok(())
    }

    async fn persist(
        &mut self,
        env: &PlanEnv,
        record: NodeTaskRecord,
    ) -> Result<(), OrchestratorError> {
        env.store.put(&self.key, record.encode()?).await?;
        self.apply_record_state(&record);
        self.record = Some(record);
        Ok(())
    }

    fn apply_record_state(&mut self, record: &NodeTaskRecord) {
        if record.message.is_some() {
            self.message = record.message.clone();
        }
        match record.state {
            NodeTaskState::Created => {}
            NodeTaskState::Running => self.set_status(StepStatus::InProgress),
            NodeTaskState::Finished => self.set_status(StepStatus::Complete),
            NodeTaskState::Failed => self.set_status(StepStatus::Error),
        }
    }
}

/// Group of steps covering one operation across the targeted nodes
#[derive(Debug)]
pub struct Phase {
    name: String,
    strategy: Strategy,
    steps: Vec<NodeTaskStep>,
}

impl Phase {
    pub fn new(name: impl Into<String>, strategy: Strategy, mut steps: Vec<NodeTaskStep>) -> Self {
        steps.sort_by(|a, b| a.daemon.cmp(&b.daemon));
        Self {
            name: name.into(),
            strategy,
            steps,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn steps(&self) -> &[NodeTaskStep] {
        &self.steps
    }

    pub fn status(&self) -> PhaseStatus {
        if self
            .steps
            .iter()
            .all(|step| step.status == StepStatus::Complete)
        {
            PhaseStatus::Complete
        } else if self.steps.iter().any(|step| step.status == StepStatus::Error) {
            PhaseStatus::Error
        } else if self
            .steps
            .iter()
            .any(|step| step.status != StepStatus::Pending)
        {
            PhaseStatus::InProgress
        } else {
            PhaseStatus::Pending
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status() == PhaseStatus::Complete
    }

    pub fn snapshot(&self) -> PhaseSnapshot {
        PhaseSnapshot {
            name: self.name.clone(),
            strategy: self.strategy,
            status: self.status(),
            steps: self.steps.iter().map(NodeTaskStep::snapshot).collect(),
        }
    }

    /// Advances the phase by one scheduling tick
    pub async fn execute(&mut self, env: &PlanEnv) -> PhaseStatus {
        match self.strategy {
            Strategy::Serial => self.execute_serial(env).await,
            Strategy::Parallel => {
                join_all(
                    self.steps
                        .iter_mut()
                        .filter(|step| !step.status.is_terminal())
                        .map(|step| step.execute(env)),
                )
                .await;
            }
        }
        self.status()
    }

    async fn execute_serial(&mut self, env: &PlanEnv) {
        loop {
            let Some(step) = self
                .steps
                .iter_mut()
                .find(|step| step.status != StepStatus::Complete)
            else {
                return;
            };

            if step.status == StepStatus::Error {
                debug!(
                    "Phase {} blocked on failed step {}",
                    self.name, step.name
                );
                return;
            }

            // A step that completes within this tick lets the next one start
            if step.execute(env).await != StepStatus::Complete {
                return;
            }
        }
    }
}
