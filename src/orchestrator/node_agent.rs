use async_trait::async_trait;
use std::time::Duration;

use crate::error::AgentError;
use crate::orchestrator::membership::DaemonRef;
use crate::orchestrator::metrics::{MetricKind, MetricValue};
use crate::orchestrator::node_task::{NodeTaskStatus, TaskDescription};

/// Result of handing a task description to a node agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted,
    Rejected(String),
}

/// Remote control interface of the per-node agent
#[async_trait]
pub trait NodeAgent: Send + Sync {
    async fn submit(
        &self,
        daemon: &DaemonRef,
        task: &TaskDescription,
    ) -> Result<SubmitOutcome, AgentError>;

    async fn task_status(
        &self,
        daemon: &DaemonRef,
        task_name: &str,
    ) -> Result<NodeTaskStatus, AgentError>;

    async fn metric(&self, daemon: &DaemonRef, kind: &MetricKind)
        -> Result<MetricValue, AgentError>;
}

/// Terminates the daemon task on a node. The node's supervisor relaunches
/// it in place, so a kill amounts to a restart.
#[async_trait]
pub trait TaskKiller: Send + Sync {
    async fn kill(&self, daemon: &DaemonRef) -> Result<(), AgentError>;
}

/// Node agent reached over plain HTTP/JSON
#[derive(Clone)]
pub struct HttpNodeAgent {
    client: reqwest::Client,
}

impl HttpNodeAgent {
    pub fn new(request_timeout: Duration) -> Result<Self, AgentError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn task_url(daemon: &DaemonRef, task_name: &str) -> String {
        format!("{}/v1/tasks/{task_name}", daemon.agent_base_url())
    }
}

#[async_trait]
impl NodeAgent for HttpNodeAgent {
    async fn submit(
        &self,
        daemon: &DaemonRef,
        task: &TaskDescription,
    ) -> Result<SubmitOutcome, AgentError> {
        let url = Self::task_url(daemon, &task.name);
        log::debug!("Submitting task {} ({}) to {url}", task.name, task.task_id);

        let response = self.client.put(&url).json(task).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(SubmitOutcome::Accepted);
        }

        if status.is_client_error() {
            let reason = response.text().await.unwrap_or_default();
            log::warn!(
                "Node agent for {} rejected task {}: status = {status}, reason = {reason}",
                daemon.name,
                task.name
            );
            return Ok(SubmitOutcome::Rejected(if reason.is_empty() {
                status.to_string()
            } else {
                reason
            }));
        }

        log::error!("Put request failed: url = {url}, status = {status}");
        Err(AgentError::Status(status.as_u16()))
    }

    async fn task_status(
        &self,
        daemon: &DaemonRef,
        task_name: &str,
    ) -> Result<NodeTaskStatus, AgentError> {
        let url = Self::task_url(daemon, task_name);
        log::debug!("Executing get: url = {url}");

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            log::error!("Get request failed: url = {url}, status = {status}");
            return Err(AgentError::Status(status.as_u16()));
        }

        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn metric(
        &self,
        daemon: &DaemonRef,
        kind: &MetricKind,
    ) -> Result<MetricValue, AgentError> {
        let url = format!("{}{}", daemon.agent_base_url(), kind.path());
        log::debug!("Executing get: url = {url}");

        let response = self.client.get(&url).query(&kind.query()).send().await?;
        let status = response.status();
        if !status.is_success() {
            log::error!("Get request failed: url = {url}, status = {status}");
            return Err(AgentError::Status(status.as_u16()));
        }

        let body = response.bytes().await?;
        Ok(MetricValue::decode(kind.shape(), &body)?)
    }
}

#[async_trait]
impl TaskKiller for HttpNodeAgent {
    async fn kill(&self, daemon: &DaemonRef) -> Result<(), AgentError> {
        let url = format!("{}/v1/daemon/restart", daemon.agent_base_url());
        log::info!("Restarting daemon {}: url = {url}", daemon.name);

        let response = self.client.put(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            log::error!("Put request failed: url = {url}, status = {status}");
            return Err(AgentError::Status(status.as_u16()));
        }
        Ok(())
    }
}
