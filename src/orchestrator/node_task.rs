use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::orchestrator::membership::DaemonRef;
use crate::orchestrator::request::OperationKind;

/// Per-node task description, one variant per operation class
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskPayload {
    Compact {
        key_spaces: Vec<String>,
        column_families: Vec<String>,
    },
    Cleanup {
        key_spaces: Vec<String>,
        column_families: Vec<String>,
    },
}

impl TaskPayload {
    pub fn operation(&self) -> OperationKind {
        match self {
            TaskPayload::Compact { .. } => OperationKind::Compact,
            TaskPayload::Cleanup { .. } => OperationKind::Cleanup,
        }
    }
}

/// Last known execution state of a node task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeTaskState {
    Created,
    Running,
    Finished,
    Failed,
}

impl NodeTaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, NodeTaskState::Finished | NodeTaskState::Failed)
    }
}

/// State reported by a node agent for a submitted task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemoteTaskState {
    Running,
    Finished,
    Failed,
}

impl From<RemoteTaskState> for NodeTaskState {
    fn from(state: RemoteTaskState) -> Self {
        match state {
            RemoteTaskState::Running => NodeTaskState::Running,
            RemoteTaskState::Finished => NodeTaskState::Finished,
            RemoteTaskState::Failed => NodeTaskState::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeTaskStatus {
    pub task_id: Uuid,
    pub state: RemoteTaskState,
    #[serde(default)]
    pub message: Option<String>,
}

/// What the node agent receives on submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDescription {
    pub name: String,
    pub task_id: Uuid,
    pub payload: TaskPayload,
}

/// Persisted description of one node's share of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeTaskRecord {
    pub name: String,
    pub operation: OperationKind,
    pub daemon: String,
    pub hostname: String,
    pub api_port: u16,
    pub task_id: Uuid,
    pub payload: TaskPayload,
    pub state: NodeTaskState,
    #[serde(default)]
    pub message: Option<String>,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

impl NodeTaskRecord {
    pub fn create(daemon: &DaemonRef, payload: TaskPayload) -> Self {
        let operation = payload.operation();
        Self {
            name: operation.task_name(&daemon.name),
            operation,
            daemon: daemon.name.clone(),
            hostname: daemon.hostname.clone(),
            api_port: daemon.api_port,
            task_id: Uuid::new_v4(),
            payload,
            state: NodeTaskState::Created,
            message: None,
            version: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn key(&self) -> String {
        self.operation.task_key(&self.daemon)
    }

    /// Agent address captured when the record was created
    pub fn daemon_ref(&self) -> DaemonRef {
        DaemonRef::new(self.daemon.clone(), self.hostname.clone(), self.api_port)
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn description(&self) -> TaskDescription {
        TaskDescription {
            name: self.name.clone(),
            task_id: self.task_id,
            payload: self.payload.clone(),
        }
    }

    pub fn with_state(&self, state: NodeTaskState, message: Option<String>) -> Self {
        Self {
            state,
            message: message.or_else(|| self.message.clone()),
            version: self.version + 1,
            updated_at: Utc::now(),
            ..self.clone()
        }
    }

    /// Applies an agent status report. Returns `None` when the report belongs to
    /// another submission or does not change the record.
    pub fn apply_status(&self, status: &NodeTaskStatus) -> Option<Self> {
        if status.task_id != self.task_id {
            log::debug!(
                "Ignoring status for task id {} on {}, tracking {}",
                status.task_id,
                self.name,
                self.task_id
            );
            return None;
        }

        let state = NodeTaskState::from(status.state);
        if state == self.state && status.message == self.message {
            return None;
        }
        Some(self.with_state(state, status.message.clone()))
    }
}
