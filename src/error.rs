use thiserror::Error;

/// Errors surfaced by the orchestration engine to its callers
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Node agent for {node} unavailable: {reason}")]
    RemoteUnavailable { node: String, reason: String },

    #[error("Task store error: {0}")]
    Store(#[from] StoreError),

    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl OrchestratorError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

/// Failures of the task store backend
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Connection pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("Postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Failures of a single call to a node agent
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Node agent replied with status {0}")]
    Status(u16),

    #[error("Failed to decode node agent response: {0}")]
    Decode(String),

    #[error("Timed out waiting for node agent")]
    Timeout,

    #[error("Node agent unreachable: {0}")]
    Unreachable(String),
}

impl From<serde_json::Error> for AgentError {
    fn from(error: serde_json::Error) -> Self {
        AgentError::Decode(error.to_string())
    }
}
