pub mod cluster_task_manager;
pub mod config;
pub mod db;
pub mod driver;
pub mod engine;
pub mod fleet_view;
pub mod membership;
pub mod metrics;
pub mod node_agent;
pub mod node_task;
pub mod operations;
pub mod plan;
pub mod request;
pub mod startup;
pub mod task_store;

// Re-export commonly used items
pub use cluster_task_manager::{ClusterTaskManager, ManagedOperation, RunResponse, RunStatus};
pub use config::OrchestratorConfig;
pub use driver::PlanDriver;
pub use engine::Engine;
pub use fleet_view::{FleetStatusClient, FleetView};
pub use membership::{DaemonInfo, DaemonRef, NodeMembership, StaticMembership};
pub use node_agent::{HttpNodeAgent, NodeAgent, TaskKiller};
pub use operations::{CleanupRequest, CompactRequest};
pub use plan::{Phase, PlanEnv, Strategy};
pub use startup::{OrchestratorBuilder, OrchestratorInstance, RunningOrchestratorInstance};
pub use task_store::{MemoryTaskStore, PgTaskStore, TaskStore};
