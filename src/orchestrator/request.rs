use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::Debug;

use crate::orchestrator::membership::NodeMembership;
use crate::orchestrator::node_task::TaskPayload;
use crate::orchestrator::plan::Strategy;
use crate::{ALL_NODES, CONTEXT_KEY_PREFIX, OPERATION_CLEANUP, OPERATION_COMPACT, TASK_KEY_PREFIX};

/// A class of fleet-wide maintenance operation. Each class owns a disjoint
/// key namespace in the task store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Compact,
    Cleanup,
}

impl OperationKind {
    pub fn name(&self) -> &'static str {
        match self {
            OperationKind::Compact => OPERATION_COMPACT,
            OperationKind::Cleanup => OPERATION_CLEANUP,
        }
    }

    pub fn phase_name(&self) -> &'static str {
        match self {
            OperationKind::Compact => "Compact",
            OperationKind::Cleanup => "Cleanup",
        }
    }

    pub fn task_prefix(&self) -> String {
        format!("{}-", self.name())
    }

    /// Deterministic name of the node task this operation runs on `daemon`
    pub fn task_name(&self, daemon: &str) -> String {
        format!("{}{daemon}", self.task_prefix())
    }

    pub fn task_key(&self, daemon: &str) -> String {
        format!("{TASK_KEY_PREFIX}{}", self.task_name(daemon))
    }

    pub fn task_key_prefix(&self) -> String {
        format!("{TASK_KEY_PREFIX}{}", self.task_prefix())
    }

    pub fn context_key(&self) -> String {
        format!("{CONTEXT_KEY_PREFIX}{}", self.name())
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Immutable, resolved description of one maintenance run
pub trait MaintenanceContext:
    Clone + PartialEq + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Resolved daemon names, sorted and without duplicates
    fn target_nodes(&self) -> &[String];

    /// Task description handed to every targeted node agent
    fn task_payload(&self) -> TaskPayload;
}

/// Operator input for one operation class
pub trait MaintenanceRequest: Debug + Send + Sync + 'static {
    type Context: MaintenanceContext;

    const OPERATION: OperationKind;

    fn strategy() -> Strategy {
        Strategy::Serial
    }

    /// Syntactic check, before membership is consulted
    fn is_valid(&self) -> bool;

    fn to_context(&self, membership: &dyn NodeMembership) -> Self::Context;
}

/// Resolves an operator node selector against current membership.
///
/// A lone `"*"` expands to every registered daemon. Named daemons that are not
/// registered are dropped without error.
pub fn resolve_nodes(requested: &[String], membership: &dyn NodeMembership) -> Vec<String> {
    let registered = membership.current_daemon_names();
    if requested.len() == 1 && requested[0] == ALL_NODES {
        return registered.into_iter().collect();
    }

    let resolved: BTreeSet<String> = requested
        .iter()
        .filter(|node| {
            let known = registered.contains(node.as_str());
            if !known {
                log::info!("Dropping unregistered node {node} from request");
            }
            known
        })
        .cloned()
        .collect();
    resolved.into_iter().collect()
}
