//! Keyspace-scoped maintenance operations.
//!
//! Compaction and cleanup take the same operator input: a node selector plus
//! optional key space and column family filters. Each operation only names
//! its class and the payload its node agents receive.

use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::marker::PhantomData;

use crate::orchestrator::membership::NodeMembership;
use crate::orchestrator::node_task::TaskPayload;
use crate::orchestrator::request::{
    resolve_nodes, MaintenanceContext, MaintenanceRequest, OperationKind,
};

pub mod cleanup;
pub mod compact;

pub use cleanup::{Cleanup, CleanupContext, CleanupRequest};
pub use compact::{Compaction, CompactContext, CompactRequest};

/// Per-operation part of a keyspace-scoped request
pub trait KeyspaceOperation:
    Debug + Clone + Copy + Default + PartialEq + Eq + Send + Sync + 'static
{
    const OPERATION: OperationKind;

    fn payload(key_spaces: Vec<String>, column_families: Vec<String>) -> TaskPayload;
}

/// Operator request targeting key spaces on a set of nodes.
///
/// Empty `key_spaces` selects every non-system key space; empty
/// `column_families` selects every column family of the chosen key spaces.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyspaceRequest<O> {
    #[serde(default)]
    pub nodes: Vec<String>,
    #[serde(default)]
    pub key_spaces: Vec<String>,
    #[serde(default)]
    pub column_families: Vec<String>,
    #[serde(skip)]
    pub operation: PhantomData<O>,
}

impl<O> KeyspaceRequest<O> {
    pub fn new(nodes: Vec<String>, key_spaces: Vec<String>, column_families: Vec<String>) -> Self {
        Self {
            nodes,
            key_spaces,
            column_families,
            operation: PhantomData,
        }
    }

    /// Every key space on every node
    pub fn all_nodes() -> Self {
        Self::new(vec![crate::ALL_NODES.to_string()], Vec::new(), Vec::new())
    }
}

impl<O: KeyspaceOperation> MaintenanceRequest for KeyspaceRequest<O> {
    type Context = KeyspaceContext<O>;

    const OPERATION: OperationKind = O::OPERATION;

    fn is_valid(&self) -> bool {
        !self.nodes.is_empty()
    }

    fn to_context(&self, membership: &dyn NodeMembership) -> KeyspaceContext<O> {
        KeyspaceContext {
            nodes: resolve_nodes(&self.nodes, membership),
            key_spaces: self.key_spaces.clone(),
            column_families: self.column_families.clone(),
            operation: PhantomData,
        }
    }
}

/// Persisted form of a [`KeyspaceRequest`] after node resolution
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyspaceContext<O> {
    #[serde(default)]
    pub nodes: Vec<String>,
    #[serde(default)]
    pub key_spaces: Vec<String>,
    #[serde(default)]
    pub column_families: Vec<String>,
    #[serde(skip)]
    pub operation: PhantomData<O>,
}

impl<O: KeyspaceOperation> MaintenanceContext for KeyspaceContext<O> {
    fn target_nodes(&self) -> &[String] {
        &self.nodes
    }

    fn task_payload(&self) -> TaskPayload {
        O::payload(self.key_spaces.clone(), self.column_families.clone())
    }
}
