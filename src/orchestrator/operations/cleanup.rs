use crate::orchestrator::node_task::TaskPayload;
use crate::orchestrator::operations::{KeyspaceContext, KeyspaceOperation, KeyspaceRequest};
use crate::orchestrator::request::OperationKind;

/// Removes data a node no longer owns
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cleanup;

impl KeyspaceOperation for Cleanup {
    const OPERATION: OperationKind = OperationKind::Cleanup;

    fn payload(key_spaces: Vec<String>, column_families: Vec<String>) -> TaskPayload {
        TaskPayload::Cleanup {
            key_spaces,
            column_families,
        }
    }
}

pub type CleanupRequest = KeyspaceRequest<Cleanup>;

pub type CleanupContext = KeyspaceContext<Cleanup>;
