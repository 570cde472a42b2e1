use crate::orchestrator::node_task::TaskPayload;
use crate::orchestrator::operations::{KeyspaceContext, KeyspaceOperation, KeyspaceRequest};
use crate::orchestrator::request::OperationKind;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Compaction;

impl KeyspaceOperation for Compaction {
    const OPERATION: OperationKind = OperationKind::Compact;

    fn payload(key_spaces: Vec<String>, column_families: Vec<String>) -> TaskPayload {
        TaskPayload::Compact {
            key_spaces,
            column_families,
        }
    }
}

/// Operator request for cluster-wide compaction
pub type CompactRequest = KeyspaceRequest<Compaction>;

pub type CompactContext = KeyspaceContext<Compaction>;
