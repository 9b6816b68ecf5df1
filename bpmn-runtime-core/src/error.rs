use crate::types::{NodeInstanceId, NodeInstanceState};
use uuid::Uuid;

/// Errors surfaced by the runtime.
///
/// A boundary whose host is gone is not an error: that is the ordinary
/// teardown path and is reported as `SignalOutcome::Cancelled`.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("Unknown node: {0}")]
    UnknownNode(String),

    #[error("Unknown node instance: {0}")]
    UnknownNodeInstance(NodeInstanceId),

    #[error("Unknown process instance: {0}")]
    UnknownProcessInstance(Uuid),

    #[error("Cannot {action} node instance {id} in state {from}")]
    IllegalTransition {
        id: NodeInstanceId,
        from: NodeInstanceState,
        action: &'static str,
    },

    /// Process state is corrupted. Never recoverable.
    #[error("Internal consistency violation: {0}")]
    Inconsistent(String),

    #[error("Unresolved variable: {0}")]
    UnresolvedVariable(String),

    #[error("Invalid process definition: {0}")]
    InvalidDefinition(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Worker pool error: {0}")]
    Worker(String),

    #[error("Audit sink error: {0}")]
    Sink(#[from] anyhow::Error),
}

pub type Result<T, E = FlowError> = std::result::Result<T, E>;
