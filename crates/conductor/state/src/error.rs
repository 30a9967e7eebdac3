//! Error types for conductor-state.

use conductor_types::{SnapshotId, WorkflowId};
use conductor_validation::ValidationError;
use thiserror::Error;

/// Errors that can occur during state store operations.
#[derive(Debug, Error)]
pub enum StateError {
    /// No state is held for the workflow.
    #[error("workflow not found: {0}")]
    WorkflowNotFound(WorkflowId),

    /// Snapshot not found, or it belongs to another workflow.
    #[error("snapshot not found: {0}")]
    SnapshotNotFound(SnapshotId),

    /// No snapshot satisfies the restore strategy.
    #[error("no snapshot of {workflow_id} matches {strategy}")]
    NoMatchingSnapshot {
        workflow_id: WorkflowId,
        strategy: String,
    },

    /// The state failed validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Snapshot contents do not match their integrity hash.
    #[error("integrity check failed: expected {expected}, got {actual}")]
    IntegrityCheckFailed { expected: String, actual: String },

    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StateError {
    /// Whether the error means an unknown workflow or snapshot was referenced
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::WorkflowNotFound(_) | Self::SnapshotNotFound(_) | Self::NoMatchingSnapshot { .. }
        )
    }
}

impl From<serde_json::Error> for StateError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result type for state operations.
pub type Result<T> = std::result::Result<T, StateError>;
