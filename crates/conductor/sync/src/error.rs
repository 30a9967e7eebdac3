//! Error types for locking and routing

use conductor_types::WorkflowId;
use thiserror::Error;

/// Synchronization error type
#[derive(Debug, Error)]
pub enum SyncError {
    /// Lock not acquired within the retry budget
    #[error("Failed to acquire lock on resource '{resource_id}' after {retries} retries")]
    Lock {
        resource_id: String,
        retries: u32,
        /// Workflow holding the lock when the last attempt gave up
        holder: Option<WorkflowId>,
    },

    /// No routing path with this id for the workflow
    #[error("Routing path '{path_id}' not found for workflow {workflow_id}")]
    PathNotFound {
        workflow_id: WorkflowId,
        path_id: String,
    },

    /// A routing path with this id already exists for the workflow
    #[error("Routing path '{path_id}' already exists for workflow {workflow_id}")]
    DuplicatePath {
        workflow_id: WorkflowId,
        path_id: String,
    },

    /// A routing condition that can never be evaluated
    #[error("Invalid routing condition in rule '{rule_id}': {reason}")]
    InvalidCondition { rule_id: String, reason: String },
}

/// Result type for synchronization operations
pub type Result<T> = std::result::Result<T, SyncError>;

impl SyncError {
    pub fn is_lock_error(&self) -> bool {
        matches!(self, Self::Lock { .. })
    }
}
