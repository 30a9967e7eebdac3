//! Error types for the workflow manager

use conductor_events::EventError;
use conductor_state::StateError;
use conductor_sync::SyncError;
use conductor_types::{StepId, TaskId, WorkflowId, WorkflowStatus};
use conductor_validation::ValidationError;
use thiserror::Error;

/// Workflow manager error type
#[derive(Debug, Error)]
pub enum EngineError {
    /// Step configuration or state shape rejected
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// State store failure
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Event rejected by its family validator
    #[error("Event error: {0}")]
    Event(#[from] EventError),

    /// Lock or routing failure
    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    /// A step executor failed
    #[error("Step '{step_id}' failed: {message}")]
    Execution { step_id: StepId, message: String },

    /// The task backend rejected a request
    #[error("Task '{task_id}' failed: {message}")]
    TaskFailed { task_id: TaskId, message: String },

    /// No workflow with this id
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(WorkflowId),

    /// The workflow has no executable sequence; initialize it first
    #[error("Workflow not initialized: {0}")]
    NotInitialized(WorkflowId),

    /// Status change not allowed from the current status
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition {
        from: WorkflowStatus,
        to: WorkflowStatus,
    },

    /// The step index does not point at a step
    #[error("Workflow {0} has no current step")]
    NoCurrentStep(WorkflowId),

    /// The definition has no step with an executor
    #[error("No executable steps for workflow {0}")]
    NoExecutableSteps(WorkflowId),

    #[error("Step not found: {0}")]
    StepNotFound(StepId),

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl EngineError {
    /// Short category name used in error records and reports
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::State(e) if e.is_not_found() => "not_found",
            Self::State(_) => "state_error",
            Self::Event(_) => "event_error",
            Self::Sync(e) if e.is_lock_error() => "lock_error",
            Self::Sync(_) => "routing_error",
            Self::Execution { .. } => "execution_error",
            Self::TaskFailed { .. } => "task_error",
            Self::WorkflowNotFound(_)
            | Self::StepNotFound(_)
            | Self::TaskNotFound(_) => "not_found",
            Self::NotInitialized(_) => "not_initialized",
            Self::InvalidTransition { .. } | Self::NoCurrentStep(_) => "invalid_transition",
            Self::NoExecutableSteps(_) => "no_executable_steps",
            Self::Config(_) => "config_error",
        }
    }

    /// Whether the error means an unknown workflow, step, task or snapshot
    pub fn is_not_found(&self) -> bool {
        self.kind() == "not_found"
    }
}

/// Result type for workflow manager operations
pub type Result<T> = std::result::Result<T, EngineError>;
