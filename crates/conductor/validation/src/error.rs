//! Validation error types

use conductor_types::StepId;
use thiserror::Error;

/// A structural violation in a step configuration or workflow state.
///
/// Every list-carrying variant holds *all* violations of its category, not
/// just the first one found.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("workflow has no steps")]
    NoSteps,

    #[error("missing required fields: {}", .0.join("; "))]
    RequiredFields(Vec<String>),

    #[error("duplicate step ids: {}", .0.join(", "))]
    DuplicateStepIds(Vec<String>),

    #[error("invalid priorities: {}", .0.join("; "))]
    Priority(Vec<String>),

    #[error("invalid resources: {}", .0.join("; "))]
    Resources(Vec<String>),

    #[error("invalid timeout or retry settings: {}", .0.join("; "))]
    Timing(Vec<String>),

    #[error("invalid dependencies: {}", .0.join("; "))]
    Dependencies(Vec<String>),

    #[error("circular dependency detected (reached step '{at}' again while resolving it)")]
    Cycle { at: StepId },

    #[error("aggregate resource limits exceeded: {}", .0.join("; "))]
    AggregateResources(Vec<String>),

    #[error("invalid workflow state: {}", .0.join("; "))]
    State(Vec<String>),
}

impl ValidationError {
    /// Individual violation messages
    pub fn violations(&self) -> Vec<String> {
        match self {
            Self::NoSteps => vec![self.to_string()],
            Self::Cycle { .. } => vec![self.to_string()],
            Self::RequiredFields(v)
            | Self::DuplicateStepIds(v)
            | Self::Priority(v)
            | Self::Resources(v)
            | Self::Timing(v)
            | Self::Dependencies(v)
            | Self::AggregateResources(v)
            | Self::State(v) => v.clone(),
        }
    }
}

/// Result type for validation
pub type Result<T> = std::result::Result<T, ValidationError>;
