//! Core data model for the Conductor workflow orchestration core.
//!
//! Every other Conductor crate speaks in these types:
//!
//! - [`WorkflowState`] and its partial-update form [`StateUpdate`]
//! - [`StepConfig`] / [`StepResult`] for step definitions and outcomes
//! - [`Task`] and [`Agent`], the units exchanged with external collaborators
//! - [`WorkflowEvent`], the four-family event sum type
//! - [`RoutingPath`] / [`RoutingRule`] for conditional step transitions
//! - [`WorkflowLock`] for advisory locking

#![deny(unsafe_code)]

pub mod event;
pub mod ids;
pub mod lock;
pub mod routing;
pub mod state;
pub mod step;
pub mod task;

pub use event::{
    AgentEvent, AgentEventType, ControlEvent, ControlEventType, EventEnvelope, EventFamily,
    EventMetadata, EventMetrics, EventValidation, StepEvent, StepEventType, TaskEvent,
    TaskEventType, WorkflowEvent,
};
pub use ids::{AgentId, EventId, LockId, SnapshotId, StepId, TaskId, WorkflowId};
pub use lock::{LockType, WorkflowLock};
pub use routing::{ConditionOperator, RoutingCondition, RoutingDecision, RoutingPath, RoutingRule};
pub use state::{
    CostDetails, ErrorRecord, MetadataPatch, PerformanceMetrics, ResourceMetrics, StateUpdate,
    UsageMetrics, WorkflowMetadata, WorkflowMetrics, WorkflowState, WorkflowStatus,
};
pub use step::{RetryPolicy, StepConfig, StepMetrics, StepResources, StepResult, StepStatus};
pub use task::{Agent, AgentStatus, Task, TaskPhase, TaskStatus};
