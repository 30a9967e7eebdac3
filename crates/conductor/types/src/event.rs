//! Workflow events
//!
//! Events are immutable audit records created at the moment of a
//! state-changing action. There are four families, modelled as the
//! [`WorkflowEvent`] sum type; every family shares an [`EventEnvelope`].

use crate::ids::{EventId, StepId, WorkflowId};
use crate::task::{Agent, Task, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Event Types ──────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepEventType {
    Start,
    Complete,
    Error,
    Skip,
}

impl StepEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Complete => "complete",
            Self::Error => "error",
            Self::Skip => "skip",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlEventType {
    Start,
    Pause,
    Resume,
    Stop,
    Reset,
    WorkflowError,
}

impl ControlEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Stop => "stop",
            Self::Reset => "reset",
            Self::WorkflowError => "workflow_error",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentEventType {
    Assign,
    Unassign,
    Reassign,
}

impl AgentEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Assign => "assign",
            Self::Unassign => "unassign",
            Self::Reassign => "reassign",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskEventType {
    Add,
    StatusChange,
    Error,
}

impl TaskEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::StatusChange => "status_change",
            Self::Error => "error",
        }
    }
}

/// The four event families
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventFamily {
    Step,
    Control,
    Agent,
    Task,
}

impl EventFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Step => "step",
            Self::Control => "control",
            Self::Agent => "agent",
            Self::Task => "task",
        }
    }
}

impl std::fmt::Display for EventFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Envelope ─────────────────────────────────────────────────────────

/// Correlation data threaded through related events
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
    /// Ties the event to its workflow instance
    pub correlation_id: String,
    /// Unique to this emission
    pub causation_id: String,
    /// Component that raised the event
    pub source: String,
}

impl EventMetadata {
    pub fn new(workflow_id: &WorkflowId, source: impl Into<String>) -> Self {
        Self {
            correlation_id: workflow_id.to_string(),
            causation_id: Uuid::new_v4().to_string(),
            source: source.into(),
        }
    }
}

/// Delivery figures filled in by the emitter
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetrics {
    pub handler_count: usize,
    pub failed_handlers: usize,
    pub processing_time_ms: f64,
}

/// Outcome of family validation
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventValidation {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub validated_at: Option<DateTime<Utc>>,
}

/// Fields common to every event
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub id: EventId,
    pub workflow_id: WorkflowId,
    pub timestamp: DateTime<Utc>,
    pub metadata: EventMetadata,
    pub metrics: EventMetrics,
    pub validation: EventValidation,
}

impl EventEnvelope {
    /// A fresh envelope with new ids, zeroed metrics and an empty validation block
    pub fn new(workflow_id: WorkflowId, source: impl Into<String>) -> Self {
        let metadata = EventMetadata::new(&workflow_id, source);
        Self {
            id: EventId::generate(),
            workflow_id,
            timestamp: Utc::now(),
            metadata,
            metrics: EventMetrics::default(),
            validation: EventValidation::default(),
        }
    }
}

// ── Families ─────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepEvent {
    pub envelope: EventEnvelope,
    #[serde(rename = "type")]
    pub kind: StepEventType,
    pub step_id: StepId,
    pub agent: Option<Agent>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlEvent {
    pub envelope: EventEnvelope,
    #[serde(rename = "type")]
    pub kind: ControlEventType,
    pub error: Option<String>,
    pub context: Option<serde_json::Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentEvent {
    pub envelope: EventEnvelope,
    #[serde(rename = "type")]
    pub kind: AgentEventType,
    pub step_id: StepId,
    pub agent: Agent,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskEvent {
    pub envelope: EventEnvelope,
    #[serde(rename = "type")]
    pub kind: TaskEventType,
    pub task: Task,
    pub status: TaskStatus,
    pub previous_status: Option<TaskStatus>,
    pub error: Option<String>,
}

/// Any workflow event
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "lowercase")]
pub enum WorkflowEvent {
    Step(StepEvent),
    Control(ControlEvent),
    Agent(AgentEvent),
    Task(TaskEvent),
}

impl WorkflowEvent {
    pub fn envelope(&self) -> &EventEnvelope {
        match self {
            Self::Step(e) => &e.envelope,
            Self::Control(e) => &e.envelope,
            Self::Agent(e) => &e.envelope,
            Self::Task(e) => &e.envelope,
        }
    }

    pub fn family(&self) -> EventFamily {
        match self {
            Self::Step(_) => EventFamily::Step,
            Self::Control(_) => EventFamily::Control,
            Self::Agent(_) => EventFamily::Agent,
            Self::Task(_) => EventFamily::Task,
        }
    }

    /// Family-local type name, e.g. `complete` or `workflow_error`
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Step(e) => e.kind.as_str(),
            Self::Control(e) => e.kind.as_str(),
            Self::Agent(e) => e.kind.as_str(),
            Self::Task(e) => e.kind.as_str(),
        }
    }

    pub fn workflow_id(&self) -> &WorkflowId {
        &self.envelope().workflow_id
    }
}

impl From<StepEvent> for WorkflowEvent {
    fn from(e: StepEvent) -> Self {
        Self::Step(e)
    }
}

impl From<ControlEvent> for WorkflowEvent {
    fn from(e: ControlEvent) -> Self {
        Self::Control(e)
    }
}

impl From<AgentEvent> for WorkflowEvent {
    fn from(e: AgentEvent) -> Self {
        Self::Agent(e)
    }
}

impl From<TaskEvent> for WorkflowEvent {
    fn from(e: TaskEvent) -> Self {
        Self::Task(e)
    }
}
