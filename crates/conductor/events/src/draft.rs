//! Caller-supplied event fields and the family validators.
//!
//! A draft carries only the variant payload. The emitter wraps it in a fresh
//! envelope, runs the family validator and only then builds the typed event.
//! Fields that a family requires are `Option` here so that a missing value
//! is a validation error rather than a construction error.

use conductor_types::{
    Agent, AgentEventType, ControlEventType, StepEventType, StepId, Task, TaskEventType,
    TaskStatus, WorkflowId,
};
use serde::{Deserialize, Serialize};

/// Payload of a step event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepEventDraft {
    #[serde(rename = "type")]
    pub kind: StepEventType,
    pub step_id: Option<StepId>,
    pub agent: Option<Agent>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl StepEventDraft {
    pub fn new(kind: StepEventType, step_id: StepId) -> Self {
        Self {
            kind,
            step_id: Some(step_id),
            agent: None,
            result: None,
            error: None,
        }
    }

    /// A draft with no step id. Always rejected by validation.
    pub fn unbound(kind: StepEventType) -> Self {
        Self {
            kind,
            step_id: None,
            agent: None,
            result: None,
            error: None,
        }
    }

    pub fn with_agent(mut self, agent: Agent) -> Self {
        self.agent = Some(agent);
        self
    }

    pub fn with_result(mut self, result: serde_json::Value) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Payload of a control event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlEventDraft {
    #[serde(rename = "type")]
    pub kind: ControlEventType,
    pub error: Option<String>,
    pub context: Option<serde_json::Value>,
}

impl ControlEventDraft {
    pub fn new(kind: ControlEventType) -> Self {
        Self {
            kind,
            error: None,
            context: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }
}

/// Payload of an agent event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentEventDraft {
    #[serde(rename = "type")]
    pub kind: AgentEventType,
    pub step_id: Option<StepId>,
    pub agent: Option<Agent>,
}

impl AgentEventDraft {
    pub fn new(kind: AgentEventType, step_id: StepId, agent: Agent) -> Self {
        Self {
            kind,
            step_id: Some(step_id),
            agent: Some(agent),
        }
    }
}

/// Payload of a task event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskEventDraft {
    #[serde(rename = "type")]
    pub kind: TaskEventType,
    pub task: Option<Task>,
    /// Defaults to the task's own status.
    pub status: Option<TaskStatus>,
    pub previous_status: Option<TaskStatus>,
    pub error: Option<String>,
}

impl TaskEventDraft {
    pub fn new(kind: TaskEventType, task: Task) -> Self {
        Self {
            kind,
            status: Some(task.status),
            task: Some(task),
            previous_status: None,
            error: None,
        }
    }

    pub fn with_transition(mut self, previous: TaskStatus, status: TaskStatus) -> Self {
        self.previous_status = Some(previous);
        self.status = Some(status);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

// ── Validators ───────────────────────────────────────────────────────

fn validate_envelope(workflow_id: &WorkflowId, source: &str, errors: &mut Vec<String>) {
    if workflow_id.as_str().trim().is_empty() {
        errors.push("workflowId is required".to_string());
    }
    if source.trim().is_empty() {
        errors.push("metadata.source is required".to_string());
    }
}

fn require_error(kind: &str, error: &Option<String>, errors: &mut Vec<String>) {
    if error.as_deref().map_or(true, |e| e.trim().is_empty()) {
        errors.push(format!("'{kind}' events require an error message"));
    }
}

/// Violations in a step event; empty when valid.
pub fn validate_step(workflow_id: &WorkflowId, source: &str, draft: &StepEventDraft) -> Vec<String> {
    let mut errors = Vec::new();
    validate_envelope(workflow_id, source, &mut errors);

    match &draft.step_id {
        None => errors.push("stepId is required".to_string()),
        Some(id) if id.is_empty() => errors.push("stepId must not be empty".to_string()),
        Some(_) => {}
    }
    if draft.kind == StepEventType::Error {
        require_error(draft.kind.as_str(), &draft.error, &mut errors);
    }
    errors
}

/// Violations in a control event; empty when valid.
pub fn validate_control(
    workflow_id: &WorkflowId,
    source: &str,
    draft: &ControlEventDraft,
) -> Vec<String> {
    let mut errors = Vec::new();
    validate_envelope(workflow_id, source, &mut errors);

    if draft.kind == ControlEventType::WorkflowError {
        require_error(draft.kind.as_str(), &draft.error, &mut errors);
    }
    errors
}

/// Violations in an agent event; empty when valid.
pub fn validate_agent(
    workflow_id: &WorkflowId,
    source: &str,
    draft: &AgentEventDraft,
) -> Vec<String> {
    let mut errors = Vec::new();
    validate_envelope(workflow_id, source, &mut errors);

    match &draft.step_id {
        None => errors.push("stepId is required".to_string()),
        Some(id) if id.is_empty() => errors.push("stepId must not be empty".to_string()),
        Some(_) => {}
    }
    match &draft.agent {
        None => errors.push("agent is required".to_string()),
        Some(agent) if agent.id.as_str().trim().is_empty() => {
            errors.push("agent.id must not be empty".to_string())
        }
        Some(_) => {}
    }
    errors
}

/// Violations in a task event; empty when valid.
pub fn validate_task(workflow_id: &WorkflowId, source: &str, draft: &TaskEventDraft) -> Vec<String> {
    let mut errors = Vec::new();
    validate_envelope(workflow_id, source, &mut errors);

    match &draft.task {
        None => errors.push("task is required".to_string()),
        Some(task) if task.id.as_str().trim().is_empty() => {
            errors.push("task.id must not be empty".to_string())
        }
        Some(_) => {}
    }
    if draft.kind == TaskEventType::StatusChange && draft.status.is_none() {
        errors.push("'status_change' events require a status".to_string());
    }
    if draft.kind == TaskEventType::Error {
        require_error(draft.kind.as_str(), &draft.error, &mut errors);
    }
    errors
}
