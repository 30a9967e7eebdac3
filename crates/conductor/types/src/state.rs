//! Workflow state: the authoritative record of one workflow instance
//!
//! [`WorkflowState`] is owned by the state store. Callers change it through
//! [`StateUpdate`], a partial update that is shallow-merged into the current
//! state (metadata is merged one level deeper).

use crate::ids::{StepId, TaskId, WorkflowId};
use crate::step::{StepConfig, StepResult};
use crate::task::{Agent, Task, TaskPhase};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

// ── Status ───────────────────────────────────────────────────────────

/// Lifecycle status of a workflow
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    #[default]
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
}

impl WorkflowStatus {
    pub const ALL: [WorkflowStatus; 5] = [
        Self::Pending,
        Self::Running,
        Self::Paused,
        Self::Completed,
        Self::Failed,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether the orchestrator may move a workflow from `self` to `next`
    pub fn can_transition_to(&self, next: WorkflowStatus) -> bool {
        use WorkflowStatus::*;
        match (self, next) {
            (Pending, Running | Failed) => true,
            (Running, Paused | Completed | Failed) => true,
            (Paused, Running | Failed) => true,
            // stop
            (Pending | Paused, Completed) => true,
            // resume after failure replays the failed step
            (Failed, Running) => true,
            // manual reset
            (Completed | Failed, Pending) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Accumulators ─────────────────────────────────────────────────────

/// One recorded failure; the error list is append-only
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub step_id: Option<StepId>,
    /// Error category, e.g. `execution` or `agent`
    pub kind: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub context: Option<serde_json::Value>,
}

impl ErrorRecord {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            step_id: None,
            kind: kind.into(),
            message: message.into(),
            timestamp: Utc::now(),
            context: None,
        }
    }

    pub fn for_step(mut self, step_id: StepId) -> Self {
        self.step_id = Some(step_id);
        self
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }
}

/// Token and spend accounting
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostDetails {
    pub total_cost: f64,
    pub currency: String,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
    #[serde(default)]
    pub cost_by_step: BTreeMap<StepId, f64>,
}

impl Default for CostDetails {
    fn default() -> Self {
        Self {
            total_cost: 0.0,
            currency: "USD".to_string(),
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens: 0,
            cost_by_step: BTreeMap::new(),
        }
    }
}

/// Performance, resource and usage counters for a workflow
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowMetrics {
    pub performance: PerformanceMetrics,
    pub resources: ResourceMetrics,
    pub usage: UsageMetrics,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    pub total_duration_ms: f64,
    pub average_step_duration_ms: f64,
    pub completed_steps: i64,
    pub failed_steps: i64,
    pub measured_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceMetrics {
    pub cpu_usage_percent: f64,
    pub memory_usage_mb: f64,
    pub active_agents: i64,
    pub measured_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetrics {
    pub step_executions: i64,
    pub task_count: i64,
    pub api_calls: i64,
    pub success_rate_percent: f64,
    pub measured_at: Option<DateTime<Utc>>,
}

/// Timestamps plus a free-form bag of caller data
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowMetadata {
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub pause_time: Option<DateTime<Utc>>,
    pub resume_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Inputs of the last invocation, replayed by resume
    pub last_inputs: Option<serde_json::Value>,
    #[serde(default)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl WorkflowMetadata {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            created_at: now,
            last_updated: now,
            start_time: None,
            pause_time: None,
            resume_time: None,
            end_time: None,
            last_inputs: None,
            extra: BTreeMap::new(),
        }
    }
}

impl Default for WorkflowMetadata {
    fn default() -> Self {
        Self::new()
    }
}

// ── Workflow State ───────────────────────────────────────────────────

/// Full state of one workflow instance
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowState {
    pub id: WorkflowId,
    /// Same value as `id`
    pub workflow_id: WorkflowId,
    pub name: String,
    pub status: WorkflowStatus,
    pub steps: Vec<StepConfig>,
    /// `-1 ..= steps.len()`; `steps.len()` means every step has run
    pub current_step_index: i64,
    pub step_results: HashMap<StepId, StepResult>,
    pub assigned_agents: HashMap<StepId, Agent>,
    pub pending_tasks: Vec<Task>,
    pub active_tasks: Vec<Task>,
    pub completed_tasks: Vec<Task>,
    pub errors: Vec<ErrorRecord>,
    pub cost_details: CostDetails,
    pub metrics: WorkflowMetrics,
    pub metadata: WorkflowMetadata,
}

impl WorkflowState {
    /// A fresh `pending` state positioned at the first step
    pub fn new(workflow_id: WorkflowId, name: impl Into<String>, steps: Vec<StepConfig>) -> Self {
        Self {
            id: workflow_id.clone(),
            workflow_id,
            name: name.into(),
            status: WorkflowStatus::Pending,
            steps,
            current_step_index: 0,
            step_results: HashMap::new(),
            assigned_agents: HashMap::new(),
            pending_tasks: Vec::new(),
            active_tasks: Vec::new(),
            completed_tasks: Vec::new(),
            errors: Vec::new(),
            cost_details: CostDetails::default(),
            metrics: WorkflowMetrics::default(),
            metadata: WorkflowMetadata::new(),
        }
    }

    /// The step at `current_step_index`, if the index points at one
    pub fn current_step(&self) -> Option<&StepConfig> {
        usize::try_from(self.current_step_index)
            .ok()
            .and_then(|i| self.steps.get(i))
    }

    pub fn step_index(&self, step_id: &StepId) -> Option<usize> {
        self.steps.iter().position(|s| &s.id == step_id)
    }

    pub fn is_complete(&self) -> bool {
        self.current_step_index >= self.steps.len() as i64
    }

    /// Locate a task across the three partitions
    pub fn find_task(&self, task_id: &TaskId) -> Option<(TaskPhase, &Task)> {
        self.pending_tasks
            .iter()
            .find(|t| &t.id == task_id)
            .map(|t| (TaskPhase::Pending, t))
            .or_else(|| {
                self.active_tasks
                    .iter()
                    .find(|t| &t.id == task_id)
                    .map(|t| (TaskPhase::Active, t))
            })
            .or_else(|| {
                self.completed_tasks
                    .iter()
                    .find(|t| &t.id == task_id)
                    .map(|t| (TaskPhase::Completed, t))
            })
    }

    /// Remove a task from whichever partition holds it
    pub fn take_task(&mut self, task_id: &TaskId) -> Option<Task> {
        for partition in [
            &mut self.pending_tasks,
            &mut self.active_tasks,
            &mut self.completed_tasks,
        ] {
            if let Some(pos) = partition.iter().position(|t| &t.id == task_id) {
                return Some(partition.remove(pos));
            }
        }
        None
    }

    /// Insert or replace a task, filing it under the partition its status maps to
    pub fn place_task(&mut self, task: Task) {
        self.take_task(&task.id);
        match task.status.phase() {
            TaskPhase::Pending => self.pending_tasks.push(task),
            TaskPhase::Active => self.active_tasks.push(task),
            TaskPhase::Completed => self.completed_tasks.push(task),
        }
    }

    /// Shallow-merge a partial update; metadata merges field by field
    pub fn apply(&mut self, update: StateUpdate) {
        let StateUpdate {
            name,
            status,
            current_step_index,
            step_results,
            assigned_agents,
            pending_tasks,
            active_tasks,
            completed_tasks,
            errors,
            cost_details,
            metrics,
            metadata,
        } = update;

        if let Some(name) = name {
            self.name = name;
        }
        if let Some(status) = status {
            self.status = status;
        }
        if let Some(index) = current_step_index {
            self.current_step_index = index;
        }
        if let Some(results) = step_results {
            self.step_results = results;
        }
        if let Some(agents) = assigned_agents {
            self.assigned_agents = agents;
        }
        if let Some(tasks) = pending_tasks {
            self.pending_tasks = tasks;
        }
        if let Some(tasks) = active_tasks {
            self.active_tasks = tasks;
        }
        if let Some(tasks) = completed_tasks {
            self.completed_tasks = tasks;
        }
        if let Some(errors) = errors {
            self.errors = errors;
        }
        if let Some(cost) = cost_details {
            self.cost_details = cost;
        }
        if let Some(metrics) = metrics {
            self.metrics = metrics;
        }
        if let Some(patch) = metadata {
            patch.merge_into(&mut self.metadata);
        }
    }
}

// ── Partial Updates ──────────────────────────────────────────────────

/// Partial update of a [`WorkflowState`]; `None` fields are left untouched.
///
/// `steps` and identity fields are deliberately absent: they are fixed at
/// initialization.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StateUpdate {
    pub name: Option<String>,
    pub status: Option<WorkflowStatus>,
    pub current_step_index: Option<i64>,
    pub step_results: Option<HashMap<StepId, StepResult>>,
    pub assigned_agents: Option<HashMap<StepId, Agent>>,
    pub pending_tasks: Option<Vec<Task>>,
    pub active_tasks: Option<Vec<Task>>,
    pub completed_tasks: Option<Vec<Task>>,
    pub errors: Option<Vec<ErrorRecord>>,
    pub cost_details: Option<CostDetails>,
    pub metrics: Option<WorkflowMetrics>,
    pub metadata: Option<MetadataPatch>,
}

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_status(mut self, status: WorkflowStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_current_step_index(mut self, index: i64) -> Self {
        self.current_step_index = Some(index);
        self
    }

    pub fn with_step_results(mut self, results: HashMap<StepId, StepResult>) -> Self {
        self.step_results = Some(results);
        self
    }

    pub fn with_assigned_agents(mut self, agents: HashMap<StepId, Agent>) -> Self {
        self.assigned_agents = Some(agents);
        self
    }

    /// Replace all three task partitions at once
    pub fn with_tasks(mut self, pending: Vec<Task>, active: Vec<Task>, completed: Vec<Task>) -> Self {
        self.pending_tasks = Some(pending);
        self.active_tasks = Some(active);
        self.completed_tasks = Some(completed);
        self
    }

    pub fn with_errors(mut self, errors: Vec<ErrorRecord>) -> Self {
        self.errors = Some(errors);
        self
    }

    pub fn with_cost_details(mut self, cost: CostDetails) -> Self {
        self.cost_details = Some(cost);
        self
    }

    pub fn with_metrics(mut self, metrics: WorkflowMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_metadata(mut self, patch: MetadataPatch) -> Self {
        self.metadata = Some(patch);
        self
    }
}

/// Field-level patch for [`WorkflowMetadata`]; `extra` merges key by key
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MetadataPatch {
    pub start_time: Option<DateTime<Utc>>,
    pub pause_time: Option<DateTime<Utc>>,
    pub resume_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub last_inputs: Option<serde_json::Value>,
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl MetadataPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_time(mut self, at: DateTime<Utc>) -> Self {
        self.start_time = Some(at);
        self
    }

    pub fn pause_time(mut self, at: DateTime<Utc>) -> Self {
        self.pause_time = Some(at);
        self
    }

    pub fn resume_time(mut self, at: DateTime<Utc>) -> Self {
        self.resume_time = Some(at);
        self
    }

    pub fn end_time(mut self, at: DateTime<Utc>) -> Self {
        self.end_time = Some(at);
        self
    }

    pub fn last_inputs(mut self, inputs: serde_json::Value) -> Self {
        self.last_inputs = Some(inputs);
        self
    }

    pub fn extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    fn merge_into(self, metadata: &mut WorkflowMetadata) {
        if let Some(at) = self.start_time {
            metadata.start_time = Some(at);
        }
        if let Some(at) = self.pause_time {
            metadata.pause_time = Some(at);
        }
        if let Some(at) = self.resume_time {
            metadata.resume_time = Some(at);
        }
        if let Some(at) = self.end_time {
            metadata.end_time = Some(at);
        }
        if let Some(inputs) = self.last_inputs {
            metadata.last_inputs = Some(inputs);
        }
        metadata.extra.extend(self.extra);
    }
}
