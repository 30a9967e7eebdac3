//! Step definitions and per-step execution records

use crate::ids::{AgentId, StepId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Step Configuration ───────────────────────────────────────────────

/// Immutable definition of one workflow step.
///
/// Numeric fields are signed so that malformed configurations coming from
/// callers or deserialized documents can be reported by the validator rather
/// than rejected at the type level.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepConfig {
    pub id: StepId,
    pub name: String,
    pub description: String,
    /// Steps that must complete before this one
    #[serde(default)]
    pub dependencies: Vec<StepId>,
    #[serde(default)]
    pub resources: StepResources,
    /// Timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: i64,
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Scheduling priority, 0 to 100
    #[serde(default = "default_priority")]
    pub priority: i64,
}

fn default_timeout_ms() -> i64 {
    30_000
}

fn default_priority() -> i64 {
    50
}

impl StepConfig {
    pub fn new(id: impl Into<String>, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: StepId::new(id),
            name: name.into(),
            description: description.into(),
            dependencies: Vec::new(),
            resources: StepResources::default(),
            timeout_ms: default_timeout_ms(),
            retry: RetryPolicy::default(),
            priority: default_priority(),
        }
    }

    pub fn depends_on(mut self, step: impl Into<String>) -> Self {
        self.dependencies.push(StepId::new(step));
        self
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(StepId::new).collect();
        self
    }

    pub fn with_resources(mut self, resources: StepResources) -> Self {
        self.resources = resources;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: i64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }
}

/// Resources a step reserves while running
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StepResources {
    /// Memory in megabytes
    pub memory: i64,
    /// CPU share in percent
    pub cpu: f64,
    /// Number of agents
    pub agents: i64,
}

impl StepResources {
    pub fn new(memory: i64, cpu: f64, agents: i64) -> Self {
        Self { memory, cpu, agents }
    }
}

/// Retry settings carried on a step; orchestrating retries is left to callers
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    pub max_attempts: i64,
    pub delay_ms: i64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 1_000,
        }
    }
}

// ── Step Results ─────────────────────────────────────────────────────

/// Lifecycle status of a single step execution
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome record of the current execution attempt of a step
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub step_id: StepId,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: StepStatus,
    pub agent_id: Option<AgentId>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    #[serde(default)]
    pub metrics: StepMetrics,
}

/// Execution counters for one step attempt
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepMetrics {
    pub duration_ms: i64,
    pub retries: i64,
    #[serde(default)]
    pub resource_usage: StepResources,
}

impl StepResult {
    /// A fresh record for a step that just started running
    pub fn started(step_id: StepId) -> Self {
        Self {
            step_id,
            start_time: Utc::now(),
            end_time: None,
            status: StepStatus::Running,
            agent_id: None,
            result: None,
            error: None,
            metrics: StepMetrics::default(),
        }
    }

    pub fn with_agent(mut self, agent_id: AgentId) -> Self {
        self.agent_id = Some(agent_id);
        self
    }

    pub fn complete(&mut self, result: serde_json::Value) {
        self.finish(StepStatus::Completed);
        self.result = Some(result);
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.finish(StepStatus::Failed);
        self.error = Some(error.into());
    }

    pub fn skip(&mut self) {
        self.finish(StepStatus::Skipped);
    }

    /// Return a failed record to `pending`, dropping the failure details
    pub fn reset(&mut self) {
        self.status = StepStatus::Pending;
        self.error = None;
        self.end_time = None;
    }

    fn finish(&mut self, status: StepStatus) {
        let now = Utc::now();
        self.status = status;
        self.end_time = Some(now);
        self.metrics.duration_ms = (now - self.start_time).num_milliseconds().max(0);
    }
}
