//! Tasks and agents as seen by the orchestration core

use crate::ids::{AgentId, StepId, TaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Tasks ────────────────────────────────────────────────────────────

/// Status reported by the task backend
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    Doing,
    Blocked,
    Revise,
    Done,
    AwaitingValidation,
}

impl TaskStatus {
    /// Which state partition a task with this status belongs to
    pub fn phase(&self) -> TaskPhase {
        match self {
            Self::Todo | Self::Blocked => TaskPhase::Pending,
            Self::Doing | Self::Revise | Self::AwaitingValidation => TaskPhase::Active,
            Self::Done => TaskPhase::Completed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::Doing => "doing",
            Self::Blocked => "blocked",
            Self::Revise => "revise",
            Self::Done => "done",
            Self::AwaitingValidation => "awaiting_validation",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The three disjoint task collections kept in workflow state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskPhase {
    Pending,
    Active,
    Completed,
}

/// A unit of work executed by the task backend
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: TaskStatus,
    /// Step this task realizes, if any
    pub step_id: Option<StepId>,
    pub agent_id: Option<AgentId>,
    pub result: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::new(id),
            title: title.into(),
            description: String::new(),
            status: TaskStatus::Todo,
            step_id: None,
            agent_id: None,
            result: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn for_step(mut self, step_id: impl Into<String>) -> Self {
        self.step_id = Some(StepId::new(step_id));
        self
    }

    pub fn with_agent(mut self, agent_id: AgentId) -> Self {
        self.agent_id = Some(agent_id);
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    pub fn set_status(&mut self, status: TaskStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

// ── Agents ───────────────────────────────────────────────────────────

/// Availability of an agent as last reported by the pool
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    #[default]
    Idle,
    Busy,
    Offline,
}

/// An actor that can be bound to a step
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub status: AgentStatus,
}

impl Agent {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: AgentId::new(id),
            name: name.into(),
            role: String::new(),
            capabilities: Vec::new(),
            status: AgentStatus::Idle,
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.push(capability.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_phases() {
        assert_eq!(TaskStatus::Todo.phase(), TaskPhase::Pending);
        assert_eq!(TaskStatus::Blocked.phase(), TaskPhase::Pending);
        assert_eq!(TaskStatus::Revise.phase(), TaskPhase::Active);
        assert_eq!(TaskStatus::Done.phase(), TaskPhase::Completed);
    }

    #[test]
    fn status_wire_names() {
        assert_eq!(
            serde_json::to_string(&TaskStatus::AwaitingValidation).unwrap(),
            "\"awaiting_validation\""
        );
    }
}
