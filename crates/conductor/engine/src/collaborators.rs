//! Seams to the agent pool and task backend.

use async_trait::async_trait;
use conductor_types::{AgentId, TaskId, TaskStatus};
use thiserror::Error;

/// An availability check that could not be answered
#[derive(Debug, Clone, Error)]
#[error("availability check for agent {agent_id} failed: {message}")]
pub struct AgentError {
    pub agent_id: AgentId,
    pub message: String,
}

/// Agent pool queried before re-assigning work
#[async_trait]
pub trait AgentPool: Send + Sync {
    /// Whether the agent can take work now.
    async fn is_available(&self, agent_id: &AgentId) -> Result<bool, AgentError>;
}

/// Pool that reports every agent as free
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysAvailablePool;

#[async_trait]
impl AgentPool for AlwaysAvailablePool {
    async fn is_available(&self, _agent_id: &AgentId) -> Result<bool, AgentError> {
        Ok(true)
    }
}

/// External task store that owns task status
#[async_trait]
pub trait TaskBackend: Send + Sync {
    async fn set_task_status(&self, task_id: &TaskId, status: TaskStatus) -> anyhow::Result<()>;
}

/// Backend that accepts and discards every request
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTaskBackend;

#[async_trait]
impl TaskBackend for NoopTaskBackend {
    async fn set_task_status(&self, _task_id: &TaskId, _status: TaskStatus) -> anyhow::Result<()> {
        Ok(())
    }
}
