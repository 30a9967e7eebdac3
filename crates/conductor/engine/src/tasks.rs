//! Agent assignment and task-driven transitions.
//!
//! The task backend reports status changes; the manager mirrors them into
//! workflow state and step records:
//!
//! - `doing`: the task's step starts
//! - `revise`: if the agent is free the task goes back to `doing`, and every
//!   task of a later step is reset to `todo`
//! - `done`: the task's step completes and the next `todo` task starts

use chrono::Utc;
use conductor_events::{AgentEventDraft, StepEventDraft, TaskEventDraft};
use conductor_types::{
    Agent, AgentEventType, AgentId, StateUpdate, StepEventType, StepId, StepResult, Task,
    TaskEventType, TaskId, TaskStatus, WorkflowId, WorkflowState,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::error::{EngineError, Result};
use crate::manager::WorkflowManager;
use crate::result::{run, HandlerResult};

/// Status change reported by the task backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatusChange {
    pub task_id: TaskId,
    pub previous_status: TaskStatus,
    pub new_status: TaskStatus,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Failure reported by the task backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskErrorNotification {
    pub task_id: TaskId,
    pub error: String,
    #[serde(default)]
    pub context: Option<Value>,
}

impl WorkflowManager {
    /// Assign `agent` to a step, replacing any previous assignment.
    #[instrument(skip(self, agent), fields(workflow_id = %workflow_id, step_id = %step_id, agent_id = %agent.id))]
    pub async fn assign_agent(
        &self,
        workflow_id: &WorkflowId,
        step_id: &StepId,
        agent: Agent,
    ) -> HandlerResult<WorkflowState> {
        run("assign_agent", workflow_id, async {
            let mut state = self.require_state(workflow_id)?;
            ensure_step(&state, step_id)?;

            let kind = if state.assigned_agents.contains_key(step_id) {
                AgentEventType::Reassign
            } else {
                AgentEventType::Assign
            };
            self.events
                .emit_agent(workflow_id, AgentEventDraft::new(kind, step_id.clone(), agent.clone()))
                .await?;

            state.assigned_agents.insert(step_id.clone(), agent);
            refresh_active_agents(&mut state);
            let state = self
                .store
                .update_state(
                    workflow_id,
                    StateUpdate::new()
                        .with_assigned_agents(state.assigned_agents)
                        .with_metrics(state.metrics),
                )
                .await?;

            info!(kind = kind.as_str(), "Agent assigned");
            Ok(state)
        })
        .await
    }

    /// Remove the agent assigned to a step; `None` when there was none.
    #[instrument(skip(self), fields(workflow_id = %workflow_id, step_id = %step_id))]
    pub async fn unassign_agent(
        &self,
        workflow_id: &WorkflowId,
        step_id: &StepId,
    ) -> HandlerResult<Option<Agent>> {
        run("unassign_agent", workflow_id, async {
            let mut state = self.require_state(workflow_id)?;
            ensure_step(&state, step_id)?;

            let Some(agent) = state.assigned_agents.remove(step_id) else {
                return Ok(None);
            };
            self.events
                .emit_agent(
                    workflow_id,
                    AgentEventDraft::new(AgentEventType::Unassign, step_id.clone(), agent.clone()),
                )
                .await?;

            refresh_active_agents(&mut state);
            self.store
                .update_state(
                    workflow_id,
                    StateUpdate::new()
                        .with_assigned_agents(state.assigned_agents)
                        .with_metrics(state.metrics),
                )
                .await?;
            Ok(Some(agent))
        })
        .await
    }

    /// Add a task, or replace the one with the same id.
    #[instrument(skip(self, task), fields(workflow_id = %workflow_id, task_id = %task.id))]
    pub async fn add_task(&self, workflow_id: &WorkflowId, task: Task) -> HandlerResult<WorkflowState> {
        run("add_task", workflow_id, async {
            let mut state = self.require_state(workflow_id)?;
            if let Some(step_id) = &task.step_id {
                ensure_step(&state, step_id)?;
            }

            self.events
                .emit_task(
                    workflow_id,
                    TaskEventDraft::new(TaskEventType::Add, task.clone()),
                )
                .await?;

            let is_new = state.find_task(&task.id).is_none();
            state.place_task(task);
            if is_new {
                state.metrics.usage.task_count += 1;
                state.metrics.usage.measured_at = Some(Utc::now());
            }

            let state = self.store.update_state(workflow_id, task_update(state)).await?;
            debug!(is_new, "Task added");
            Ok(state)
        })
        .await
    }

    /// Mirror a task status change into workflow state.
    #[instrument(
        skip(self, change),
        fields(workflow_id = %workflow_id, task_id = %change.task_id, status = %change.new_status)
    )]
    pub async fn handle_task_status_changed(
        &self,
        workflow_id: &WorkflowId,
        change: TaskStatusChange,
    ) -> HandlerResult<WorkflowState> {
        run(
            "handle_task_status_changed",
            workflow_id,
            self.apply_task_status(workflow_id, change),
        )
        .await
    }

    /// Record a task failure and fail the workflow.
    #[instrument(skip(self, notification), fields(workflow_id = %workflow_id, task_id = %notification.task_id))]
    pub async fn handle_task_error(
        &self,
        workflow_id: &WorkflowId,
        notification: TaskErrorNotification,
    ) -> HandlerResult<WorkflowState> {
        run("handle_task_error", workflow_id, async {
            let state = self.require_state(workflow_id)?;
            let (_, task) = state
                .find_task(&notification.task_id)
                .ok_or_else(|| EngineError::TaskNotFound(notification.task_id.clone()))?;

            self.events
                .emit_task(
                    workflow_id,
                    TaskEventDraft::new(TaskEventType::Error, task.clone())
                        .with_error(notification.error.clone()),
                )
                .await?;

            let error = EngineError::TaskFailed {
                task_id: notification.task_id,
                message: notification.error,
            };
            self.workflow_error(workflow_id, &error, notification.context)
                .await
        })
        .await
    }

    async fn apply_task_status(
        &self,
        workflow_id: &WorkflowId,
        change: TaskStatusChange,
    ) -> Result<WorkflowState> {
        let mut state = self.require_state(workflow_id)?;
        let mut task = state
            .find_task(&change.task_id)
            .map(|(_, t)| t.clone())
            .ok_or_else(|| EngineError::TaskNotFound(change.task_id.clone()))?;

        self.events
            .emit_task(
                workflow_id,
                TaskEventDraft::new(TaskEventType::StatusChange, task.clone())
                    .with_transition(change.previous_status, change.new_status),
            )
            .await?;
        task.set_status(change.new_status);

        match change.new_status {
            TaskStatus::Doing => {
                self.start_task_step(workflow_id, &mut state, &task).await?;
                state.place_task(task);
            }
            TaskStatus::Revise => {
                self.revise_task(workflow_id, &mut state, task).await?;
            }
            TaskStatus::Done => {
                if let Some(step_id) = task.step_id.clone() {
                    let result = task.result.clone().unwrap_or(Value::Null);
                    state
                        .step_results
                        .entry(step_id.clone())
                        .or_insert_with(|| StepResult::started(step_id.clone()))
                        .complete(result.clone());
                    self.events
                        .emit_step(
                            workflow_id,
                            StepEventDraft::new(StepEventType::Complete, step_id).with_result(result),
                        )
                        .await?;
                }
                state.place_task(task);
                self.start_next_task(workflow_id, &mut state).await?;
            }
            _ => state.place_task(task),
        }

        let state = self.store.update_state(workflow_id, task_update(state)).await?;
        Ok(state)
    }

    /// Mark the task's step as running and announce it.
    async fn start_task_step(
        &self,
        workflow_id: &WorkflowId,
        state: &mut WorkflowState,
        task: &Task,
    ) -> Result<()> {
        let Some(step_id) = task.step_id.clone() else {
            return Ok(());
        };
        let agent = state.assigned_agents.get(&step_id).cloned();

        let mut record = StepResult::started(step_id.clone());
        if let Some(agent_id) = task.agent_id.clone().or_else(|| agent.as_ref().map(|a| a.id.clone())) {
            record = record.with_agent(agent_id);
        }
        state.step_results.insert(step_id.clone(), record);

        let mut draft = StepEventDraft::new(StepEventType::Start, step_id);
        if let Some(agent) = agent {
            draft = draft.with_agent(agent);
        }
        self.events.emit_step(workflow_id, draft).await?;
        Ok(())
    }

    async fn revise_task(
        &self,
        workflow_id: &WorkflowId,
        state: &mut WorkflowState,
        mut task: Task,
    ) -> Result<()> {
        let assigned = task
            .step_id
            .as_ref()
            .and_then(|s| state.assigned_agents.get(s))
            .cloned();
        let Some(agent_id) = task.agent_id.clone().or_else(|| assigned.as_ref().map(|a| a.id.clone()))
        else {
            debug!(task_id = %task.id, "No agent to hand the revision to");
            state.place_task(task);
            return Ok(());
        };

        if !self.agent_available(&agent_id).await {
            info!(task_id = %task.id, agent_id = %agent_id, "Agent busy, revision waits");
            state.place_task(task);
            return Ok(());
        }

        self.tasks
            .set_task_status(&task.id, TaskStatus::Doing)
            .await
            .map_err(|e| EngineError::TaskFailed {
                task_id: task.id.clone(),
                message: e.to_string(),
            })?;
        task.set_status(TaskStatus::Doing);

        if let Some(step_id) = task.step_id.clone() {
            let agent = assigned.unwrap_or_else(|| Agent::new(agent_id.as_str(), agent_id.as_str()));
            self.events
                .emit_agent(
                    workflow_id,
                    AgentEventDraft::new(AgentEventType::Reassign, step_id.clone(), agent),
                )
                .await?;
            self.invalidate_after(state, &step_id).await?;
        }

        info!(task_id = %task.id, agent_id = %agent_id, "Revision handed back to agent");
        state.place_task(task);
        Ok(())
    }

    /// An availability check that errors counts as busy.
    async fn agent_available(&self, agent_id: &AgentId) -> bool {
        match self.agents.is_available(agent_id).await {
            Ok(available) => available,
            Err(e) => {
                warn!(agent_id = %agent_id, error = %e, "Availability check failed, assuming busy");
                false
            }
        }
    }

    /// Reset every task belonging to a step after `step_id` back to `todo`.
    async fn invalidate_after(&self, state: &mut WorkflowState, step_id: &StepId) -> Result<()> {
        let Some(pivot) = state.step_index(step_id) else {
            return Ok(());
        };

        let downstream: Vec<TaskId> = state
            .pending_tasks
            .iter()
            .chain(&state.active_tasks)
            .chain(&state.completed_tasks)
            .filter(|t| t.status != TaskStatus::Todo)
            .filter(|t| {
                t.step_id
                    .as_ref()
                    .and_then(|s| state.step_index(s))
                    .is_some_and(|i| i > pivot)
            })
            .map(|t| t.id.clone())
            .collect();

        for task_id in downstream {
            let Some(mut task) = state.take_task(&task_id) else {
                continue;
            };
            self.tasks
                .set_task_status(&task_id, TaskStatus::Todo)
                .await
                .map_err(|e| EngineError::TaskFailed {
                    task_id: task_id.clone(),
                    message: e.to_string(),
                })?;
            debug!(task_id = %task_id, from = %task.status, "Downstream task reset");
            task.set_status(TaskStatus::Todo);
            state.place_task(task);
        }
        Ok(())
    }

    /// Start the earliest `todo` task in step order, if any.
    async fn start_next_task(&self, workflow_id: &WorkflowId, state: &mut WorkflowState) -> Result<()> {
        let next = state
            .pending_tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Todo)
            .min_by_key(|t| {
                t.step_id
                    .as_ref()
                    .and_then(|s| state.step_index(s))
                    .unwrap_or(usize::MAX)
            })
            .map(|t| t.id.clone());
        let Some(task_id) = next else {
            return Ok(());
        };
        let Some(mut task) = state.take_task(&task_id) else {
            return Ok(());
        };

        self.tasks
            .set_task_status(&task_id, TaskStatus::Doing)
            .await
            .map_err(|e| EngineError::TaskFailed {
                task_id: task_id.clone(),
                message: e.to_string(),
            })?;
        task.set_status(TaskStatus::Doing);

        self.events
            .emit_task(
                workflow_id,
                TaskEventDraft::new(TaskEventType::StatusChange, task.clone())
                    .with_transition(TaskStatus::Todo, TaskStatus::Doing),
            )
            .await?;
        self.start_task_step(workflow_id, state, &task).await?;

        info!(task_id = %task_id, "Next task started");
        state.place_task(task);
        Ok(())
    }
}

fn ensure_step(state: &WorkflowState, step_id: &StepId) -> Result<()> {
    match state.step_index(step_id) {
        Some(_) => Ok(()),
        None => Err(EngineError::StepNotFound(step_id.clone())),
    }
}

fn refresh_active_agents(state: &mut WorkflowState) {
    let mut ids: Vec<&AgentId> = state.assigned_agents.values().map(|a| &a.id).collect();
    ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    ids.dedup();

    let resources = &mut state.metrics.resources;
    resources.active_agents = ids.len() as i64;
    resources.measured_at = Some(Utc::now());
}

/// Update carrying the task partitions, step records and metrics.
fn task_update(state: WorkflowState) -> StateUpdate {
    StateUpdate::new()
        .with_tasks(state.pending_tasks, state.active_tasks, state.completed_tasks)
        .with_step_results(state.step_results)
        .with_metrics(state.metrics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_types::StepConfig;
    use serde_json::json;

    #[test]
    fn active_agents_counts_distinct_ids() {
        let mut state = WorkflowState::new(
            WorkflowId::new("wf1"),
            "wf1",
            vec![
                StepConfig::new("s1", "One", "first"),
                StepConfig::new("s2", "Two", "second"),
            ],
        );
        let agent = Agent::new("a1", "Alice");
        state.assigned_agents.insert(StepId::new("s1"), agent.clone());
        state.assigned_agents.insert(StepId::new("s2"), agent);
        refresh_active_agents(&mut state);
        assert_eq!(state.metrics.resources.active_agents, 1);
    }

    #[test]
    fn feed_messages_use_camel_case() {
        let change: TaskStatusChange = serde_json::from_value(json!({
            "taskId": "t1",
            "previousStatus": "todo",
            "newStatus": "doing"
        }))
        .unwrap();
        assert_eq!(change.new_status, TaskStatus::Doing);
        assert_eq!(change.reason, None);
    }
}
