//! Workflow state checks shared by initialization, update and restore

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use conductor_types::{StepId, WorkflowState};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Errors and warnings produced by [`validate_state`].
///
/// Errors make a state unacceptable; warnings are advisory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// Convert into a `Result`, failing when any error was recorded
    pub fn into_result(self) -> Result<Self, ValidationError> {
        if self.is_valid() {
            Ok(self)
        } else {
            Err(ValidationError::State(self.errors))
        }
    }

    fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }
}

/// Validate the shape of a workflow state
pub fn validate_state(state: &WorkflowState) -> ValidationReport {
    validate_state_at(state, Utc::now())
}

/// Validate against an explicit clock, for deterministic checks
pub fn validate_state_at(state: &WorkflowState, now: DateTime<Utc>) -> ValidationReport {
    let mut report = ValidationReport::default();

    check_identity(state, &mut report);
    check_step_index(state, &mut report);
    check_step_results(state, &mut report);
    check_task_partitions(state, &mut report);
    check_metrics(state, now, &mut report);
    check_cost(state, &mut report);
    check_timestamps(state, now, &mut report);

    report
}

fn check_identity(state: &WorkflowState, report: &mut ValidationReport) {
    if state.id.as_str().trim().is_empty() {
        report.error("id is required");
    }
    if state.workflow_id.as_str().trim().is_empty() {
        report.error("workflowId is required");
    }
    if state.id != state.workflow_id {
        report.error(format!(
            "id '{}' does not match workflowId '{}'",
            state.id, state.workflow_id
        ));
    }
    if state.name.trim().is_empty() {
        report.error("name is required");
    }
}

fn check_step_index(state: &WorkflowState, report: &mut ValidationReport) {
    let len = state.steps.len() as i64;
    if state.current_step_index < -1 || state.current_step_index > len {
        report.error(format!(
            "currentStepIndex {} out of bounds (expected -1..={})",
            state.current_step_index, len
        ));
    }
}

fn check_step_results(state: &WorkflowState, report: &mut ValidationReport) {
    let known: HashSet<&StepId> = state.steps.iter().map(|s| &s.id).collect();

    for (key, result) in &state.step_results {
        if !known.contains(key) {
            report.error(format!("stepResults contains unknown step '{key}'"));
        }
        if &result.step_id != key {
            report.error(format!(
                "stepResults entry '{key}' holds a result for step '{}'",
                result.step_id
            ));
        }
    }
    for key in state.assigned_agents.keys() {
        if !known.contains(key) {
            report.warn(format!("assignedAgents references unknown step '{key}'"));
        }
    }
}

fn check_task_partitions(state: &WorkflowState, report: &mut ValidationReport) {
    let mut seen = HashSet::new();
    let all = state
        .pending_tasks
        .iter()
        .chain(&state.active_tasks)
        .chain(&state.completed_tasks);

    for task in all {
        if !seen.insert(&task.id) {
            report.error(format!("task '{}' appears in more than one partition", task.id));
        }
    }
}

fn check_metrics(state: &WorkflowState, now: DateTime<Utc>, report: &mut ValidationReport) {
    let perf = &state.metrics.performance;
    non_negative(report, "performance.totalDurationMs", perf.total_duration_ms);
    non_negative(report, "performance.averageStepDurationMs", perf.average_step_duration_ms);
    non_negative_count(report, "performance.completedSteps", perf.completed_steps);
    non_negative_count(report, "performance.failedSteps", perf.failed_steps);
    not_future(report, "performance.measuredAt", perf.measured_at, now);

    let res = &state.metrics.resources;
    percentage(report, "resources.cpuUsagePercent", res.cpu_usage_percent);
    non_negative(report, "resources.memoryUsageMb", res.memory_usage_mb);
    non_negative_count(report, "resources.activeAgents", res.active_agents);
    not_future(report, "resources.measuredAt", res.measured_at, now);

    let usage = &state.metrics.usage;
    non_negative_count(report, "usage.stepExecutions", usage.step_executions);
    non_negative_count(report, "usage.taskCount", usage.task_count);
    non_negative_count(report, "usage.apiCalls", usage.api_calls);
    percentage(report, "usage.successRatePercent", usage.success_rate_percent);
    not_future(report, "usage.measuredAt", usage.measured_at, now);
}

fn check_cost(state: &WorkflowState, report: &mut ValidationReport) {
    let cost = &state.cost_details;
    non_negative(report, "costDetails.totalCost", cost.total_cost);
    non_negative_count(report, "costDetails.promptTokens", cost.prompt_tokens);
    non_negative_count(report, "costDetails.completionTokens", cost.completion_tokens);
    non_negative_count(report, "costDetails.totalTokens", cost.total_tokens);
}

fn check_timestamps(state: &WorkflowState, now: DateTime<Utc>, report: &mut ValidationReport) {
    let meta = &state.metadata;
    not_future(report, "metadata.createdAt", Some(meta.created_at), now);
    not_future(report, "metadata.startTime", meta.start_time, now);
    not_future(report, "metadata.endTime", meta.end_time, now);

    if let (Some(start), Some(end)) = (meta.start_time, meta.end_time) {
        if end < start {
            report.warn("metadata.endTime precedes metadata.startTime");
        }
    }
}

fn non_negative(report: &mut ValidationReport, field: &str, value: f64) {
    if value.is_nan() || value < 0.0 {
        report.error(format!("{field} must be non-negative (got {value})"));
    }
}

fn non_negative_count(report: &mut ValidationReport, field: &str, value: i64) {
    if value < 0 {
        report.error(format!("{field} must be non-negative (got {value})"));
    }
}

fn percentage(report: &mut ValidationReport, field: &str, value: f64) {
    if !(0.0..=100.0).contains(&value) {
        report.error(format!("{field} must be within 0-100 (got {value})"));
    }
}

fn not_future(
    report: &mut ValidationReport,
    field: &str,
    value: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) {
    if let Some(ts) = value {
        if ts > now {
            report.warn(format!("{field} is in the future ({ts})"));
        }
    }
}
