//! Conditional routing between steps.
//!
//! Paths and rules are append-only per workflow. For a source step, every
//! rule of every path leaving it is a candidate; candidates are tried in
//! descending priority, ties broken by path registration order and then by
//! rule order within the path. The first rule whose conditions all hold
//! selects the next step, and the decision is appended to the workflow's
//! routing history.

use chrono::Utc;
use conductor_types::{RoutingDecision, RoutingPath, RoutingRule, StepId, WorkflowId};
use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, info};

use crate::condition::ConditionEvaluator;
use crate::error::{Result, SyncError};

/// Routing table and decision history, scoped per workflow.
#[derive(Default)]
pub struct Router {
    paths: DashMap<WorkflowId, Vec<RoutingPath>>,
    history: DashMap<WorkflowId, Vec<RoutingDecision>>,
    evaluator: ConditionEvaluator,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a path. Path ids are unique per workflow.
    pub fn add_path(&self, workflow_id: &WorkflowId, mut path: RoutingPath) -> Result<()> {
        for rule in &path.rules {
            self.check_rule(rule)?;
        }

        let mut paths = self.paths.entry(workflow_id.clone()).or_default();
        if paths.iter().any(|p| p.id == path.id) {
            return Err(SyncError::DuplicatePath {
                workflow_id: workflow_id.clone(),
                path_id: path.id,
            });
        }

        // hand-built paths may not be sorted
        path.rules.sort_by(|a, b| b.priority.cmp(&a.priority));

        info!(
            workflow_id = %workflow_id,
            path_id = %path.id,
            source = %path.source_step_id,
            rules = path.rules.len(),
            "Routing path added"
        );
        paths.push(path);
        Ok(())
    }

    /// Append a rule to an existing path.
    pub fn add_rule(&self, workflow_id: &WorkflowId, path_id: &str, rule: RoutingRule) -> Result<()> {
        self.check_rule(&rule)?;

        let not_found = || SyncError::PathNotFound {
            workflow_id: workflow_id.clone(),
            path_id: path_id.to_string(),
        };
        let mut paths = self.paths.get_mut(workflow_id).ok_or_else(not_found)?;
        let path = paths
            .iter_mut()
            .find(|p| p.id == path_id)
            .ok_or_else(not_found)?;

        debug!(
            workflow_id = %workflow_id,
            path_id,
            rule_id = %rule.id,
            priority = rule.priority,
            "Routing rule added"
        );
        path.push_rule(rule);
        Ok(())
    }

    /// Pick the next step after `current`, or `None` to fall through to
    /// linear progression.
    pub fn next_step(
        &self,
        workflow_id: &WorkflowId,
        current: &StepId,
        step_result: &Value,
        context: &Value,
    ) -> Option<StepId> {
        let decision = {
            let paths = self.paths.get(workflow_id)?;

            let mut candidates: Vec<(&RoutingPath, &RoutingRule)> = paths
                .iter()
                .filter(|p| &p.source_step_id == current)
                .flat_map(|p| p.rules.iter().map(move |r| (p, r)))
                .collect();
            // stable: ties keep path order, then rule order
            candidates.sort_by(|(_, a), (_, b)| b.priority.cmp(&a.priority));

            let (path, rule) = candidates
                .into_iter()
                .find(|(_, rule)| self.evaluator.rule_matches(rule, step_result, context))?;

            RoutingDecision {
                path_id: path.id.clone(),
                source_step_id: current.clone(),
                target_step_id: rule.target_step_id.clone(),
                matched_rules: vec![rule.id.clone()],
                timestamp: Utc::now(),
            }
        };

        info!(
            workflow_id = %workflow_id,
            from = %decision.source_step_id,
            to = %decision.target_step_id,
            path_id = %decision.path_id,
            "Routing rule matched"
        );
        let target = decision.target_step_id.clone();
        self.history
            .entry(workflow_id.clone())
            .or_default()
            .push(decision);
        Some(target)
    }

    pub fn paths_for(&self, workflow_id: &WorkflowId) -> Vec<RoutingPath> {
        self.paths
            .get(workflow_id)
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    /// Decisions taken for a workflow, oldest first.
    pub fn history(&self, workflow_id: &WorkflowId) -> Vec<RoutingDecision> {
        self.history
            .get(workflow_id)
            .map(|h| h.clone())
            .unwrap_or_default()
    }

    /// Forget all paths and history for a workflow.
    pub fn clear_workflow(&self, workflow_id: &WorkflowId) {
        self.paths.remove(workflow_id);
        self.history.remove(workflow_id);
    }

    fn check_rule(&self, rule: &RoutingRule) -> Result<()> {
        for condition in &rule.conditions {
            self.evaluator
                .check(condition)
                .map_err(|reason| SyncError::InvalidCondition {
                    rule_id: rule.id.clone(),
                    reason,
                })?;
        }
        Ok(())
    }
}
