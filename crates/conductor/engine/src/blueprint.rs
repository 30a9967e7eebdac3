//! Workflow definitions and the executable sequences built from them.

use std::collections::HashMap;

use conductor_types::{RoutingPath, StateUpdate, StepConfig, StepId, WorkflowId};

use crate::error::{EngineError, Result};
use crate::executor::SharedExecutor;

/// Everything needed to (re)initialize a workflow.
#[derive(Clone, Default)]
pub struct WorkflowBlueprint {
    pub steps: Vec<StepConfig>,
    pub executors: HashMap<StepId, SharedExecutor>,
    pub routing_paths: Vec<RoutingPath>,
    /// Merged over the fresh `pending` state.
    pub initial_state: StateUpdate,
}

impl WorkflowBlueprint {
    pub fn new(steps: Vec<StepConfig>) -> Self {
        Self {
            steps,
            ..Default::default()
        }
    }

    pub fn with_executor(mut self, step_id: impl Into<String>, executor: SharedExecutor) -> Self {
        self.executors.insert(StepId::new(step_id), executor);
        self
    }

    pub fn with_routing_path(mut self, path: RoutingPath) -> Self {
        self.routing_paths.push(path);
        self
    }

    pub fn with_initial_state(mut self, update: StateUpdate) -> Self {
        self.initial_state = update;
        self
    }

    /// Check that executors and routing only reference declared steps.
    pub(crate) fn check_references(&self) -> Result<()> {
        let known = |id: &StepId| self.steps.iter().any(|s| &s.id == id);

        if let Some(id) = self.executors.keys().find(|id| !known(id)) {
            return Err(EngineError::StepNotFound(id.clone()));
        }
        for path in &self.routing_paths {
            if !known(&path.source_step_id) {
                return Err(EngineError::StepNotFound(path.source_step_id.clone()));
            }
            if let Some(rule) = path.rules.iter().find(|r| !known(&r.target_step_id)) {
                return Err(EngineError::StepNotFound(rule.target_step_id.clone()));
            }
        }
        Ok(())
    }
}

/// Executors laid out in step order. A `None` slot is skipped at run time.
#[derive(Clone)]
pub(crate) struct ExecutableSequence {
    slots: Vec<Option<SharedExecutor>>,
}

impl ExecutableSequence {
    pub(crate) fn build(workflow_id: &WorkflowId, blueprint: &WorkflowBlueprint) -> Result<Self> {
        let slots: Vec<_> = blueprint
            .steps
            .iter()
            .map(|step| blueprint.executors.get(&step.id).cloned())
            .collect();

        if slots.iter().all(Option::is_none) {
            return Err(EngineError::NoExecutableSteps(workflow_id.clone()));
        }
        Ok(Self { slots })
    }

    pub(crate) fn executor_at(&self, index: usize) -> Option<&SharedExecutor> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    pub(crate) fn executable_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::executor_fn;
    use conductor_types::RoutingRule;
    use serde_json::Value;

    fn echo() -> SharedExecutor {
        executor_fn(|v: Value| async move { Ok(v) })
    }

    fn steps() -> Vec<StepConfig> {
        vec![
            StepConfig::new("s1", "One", "first"),
            StepConfig::new("s2", "Two", "second").depends_on("s1"),
        ]
    }

    #[test]
    fn sequence_needs_one_executor() {
        let wf = WorkflowId::new("wf1");
        let empty = WorkflowBlueprint::new(steps());
        assert!(matches!(
            ExecutableSequence::build(&wf, &empty),
            Err(EngineError::NoExecutableSteps(_))
        ));

        let partial = WorkflowBlueprint::new(steps()).with_executor("s2", echo());
        let seq = ExecutableSequence::build(&wf, &partial).unwrap();
        assert_eq!(seq.executable_count(), 1);
        assert!(seq.executor_at(0).is_none());
        assert!(seq.executor_at(1).is_some());
        assert!(seq.executor_at(2).is_none());
    }

    #[test]
    fn references_must_exist() {
        let bad_executor = WorkflowBlueprint::new(steps()).with_executor("s9", echo());
        assert!(matches!(
            bad_executor.check_references(),
            Err(EngineError::StepNotFound(id)) if id.as_str() == "s9"
        ));

        let bad_target = WorkflowBlueprint::new(steps())
            .with_routing_path(RoutingPath::new("p", "s1").with_rule(RoutingRule::new("r", 1, "s7")));
        assert!(bad_target.check_references().is_err());

        let ok = WorkflowBlueprint::new(steps())
            .with_executor("s1", echo())
            .with_routing_path(RoutingPath::new("p", "s1").with_rule(RoutingRule::new("r", 1, "s2")));
        assert!(ok.check_references().is_ok());
    }
}
