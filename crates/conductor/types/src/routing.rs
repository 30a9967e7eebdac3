//! Declarative conditional edges between steps

use crate::ids::StepId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Comparison applied by a [`RoutingCondition`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionOperator {
    Eq,
    Neq,
    Gt,
    Lt,
    Gte,
    Lte,
    Contains,
    /// Regular expression match against the string form of the value
    Matches,
}

/// One predicate of a routing rule.
///
/// With `field` set, the operand is looked up in the step result (dotted
/// paths descend into nested objects). Without it, the whole workflow
/// context is the operand.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoutingCondition {
    pub field: Option<String>,
    pub operator: ConditionOperator,
    pub value: serde_json::Value,
}

impl RoutingCondition {
    pub fn field(
        field: impl Into<String>,
        operator: ConditionOperator,
        value: serde_json::Value,
    ) -> Self {
        Self {
            field: Some(field.into()),
            operator,
            value,
        }
    }

    pub fn context(operator: ConditionOperator, value: serde_json::Value) -> Self {
        Self {
            field: None,
            operator,
            value,
        }
    }
}

/// A rule matches when all of its conditions hold
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingRule {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub priority: i32,
    pub conditions: Vec<RoutingCondition>,
    pub target_step_id: StepId,
}

impl RoutingRule {
    pub fn new(id: impl Into<String>, priority: i32, target: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            priority,
            conditions: Vec::new(),
            target_step_id: StepId::new(target),
        }
    }

    pub fn when(mut self, condition: RoutingCondition) -> Self {
        self.conditions.push(condition);
        self
    }
}

/// Connects a source step to candidate targets through prioritized rules
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingPath {
    pub id: String,
    pub source_step_id: StepId,
    #[serde(default)]
    pub target_step_ids: Vec<StepId>,
    /// Kept sorted by descending priority
    #[serde(default)]
    pub rules: Vec<RoutingRule>,
}

impl RoutingPath {
    pub fn new(id: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source_step_id: StepId::new(source),
            target_step_ids: Vec::new(),
            rules: Vec::new(),
        }
    }

    pub fn with_rule(mut self, rule: RoutingRule) -> Self {
        self.push_rule(rule);
        self
    }

    /// Append a rule, keeping the list in descending priority order.
    /// Rules of equal priority keep their insertion order.
    pub fn push_rule(&mut self, rule: RoutingRule) {
        if !self.target_step_ids.contains(&rule.target_step_id) {
            self.target_step_ids.push(rule.target_step_id.clone());
        }
        self.rules.push(rule);
        self.rules.sort_by(|a, b| b.priority.cmp(&a.priority));
    }
}

/// Audit entry recorded whenever routing selects a target
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingDecision {
    pub path_id: String,
    pub source_step_id: StepId,
    pub target_step_id: StepId,
    pub matched_rules: Vec<String>,
    pub timestamp: DateTime<Utc>,
}
