//! Routing condition evaluation.
//!
//! Pure evaluation, no side effects. Operands are JSON values:
//!
//! - `eq`/`neq`: numeric when both sides read as numbers (so `1`, `1.0`
//!   and `"1"` are equal), structural otherwise
//! - `gt`/`lt`/`gte`/`lte`: numeric, or lexicographic when both sides are
//!   non-numeric strings; anything else never matches
//! - `contains`: substring for strings, element for arrays, key for objects
//! - `matches`: regular expression over the string form of the operand
//!
//! A condition whose field is absent from the step result never matches.
//! Patterns are compiled once and cached on the evaluator.

use std::cmp::Ordering;

use conductor_types::{ConditionOperator, RoutingCondition, RoutingRule};
use dashmap::DashMap;
use regex::Regex;
use serde_json::Value;

/// Evaluates routing conditions against a step result and workflow context.
#[derive(Clone, Debug, Default)]
pub struct ConditionEvaluator {
    patterns: DashMap<String, Regex>,
}

impl ConditionEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when every condition of `rule` holds. A rule without
    /// conditions always matches.
    pub fn rule_matches(&self, rule: &RoutingRule, step_result: &Value, context: &Value) -> bool {
        rule.conditions
            .iter()
            .all(|c| self.evaluate(c, step_result, context))
    }

    pub fn evaluate(&self, condition: &RoutingCondition, step_result: &Value, context: &Value) -> bool {
        let operand = match &condition.field {
            Some(field) => lookup(step_result, field),
            None => Some(context),
        };
        let Some(actual) = operand else {
            return false;
        };
        let expected = &condition.value;

        match condition.operator {
            ConditionOperator::Eq => loosely_equal(actual, expected),
            ConditionOperator::Neq => !loosely_equal(actual, expected),
            ConditionOperator::Gt => compare(actual, expected) == Some(Ordering::Greater),
            ConditionOperator::Lt => compare(actual, expected) == Some(Ordering::Less),
            ConditionOperator::Gte => matches!(
                compare(actual, expected),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            ConditionOperator::Lte => matches!(
                compare(actual, expected),
                Some(Ordering::Less | Ordering::Equal)
            ),
            ConditionOperator::Contains => contains(actual, expected),
            ConditionOperator::Matches => match expected.as_str().map(|p| self.compile(p)) {
                Some(Ok(re)) => re.is_match(&as_text(actual)),
                _ => false,
            },
        }
    }

    /// Check that a condition can be evaluated at all, compiling its
    /// pattern ahead of the first evaluation.
    pub(crate) fn check(&self, condition: &RoutingCondition) -> Result<(), String> {
        if let Some(field) = &condition.field {
            if field.trim().is_empty() || field.split('.').any(|s| s.is_empty()) {
                return Err(format!("malformed field path '{field}'"));
            }
        }
        if condition.operator == ConditionOperator::Matches {
            let Some(pattern) = condition.value.as_str() else {
                return Err("'matches' requires a string pattern".to_string());
            };
            self.compile(pattern)
                .map_err(|e| format!("invalid pattern '{pattern}': {e}"))?;
        }
        Ok(())
    }

    fn compile(&self, pattern: &str) -> Result<Regex, regex::Error> {
        if let Some(re) = self.patterns.get(pattern) {
            return Ok(re.clone());
        }
        let re = Regex::new(pattern)?;
        self.patterns.insert(pattern.to_string(), re.clone());
        Ok(re)
    }

    pub(crate) fn cached_patterns(&self) -> usize {
        self.patterns.len()
    }
}

/// Resolve a dotted path; numeric segments index into arrays.
fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn loosely_equal(actual: &Value, expected: &Value) -> bool {
    match (as_number(actual), as_number(expected)) {
        (Some(a), Some(b)) => a == b,
        _ => actual == expected,
    }
}

fn compare(actual: &Value, expected: &Value) -> Option<Ordering> {
    if let (Some(a), Some(b)) = (as_number(actual), as_number(expected)) {
        return a.partial_cmp(&b);
    }
    match (actual, expected) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn contains(actual: &Value, expected: &Value) -> bool {
    match actual {
        Value::String(haystack) => haystack.contains(as_text(expected).as_str()),
        Value::Array(items) => items.iter().any(|item| loosely_equal(item, expected)),
        Value::Object(map) => expected.as_str().is_some_and(|key| map.contains_key(key)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn eval(field: &str, op: ConditionOperator, expected: Value, result: Value) -> bool {
        ConditionEvaluator::new().evaluate(
            &RoutingCondition::field(field, op, expected),
            &result,
            &Value::Null,
        )
    }

    #[test]
    fn equality_is_numeric_when_possible() {
        assert!(eval("score", ConditionOperator::Eq, json!(1), json!({"score": 1.0})));
        assert!(eval("score", ConditionOperator::Eq, json!("1"), json!({"score": 1})));
        assert!(eval("status", ConditionOperator::Eq, json!("ok"), json!({"status": "ok"})));
        assert!(eval("status", ConditionOperator::Neq, json!("ok"), json!({"status": "bad"})));
    }

    #[test]
    fn ordering_operators() {
        let result = json!({"metrics": {"score": 7}});
        assert!(eval("metrics.score", ConditionOperator::Gt, json!(5), result.clone()));
        assert!(eval("metrics.score", ConditionOperator::Gte, json!(7), result.clone()));
        assert!(eval("metrics.score", ConditionOperator::Lte, json!("7"), result.clone()));
        assert!(!eval("metrics.score", ConditionOperator::Lt, json!(7), result.clone()));
        assert!(!eval("metrics.score", ConditionOperator::Gt, json!(true), result));
    }

    #[test]
    fn contains_by_shape() {
        assert!(eval("text", ConditionOperator::Contains, json!("err"), json!({"text": "an error"})));
        assert!(eval("tags", ConditionOperator::Contains, json!("b"), json!({"tags": ["a", "b"]})));
        assert!(eval("meta", ConditionOperator::Contains, json!("k"), json!({"meta": {"k": 1}})));
        assert!(!eval("n", ConditionOperator::Contains, json!(1), json!({"n": 1})));
    }

    #[test]
    fn regex_matching() {
        assert!(eval("code", ConditionOperator::Matches, json!("^E\\d{3}$"), json!({"code": "E404"})));
        assert!(eval("code", ConditionOperator::Matches, json!("^4"), json!({"code": 404})));
        assert!(!eval("code", ConditionOperator::Matches, json!("(unclosed"), json!({"code": "x"})));
    }

    #[test]
    fn missing_field_never_matches() {
        assert!(!eval("absent", ConditionOperator::Neq, json!(1), json!({"present": 1})));
        assert!(!eval("list.9", ConditionOperator::Eq, json!(1), json!({"list": [1]})));
        assert!(eval("list.0", ConditionOperator::Eq, json!(1), json!({"list": [1]})));
    }

    #[test]
    fn context_conditions() {
        let evaluator = ConditionEvaluator::new();
        let cond = RoutingCondition::context(ConditionOperator::Contains, json!("priority"));
        assert!(evaluator.evaluate(&cond, &Value::Null, &json!({"priority": "high"})));
        assert!(!evaluator.evaluate(&cond, &Value::Null, &json!({})));
    }

    #[test]
    fn rule_requires_all_conditions() {
        let rule = RoutingRule::new("r1", 10, "s3")
            .when(RoutingCondition::field("a", ConditionOperator::Eq, json!(1)))
            .when(RoutingCondition::field("b", ConditionOperator::Eq, json!(2)));
        let evaluator = ConditionEvaluator::new();
        assert!(evaluator.rule_matches(&rule, &json!({"a": 1, "b": 2}), &Value::Null));
        assert!(!evaluator.rule_matches(&rule, &json!({"a": 1, "b": 3}), &Value::Null));
        assert!(evaluator.rule_matches(&RoutingRule::new("any", 0, "s2"), &Value::Null, &Value::Null));
    }

    #[test]
    fn condition_checks() {
        let evaluator = ConditionEvaluator::new();
        assert!(evaluator.check(&RoutingCondition::field("a..b", ConditionOperator::Eq, json!(1))).is_err());
        assert!(evaluator.check(&RoutingCondition::field("a", ConditionOperator::Matches, json!(3))).is_err());
        assert!(evaluator.check(&RoutingCondition::field("a", ConditionOperator::Matches, json!("["))).is_err());
        assert!(evaluator.check(&RoutingCondition::field("a.b", ConditionOperator::Matches, json!("x+"))).is_ok());
        assert_eq!(evaluator.cached_patterns(), 1);
    }

    #[test]
    fn patterns_compile_once() {
        let evaluator = ConditionEvaluator::new();
        let cond = RoutingCondition::field("code", ConditionOperator::Matches, json!("^E\\d+$"));
        assert!(evaluator.evaluate(&cond, &json!({"code": "E1"}), &Value::Null));
        assert!(!evaluator.evaluate(&cond, &json!({"code": "W2"}), &Value::Null));
        assert!(evaluator.evaluate(&cond, &json!({"code": "E300"}), &Value::Null));
        assert_eq!(evaluator.cached_patterns(), 1);

        let broken = RoutingCondition::field("code", ConditionOperator::Matches, json!("(unclosed"));
        assert!(!evaluator.evaluate(&broken, &json!({"code": "x"}), &Value::Null));
        assert_eq!(evaluator.cached_patterns(), 1);
    }

    proptest! {
        #[test]
        fn numeric_comparisons_agree_with_f64(a in -1.0e6f64..1.0e6, b in -1.0e6f64..1.0e6) {
            let result = json!({"v": a});
            prop_assert_eq!(eval("v", ConditionOperator::Gt, json!(b), result.clone()), a > b);
            prop_assert_eq!(eval("v", ConditionOperator::Lte, json!(b), result.clone()), a <= b);
            prop_assert_eq!(eval("v", ConditionOperator::Eq, json!(b), result), a == b);
        }
    }
}
