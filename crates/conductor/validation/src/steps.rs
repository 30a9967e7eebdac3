//! Step configuration checks
//!
//! Each check inspects the whole step sequence and reports every violation
//! of its category. [`validate_steps`] runs the full suite in order and stops
//! at the first failing category.

use std::collections::{HashMap, HashSet};

use conductor_types::{StepConfig, StepId};
use tracing::debug;

use crate::error::{Result, ValidationError};
use crate::limits::ResourceLimits;

/// Run every step check against `steps`
pub fn validate_steps(steps: &[StepConfig], limits: &ResourceLimits) -> Result<()> {
    if steps.is_empty() {
        return Err(ValidationError::NoSteps);
    }

    validate_required_fields(steps)?;
    validate_unique_ids(steps)?;
    validate_priorities(steps)?;
    validate_resources(steps)?;
    validate_timeouts(steps)?;
    validate_dependencies(steps)?;
    detect_cycles(steps)?;
    validate_aggregate_resources(steps, limits)?;

    debug!(step_count = steps.len(), "step configuration validated");
    Ok(())
}

/// Every step needs a non-blank id, name and description
pub fn validate_required_fields(steps: &[StepConfig]) -> Result<()> {
    let mut violations = Vec::new();

    for (index, step) in steps.iter().enumerate() {
        let label = step_label(index, step);
        if step.id.is_empty() {
            violations.push(format!("{label}: id is required"));
        }
        if step.name.trim().is_empty() {
            violations.push(format!("{label}: name is required"));
        }
        if step.description.trim().is_empty() {
            violations.push(format!("{label}: description is required"));
        }
    }

    into_result(violations, ValidationError::RequiredFields)
}

/// Step ids must be unique within a workflow
pub fn validate_unique_ids(steps: &[StepConfig]) -> Result<()> {
    let mut seen = HashSet::new();
    let mut duplicates = Vec::new();

    for step in steps {
        if !seen.insert(&step.id) && !duplicates.contains(&step.id.to_string()) {
            duplicates.push(step.id.to_string());
        }
    }

    into_result(duplicates, ValidationError::DuplicateStepIds)
}

/// Priorities fall within 0..=100
pub fn validate_priorities(steps: &[StepConfig]) -> Result<()> {
    let violations = steps
        .iter()
        .filter(|s| !(0..=100).contains(&s.priority))
        .map(|s| format!("step '{}' has priority {} (expected 0-100)", s.id, s.priority))
        .collect();

    into_result(violations, ValidationError::Priority)
}

/// Memory, cpu and agent counts are non-negative
pub fn validate_resources(steps: &[StepConfig]) -> Result<()> {
    let mut violations = Vec::new();

    for step in steps {
        let r = &step.resources;
        if r.memory < 0 {
            violations.push(format!("step '{}' has negative memory {}", step.id, r.memory));
        }
        if r.cpu.is_nan() || r.cpu < 0.0 {
            violations.push(format!("step '{}' has invalid cpu {}", step.id, r.cpu));
        }
        if r.agents < 0 {
            violations.push(format!("step '{}' has negative agent count {}", step.id, r.agents));
        }
    }

    into_result(violations, ValidationError::Resources)
}

/// Timeout is positive; retry attempts and delay are non-negative
pub fn validate_timeouts(steps: &[StepConfig]) -> Result<()> {
    let mut violations = Vec::new();

    for step in steps {
        if step.timeout_ms <= 0 {
            violations.push(format!(
                "step '{}' has timeout {}ms (must be > 0)",
                step.id, step.timeout_ms
            ));
        }
        if step.retry.max_attempts < 0 {
            violations.push(format!(
                "step '{}' has retry.maxAttempts {} (must be >= 0)",
                step.id, step.retry.max_attempts
            ));
        }
        if step.retry.delay_ms < 0 {
            violations.push(format!(
                "step '{}' has retry.delay {}ms (must be >= 0)",
                step.id, step.retry.delay_ms
            ));
        }
    }

    into_result(violations, ValidationError::Timing)
}

/// Every dependency names a step in the same sequence
pub fn validate_dependencies(steps: &[StepConfig]) -> Result<()> {
    let known: HashSet<&StepId> = steps.iter().map(|s| &s.id).collect();
    let mut violations = Vec::new();

    for step in steps {
        for dep in &step.dependencies {
            if !known.contains(dep) {
                violations.push(format!("step '{}' depends on unknown step '{}'", step.id, dep));
            }
        }
    }

    into_result(violations, ValidationError::Dependencies)
}

/// Depth-first search with a recursion stack; any back-edge is a cycle.
///
/// Dependencies on unknown steps are ignored here; they are reported by
/// [`validate_dependencies`].
pub fn detect_cycles(steps: &[StepConfig]) -> Result<()> {
    let graph: HashMap<&StepId, &[StepId]> = steps
        .iter()
        .map(|s| (&s.id, s.dependencies.as_slice()))
        .collect();

    let mut visited: HashSet<&StepId> = HashSet::new();
    let mut on_stack: HashSet<&StepId> = HashSet::new();

    for step in steps {
        if let Some(at) = visit(&step.id, &graph, &mut visited, &mut on_stack) {
            return Err(ValidationError::Cycle { at: at.clone() });
        }
    }

    Ok(())
}

fn visit<'a>(
    node: &'a StepId,
    graph: &HashMap<&'a StepId, &'a [StepId]>,
    visited: &mut HashSet<&'a StepId>,
    on_stack: &mut HashSet<&'a StepId>,
) -> Option<&'a StepId> {
    if on_stack.contains(node) {
        return Some(node);
    }
    if !visited.insert(node) {
        return None;
    }

    on_stack.insert(node);
    if let Some(deps) = graph.get(node) {
        for dep in deps.iter() {
            if !graph.contains_key(dep) {
                continue;
            }
            if let Some(at) = visit(dep, graph, visited, on_stack) {
                return Some(at);
            }
        }
    }
    on_stack.remove(node);

    None
}

/// Running sums of step resources stay within the system ceilings.
///
/// The step whose reservation first pushes a sum over its ceiling is named
/// in the violation.
pub fn validate_aggregate_resources(steps: &[StepConfig], limits: &ResourceLimits) -> Result<()> {
    let mut violations = Vec::new();
    let (mut memory, mut cpu, mut agents) = (0i64, 0f64, 0i64);
    let (mut memory_over, mut cpu_over, mut agents_over) = (false, false, false);

    for step in steps {
        let r = &step.resources;
        memory = memory.saturating_add(r.memory.max(0));
        cpu += r.cpu.max(0.0);
        agents = agents.saturating_add(r.agents.max(0));

        if !memory_over && memory > limits.max_memory {
            memory_over = true;
            violations.push(format!(
                "step '{}' raises total memory to {} (limit {})",
                step.id, memory, limits.max_memory
            ));
        }
        if !cpu_over && cpu > limits.max_cpu {
            cpu_over = true;
            violations.push(format!(
                "step '{}' raises total cpu to {} (limit {})",
                step.id, cpu, limits.max_cpu
            ));
        }
        if !agents_over && agents > limits.max_agents {
            agents_over = true;
            violations.push(format!(
                "step '{}' raises total agents to {} (limit {})",
                step.id, agents, limits.max_agents
            ));
        }
    }

    into_result(violations, ValidationError::AggregateResources)
}

fn step_label(index: usize, step: &StepConfig) -> String {
    if step.id.is_empty() {
        format!("step #{index}")
    } else {
        format!("step '{}'", step.id)
    }
}

fn into_result(violations: Vec<String>, wrap: fn(Vec<String>) -> ValidationError) -> Result<()> {
    if violations.is_empty() {
        Ok(())
    } else {
        Err(wrap(violations))
    }
}
