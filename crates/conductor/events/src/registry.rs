//! Per-family subscriber sets.

use conductor_types::{AgentEvent, ControlEvent, EventFamily, StepEvent, TaskEvent};
use parking_lot::RwLock;
use tracing::debug;

use crate::handler::{same_handler, SharedHandler};

/// Ordered set of handlers for one family, keyed by handler identity.
pub struct HandlerSet<E> {
    handlers: RwLock<Vec<SharedHandler<E>>>,
}

impl<E> HandlerSet<E> {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Add `handler`; returns false if it was already registered.
    pub fn add(&self, handler: SharedHandler<E>) -> bool {
        let mut handlers = self.handlers.write();
        if handlers.iter().any(|h| same_handler(h, &handler)) {
            return false;
        }
        handlers.push(handler);
        true
    }

    /// Remove `handler`; returns false if it was not registered.
    pub fn remove(&self, handler: &SharedHandler<E>) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|h| !same_handler(h, handler));
        handlers.len() != before
    }

    /// Handlers registered right now.
    pub fn snapshot(&self) -> Vec<SharedHandler<E>> {
        self.handlers.read().clone()
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    pub fn clear(&self) {
        self.handlers.write().clear();
    }
}

impl<E> Default for HandlerSet<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Subscriber registry for the four event families.
///
/// `on_*` and `off_*` are idempotent.
#[derive(Default)]
pub struct EventRegistry {
    step: HandlerSet<StepEvent>,
    control: HandlerSet<ControlEvent>,
    agent: HandlerSet<AgentEvent>,
    task: HandlerSet<TaskEvent>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_step(&self, handler: SharedHandler<StepEvent>) -> bool {
        Self::log_change(EventFamily::Step, "on", self.step.add(handler))
    }

    pub fn off_step(&self, handler: &SharedHandler<StepEvent>) -> bool {
        Self::log_change(EventFamily::Step, "off", self.step.remove(handler))
    }

    pub fn on_control(&self, handler: SharedHandler<ControlEvent>) -> bool {
        Self::log_change(EventFamily::Control, "on", self.control.add(handler))
    }

    pub fn off_control(&self, handler: &SharedHandler<ControlEvent>) -> bool {
        Self::log_change(EventFamily::Control, "off", self.control.remove(handler))
    }

    pub fn on_agent(&self, handler: SharedHandler<AgentEvent>) -> bool {
        Self::log_change(EventFamily::Agent, "on", self.agent.add(handler))
    }

    pub fn off_agent(&self, handler: &SharedHandler<AgentEvent>) -> bool {
        Self::log_change(EventFamily::Agent, "off", self.agent.remove(handler))
    }

    pub fn on_task(&self, handler: SharedHandler<TaskEvent>) -> bool {
        Self::log_change(EventFamily::Task, "on", self.task.add(handler))
    }

    pub fn off_task(&self, handler: &SharedHandler<TaskEvent>) -> bool {
        Self::log_change(EventFamily::Task, "off", self.task.remove(handler))
    }

    pub fn step_handlers(&self) -> &HandlerSet<StepEvent> {
        &self.step
    }

    pub fn control_handlers(&self) -> &HandlerSet<ControlEvent> {
        &self.control
    }

    pub fn agent_handlers(&self) -> &HandlerSet<AgentEvent> {
        &self.agent
    }

    pub fn task_handlers(&self) -> &HandlerSet<TaskEvent> {
        &self.task
    }

    /// Number of handlers registered for `family`.
    pub fn handler_count(&self, family: EventFamily) -> usize {
        match family {
            EventFamily::Step => self.step.len(),
            EventFamily::Control => self.control.len(),
            EventFamily::Agent => self.agent.len(),
            EventFamily::Task => self.task.len(),
        }
    }

    /// Drop every handler of every family.
    pub fn clear(&self) {
        self.step.clear();
        self.control.clear();
        self.agent.clear();
        self.task.clear();
    }

    fn log_change(family: EventFamily, op: &'static str, changed: bool) -> bool {
        debug!(family = %family, op, changed, "Handler registry change");
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;

    #[test]
    fn on_and_off_are_idempotent() {
        let registry = EventRegistry::new();
        let handler = handler_fn(|_e: StepEvent| async { anyhow::Ok(()) });

        assert!(registry.on_step(handler.clone()));
        assert!(!registry.on_step(handler.clone()));
        assert_eq!(registry.handler_count(EventFamily::Step), 1);

        assert!(registry.off_step(&handler));
        assert!(!registry.off_step(&handler));
        assert_eq!(registry.handler_count(EventFamily::Step), 0);
    }

    #[test]
    fn identity_is_per_allocation() {
        let registry = EventRegistry::new();
        let a = handler_fn(|_e: ControlEvent| async { anyhow::Ok(()) });
        let b = handler_fn(|_e: ControlEvent| async { anyhow::Ok(()) });

        registry.on_control(a.clone());
        registry.on_control(b.clone());
        assert_eq!(registry.handler_count(EventFamily::Control), 2);

        registry.off_control(&a);
        let remaining = registry.control_handlers().snapshot();
        assert_eq!(remaining.len(), 1);
        assert!(same_handler(&remaining[0], &b));
    }

    #[test]
    fn families_are_independent() {
        let registry = EventRegistry::new();
        registry.on_task(handler_fn(|_e: TaskEvent| async { anyhow::Ok(()) }));
        registry.on_agent(handler_fn(|_e: AgentEvent| async { anyhow::Ok(()) }));

        assert_eq!(registry.handler_count(EventFamily::Task), 1);
        assert_eq!(registry.handler_count(EventFamily::Agent), 1);
        assert_eq!(registry.handler_count(EventFamily::Step), 0);

        registry.clear();
        assert_eq!(registry.handler_count(EventFamily::Task), 0);
    }
}
