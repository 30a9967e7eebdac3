//! Validated, concurrent event delivery.
//!
//! Each `emit_*` call:
//!
//! 1. builds a fresh [`EventEnvelope`] (new ids, zeroed metrics)
//! 2. runs the family validator over the draft
//! 3. on success, delivers the typed event to every handler registered at
//!    that moment, concurrently
//! 4. records an `event_emit` metric and publishes the event on the audit
//!    stream
//!
//! A rejected draft reaches no handler.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use conductor_observability::{MetricSample, MetricsSink};
use conductor_types::{
    AgentEvent, ControlEvent, EventEnvelope, EventFamily, EventMetrics, EventValidation,
    StepEvent, TaskEvent, WorkflowEvent, WorkflowId,
};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::draft::{
    validate_agent, validate_control, validate_step, validate_task, AgentEventDraft,
    ControlEventDraft, StepEventDraft, TaskEventDraft,
};
use crate::error::{EventError, Result};
use crate::handler::SharedHandler;
use crate::registry::EventRegistry;

/// Emitter configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmitterConfig {
    /// Component name stamped into `metadata.source`
    #[serde(default = "default_source")]
    pub source: String,

    /// Record an `event_emit` metric per delivered event
    #[serde(default = "default_true")]
    pub record_metrics: bool,

    /// Buffer size of the audit stream
    #[serde(default = "default_audit_capacity")]
    pub audit_capacity: usize,
}

fn default_source() -> String {
    "workflow_manager".to_string()
}

fn default_true() -> bool {
    true
}

fn default_audit_capacity() -> usize {
    4096
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self {
            source: default_source(),
            record_metrics: true,
            audit_capacity: default_audit_capacity(),
        }
    }
}

/// Delivery figures for one emission
struct Delivery {
    handler_count: usize,
    failed_handlers: usize,
    processing_time_ms: f64,
}

/// Builds, validates and fans out workflow events.
pub struct EventEmitter {
    config: EmitterConfig,
    registry: Arc<EventRegistry>,
    metrics: Arc<dyn MetricsSink>,
    audit_tx: broadcast::Sender<WorkflowEvent>,
}

impl EventEmitter {
    pub fn new(metrics: Arc<dyn MetricsSink>) -> Self {
        Self::with_config(EmitterConfig::default(), Arc::new(EventRegistry::new()), metrics)
    }

    pub fn with_config(
        config: EmitterConfig,
        registry: Arc<EventRegistry>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let (audit_tx, _) = broadcast::channel(config.audit_capacity.max(1));
        Self {
            config,
            registry,
            metrics,
            audit_tx,
        }
    }

    /// The subscriber registry this emitter delivers to.
    pub fn registry(&self) -> &Arc<EventRegistry> {
        &self.registry
    }

    /// Every successfully delivered event, across all families.
    pub fn subscribe_audit(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.audit_tx.subscribe()
    }

    pub async fn emit_step(
        &self,
        workflow_id: &WorkflowId,
        draft: StepEventDraft,
    ) -> Result<StepEvent> {
        let errors = validate_step(workflow_id, &self.config.source, &draft);
        let (envelope, step_id) = match (errors.is_empty(), draft.step_id) {
            (true, Some(step_id)) => (self.envelope(workflow_id), step_id),
            _ => return Err(self.reject(workflow_id, EventFamily::Step, errors)),
        };

        let mut event = StepEvent {
            envelope,
            kind: draft.kind,
            step_id,
            agent: draft.agent,
            result: draft.result,
            error: draft.error,
        };

        let handlers = self.registry.step_handlers().snapshot();
        let delivery = deliver(&handlers, &event).await;
        self.finish(&mut event.envelope, EventFamily::Step, event.kind.as_str(), delivery);
        self.publish(event.clone().into());
        Ok(event)
    }

    pub async fn emit_control(
        &self,
        workflow_id: &WorkflowId,
        draft: ControlEventDraft,
    ) -> Result<ControlEvent> {
        let errors = validate_control(workflow_id, &self.config.source, &draft);
        if !errors.is_empty() {
            return Err(self.reject(workflow_id, EventFamily::Control, errors));
        }

        let mut event = ControlEvent {
            envelope: self.envelope(workflow_id),
            kind: draft.kind,
            error: draft.error,
            context: draft.context,
        };

        let handlers = self.registry.control_handlers().snapshot();
        let delivery = deliver(&handlers, &event).await;
        self.finish(&mut event.envelope, EventFamily::Control, event.kind.as_str(), delivery);
        self.publish(event.clone().into());
        Ok(event)
    }

    pub async fn emit_agent(
        &self,
        workflow_id: &WorkflowId,
        draft: AgentEventDraft,
    ) -> Result<AgentEvent> {
        let errors = validate_agent(workflow_id, &self.config.source, &draft);
        let (step_id, agent) = match (errors.is_empty(), draft.step_id, draft.agent) {
            (true, Some(step_id), Some(agent)) => (step_id, agent),
            _ => return Err(self.reject(workflow_id, EventFamily::Agent, errors)),
        };

        let mut event = AgentEvent {
            envelope: self.envelope(workflow_id),
            kind: draft.kind,
            step_id,
            agent,
        };

        let handlers = self.registry.agent_handlers().snapshot();
        let delivery = deliver(&handlers, &event).await;
        self.finish(&mut event.envelope, EventFamily::Agent, event.kind.as_str(), delivery);
        self.publish(event.clone().into());
        Ok(event)
    }

    pub async fn emit_task(
        &self,
        workflow_id: &WorkflowId,
        draft: TaskEventDraft,
    ) -> Result<TaskEvent> {
        let errors = validate_task(workflow_id, &self.config.source, &draft);
        let task = match (errors.is_empty(), draft.task) {
            (true, Some(task)) => task,
            _ => return Err(self.reject(workflow_id, EventFamily::Task, errors)),
        };

        let mut event = TaskEvent {
            envelope: self.envelope(workflow_id),
            kind: draft.kind,
            status: draft.status.unwrap_or(task.status),
            task,
            previous_status: draft.previous_status,
            error: draft.error,
        };

        let handlers = self.registry.task_handlers().snapshot();
        let delivery = deliver(&handlers, &event).await;
        self.finish(&mut event.envelope, EventFamily::Task, event.kind.as_str(), delivery);
        self.publish(event.clone().into());
        Ok(event)
    }

    // ── Internals ────────────────────────────────────────────────────

    fn envelope(&self, workflow_id: &WorkflowId) -> EventEnvelope {
        let mut envelope = EventEnvelope::new(workflow_id.clone(), self.config.source.clone());
        envelope.validation = EventValidation {
            is_valid: true,
            errors: Vec::new(),
            validated_at: Some(Utc::now()),
        };
        envelope
    }

    fn reject(&self, workflow_id: &WorkflowId, family: EventFamily, errors: Vec<String>) -> EventError {
        warn!(
            workflow_id = %workflow_id,
            family = %family,
            errors = ?errors,
            "Event rejected by validation"
        );
        EventError::Validation { family, errors }
    }

    fn finish(
        &self,
        envelope: &mut EventEnvelope,
        family: EventFamily,
        event_type: &str,
        delivery: Delivery,
    ) {
        envelope.metrics = EventMetrics {
            handler_count: delivery.handler_count,
            failed_handlers: delivery.failed_handlers,
            processing_time_ms: delivery.processing_time_ms,
        };

        debug!(
            workflow_id = %envelope.workflow_id,
            event_id = %envelope.id,
            family = %family,
            event_type,
            handlers = delivery.handler_count,
            failed = delivery.failed_handlers,
            "Event delivered"
        );

        if self.config.record_metrics {
            self.metrics.record(
                MetricSample::performance("event_emit", delivery.processing_time_ms)
                    .tag("family", family)
                    .tag("event_type", event_type)
                    .tag("component", &self.config.source)
                    .tag("workflow_id", &envelope.workflow_id),
            );
        }
    }

    fn publish(&self, event: WorkflowEvent) {
        // no audit subscribers is fine
        let _ = self.audit_tx.send(event);
    }
}

/// Run every handler concurrently; failures are counted, never propagated.
async fn deliver<E>(handlers: &[SharedHandler<E>], event: &E) -> Delivery
where
    E: Send + Sync,
{
    let started = Instant::now();
    let outcomes = join_all(handlers.iter().map(|h| h.handle(event))).await;

    let mut failed_handlers = 0;
    for err in outcomes.into_iter().filter_map(|r| r.err()) {
        failed_handlers += 1;
        warn!(error = %err, "Event handler failed");
    }

    Delivery {
        handler_count: handlers.len(),
        failed_handlers,
        processing_time_ms: started.elapsed().as_secs_f64() * 1000.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;
    use conductor_observability::InMemoryMetricsSink;
    use conductor_types::{
        Agent, AgentEventType, ControlEventType, StepEventType, StepId, Task, TaskEventType,
        TaskStatus,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn create_emitter() -> (EventEmitter, Arc<InMemoryMetricsSink>) {
        let metrics = Arc::new(InMemoryMetricsSink::new());
        (EventEmitter::new(metrics.clone()), metrics)
    }

    fn wf() -> WorkflowId {
        WorkflowId::new("wf1")
    }

    fn counting_step_handler(counter: Arc<AtomicUsize>) -> SharedHandler<StepEvent> {
        handler_fn(move |_e: StepEvent| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                anyhow::Ok(())
            }
        })
    }

    #[tokio::test]
    async fn test_step_event_without_step_id_is_not_delivered() {
        let (emitter, metrics) = create_emitter();
        let calls = Arc::new(AtomicUsize::new(0));
        emitter.registry().on_step(counting_step_handler(calls.clone()));

        let err = emitter
            .emit_step(&wf(), StepEventDraft::unbound(StepEventType::Start))
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(err.violations(), ["stepId is required".to_string()]);
        assert!(metrics.samples_of("event_emit").is_empty());
    }

    #[tokio::test]
    async fn test_step_event_reaches_every_handler() {
        let (emitter, metrics) = create_emitter();
        let calls = Arc::new(AtomicUsize::new(0));
        emitter.registry().on_step(counting_step_handler(calls.clone()));
        emitter.registry().on_step(counting_step_handler(calls.clone()));

        let event = emitter
            .emit_step(
                &wf(),
                StepEventDraft::new(StepEventType::Complete, StepId::new("s1"))
                    .with_result(serde_json::json!({"ok": true})),
            )
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(event.envelope.metrics.handler_count, 2);
        assert_eq!(event.envelope.metrics.failed_handlers, 0);
        assert!(event.envelope.validation.is_valid);
        assert_eq!(event.envelope.metadata.correlation_id, "wf1");

        let samples = metrics.samples_of("event_emit");
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].metadata["family"], "step");
        assert_eq!(samples[0].metadata["event_type"], "complete");
        assert_eq!(samples[0].metadata["component"], "workflow_manager");
    }

    #[tokio::test]
    async fn test_failing_handler_does_not_block_others() {
        let (emitter, _) = create_emitter();
        let calls = Arc::new(AtomicUsize::new(0));

        emitter
            .registry()
            .on_control(handler_fn(|_e: ControlEvent| async {
                Err::<(), _>(anyhow::anyhow!("handler exploded"))
            }));
        let counter = calls.clone();
        emitter.registry().on_control(handler_fn(move |_e: ControlEvent| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                anyhow::Ok(())
            }
        }));

        let event = emitter
            .emit_control(&wf(), ControlEventDraft::new(ControlEventType::Start))
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(event.envelope.metrics.handler_count, 2);
        assert_eq!(event.envelope.metrics.failed_handlers, 1);
    }

    #[tokio::test]
    async fn test_unsubscribed_handler_is_not_called() {
        let (emitter, _) = create_emitter();
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = counting_step_handler(calls.clone());

        emitter.registry().on_step(handler.clone());
        emitter.registry().off_step(&handler);
        emitter
            .emit_step(&wf(), StepEventDraft::new(StepEventType::Start, StepId::new("s1")))
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_agent_and_task_events() {
        let (emitter, _) = create_emitter();

        let agent_event = emitter
            .emit_agent(
                &wf(),
                AgentEventDraft::new(AgentEventType::Assign, StepId::new("s1"), Agent::new("a1", "Ada")),
            )
            .await
            .unwrap();
        assert_eq!(agent_event.agent.id.as_str(), "a1");

        let task = Task::new("t1", "write").with_status(TaskStatus::Doing);
        let task_event = emitter
            .emit_task(
                &wf(),
                TaskEventDraft::new(TaskEventType::StatusChange, task)
                    .with_transition(TaskStatus::Todo, TaskStatus::Doing),
            )
            .await
            .unwrap();
        assert_eq!(task_event.status, TaskStatus::Doing);
        assert_eq!(task_event.previous_status, Some(TaskStatus::Todo));
    }

    #[tokio::test]
    async fn test_audit_stream_sees_delivered_events_only() {
        let (emitter, _) = create_emitter();
        let mut audit = emitter.subscribe_audit();

        let _ = emitter
            .emit_control(&wf(), ControlEventDraft::new(ControlEventType::WorkflowError))
            .await;
        emitter
            .emit_control(
                &wf(),
                ControlEventDraft::new(ControlEventType::WorkflowError).with_error("boom"),
            )
            .await
            .unwrap();

        let event = audit.recv().await.unwrap();
        assert_eq!(event.family(), EventFamily::Control);
        assert_eq!(event.type_name(), "workflow_error");
        assert!(audit.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_metrics_can_be_disabled() {
        let metrics = Arc::new(InMemoryMetricsSink::new());
        let emitter = EventEmitter::with_config(
            EmitterConfig {
                record_metrics: false,
                ..Default::default()
            },
            Arc::new(EventRegistry::new()),
            metrics.clone(),
        );

        emitter
            .emit_control(&wf(), ControlEventDraft::new(ControlEventType::Pause))
            .await
            .unwrap();
        assert!(metrics.is_empty());
    }
}
