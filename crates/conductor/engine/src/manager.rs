//! The workflow manager.
//!
//! Owns the lifecycle of every workflow in the process: initialization from
//! a [`WorkflowBlueprint`], the step loop, control operations and error
//! recovery. State lives in the [`StateStore`]; every state-changing action
//! is announced through the [`EventEmitter`]; the workflow-scoped lock and
//! routing tables live in the [`SyncManager`].
//!
//! Status moves along
//!
//! ```text
//! pending ──start──▶ running ──pause──▶ paused ──resume──▶ running
//!                       │                  │
//!                       ├──last step / stop┴──▶ completed ──reset──▶ pending
//!                       └──step error──────────▶ failed ─┬─resume──▶ running
//!                                                        └─reset───▶ pending
//! ```

use std::sync::Arc;

use chrono::Utc;
use conductor_events::{ControlEventDraft, EventEmitter, EventRegistry, StepEventDraft};
use conductor_observability::{ErrorReport, ErrorReporter, MetricSample, MetricsSink, Severity};
use conductor_state::{RecoveryResult, RestoreOptions, SnapshotMetadata, SnapshotReason, StateStore};
use conductor_sync::SyncManager;
use conductor_types::{
    ControlEventType, ErrorRecord, LockType, MetadataPatch, StateUpdate, StepConfig,
    StepEventType, StepResult, StepStatus, WorkflowId, WorkflowMetrics, WorkflowState,
    WorkflowStatus,
};
use conductor_validation::validate_steps;
use dashmap::DashMap;
use serde_json::{json, Value};
use tracing::{debug, error, info, instrument, warn};

use crate::blueprint::{ExecutableSequence, WorkflowBlueprint};
use crate::builder::WorkflowManagerBuilder;
use crate::collaborators::{AgentPool, TaskBackend};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::executor::ExecutionError;
use crate::result::{run, HandlerResult, COMPONENT};

/// Orchestrates workflows over the state store, event emitter and
/// synchronization manager.
pub struct WorkflowManager {
    pub(crate) config: EngineConfig,
    pub(crate) store: Arc<StateStore>,
    pub(crate) events: Arc<EventEmitter>,
    pub(crate) sync: Arc<SyncManager>,
    pub(crate) metrics: Arc<dyn MetricsSink>,
    pub(crate) reporter: Arc<dyn ErrorReporter>,
    pub(crate) agents: Arc<dyn AgentPool>,
    pub(crate) tasks: Arc<dyn TaskBackend>,
    pub(crate) definitions: DashMap<WorkflowId, Arc<WorkflowBlueprint>>,
    pub(crate) sequences: DashMap<WorkflowId, Arc<ExecutableSequence>>,
}

impl WorkflowManager {
    pub fn builder() -> WorkflowManagerBuilder {
        WorkflowManagerBuilder::new()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn events(&self) -> &Arc<EventEmitter> {
        &self.events
    }

    /// Subscriber registry; `on_*`/`off_*` live here.
    pub fn registry(&self) -> &Arc<EventRegistry> {
        self.events.registry()
    }

    pub fn sync(&self) -> &Arc<SyncManager> {
        &self.sync
    }

    pub fn get_state(&self, workflow_id: &WorkflowId) -> Option<WorkflowState> {
        self.store.get_state(workflow_id)
    }

    /// Whether the workflow has a runnable sequence cached.
    pub fn is_initialized(&self, workflow_id: &WorkflowId) -> bool {
        self.sequences.contains_key(workflow_id)
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Validate a definition and write a fresh `pending` state for it.
    ///
    /// Nothing is written when validation fails or no step has an executor.
    #[instrument(skip(self, blueprint), fields(workflow_id = %workflow_id))]
    pub async fn initialize_workflow(
        &self,
        workflow_id: &WorkflowId,
        blueprint: WorkflowBlueprint,
    ) -> HandlerResult<WorkflowState> {
        run("initialize_workflow", workflow_id, self.initialize(workflow_id, blueprint)).await
    }

    /// Run a `pending` workflow from its first step under the workflow lock.
    ///
    /// A step failure is recorded in state and returned as an
    /// [`EngineError::Execution`].
    #[instrument(skip(self, inputs), fields(workflow_id = %workflow_id))]
    pub async fn start_workflow(
        &self,
        workflow_id: &WorkflowId,
        inputs: Value,
    ) -> HandlerResult<WorkflowState> {
        run("start_workflow", workflow_id, self.start(workflow_id, inputs)).await
    }

    /// Flip a `running` workflow to `paused`. The step in flight finishes;
    /// no further step starts.
    #[instrument(skip(self), fields(workflow_id = %workflow_id))]
    pub async fn pause_workflow(&self, workflow_id: &WorkflowId) -> HandlerResult<WorkflowState> {
        run("pause_workflow", workflow_id, self.pause(workflow_id)).await
    }

    /// Continue a `paused` or `failed` workflow by replaying its current
    /// step with the last recorded inputs.
    #[instrument(skip(self), fields(workflow_id = %workflow_id))]
    pub async fn resume_workflow(&self, workflow_id: &WorkflowId) -> HandlerResult<WorkflowState> {
        run("resume_workflow", workflow_id, self.resume(workflow_id)).await
    }

    /// Mark the workflow `completed` and drop its cached sequence.
    #[instrument(skip(self), fields(workflow_id = %workflow_id))]
    pub async fn stop_workflow(&self, workflow_id: &WorkflowId) -> HandlerResult<WorkflowState> {
        run("stop_workflow", workflow_id, self.stop(workflow_id)).await
    }

    /// Return a `completed` or `failed` workflow to `pending` from its
    /// original definition.
    #[instrument(skip(self), fields(workflow_id = %workflow_id))]
    pub async fn reset_workflow(&self, workflow_id: &WorkflowId) -> HandlerResult<WorkflowState> {
        run("reset_workflow", workflow_id, self.reset(workflow_id)).await
    }

    // ── Step outcomes ────────────────────────────────────────────────

    /// Complete the current step with `result` and advance, following a
    /// matching routing rule if there is one.
    #[instrument(skip(self, result), fields(workflow_id = %workflow_id))]
    pub async fn handle_chain_result(
        &self,
        workflow_id: &WorkflowId,
        result: Value,
    ) -> HandlerResult<WorkflowState> {
        run(
            "handle_chain_result",
            workflow_id,
            self.complete_current_step(workflow_id, result),
        )
        .await
    }

    /// Fail the current step and the workflow.
    #[instrument(skip(self, failure), fields(workflow_id = %workflow_id))]
    pub async fn handle_chain_error(
        &self,
        workflow_id: &WorkflowId,
        failure: ExecutionError,
    ) -> HandlerResult<WorkflowState> {
        run(
            "handle_chain_error",
            workflow_id,
            self.fail_current_step(workflow_id, failure),
        )
        .await
    }

    /// Terminal error path: report, force `failed`, announce.
    #[instrument(skip(self, error, context), fields(workflow_id = %workflow_id, kind = error.kind()))]
    pub async fn handle_workflow_error(
        &self,
        workflow_id: &WorkflowId,
        error: &EngineError,
        context: Option<Value>,
    ) -> HandlerResult<WorkflowState> {
        run(
            "handle_workflow_error",
            workflow_id,
            self.workflow_error(workflow_id, error, context),
        )
        .await
    }

    // ── Snapshots ────────────────────────────────────────────────────

    #[instrument(skip(self), fields(workflow_id = %workflow_id))]
    pub async fn create_snapshot(&self, workflow_id: &WorkflowId) -> HandlerResult<SnapshotMetadata> {
        run("create_snapshot", workflow_id, async {
            let snapshot = self
                .store
                .create_snapshot(workflow_id, SnapshotReason::Manual, COMPONENT)
                .await?;
            Ok(snapshot.metadata)
        })
        .await
    }

    /// Restore from a snapshot. A restored workflow that can still run gets
    /// its sequence back.
    #[instrument(skip(self, options), fields(workflow_id = %workflow_id))]
    pub async fn restore_state(
        &self,
        workflow_id: &WorkflowId,
        options: RestoreOptions,
    ) -> HandlerResult<RecoveryResult> {
        run("restore_state", workflow_id, async {
            let recovery = self.store.restore_state(workflow_id, options).await?;
            if let Some(state) = recovery.state.as_ref().filter(|_| recovery.success) {
                if !state.status.is_terminal() {
                    self.rebuild_sequence(workflow_id)?;
                }
            }
            Ok(recovery)
        })
        .await
    }

    // ── Internals ────────────────────────────────────────────────────

    pub(crate) fn require_state(&self, workflow_id: &WorkflowId) -> Result<WorkflowState> {
        self.store
            .get_state(workflow_id)
            .ok_or_else(|| EngineError::WorkflowNotFound(workflow_id.clone()))
    }

    fn sequence(&self, workflow_id: &WorkflowId) -> Result<Arc<ExecutableSequence>> {
        match self.sequences.get(workflow_id) {
            Some(sequence) => Ok(Arc::clone(sequence.value())),
            None if self.store.contains(workflow_id) => {
                Err(EngineError::NotInitialized(workflow_id.clone()))
            }
            None => Err(EngineError::WorkflowNotFound(workflow_id.clone())),
        }
    }

    fn rebuild_sequence(&self, workflow_id: &WorkflowId) -> Result<()> {
        if self.sequences.contains_key(workflow_id) {
            return Ok(());
        }
        let Some(definition) = self.definitions.get(workflow_id).map(|d| Arc::clone(d.value()))
        else {
            return Ok(());
        };
        let sequence = ExecutableSequence::build(workflow_id, &definition)?;
        self.sequences.insert(workflow_id.clone(), Arc::new(sequence));
        Ok(())
    }

    async fn initialize(
        &self,
        workflow_id: &WorkflowId,
        blueprint: WorkflowBlueprint,
    ) -> Result<WorkflowState> {
        if let Some(existing) = self.store.get_state(workflow_id) {
            if matches!(existing.status, WorkflowStatus::Running | WorkflowStatus::Paused) {
                return Err(EngineError::InvalidTransition {
                    from: existing.status,
                    to: WorkflowStatus::Pending,
                });
            }
        }

        validate_steps(&blueprint.steps, &self.config.limits)?;
        blueprint.check_references()?;
        let sequence = ExecutableSequence::build(workflow_id, &blueprint)?;

        let blueprint = Arc::new(blueprint);
        let state = self.install(workflow_id, &blueprint).await?;

        info!(
            workflow_id = %workflow_id,
            steps = state.steps.len(),
            executable = sequence.executable_count(),
            routing_paths = blueprint.routing_paths.len(),
            "Workflow initialized"
        );
        self.sequences.insert(workflow_id.clone(), Arc::new(sequence));
        self.definitions.insert(workflow_id.clone(), blueprint);
        Ok(state)
    }

    /// Wire routing and write the initial state; routing is rolled back if
    /// either part fails.
    async fn install(
        &self,
        workflow_id: &WorkflowId,
        blueprint: &WorkflowBlueprint,
    ) -> Result<WorkflowState> {
        let router = self.sync.router();
        router.clear_workflow(workflow_id);

        for path in &blueprint.routing_paths {
            if let Err(e) = self.sync.add_routing_path(workflow_id, path.clone()) {
                router.clear_workflow(workflow_id);
                return Err(e.into());
            }
        }

        match self
            .store
            .initialize_state(
                workflow_id,
                blueprint.steps.clone(),
                blueprint.initial_state.clone(),
            )
            .await
        {
            Ok(state) => Ok(state),
            Err(e) => {
                router.clear_workflow(workflow_id);
                Err(e.into())
            }
        }
    }

    async fn start(&self, workflow_id: &WorkflowId, inputs: Value) -> Result<WorkflowState> {
        let sequence = self.sequence(workflow_id)?;

        let lock = self
            .sync
            .acquire_lock(workflow_id, &lock_resource(workflow_id), LockType::Exclusive, None)
            .await?;
        let outcome = self.start_locked(workflow_id, &sequence, inputs).await;
        self.sync.release_lock(&lock);
        outcome
    }

    async fn start_locked(
        &self,
        workflow_id: &WorkflowId,
        sequence: &ExecutableSequence,
        inputs: Value,
    ) -> Result<WorkflowState> {
        let state = self.require_state(workflow_id)?;
        if state.status != WorkflowStatus::Pending {
            return Err(EngineError::InvalidTransition {
                from: state.status,
                to: WorkflowStatus::Running,
            });
        }

        self.events
            .emit_control(
                workflow_id,
                ControlEventDraft::new(ControlEventType::Start).with_context(inputs.clone()),
            )
            .await?;
        self.store
            .update_state(
                workflow_id,
                StateUpdate::new()
                    .with_status(WorkflowStatus::Running)
                    .with_metadata(
                        MetadataPatch::new()
                            .start_time(Utc::now())
                            .last_inputs(inputs.clone()),
                    ),
            )
            .await?;
        self.store
            .create_snapshot(workflow_id, SnapshotReason::Checkpoint, COMPONENT)
            .await?;

        info!(workflow_id = %workflow_id, "Workflow started");
        self.drive(workflow_id, sequence, inputs).await
    }

    async fn pause(&self, workflow_id: &WorkflowId) -> Result<WorkflowState> {
        let state = self.require_state(workflow_id)?;
        if state.status != WorkflowStatus::Running {
            return Err(EngineError::InvalidTransition {
                from: state.status,
                to: WorkflowStatus::Paused,
            });
        }

        self.events
            .emit_control(workflow_id, ControlEventDraft::new(ControlEventType::Pause))
            .await?;
        let state = self
            .store
            .update_state(
                workflow_id,
                StateUpdate::new()
                    .with_status(WorkflowStatus::Paused)
                    .with_metadata(MetadataPatch::new().pause_time(Utc::now())),
            )
            .await?;

        info!(workflow_id = %workflow_id, step = state.current_step_index, "Workflow paused");
        Ok(state)
    }

    async fn resume(&self, workflow_id: &WorkflowId) -> Result<WorkflowState> {
        let sequence = self.sequence(workflow_id)?;

        let lock = self
            .sync
            .acquire_lock(workflow_id, &lock_resource(workflow_id), LockType::Exclusive, None)
            .await?;
        let outcome = self.resume_locked(workflow_id, &sequence).await;
        self.sync.release_lock(&lock);
        outcome
    }

    async fn resume_locked(
        &self,
        workflow_id: &WorkflowId,
        sequence: &ExecutableSequence,
    ) -> Result<WorkflowState> {
        let mut state = self.require_state(workflow_id)?;
        if !matches!(state.status, WorkflowStatus::Paused | WorkflowStatus::Failed) {
            return Err(EngineError::InvalidTransition {
                from: state.status,
                to: WorkflowStatus::Running,
            });
        }

        let mut update = StateUpdate::new()
            .with_status(WorkflowStatus::Running)
            .with_metadata(MetadataPatch::new().resume_time(Utc::now()));

        // the failed step is replayed from scratch
        if state.status == WorkflowStatus::Failed {
            if let Some(step_id) = state.current_step().map(|s| s.id.clone()) {
                if let Some(record) = state.step_results.get_mut(&step_id) {
                    record.reset();
                }
                update = update.with_step_results(state.step_results.clone());
            }
        }

        self.events
            .emit_control(workflow_id, ControlEventDraft::new(ControlEventType::Resume))
            .await?;
        self.store.update_state(workflow_id, update).await?;

        info!(
            workflow_id = %workflow_id,
            from = %state.status,
            step = state.current_step_index,
            "Workflow resumed"
        );
        let inputs = state.metadata.last_inputs.unwrap_or(Value::Null);
        self.drive(workflow_id, sequence, inputs).await
    }

    pub(crate) async fn stop(&self, workflow_id: &WorkflowId) -> Result<WorkflowState> {
        let state = self.require_state(workflow_id)?;
        if !state.status.can_transition_to(WorkflowStatus::Completed) {
            return Err(EngineError::InvalidTransition {
                from: state.status,
                to: WorkflowStatus::Completed,
            });
        }

        self.events
            .emit_control(workflow_id, ControlEventDraft::new(ControlEventType::Stop))
            .await?;
        let state = self
            .store
            .update_state(
                workflow_id,
                StateUpdate::new()
                    .with_status(WorkflowStatus::Completed)
                    .with_metadata(MetadataPatch::new().end_time(Utc::now())),
            )
            .await?;
        self.sequences.remove(workflow_id);

        info!(workflow_id = %workflow_id, "Workflow completed");
        Ok(state)
    }

    async fn reset(&self, workflow_id: &WorkflowId) -> Result<WorkflowState> {
        let state = self.require_state(workflow_id)?;
        if !state.status.can_transition_to(WorkflowStatus::Pending) {
            return Err(EngineError::InvalidTransition {
                from: state.status,
                to: WorkflowStatus::Pending,
            });
        }
        let definition = self
            .definitions
            .get(workflow_id)
            .map(|d| Arc::clone(d.value()))
            .ok_or_else(|| EngineError::NotInitialized(workflow_id.clone()))?;
        let sequence = ExecutableSequence::build(workflow_id, &definition)?;

        let checkpoint = self
            .store
            .create_snapshot(workflow_id, SnapshotReason::PreReset, COMPONENT)
            .await?;
        self.events
            .emit_control(workflow_id, ControlEventDraft::new(ControlEventType::Reset))
            .await?;

        self.store.remove_state(workflow_id);
        let fresh = match self.install(workflow_id, &definition).await {
            Ok(fresh) => fresh,
            Err(e) => {
                warn!(workflow_id = %workflow_id, error = %e, "Reset failed, restoring previous state");
                self.store
                    .restore_state(
                        workflow_id,
                        RestoreOptions::specific(checkpoint.id()).skip_validation(),
                    )
                    .await?;
                return Err(e);
            }
        };
        self.sequences.insert(workflow_id.clone(), Arc::new(sequence));

        info!(workflow_id = %workflow_id, from = %state.status, "Workflow reset");
        Ok(fresh)
    }

    // ── Step loop ────────────────────────────────────────────────────

    /// Run steps and settle the outcome. Failures raised outside a step
    /// executor go through the workflow error path before being returned.
    async fn drive(
        &self,
        workflow_id: &WorkflowId,
        sequence: &ExecutableSequence,
        inputs: Value,
    ) -> Result<WorkflowState> {
        match self.run_steps(workflow_id, sequence, inputs).await {
            Ok(None) => self.require_state(workflow_id),
            Ok(Some(recorded)) => Err(recorded),
            Err(error) => {
                if let Err(secondary) = self.workflow_error(workflow_id, &error, None).await {
                    warn!(
                        workflow_id = %workflow_id,
                        error = %secondary,
                        "Could not record workflow failure"
                    );
                }
                Err(error)
            }
        }
    }

    /// Execute steps while the workflow is `running`, each step fed the
    /// previous step's output. Returns the already-recorded failure that
    /// stopped the loop, if any.
    async fn run_steps(
        &self,
        workflow_id: &WorkflowId,
        sequence: &ExecutableSequence,
        inputs: Value,
    ) -> Result<Option<EngineError>> {
        let limit = self.config.execution.max_step_transitions;
        let mut input = inputs;
        let mut transitions = 0usize;

        loop {
            let state = self.require_state(workflow_id)?;
            if state.status != WorkflowStatus::Running {
                debug!(workflow_id = %workflow_id, status = %state.status, "Step loop halted");
                return Ok(None);
            }
            let Some(step) = state.current_step().cloned() else {
                if state.is_complete() {
                    self.stop(workflow_id).await?;
                }
                return Ok(None);
            };

            if transitions >= limit {
                let error = EngineError::Execution {
                    step_id: step.id.clone(),
                    message: format!("exceeded {limit} step transitions"),
                };
                self.workflow_error(
                    workflow_id,
                    &error,
                    Some(json!({ "maxStepTransitions": limit })),
                )
                .await?;
                return Ok(Some(error));
            }
            transitions += 1;

            let index = usize::try_from(state.current_step_index)
                .map_err(|_| EngineError::NoCurrentStep(workflow_id.clone()))?;
            let Some(executor) = sequence.executor_at(index).cloned() else {
                self.skip_current_step(workflow_id, &step).await?;
                continue;
            };

            self.begin_step(workflow_id, state, &step, &input).await?;
            match executor.invoke(input.clone()).await {
                Ok(output) => {
                    self.complete_current_step(workflow_id, output.clone()).await?;
                    input = output;
                }
                Err(failure) => {
                    let failure = failure.normalized();
                    let error = EngineError::Execution {
                        step_id: step.id.clone(),
                        message: failure.message.clone(),
                    };
                    self.fail_current_step(workflow_id, failure).await?;
                    return Ok(Some(error));
                }
            }
        }
    }

    async fn begin_step(
        &self,
        workflow_id: &WorkflowId,
        state: WorkflowState,
        step: &StepConfig,
        input: &Value,
    ) -> Result<()> {
        let agent = state.assigned_agents.get(&step.id).cloned();
        let mut record = StepResult::started(step.id.clone());
        if let Some(agent) = &agent {
            record = record.with_agent(agent.id.clone());
        }
        let mut results = state.step_results;
        results.insert(step.id.clone(), record);

        self.store
            .update_state(
                workflow_id,
                StateUpdate::new()
                    .with_step_results(results)
                    .with_metadata(MetadataPatch::new().last_inputs(input.clone())),
            )
            .await?;

        let mut draft = StepEventDraft::new(StepEventType::Start, step.id.clone());
        if let Some(agent) = agent {
            draft = draft.with_agent(agent);
        }
        self.events.emit_step(workflow_id, draft).await?;
        debug!(workflow_id = %workflow_id, step_id = %step.id, "Step started");
        Ok(())
    }

    async fn skip_current_step(&self, workflow_id: &WorkflowId, step: &StepConfig) -> Result<()> {
        let mut state = self.require_state(workflow_id)?;
        let mut record = StepResult::started(step.id.clone());
        record.skip();
        state.step_results.insert(step.id.clone(), record);

        self.events
            .emit_step(
                workflow_id,
                StepEventDraft::new(StepEventType::Skip, step.id.clone()),
            )
            .await?;
        let updated = self
            .store
            .update_state(
                workflow_id,
                StateUpdate::new()
                    .with_step_results(state.step_results)
                    .with_current_step_index(state.current_step_index + 1),
            )
            .await?;

        debug!(workflow_id = %workflow_id, step_id = %step.id, "Step skipped, no executor");
        if updated.is_complete() && updated.status.can_transition_to(WorkflowStatus::Completed) {
            self.stop(workflow_id).await?;
        }
        Ok(())
    }

    async fn complete_current_step(
        &self,
        workflow_id: &WorkflowId,
        result: Value,
    ) -> Result<WorkflowState> {
        let mut state = self.require_state(workflow_id)?;
        let step = state
            .current_step()
            .cloned()
            .ok_or_else(|| EngineError::NoCurrentStep(workflow_id.clone()))?;

        let duration_ms = {
            let record = state
                .step_results
                .entry(step.id.clone())
                .or_insert_with(|| StepResult::started(step.id.clone()));
            record.complete(result.clone());
            record.metrics.duration_ms
        };

        self.events
            .emit_step(
                workflow_id,
                StepEventDraft::new(StepEventType::Complete, step.id.clone())
                    .with_result(result.clone()),
            )
            .await?;

        let linear = state.current_step_index + 1;
        let context = routing_context(&state);
        let next = match self
            .sync
            .get_next_step(workflow_id, &step.id, &result, &context)
        {
            Some(target) => match state.step_index(&target) {
                Some(index) => index as i64,
                None => {
                    warn!(
                        workflow_id = %workflow_id,
                        target = %target,
                        "Routing target is not a step, continuing in order"
                    );
                    linear
                }
            },
            None => linear,
        };

        record_step_outcome(&mut state.metrics, duration_ms, true);
        let updated = self
            .store
            .update_state(
                workflow_id,
                StateUpdate::new()
                    .with_step_results(state.step_results)
                    .with_current_step_index(next)
                    .with_metrics(state.metrics)
                    .with_metadata(MetadataPatch::new().last_inputs(result)),
            )
            .await?;

        self.metrics.record(
            MetricSample::performance("step_duration", duration_ms as f64)
                .tag("component", COMPONENT)
                .tag("workflow_id", workflow_id)
                .tag("step_id", &step.id),
        );
        debug!(
            workflow_id = %workflow_id,
            step_id = %step.id,
            next,
            duration_ms,
            "Step completed"
        );

        if updated.is_complete() && updated.status.can_transition_to(WorkflowStatus::Completed) {
            return self.stop(workflow_id).await;
        }
        Ok(updated)
    }

    async fn fail_current_step(
        &self,
        workflow_id: &WorkflowId,
        failure: ExecutionError,
    ) -> Result<WorkflowState> {
        let failure = failure.normalized();
        let mut state = self.require_state(workflow_id)?;
        let step = state
            .current_step()
            .cloned()
            .ok_or_else(|| EngineError::NoCurrentStep(workflow_id.clone()))?;

        state
            .step_results
            .entry(step.id.clone())
            .or_insert_with(|| StepResult::started(step.id.clone()))
            .fail(failure.message.clone());

        let mut record = ErrorRecord::new("execution_error", failure.message.clone())
            .for_step(step.id.clone());
        if let Some(context) = failure.context.clone() {
            record = record.with_context(context);
        }
        state.errors.push(record);
        record_step_outcome(&mut state.metrics, 0, false);

        // commit before announcing so a rejected event cannot drop the failure
        let mut update = StateUpdate::new()
            .with_step_results(state.step_results)
            .with_errors(state.errors)
            .with_metrics(state.metrics)
            .with_metadata(MetadataPatch::new().end_time(Utc::now()));
        if state.status.can_transition_to(WorkflowStatus::Failed) {
            update = update.with_status(WorkflowStatus::Failed);
        }
        let updated = self.store.update_state(workflow_id, update).await?;

        error!(
            workflow_id = %workflow_id,
            step_id = %step.id,
            error = %failure,
            "Step failed"
        );
        self.reporter.report(
            &ErrorReport::new(COMPONENT, "handle_chain_error", failure.message.clone())
                .with_severity(Severity::High)
                .with_context("workflow_id", workflow_id)
                .with_context("step_id", &step.id),
        );

        self.events
            .emit_step(
                workflow_id,
                StepEventDraft::new(StepEventType::Error, step.id.clone())
                    .with_error(failure.message),
            )
            .await?;
        Ok(updated)
    }

    pub(crate) async fn workflow_error(
        &self,
        workflow_id: &WorkflowId,
        error: &EngineError,
        context: Option<Value>,
    ) -> Result<WorkflowState> {
        let kind = error.kind();
        let severity = severity_for(error);
        let message = error.to_string();

        error!(
            workflow_id = %workflow_id,
            kind,
            severity = ?severity,
            error = %message,
            "Workflow error"
        );
        self.reporter.report(
            &ErrorReport::new(COMPONENT, "handle_workflow_error", message.clone())
                .with_severity(severity)
                .recoverable(false)
                .with_context("workflow_id", workflow_id)
                .with_context("kind", kind),
        );

        let mut state = self.require_state(workflow_id)?;
        let detail = json!({ "kind": kind, "context": context });
        let mut record = ErrorRecord::new("workflow_error", message.clone()).with_context(detail.clone());
        if let EngineError::Execution { step_id, .. } = error {
            record = record.for_step(step_id.clone());
        }
        state.errors.push(record);

        let mut update = StateUpdate::new()
            .with_errors(state.errors)
            .with_metadata(MetadataPatch::new().end_time(Utc::now()));
        if state.status.can_transition_to(WorkflowStatus::Failed) {
            update = update.with_status(WorkflowStatus::Failed);
        }
        let updated = self.store.update_state(workflow_id, update).await?;

        self.events
            .emit_control(
                workflow_id,
                ControlEventDraft::new(ControlEventType::WorkflowError)
                    .with_error(message)
                    .with_context(detail),
            )
            .await?;
        self.metrics.record(
            MetricSample::performance("workflow_error", 0.0)
                .tag("component", COMPONENT)
                .tag("workflow_id", workflow_id)
                .tag("kind", kind)
                .tag("recoverable", false),
        );
        Ok(updated)
    }
}

fn lock_resource(workflow_id: &WorkflowId) -> String {
    format!("workflow:{workflow_id}")
}

fn severity_for(error: &EngineError) -> Severity {
    match error {
        EngineError::Validation(_) | EngineError::Sync(_) => Severity::Medium,
        EngineError::State(_) | EngineError::Config(_) => Severity::Critical,
        _ => Severity::High,
    }
}

/// Context handed to routing conditions that have no field path.
fn routing_context(state: &WorkflowState) -> Value {
    let completed: Vec<_> = state
        .steps
        .iter()
        .filter(|s| {
            state
                .step_results
                .get(&s.id)
                .is_some_and(|r| r.status == StepStatus::Completed)
        })
        .map(|s| &s.id)
        .collect();

    json!({
        "inputs": state.metadata.last_inputs,
        "metadata": state.metadata.extra,
        "completedSteps": completed,
        "currentStepIndex": state.current_step_index,
    })
}

fn record_step_outcome(metrics: &mut WorkflowMetrics, duration_ms: i64, succeeded: bool) {
    let now = Utc::now();

    let perf = &mut metrics.performance;
    if succeeded {
        perf.completed_steps += 1;
        perf.total_duration_ms += duration_ms.max(0) as f64;
    } else {
        perf.failed_steps += 1;
    }
    if perf.completed_steps > 0 {
        perf.average_step_duration_ms = perf.total_duration_ms / perf.completed_steps as f64;
    }
    perf.measured_at = Some(now);

    let finished = (perf.completed_steps + perf.failed_steps).max(1);
    let usage = &mut metrics.usage;
    usage.step_executions += 1;
    usage.success_rate_percent = perf.completed_steps as f64 / finished as f64 * 100.0;
    usage.measured_at = Some(now);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_outcomes_roll_up() {
        let mut metrics = WorkflowMetrics::default();
        record_step_outcome(&mut metrics, 40, true);
        record_step_outcome(&mut metrics, 20, true);
        record_step_outcome(&mut metrics, 0, false);

        assert_eq!(metrics.performance.completed_steps, 2);
        assert_eq!(metrics.performance.failed_steps, 1);
        assert_eq!(metrics.performance.total_duration_ms, 60.0);
        assert_eq!(metrics.performance.average_step_duration_ms, 30.0);
        assert_eq!(metrics.usage.step_executions, 3);
        assert!((metrics.usage.success_rate_percent - 200.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn routing_context_lists_completed_steps() {
        let mut state = WorkflowState::new(
            WorkflowId::new("wf1"),
            "wf1",
            vec![
                StepConfig::new("s1", "One", "first"),
                StepConfig::new("s2", "Two", "second"),
            ],
        );
        let mut done = StepResult::started(conductor_types::StepId::new("s1"));
        done.complete(json!({}));
        state.step_results.insert(done.step_id.clone(), done);
        state
            .step_results
            .insert(conductor_types::StepId::new("s2"), StepResult::started(conductor_types::StepId::new("s2")));

        let context = routing_context(&state);
        assert_eq!(context["completedSteps"], json!(["s1"]));
        assert_eq!(context["currentStepIndex"], json!(0));
    }

    #[test]
    fn lock_resource_is_workflow_scoped() {
        assert_eq!(lock_resource(&WorkflowId::new("wf1")), "workflow:wf1");
    }
}
