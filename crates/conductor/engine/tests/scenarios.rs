//! End-to-end workflow scenarios against an in-process manager.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use conductor_engine::{
    executor_fn, AgentError, AgentPool, EngineConfig, EngineError, ExecutionError,
    SharedExecutor, TaskBackend, TaskErrorNotification, TaskStatusChange, WorkflowBlueprint,
    WorkflowManager,
};
use conductor_events::handler_fn;
use conductor_observability::{InMemoryErrorReporter, InMemoryMetricsSink};
use conductor_state::{RestoreOptions, StateChange};
use conductor_sync::LockOptions;
use conductor_types::{
    Agent, AgentId, ConditionOperator, ControlEvent, ControlEventType, RoutingCondition,
    RoutingPath, RoutingRule, StepConfig, StepId, StepStatus, Task, TaskId, TaskStatus,
    WorkflowEvent, WorkflowId, WorkflowStatus,
};
use conductor_validation::ValidationError;
use serde_json::{json, Value};

// ── Fixtures ─────────────────────────────────────────────────────────

fn wf(id: &str) -> WorkflowId {
    WorkflowId::new(id)
}

fn step(id: &str) -> StepConfig {
    StepConfig::new(id, format!("Step {id}"), format!("runs {id}"))
}

/// s1 <- s2 <- ... <- sN
fn linear_steps(n: usize) -> Vec<StepConfig> {
    (1..=n)
        .map(|i| {
            let s = step(&format!("s{i}"));
            if i > 1 {
                s.depends_on(format!("s{}", i - 1))
            } else {
                s
            }
        })
        .collect()
}

fn add_one() -> SharedExecutor {
    executor_fn(|v: Value| async move {
        let n = v["n"].as_i64().unwrap_or(0);
        Ok(json!({ "n": n + 1 }))
    })
}

fn failing(message: &'static str) -> SharedExecutor {
    executor_fn(move |_: Value| async move { Err(ExecutionError::new(message)) })
}

fn slow(ms: u64) -> SharedExecutor {
    executor_fn(move |v: Value| async move {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(v)
    })
}

fn test_config() -> EngineConfig {
    EngineConfig {
        locking: LockOptions::new(1000, 2, 10),
        ..EngineConfig::default()
    }
}

fn create_manager() -> WorkflowManager {
    WorkflowManager::builder().with_config(test_config()).build()
}

fn linear_blueprint(n: usize) -> WorkflowBlueprint {
    (1..=n).fold(WorkflowBlueprint::new(linear_steps(n)), |bp, i| {
        bp.with_executor(format!("s{i}"), add_one())
    })
}

fn control_log(manager: &WorkflowManager) -> Arc<Mutex<Vec<ControlEventType>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    manager.registry().on_control(handler_fn(move |event: ControlEvent| {
        let sink = Arc::clone(&sink);
        async move {
            sink.lock().unwrap().push(event.kind);
            anyhow::Ok(())
        }
    }));
    log
}

// ── Initialization ───────────────────────────────────────────────────

#[tokio::test]
async fn test_dependency_validation_names_missing_step() {
    let manager = create_manager();

    let mut steps = vec![
        step("s1"),
        step("s2").depends_on("s1"),
        step("s3").depends_on("s2").depends_on("s1"),
    ];
    let ok = manager
        .initialize_workflow(&wf("good"), WorkflowBlueprint::new(steps.clone()).with_executor("s1", add_one()))
        .await
        .unwrap();
    assert_eq!(ok.value.status, WorkflowStatus::Pending);
    assert_eq!(ok.value.steps.len(), 3);

    steps.push(step("s4").depends_on("s5"));
    let failure = manager
        .initialize_workflow(&wf("bad"), WorkflowBlueprint::new(steps).with_executor("s1", add_one()))
        .await
        .unwrap_err();
    assert!(matches!(
        failure.error,
        EngineError::Validation(ValidationError::Dependencies(_))
    ));
    assert!(failure.error.to_string().contains("s5"));
    assert_eq!(failure.metadata.operation, "initialize_workflow");
    assert!(manager.get_state(&wf("bad")).is_none());
}

#[tokio::test]
async fn test_initialize_requires_an_executor() {
    let manager = create_manager();
    let failure = manager
        .initialize_workflow(&wf("wf1"), WorkflowBlueprint::new(linear_steps(2)))
        .await
        .unwrap_err();

    assert!(matches!(failure.error, EngineError::NoExecutableSteps(_)));
    assert!(manager.get_state(&wf("wf1")).is_none());
    assert!(!manager.is_initialized(&wf("wf1")));
}

#[tokio::test]
async fn test_start_requires_initialization() {
    let manager = create_manager();
    let failure = manager.start_workflow(&wf("ghost"), json!({})).await.unwrap_err();
    assert!(failure.error.is_not_found());
}

// ── Execution ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_linear_workflow_completes() {
    let metrics = Arc::new(InMemoryMetricsSink::new());
    let manager = WorkflowManager::builder()
        .with_config(test_config())
        .with_metrics(metrics.clone())
        .build();
    let controls = control_log(&manager);
    let id = wf("wf1");

    manager.initialize_workflow(&id, linear_blueprint(3)).await.unwrap();
    let state = manager
        .start_workflow(&id, json!({ "n": 0 }))
        .await
        .unwrap()
        .into_value();

    assert_eq!(state.status, WorkflowStatus::Completed);
    assert_eq!(state.current_step_index, 3);
    assert!(state.metadata.start_time.is_some());
    assert!(state.metadata.end_time.is_some());
    assert_eq!(state.step_results[&StepId::new("s3")].result, Some(json!({ "n": 3 })));
    assert_eq!(state.metrics.performance.completed_steps, 3);
    assert_eq!(state.metrics.usage.success_rate_percent, 100.0);

    assert_eq!(
        *controls.lock().unwrap(),
        vec![ControlEventType::Start, ControlEventType::Stop]
    );
    assert_eq!(metrics.samples_of("step_duration").len(), 3);
    // the lock is gone and the sequence was discarded
    assert!(manager.sync().active_lock("workflow:wf1").is_none());
    assert!(!manager.is_initialized(&id));
}

#[tokio::test]
async fn test_failing_step_fails_workflow() {
    let reporter = Arc::new(InMemoryErrorReporter::new());
    let manager = WorkflowManager::builder()
        .with_config(test_config())
        .with_error_reporter(reporter.clone())
        .build();
    let id = wf("wf1");

    let blueprint = WorkflowBlueprint::new(linear_steps(3))
        .with_executor("s1", add_one())
        .with_executor("s2", add_one())
        .with_executor("s3", failing("model timed out"));
    manager.initialize_workflow(&id, blueprint).await.unwrap();

    let failure = manager.start_workflow(&id, json!({ "n": 0 })).await.unwrap_err();
    assert!(matches!(
        &failure.error,
        EngineError::Execution { step_id, .. } if step_id.as_str() == "s3"
    ));

    let state = manager.get_state(&id).unwrap();
    assert_eq!(state.status, WorkflowStatus::Failed);
    assert_eq!(state.step_results[&StepId::new("s1")].status, StepStatus::Completed);
    assert_eq!(state.step_results[&StepId::new("s2")].status, StepStatus::Completed);
    assert_eq!(state.step_results[&StepId::new("s3")].status, StepStatus::Failed);
    assert_eq!(state.errors.len(), 1);
    assert_eq!(state.errors[0].kind, "execution_error");
    assert_eq!(state.errors[0].step_id, Some(StepId::new("s3")));
    assert_eq!(state.metrics.performance.failed_steps, 1);
    assert_eq!(reporter.len(), 1);
    assert!(manager.sync().active_lock("workflow:wf1").is_none());
}

#[tokio::test]
async fn test_blank_failure_message_is_still_recorded() {
    let manager = create_manager();
    let id = wf("wf1");
    let blueprint = WorkflowBlueprint::new(linear_steps(2))
        .with_executor("s1", failing(""))
        .with_executor("s2", add_one());
    manager.initialize_workflow(&id, blueprint).await.unwrap();

    let failure = manager.start_workflow(&id, json!({ "n": 0 })).await.unwrap_err();
    assert_eq!(failure.error.kind(), "execution_error");
    assert!(matches!(
        &failure.error,
        EngineError::Execution { step_id, message } if step_id.as_str() == "s1" && !message.trim().is_empty()
    ));

    let state = manager.get_state(&id).unwrap();
    assert_eq!(state.status, WorkflowStatus::Failed);
    assert_eq!(state.step_results[&StepId::new("s1")].status, StepStatus::Failed);
    assert_eq!(state.errors.len(), 1);
    assert_eq!(state.errors[0].kind, "execution_error");
    assert!(!state.errors[0].message.trim().is_empty());
    assert!(manager.sync().active_lock("workflow:wf1").is_none());
}

#[tokio::test]
async fn test_steps_without_executor_are_skipped() {
    let manager = create_manager();
    let id = wf("wf1");
    let blueprint = WorkflowBlueprint::new(linear_steps(3))
        .with_executor("s1", add_one())
        .with_executor("s3", add_one());
    manager.initialize_workflow(&id, blueprint).await.unwrap();

    let state = manager.start_workflow(&id, json!({ "n": 0 })).await.unwrap().into_value();
    assert_eq!(state.status, WorkflowStatus::Completed);
    assert_eq!(state.step_results[&StepId::new("s2")].status, StepStatus::Skipped);
    assert_eq!(state.step_results[&StepId::new("s3")].result, Some(json!({ "n": 2 })));
}

#[tokio::test]
async fn test_routing_overrides_linear_order() {
    let manager = create_manager();
    let id = wf("wf1");
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);

    let blueprint = WorkflowBlueprint::new(linear_steps(3))
        .with_executor(
            "s1",
            executor_fn(|_: Value| async move { Ok(json!({ "route": "fast" })) }),
        )
        .with_executor(
            "s2",
            executor_fn(move |v: Value| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(v)
                }
            }),
        )
        .with_executor("s3", add_one())
        .with_routing_path(
            RoutingPath::new("shortcut", "s1").with_rule(RoutingRule::new("fast", 10, "s3").when(
                RoutingCondition::field("route", ConditionOperator::Eq, json!("fast")),
            )),
        );
    manager.initialize_workflow(&id, blueprint).await.unwrap();

    let state = manager.start_workflow(&id, json!({})).await.unwrap().into_value();
    assert_eq!(state.status, WorkflowStatus::Completed);
    assert_eq!(seen.load(Ordering::SeqCst), 0);
    assert!(!state.step_results.contains_key(&StepId::new("s2")));

    let history = manager.sync().routing_history(&id);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].target_step_id, StepId::new("s3"));
}

#[tokio::test]
async fn test_routing_loop_is_bounded() {
    let mut config = test_config();
    config.execution.max_step_transitions = 5;
    let manager = WorkflowManager::builder().with_config(config).build();
    let id = wf("wf1");

    let blueprint = WorkflowBlueprint::new(linear_steps(2))
        .with_executor("s1", add_one())
        .with_executor("s2", add_one())
        .with_routing_path(RoutingPath::new("again", "s1").with_rule(RoutingRule::new("loop", 1, "s1")));
    manager.initialize_workflow(&id, blueprint).await.unwrap();

    let failure = manager.start_workflow(&id, json!({ "n": 0 })).await.unwrap_err();
    assert_eq!(failure.error.kind(), "execution_error");

    let state = manager.get_state(&id).unwrap();
    assert_eq!(state.status, WorkflowStatus::Failed);
    assert_eq!(state.errors.len(), 1);
    assert_eq!(state.errors[0].kind, "workflow_error");
    assert_eq!(state.metrics.performance.completed_steps, 5);
}

// ── Locking ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_concurrent_start_hits_the_lock() {
    let manager = create_manager();
    let id = wf("wf1");
    let blueprint = WorkflowBlueprint::new(linear_steps(1)).with_executor("s1", slow(200));
    manager.initialize_workflow(&id, blueprint).await.unwrap();

    let (first, second) = tokio::join!(manager.start_workflow(&id, json!({})), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        manager.start_workflow(&id, json!({})).await
    });

    let first = first.unwrap().into_value();
    assert_eq!(first.status, WorkflowStatus::Completed);

    let second = second.unwrap_err();
    assert_eq!(second.error.kind(), "lock_error");
    assert_eq!(first.errors.len(), 0);
}

// ── Control ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_pause_then_resume_continues_from_next_step() {
    let manager = create_manager();
    let controls = control_log(&manager);
    let id = wf("wf1");

    let blueprint = WorkflowBlueprint::new(linear_steps(2))
        .with_executor(
            "s1",
            executor_fn(|_: Value| async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(json!({ "n": 10 }))
            }),
        )
        .with_executor("s2", add_one());
    manager.initialize_workflow(&id, blueprint).await.unwrap();

    let (started, paused) = tokio::join!(manager.start_workflow(&id, json!({ "n": 0 })), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        manager.pause_workflow(&id).await
    });

    assert_eq!(paused.unwrap().value.status, WorkflowStatus::Paused);
    let halted = started.unwrap().into_value();
    assert_eq!(halted.status, WorkflowStatus::Paused);
    assert_eq!(halted.current_step_index, 1);
    assert!(!halted.step_results.contains_key(&StepId::new("s2")));
    assert!(halted.metadata.pause_time.is_some());

    let resumed = manager.resume_workflow(&id).await.unwrap().into_value();
    assert_eq!(resumed.status, WorkflowStatus::Completed);
    assert_eq!(resumed.step_results[&StepId::new("s2")].result, Some(json!({ "n": 11 })));
    assert!(resumed.metadata.resume_time.is_some());

    assert_eq!(
        *controls.lock().unwrap(),
        vec![
            ControlEventType::Start,
            ControlEventType::Pause,
            ControlEventType::Resume,
            ControlEventType::Stop
        ]
    );
}

#[tokio::test]
async fn test_resume_replays_failed_step() {
    let manager = create_manager();
    let id = wf("wf1");
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);

    let flaky = executor_fn(move |v: Value| {
        let counter = Arc::clone(&counter);
        async move {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(ExecutionError::new("transient"));
            }
            Ok(json!({ "n": v["n"].as_i64().unwrap_or(0) * 100 }))
        }
    });
    let blueprint = WorkflowBlueprint::new(linear_steps(2))
        .with_executor("s1", add_one())
        .with_executor("s2", flaky);
    manager.initialize_workflow(&id, blueprint).await.unwrap();

    manager.start_workflow(&id, json!({ "n": 1 })).await.unwrap_err();
    assert_eq!(manager.get_state(&id).unwrap().status, WorkflowStatus::Failed);

    let state = manager.resume_workflow(&id).await.unwrap().into_value();
    assert_eq!(state.status, WorkflowStatus::Completed);
    // replayed with s1's output
    assert_eq!(state.step_results[&StepId::new("s2")].result, Some(json!({ "n": 200 })));
    assert_eq!(state.step_results[&StepId::new("s2")].status, StepStatus::Completed);
    assert_eq!(state.errors.len(), 1);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_invalid_transitions_are_rejected() {
    let manager = create_manager();
    let id = wf("wf1");
    manager.initialize_workflow(&id, linear_blueprint(1)).await.unwrap();

    let failure = manager.pause_workflow(&id).await.unwrap_err();
    assert!(matches!(
        failure.error,
        EngineError::InvalidTransition {
            from: WorkflowStatus::Pending,
            to: WorkflowStatus::Paused
        }
    ));
    assert!(manager.resume_workflow(&id).await.is_err());

    manager.start_workflow(&id, json!({})).await.unwrap();
    // sequence discarded on completion
    let again = manager.start_workflow(&id, json!({})).await.unwrap_err();
    assert!(matches!(again.error, EngineError::NotInitialized(_)));
}

#[tokio::test]
async fn test_stop_and_reset() {
    let manager = create_manager();
    let id = wf("wf1");
    manager.initialize_workflow(&id, linear_blueprint(2)).await.unwrap();

    let stopped = manager.stop_workflow(&id).await.unwrap().into_value();
    assert_eq!(stopped.status, WorkflowStatus::Completed);
    assert!(!manager.is_initialized(&id));

    let mut changes = manager.store().subscribe();
    let fresh = manager.reset_workflow(&id).await.unwrap().into_value();
    assert_eq!(fresh.status, WorkflowStatus::Pending);
    assert_eq!(fresh.current_step_index, 0);
    assert!(manager.is_initialized(&id));

    let mut seen = Vec::new();
    while let Ok(change) = changes.try_recv() {
        seen.push(change);
    }
    let removed = seen
        .iter()
        .position(|c| matches!(c, StateChange::Removed { workflow_id } if workflow_id == &id))
        .expect("reset drops the old state");
    let initialized = seen
        .iter()
        .position(|c| matches!(c, StateChange::Initialized { workflow_id } if workflow_id == &id))
        .expect("reset installs a fresh state");
    assert!(removed < initialized);

    let done = manager.start_workflow(&id, json!({ "n": 5 })).await.unwrap().into_value();
    assert_eq!(done.step_results[&StepId::new("s2")].result, Some(json!({ "n": 7 })));

    let snapshots = manager.store().list_snapshots(&id).await.unwrap();
    assert!(snapshots
        .iter()
        .any(|s| s.reason == conductor_state::SnapshotReason::PreReset));
}

#[tokio::test]
async fn test_external_chain_outcomes() {
    let manager = create_manager();
    let id = wf("wf1");
    manager.initialize_workflow(&id, linear_blueprint(2)).await.unwrap();

    let state = manager
        .handle_chain_result(&id, json!({ "n": 1 }))
        .await
        .unwrap()
        .into_value();
    assert_eq!(state.current_step_index, 1);
    assert_eq!(state.step_results[&StepId::new("s1")].status, StepStatus::Completed);
    assert_eq!(state.metadata.last_inputs, Some(json!({ "n": 1 })));

    let state = manager
        .handle_chain_error(
            &id,
            ExecutionError::new("upstream 503").with_context(json!({ "status": 503 })),
        )
        .await
        .unwrap()
        .into_value();
    assert_eq!(state.status, WorkflowStatus::Failed);
    let s2 = &state.step_results[&StepId::new("s2")];
    assert_eq!(s2.status, StepStatus::Failed);
    assert_eq!(s2.error.as_deref(), Some("upstream 503"));
    assert_eq!(state.errors[0].context, Some(json!({ "status": 503 })));
}

// ── Errors ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_workflow_error_path() {
    let reporter = Arc::new(InMemoryErrorReporter::new());
    let metrics = Arc::new(InMemoryMetricsSink::new());
    let manager = WorkflowManager::builder()
        .with_config(test_config())
        .with_error_reporter(reporter.clone())
        .with_metrics(metrics.clone())
        .build();
    let controls = control_log(&manager);
    let id = wf("wf1");
    manager.initialize_workflow(&id, linear_blueprint(1)).await.unwrap();

    let error = EngineError::TaskFailed {
        task_id: TaskId::new("t1"),
        message: "backend unreachable".into(),
    };
    let state = manager
        .handle_workflow_error(&id, &error, Some(json!({ "attempt": 1 })))
        .await
        .unwrap()
        .into_value();

    assert_eq!(state.status, WorkflowStatus::Failed);
    assert_eq!(state.errors.len(), 1);
    assert_eq!(state.errors[0].kind, "workflow_error");
    assert_eq!(state.errors[0].context.as_ref().unwrap()["context"]["attempt"], json!(1));
    assert_eq!(*controls.lock().unwrap(), vec![ControlEventType::WorkflowError]);

    let reports = reporter.reports();
    assert_eq!(reports.len(), 1);
    assert!(!reports[0].recoverable);

    let samples = metrics.samples_of("workflow_error");
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].value, 0.0);
    assert_eq!(samples[0].metadata["kind"], "task_error");
}

// ── Snapshots ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_snapshot_round_trip() {
    let manager = create_manager();
    let id = wf("wf1");
    manager.initialize_workflow(&id, linear_blueprint(2)).await.unwrap();
    manager
        .assign_agent(&id, &StepId::new("s1"), Agent::new("a1", "Alice"))
        .await
        .unwrap();

    let before = manager.get_state(&id).unwrap();
    let snapshot = manager.create_snapshot(&id).await.unwrap().into_value();
    assert_eq!(snapshot.reason, conductor_state::SnapshotReason::Manual);

    let recovery = manager
        .restore_state(&id, RestoreOptions::latest())
        .await
        .unwrap()
        .into_value();
    assert!(recovery.success);
    assert_eq!(recovery.snapshot.id, snapshot.id);

    let mut after = manager.get_state(&id).unwrap();
    after.metadata.last_updated = before.metadata.last_updated;
    assert_eq!(after, before);
}

#[tokio::test]
async fn test_restore_brings_back_sequence() {
    let manager = create_manager();
    let id = wf("wf1");
    manager.initialize_workflow(&id, linear_blueprint(1)).await.unwrap();
    let pending = manager.create_snapshot(&id).await.unwrap().into_value();

    manager.start_workflow(&id, json!({})).await.unwrap();
    assert!(!manager.is_initialized(&id));

    let recovery = manager
        .restore_state(&id, RestoreOptions::specific(pending.id))
        .await
        .unwrap()
        .into_value();
    assert!(recovery.success);
    assert!(manager.is_initialized(&id));
    assert_eq!(manager.get_state(&id).unwrap().status, WorkflowStatus::Pending);
}

// ── Agents and tasks ─────────────────────────────────────────────────

#[derive(Default)]
struct RecordingBackend {
    calls: Mutex<Vec<(TaskId, TaskStatus)>>,
}

#[async_trait]
impl TaskBackend for RecordingBackend {
    async fn set_task_status(&self, task_id: &TaskId, status: TaskStatus) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push((task_id.clone(), status));
        Ok(())
    }
}

struct BrokenPool;

#[async_trait]
impl AgentPool for BrokenPool {
    async fn is_available(&self, agent_id: &AgentId) -> Result<bool, AgentError> {
        Err(AgentError {
            agent_id: agent_id.clone(),
            message: "pool timed out".into(),
        })
    }
}

fn change(task: &str, previous: TaskStatus, new: TaskStatus) -> TaskStatusChange {
    TaskStatusChange {
        task_id: TaskId::new(task),
        previous_status: previous,
        new_status: new,
        reason: None,
    }
}

async fn task_workflow(manager: &WorkflowManager, id: &WorkflowId) {
    manager.initialize_workflow(id, linear_blueprint(3)).await.unwrap();
    manager
        .assign_agent(id, &StepId::new("s1"), Agent::new("a1", "Alice"))
        .await
        .unwrap();
    for (task, step) in [("t1", "s1"), ("t2", "s2"), ("t3", "s3")] {
        manager
            .add_task(id, Task::new(task, format!("task {task}")).for_step(step))
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_assign_and_add_task() {
    let manager = create_manager();
    let id = wf("wf1");
    let mut audit = manager.events().subscribe_audit();
    task_workflow(&manager, &id).await;

    let state = manager.get_state(&id).unwrap();
    assert_eq!(state.pending_tasks.len(), 3);
    assert_eq!(state.metrics.usage.task_count, 3);
    assert_eq!(state.metrics.resources.active_agents, 1);

    // replacing a task does not count it twice
    let state = manager
        .add_task(&id, Task::new("t1", "renamed").for_step("s1"))
        .await
        .unwrap()
        .into_value();
    assert_eq!(state.metrics.usage.task_count, 3);

    let reassigned = manager
        .assign_agent(&id, &StepId::new("s1"), Agent::new("a2", "Bob"))
        .await
        .unwrap()
        .into_value();
    assert_eq!(reassigned.assigned_agents[&StepId::new("s1")].name, "Bob");

    let unknown = manager
        .assign_agent(&id, &StepId::new("s9"), Agent::new("a3", "Eve"))
        .await
        .unwrap_err();
    assert!(matches!(unknown.error, EngineError::StepNotFound(_)));

    let removed = manager.unassign_agent(&id, &StepId::new("s1")).await.unwrap().into_value();
    assert_eq!(removed.map(|a| a.name), Some("Bob".to_string()));

    let mut families = Vec::new();
    while let Ok(event) = audit.try_recv() {
        families.push(match event {
            WorkflowEvent::Agent(e) => e.kind.as_str(),
            WorkflowEvent::Task(e) => e.kind.as_str(),
            WorkflowEvent::Step(e) => e.kind.as_str(),
            WorkflowEvent::Control(e) => e.kind.as_str(),
        });
    }
    assert_eq!(
        families,
        vec!["assign", "add", "add", "add", "add", "reassign", "unassign"]
    );
}

#[tokio::test]
async fn test_task_doing_then_done_starts_next() {
    let backend = Arc::new(RecordingBackend::default());
    let manager = WorkflowManager::builder()
        .with_config(test_config())
        .with_task_backend(backend.clone())
        .build();
    let id = wf("wf1");
    task_workflow(&manager, &id).await;

    let state = manager
        .handle_task_status_changed(&id, change("t1", TaskStatus::Todo, TaskStatus::Doing))
        .await
        .unwrap()
        .into_value();
    assert_eq!(state.active_tasks.len(), 1);
    let s1 = &state.step_results[&StepId::new("s1")];
    assert_eq!(s1.status, StepStatus::Running);
    assert_eq!(s1.agent_id, Some(AgentId::new("a1")));

    let state = manager
        .handle_task_status_changed(&id, change("t1", TaskStatus::Doing, TaskStatus::Done))
        .await
        .unwrap()
        .into_value();
    assert_eq!(state.completed_tasks.len(), 1);
    assert_eq!(state.completed_tasks[0].id, TaskId::new("t1"));
    assert_eq!(state.step_results[&StepId::new("s1")].status, StepStatus::Completed);

    // t2 is next in step order
    assert_eq!(state.active_tasks.len(), 1);
    assert_eq!(state.active_tasks[0].id, TaskId::new("t2"));
    assert_eq!(state.active_tasks[0].status, TaskStatus::Doing);
    assert_eq!(state.step_results[&StepId::new("s2")].status, StepStatus::Running);
    assert_eq!(
        *backend.calls.lock().unwrap(),
        vec![(TaskId::new("t2"), TaskStatus::Doing)]
    );
}

#[tokio::test]
async fn test_revise_cascades_downstream() {
    let backend = Arc::new(RecordingBackend::default());
    let manager = WorkflowManager::builder()
        .with_config(test_config())
        .with_task_backend(backend.clone())
        .build();
    let id = wf("wf1");
    task_workflow(&manager, &id).await;

    manager
        .handle_task_status_changed(&id, change("t1", TaskStatus::Todo, TaskStatus::Doing))
        .await
        .unwrap();
    manager
        .handle_task_status_changed(&id, change("t1", TaskStatus::Doing, TaskStatus::Done))
        .await
        .unwrap();
    backend.calls.lock().unwrap().clear();

    let state = manager
        .handle_task_status_changed(&id, change("t1", TaskStatus::Done, TaskStatus::Revise))
        .await
        .unwrap()
        .into_value();

    let (_, t1) = state.find_task(&TaskId::new("t1")).unwrap();
    assert_eq!(t1.status, TaskStatus::Doing);
    let (_, t2) = state.find_task(&TaskId::new("t2")).unwrap();
    assert_eq!(t2.status, TaskStatus::Todo);
    assert_eq!(state.active_tasks.len(), 1);
    assert_eq!(state.pending_tasks.len(), 2);
    assert_eq!(
        *backend.calls.lock().unwrap(),
        vec![
            (TaskId::new("t1"), TaskStatus::Doing),
            (TaskId::new("t2"), TaskStatus::Todo)
        ]
    );
}

#[tokio::test]
async fn test_revise_with_failing_availability_check_waits() {
    let backend = Arc::new(RecordingBackend::default());
    let manager = WorkflowManager::builder()
        .with_config(test_config())
        .with_task_backend(backend.clone())
        .with_agent_pool(Arc::new(BrokenPool))
        .build();
    let id = wf("wf1");
    task_workflow(&manager, &id).await;

    let state = manager
        .handle_task_status_changed(&id, change("t1", TaskStatus::Todo, TaskStatus::Revise))
        .await
        .unwrap()
        .into_value();

    let (_, t1) = state.find_task(&TaskId::new("t1")).unwrap();
    assert_eq!(t1.status, TaskStatus::Revise);
    assert!(backend.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_task_error_fails_workflow() {
    let manager = create_manager();
    let controls = control_log(&manager);
    let id = wf("wf1");
    task_workflow(&manager, &id).await;

    let state = manager
        .handle_task_error(
            &id,
            TaskErrorNotification {
                task_id: TaskId::new("t2"),
                error: "agent crashed".into(),
                context: None,
            },
        )
        .await
        .unwrap()
        .into_value();

    assert_eq!(state.status, WorkflowStatus::Failed);
    assert_eq!(state.errors.len(), 1);
    assert!(state.errors[0].message.contains("agent crashed"));
    assert_eq!(*controls.lock().unwrap(), vec![ControlEventType::WorkflowError]);

    let missing = manager
        .handle_task_error(
            &id,
            TaskErrorNotification {
                task_id: TaskId::new("t9"),
                error: "x".into(),
                context: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(missing.error, EngineError::TaskNotFound(_)));
}
