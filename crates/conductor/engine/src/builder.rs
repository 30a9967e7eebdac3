//! Builder for WorkflowManager
//!
//! Every collaborator has an in-process default, so `WorkflowManager::builder().build()`
//! yields a working manager; tests and hosts swap in their own pieces.

use std::sync::Arc;

use conductor_events::{EventEmitter, EventRegistry};
use conductor_observability::{ErrorReporter, MetricsSink, NoopMetricsSink, TracingErrorReporter};
use conductor_state::{InMemorySnapshotStorage, SnapshotStorage, StateStore};
use conductor_sync::SyncManager;
use dashmap::DashMap;

use crate::collaborators::{AgentPool, AlwaysAvailablePool, NoopTaskBackend, TaskBackend};
use crate::config::EngineConfig;
use crate::manager::WorkflowManager;

/// Builder for constructing a WorkflowManager with its collaborators
#[derive(Default)]
pub struct WorkflowManagerBuilder {
    config: EngineConfig,
    metrics: Option<Arc<dyn MetricsSink>>,
    reporter: Option<Arc<dyn ErrorReporter>>,
    snapshot_storage: Option<Arc<dyn SnapshotStorage>>,
    registry: Option<Arc<EventRegistry>>,
    agent_pool: Option<Arc<dyn AgentPool>>,
    task_backend: Option<Arc<dyn TaskBackend>>,
}

impl WorkflowManagerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the metrics sink shared by every component
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Set the error reporter
    pub fn with_error_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Set the snapshot storage backend
    pub fn with_snapshot_storage(mut self, storage: Arc<dyn SnapshotStorage>) -> Self {
        self.snapshot_storage = Some(storage);
        self
    }

    /// Share an existing subscriber registry
    pub fn with_registry(mut self, registry: Arc<EventRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_agent_pool(mut self, pool: Arc<dyn AgentPool>) -> Self {
        self.agent_pool = Some(pool);
        self
    }

    pub fn with_task_backend(mut self, backend: Arc<dyn TaskBackend>) -> Self {
        self.task_backend = Some(backend);
        self
    }

    pub fn build(self) -> WorkflowManager {
        let metrics = self
            .metrics
            .unwrap_or_else(|| Arc::new(NoopMetricsSink));
        let storage = self
            .snapshot_storage
            .unwrap_or_else(|| Arc::new(InMemorySnapshotStorage::new()));
        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(EventRegistry::new()));

        let store = StateStore::with_config(self.config.state_store(), storage, Arc::clone(&metrics));
        let events = EventEmitter::with_config(self.config.events.clone(), registry, Arc::clone(&metrics));
        let sync = SyncManager::new(self.config.locking.clone(), Arc::clone(&metrics));

        WorkflowManager {
            config: self.config,
            store: Arc::new(store),
            events: Arc::new(events),
            sync: Arc::new(sync),
            metrics,
            reporter: self
                .reporter
                .unwrap_or_else(|| Arc::new(TracingErrorReporter)),
            agents: self
                .agent_pool
                .unwrap_or_else(|| Arc::new(AlwaysAvailablePool)),
            tasks: self
                .task_backend
                .unwrap_or_else(|| Arc::new(NoopTaskBackend)),
            definitions: DashMap::new(),
            sequences: DashMap::new(),
        }
    }
}
