//! Synchronization manager: locking and routing behind one handle.

use std::sync::Arc;

use conductor_observability::MetricsSink;
use conductor_types::{
    LockType, RoutingDecision, RoutingPath, RoutingRule, StepId, WorkflowId, WorkflowLock,
};
use serde_json::Value;
use tracing::info;

use crate::error::Result;
use crate::lock::{LockManager, LockOptions};
use crate::router::Router;

/// Advisory locks and routing tables for all workflows in this process.
pub struct SyncManager {
    locks: LockManager,
    router: Router,
    defaults: LockOptions,
}

impl SyncManager {
    pub fn new(defaults: LockOptions, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            locks: LockManager::new(metrics),
            router: Router::new(),
            defaults,
        }
    }

    pub fn lock_defaults(&self) -> &LockOptions {
        &self.defaults
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    // ── Locking ──────────────────────────────────────────────────────

    /// Acquire a lock, with the configured defaults unless `options` is given.
    pub async fn acquire_lock(
        &self,
        workflow_id: &WorkflowId,
        resource_id: &str,
        lock_type: LockType,
        options: Option<&LockOptions>,
    ) -> Result<WorkflowLock> {
        let options = options.unwrap_or(&self.defaults);
        self.locks
            .acquire(workflow_id, resource_id, lock_type, options)
            .await
    }

    /// Release a lock; stale locks are ignored.
    pub fn release_lock(&self, lock: &WorkflowLock) -> bool {
        self.locks.release(lock)
    }

    pub fn active_lock(&self, resource_id: &str) -> Option<WorkflowLock> {
        self.locks.active_lock(resource_id)
    }

    pub fn pending_count(&self, resource_id: &str) -> usize {
        self.locks.pending_count(resource_id)
    }

    // ── Routing ──────────────────────────────────────────────────────

    pub fn add_routing_path(&self, workflow_id: &WorkflowId, path: RoutingPath) -> Result<()> {
        self.router.add_path(workflow_id, path)
    }

    pub fn add_routing_rule(
        &self,
        workflow_id: &WorkflowId,
        path_id: &str,
        rule: RoutingRule,
    ) -> Result<()> {
        self.router.add_rule(workflow_id, path_id, rule)
    }

    pub fn get_next_step(
        &self,
        workflow_id: &WorkflowId,
        current_step_id: &StepId,
        step_result: &Value,
        context: &Value,
    ) -> Option<StepId> {
        self.router
            .next_step(workflow_id, current_step_id, step_result, context)
    }

    pub fn routing_history(&self, workflow_id: &WorkflowId) -> Vec<RoutingDecision> {
        self.router.history(workflow_id)
    }

    pub fn paths_for(&self, workflow_id: &WorkflowId) -> Vec<RoutingPath> {
        self.router.paths_for(workflow_id)
    }

    /// Drop routing state and release every lock held by a workflow.
    pub fn clear_workflow(&self, workflow_id: &WorkflowId) {
        self.router.clear_workflow(workflow_id);
        let released = self.locks.release_all_for_workflow(workflow_id);
        info!(workflow_id = %workflow_id, released, "Synchronization state cleared");
    }
}
