//! State Store - authoritative in-memory workflow state.
//!
//! The store holds the latest [`WorkflowState`] per workflow, validates every
//! write, snapshots the previous state before each update and restores from
//! snapshots on request.

use std::sync::Arc;

use chrono::Utc;
use conductor_observability::{MetricSample, MetricsSink};
use conductor_types::{
    SnapshotId, StateUpdate, StepConfig, WorkflowId, WorkflowState, WorkflowStatus,
};
use conductor_validation::{validate_state, ValidationError};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use crate::error::{Result, StateError};
use crate::restore::{
    apply_cleanup, RecoveryMetadata, RecoveryResult, RestoreOptions, RestoreStrategy,
};
use crate::snapshot::{SnapshotMetadata, SnapshotReason, WorkflowStateSnapshot};
use crate::storage::SnapshotStorage;

const COMPONENT: &str = "state_store";

/// Configuration for the state store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateStoreConfig {
    /// Snapshots kept per workflow; `None` keeps every snapshot.
    #[serde(default)]
    pub max_snapshots_per_workflow: Option<usize>,

    /// Buffer size of the change feed.
    #[serde(default = "default_change_feed_capacity")]
    pub change_feed_capacity: usize,
}

fn default_change_feed_capacity() -> usize {
    1024
}

impl Default for StateStoreConfig {
    fn default() -> Self {
        Self {
            max_snapshots_per_workflow: None,
            change_feed_capacity: default_change_feed_capacity(),
        }
    }
}

/// Changes broadcast by the state store.
#[derive(Debug, Clone, PartialEq)]
pub enum StateChange {
    Initialized {
        workflow_id: WorkflowId,
    },
    Updated {
        workflow_id: WorkflowId,
        status: WorkflowStatus,
    },
    SnapshotCreated {
        workflow_id: WorkflowId,
        snapshot_id: SnapshotId,
        reason: SnapshotReason,
    },
    Restored {
        workflow_id: WorkflowId,
        snapshot_id: SnapshotId,
    },
    Removed {
        workflow_id: WorkflowId,
    },
}

/// Head of a workflow's snapshot chain.
#[derive(Debug, Clone, Copy)]
struct ChainHead {
    snapshot_id: SnapshotId,
    version: u64,
}

/// Authoritative store of workflow state.
pub struct StateStore {
    config: StateStoreConfig,

    /// Latest state per workflow.
    states: DashMap<WorkflowId, WorkflowState>,

    /// Last snapshot issued per workflow.
    chain_heads: DashMap<WorkflowId, ChainHead>,

    storage: Arc<dyn SnapshotStorage>,

    metrics: Arc<dyn MetricsSink>,

    change_tx: broadcast::Sender<StateChange>,
}

impl StateStore {
    /// Create a store with the default configuration.
    pub fn new(storage: Arc<dyn SnapshotStorage>, metrics: Arc<dyn MetricsSink>) -> Self {
        Self::with_config(StateStoreConfig::default(), storage, metrics)
    }

    pub fn with_config(
        config: StateStoreConfig,
        storage: Arc<dyn SnapshotStorage>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let (change_tx, _) = broadcast::channel(config.change_feed_capacity.max(1));
        Self {
            config,
            states: DashMap::new(),
            chain_heads: DashMap::new(),
            storage,
            metrics,
            change_tx,
        }
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.change_tx.subscribe()
    }

    pub fn storage(&self) -> &Arc<dyn SnapshotStorage> {
        &self.storage
    }

    // ========== State ==========

    /// Build and store a fresh `pending` state.
    ///
    /// `overrides` are merged over the defaults before validation; the name
    /// defaults to the workflow id. An existing state for the id is replaced.
    #[instrument(skip(self, steps, overrides), fields(workflow_id = %workflow_id))]
    pub async fn initialize_state(
        &self,
        workflow_id: &WorkflowId,
        steps: Vec<StepConfig>,
        overrides: StateUpdate,
    ) -> Result<WorkflowState> {
        let mut state = WorkflowState::new(workflow_id.clone(), workflow_id.as_str(), steps);
        state.apply(overrides);
        state.metadata.last_updated = Utc::now();

        let report = validate_state(&state);
        for warning in &report.warnings {
            debug!(workflow_id = %workflow_id, warning = %warning, "state warning");
        }
        report.into_result()?;

        self.states.insert(workflow_id.clone(), state.clone());

        info!(workflow_id = %workflow_id, steps = state.steps.len(), "Workflow state initialized");
        self.metrics.record(
            MetricSample::performance("state_initialize", state.steps.len() as f64)
                .tag("component", COMPONENT)
                .tag("workflow_id", workflow_id),
        );
        self.emit_change(StateChange::Initialized {
            workflow_id: workflow_id.clone(),
        });

        Ok(state)
    }

    /// Latest state for a workflow; `None` for unknown ids.
    pub fn get_state(&self, workflow_id: &WorkflowId) -> Option<WorkflowState> {
        self.states.get(workflow_id).map(|s| s.clone())
    }

    pub fn contains(&self, workflow_id: &WorkflowId) -> bool {
        self.states.contains_key(workflow_id)
    }

    pub fn workflow_ids(&self) -> Vec<WorkflowId> {
        self.states.iter().map(|e| e.key().clone()).collect()
    }

    /// Merge a partial update into the stored state.
    ///
    /// A `pre-update` snapshot is taken first. The merged state is validated
    /// before commit; on failure the stored state is left unchanged.
    #[instrument(skip(self, update), fields(workflow_id = %workflow_id))]
    pub async fn update_state(
        &self,
        workflow_id: &WorkflowId,
        update: StateUpdate,
    ) -> Result<WorkflowState> {
        if !self.contains(workflow_id) {
            return Err(StateError::WorkflowNotFound(workflow_id.clone()));
        }

        self.create_snapshot(workflow_id, SnapshotReason::PreUpdate, COMPONENT)
            .await?;

        let (merged, elapsed_ms) = {
            let mut entry = self
                .states
                .get_mut(workflow_id)
                .ok_or_else(|| StateError::WorkflowNotFound(workflow_id.clone()))?;

            let previous_update = entry.metadata.last_updated;
            let mut merged = entry.clone();
            merged.apply(update);
            merged.metadata.last_updated = Utc::now();

            let report = validate_state(&merged);
            if !report.is_valid() {
                warn!(
                    workflow_id = %workflow_id,
                    errors = ?report.errors,
                    "Rejected state update"
                );
                return Err(ValidationError::State(report.errors).into());
            }

            *entry = merged.clone();
            let elapsed = merged.metadata.last_updated - previous_update;
            (merged, elapsed.num_milliseconds().max(0) as f64)
        };

        debug!(workflow_id = %workflow_id, status = %merged.status, "State updated");
        self.metrics.record(
            MetricSample::performance("state_update", elapsed_ms)
                .tag("component", COMPONENT)
                .tag("workflow_id", workflow_id)
                .tag("status", merged.status),
        );
        self.emit_change(StateChange::Updated {
            workflow_id: workflow_id.clone(),
            status: merged.status,
        });

        Ok(merged)
    }

    /// Drop the state for a workflow. Snapshots are kept.
    pub fn remove_state(&self, workflow_id: &WorkflowId) -> Option<WorkflowState> {
        let removed = self.states.remove(workflow_id).map(|(_, s)| s);
        if removed.is_some() {
            info!(workflow_id = %workflow_id, "Workflow state removed");
            self.emit_change(StateChange::Removed {
                workflow_id: workflow_id.clone(),
            });
        }
        removed
    }

    // ========== Snapshots ==========

    /// Capture the current state as a new link in the snapshot chain.
    #[instrument(skip(self), fields(workflow_id = %workflow_id, reason = %reason))]
    pub async fn create_snapshot(
        &self,
        workflow_id: &WorkflowId,
        reason: SnapshotReason,
        triggered_by: &str,
    ) -> Result<WorkflowStateSnapshot> {
        let state = self
            .get_state(workflow_id)
            .ok_or_else(|| StateError::WorkflowNotFound(workflow_id.clone()))?;

        let snapshot_id = SnapshotId::generate();
        let (version, previous_snapshot_id) = {
            let mut head = self
                .chain_heads
                .entry(workflow_id.clone())
                .or_insert(ChainHead {
                    snapshot_id,
                    version: 0,
                });
            let previous = (head.version > 0).then_some(head.snapshot_id);
            head.version += 1;
            head.snapshot_id = snapshot_id;
            (head.version, previous)
        };

        let snapshot = WorkflowStateSnapshot::capture(
            state,
            SnapshotMetadata {
                id: snapshot_id,
                workflow_id: workflow_id.clone(),
                version,
                reason,
                triggered_by: triggered_by.to_string(),
                previous_snapshot_id,
                created_at: Utc::now(),
            },
        )?;

        self.storage.store(&snapshot).await?;

        if let Some(keep) = self.config.max_snapshots_per_workflow {
            let pruned = self.storage.cleanup_old_snapshots(workflow_id, keep).await?;
            if pruned > 0 {
                debug!(workflow_id = %workflow_id, pruned, "Pruned old snapshots");
            }
        }

        debug!(
            workflow_id = %workflow_id,
            snapshot_id = %snapshot_id,
            version,
            "Snapshot created"
        );
        self.emit_change(StateChange::SnapshotCreated {
            workflow_id: workflow_id.clone(),
            snapshot_id,
            reason,
        });

        Ok(snapshot)
    }

    /// Snapshot metadata for a workflow, oldest first.
    pub async fn list_snapshots(&self, workflow_id: &WorkflowId) -> Result<Vec<SnapshotMetadata>> {
        self.storage.list(workflow_id).await
    }

    /// Keep only the newest `keep` snapshots; returns how many were deleted.
    pub async fn prune_snapshots(&self, workflow_id: &WorkflowId, keep: usize) -> Result<usize> {
        self.storage.cleanup_old_snapshots(workflow_id, keep).await
    }

    // ========== Restore ==========

    /// Replace the stored state with one captured in a snapshot.
    ///
    /// Fails with a not-found error when no snapshot matches the strategy.
    /// A snapshot that fails revalidation yields an unsuccessful
    /// [`RecoveryResult`] and leaves the stored state untouched.
    #[instrument(skip(self, options), fields(workflow_id = %workflow_id, strategy = %options.strategy))]
    pub async fn restore_state(
        &self,
        workflow_id: &WorkflowId,
        options: RestoreOptions,
    ) -> Result<RecoveryResult> {
        let snapshot = self
            .find_snapshot(workflow_id, &options.strategy)
            .await?
            .ok_or_else(|| StateError::NoMatchingSnapshot {
                workflow_id: workflow_id.clone(),
                strategy: options.strategy.to_string(),
            })?;

        if !snapshot.verify_integrity() {
            return Err(StateError::IntegrityCheckFailed {
                expected: snapshot.integrity_hash.clone(),
                actual: snapshot.calculate_hash()?,
            });
        }

        let previous = self.get_state(workflow_id);
        let mut metadata = RecoveryMetadata {
            strategy: options.strategy.to_string(),
            restored_at: Utc::now(),
            previous_status: previous.as_ref().map(|s| s.status),
            previous_step_index: previous.as_ref().map(|s| s.current_step_index),
            previous_errors: previous.map(|s| s.errors).unwrap_or_default(),
            cleanup: Default::default(),
        };

        let mut candidate = snapshot.state.clone();

        let validation = if options.validation.skip_validation {
            Default::default()
        } else {
            let report = validate_state(&candidate);
            let rejected = !report.is_valid()
                || (report.has_warnings() && !options.validation.ignore_warnings);
            if rejected {
                let reason = if report.is_valid() {
                    format!("snapshot produced warnings: {}", report.warnings.join("; "))
                } else {
                    format!("snapshot failed validation: {}", report.errors.join("; "))
                };
                warn!(workflow_id = %workflow_id, snapshot_id = %snapshot.id(), %reason, "Restore rejected");
                return Ok(RecoveryResult {
                    success: false,
                    state: None,
                    snapshot: snapshot.metadata.clone(),
                    validation: report,
                    error: Some(reason),
                    metadata,
                });
            }
            report
        };

        if let Some(cleanup) = &options.cleanup {
            metadata.cleanup = apply_cleanup(&mut candidate, cleanup);
        }
        candidate.metadata.last_updated = metadata.restored_at;

        self.states.insert(workflow_id.clone(), candidate.clone());

        info!(
            workflow_id = %workflow_id,
            snapshot_id = %snapshot.id(),
            version = snapshot.version(),
            "Workflow state restored"
        );
        self.metrics.record(
            MetricSample::performance("state_restore", snapshot.version() as f64)
                .tag("component", COMPONENT)
                .tag("workflow_id", workflow_id)
                .tag("strategy", &metadata.strategy),
        );
        self.emit_change(StateChange::Restored {
            workflow_id: workflow_id.clone(),
            snapshot_id: snapshot.id(),
        });

        Ok(RecoveryResult {
            success: true,
            state: Some(candidate),
            snapshot: snapshot.metadata.clone(),
            validation,
            error: None,
            metadata,
        })
    }

    /// Latest and by-id lookups go straight to storage; the other
    /// strategies scan the workflow's history.
    async fn find_snapshot(
        &self,
        workflow_id: &WorkflowId,
        strategy: &RestoreStrategy,
    ) -> Result<Option<WorkflowStateSnapshot>> {
        match strategy {
            RestoreStrategy::Latest => self.storage.get_latest(workflow_id).await,
            RestoreStrategy::Specific(id) => Ok(self
                .storage
                .load(id)
                .await?
                .filter(|s| &s.metadata.workflow_id == workflow_id)),
            RestoreStrategy::Timestamp(_) | RestoreStrategy::Version(_) => {
                let history = self.storage.history(workflow_id).await?;
                Ok(strategy.select(&history).cloned())
            }
        }
    }

    fn emit_change(&self, change: StateChange) {
        // no receivers is fine
        let _ = self.change_tx.send(change);
    }
}
