//! Restore options and recovery results.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use conductor_types::{
    ErrorRecord, SnapshotId, StepStatus, Task, TaskPhase, WorkflowState, WorkflowStatus,
};
use conductor_validation::ValidationReport;
use serde::{Deserialize, Serialize};

use crate::snapshot::{SnapshotMetadata, WorkflowStateSnapshot};

/// Which snapshot a restore should use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", content = "target", rename_all = "lowercase")]
pub enum RestoreStrategy {
    /// The most recent snapshot.
    Latest,
    /// A snapshot by id.
    Specific(SnapshotId),
    /// The most recent snapshot taken at or before the given time.
    Timestamp(DateTime<Utc>),
    /// The snapshot with exactly this chain version.
    Version(u64),
}

impl RestoreStrategy {
    /// Pick a snapshot from `history` (oldest first).
    pub fn select<'a>(&self, history: &'a [WorkflowStateSnapshot]) -> Option<&'a WorkflowStateSnapshot> {
        match self {
            Self::Latest => history.last(),
            Self::Specific(id) => history.iter().find(|s| &s.id() == id),
            Self::Timestamp(at) => history.iter().rev().find(|s| s.created_at() <= *at),
            Self::Version(v) => history.iter().find(|s| s.version() == *v),
        }
    }
}

impl std::fmt::Display for RestoreStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Latest => write!(f, "latest"),
            Self::Specific(id) => write!(f, "specific({id})"),
            Self::Timestamp(at) => write!(f, "timestamp(<= {})", at.to_rfc3339()),
            Self::Version(v) => write!(f, "version({v})"),
        }
    }
}

/// Validation behavior during restore.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RestoreValidation {
    /// Do not revalidate the snapshot state.
    pub skip_validation: bool,
    /// Accept a snapshot that produced warnings but no errors.
    pub ignore_warnings: bool,
}

/// Repairs applied to the restored state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CleanupOptions {
    /// Re-file every task under the one partition its status maps to,
    /// dropping duplicate entries.
    pub reconcile_tasks: bool,
    /// Drop step results still marked `running`.
    pub drop_orphaned_results: bool,
    /// Reset `failed` step results to `pending`.
    pub reset_failed_steps: bool,
}

impl CleanupOptions {
    pub fn all() -> Self {
        Self {
            reconcile_tasks: true,
            drop_orphaned_results: true,
            reset_failed_steps: true,
        }
    }
}

/// Options for [`StateStore::restore_state`](crate::StateStore::restore_state).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreOptions {
    pub strategy: RestoreStrategy,
    #[serde(default)]
    pub validation: RestoreValidation,
    #[serde(default)]
    pub cleanup: Option<CleanupOptions>,
}

impl RestoreOptions {
    pub fn new(strategy: RestoreStrategy) -> Self {
        Self {
            strategy,
            validation: RestoreValidation::default(),
            cleanup: None,
        }
    }

    pub fn latest() -> Self {
        Self::new(RestoreStrategy::Latest)
    }

    pub fn specific(id: SnapshotId) -> Self {
        Self::new(RestoreStrategy::Specific(id))
    }

    pub fn at_or_before(at: DateTime<Utc>) -> Self {
        Self::new(RestoreStrategy::Timestamp(at))
    }

    pub fn version(version: u64) -> Self {
        Self::new(RestoreStrategy::Version(version))
    }

    pub fn skip_validation(mut self) -> Self {
        self.validation.skip_validation = true;
        self
    }

    pub fn ignore_warnings(mut self) -> Self {
        self.validation.ignore_warnings = true;
        self
    }

    pub fn with_cleanup(mut self, cleanup: CleanupOptions) -> Self {
        self.cleanup = Some(cleanup);
        self
    }
}

/// What a cleanup pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupSummary {
    pub tasks_reconciled: usize,
    pub results_dropped: usize,
    pub steps_reset: usize,
}

/// Audit block describing the state that a restore replaced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryMetadata {
    pub strategy: String,
    pub restored_at: DateTime<Utc>,
    pub previous_status: Option<WorkflowStatus>,
    pub previous_step_index: Option<i64>,
    pub previous_errors: Vec<ErrorRecord>,
    pub cleanup: CleanupSummary,
}

/// Outcome of a restore.
///
/// A snapshot that fails revalidation is a soft failure: `success` is false,
/// `validation` and `error` explain why, and the stored state is untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryResult {
    pub success: bool,
    pub state: Option<WorkflowState>,
    pub snapshot: SnapshotMetadata,
    pub validation: ValidationReport,
    pub error: Option<String>,
    pub metadata: RecoveryMetadata,
}

/// Apply `options` to `state` in place.
pub fn apply_cleanup(state: &mut WorkflowState, options: &CleanupOptions) -> CleanupSummary {
    let mut summary = CleanupSummary::default();

    if options.reconcile_tasks {
        let filed: Vec<(Task, TaskPhase)> = state
            .pending_tasks
            .drain(..)
            .map(|t| (t, TaskPhase::Pending))
            .chain(state.active_tasks.drain(..).map(|t| (t, TaskPhase::Active)))
            .chain(state.completed_tasks.drain(..).map(|t| (t, TaskPhase::Completed)))
            .collect();
        let total = filed.len();

        // the most advanced partition wins on duplicates
        let mut seen = HashSet::new();
        let mut kept: Vec<(Task, TaskPhase)> = filed
            .into_iter()
            .rev()
            .filter(|(t, _)| seen.insert(t.id.clone()))
            .collect();
        kept.reverse();

        let mut changed = total - kept.len();
        for (task, phase) in kept {
            if task.status.phase() != phase {
                changed += 1;
            }
            state.place_task(task);
        }
        summary.tasks_reconciled = changed;
    }

    if options.drop_orphaned_results {
        let before = state.step_results.len();
        state
            .step_results
            .retain(|_, r| r.status != StepStatus::Running);
        summary.results_dropped = before - state.step_results.len();
    }

    if options.reset_failed_steps {
        for result in state.step_results.values_mut() {
            if result.status == StepStatus::Failed {
                result.reset();
                summary.steps_reset += 1;
            }
        }
    }

    summary
}
