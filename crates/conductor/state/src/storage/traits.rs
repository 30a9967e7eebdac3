//! Storage trait definition.
//!
//! Defines the interface for snapshot storage backends.

use async_trait::async_trait;
use conductor_types::{SnapshotId, WorkflowId};

use crate::error::Result;
use crate::snapshot::{SnapshotMetadata, WorkflowStateSnapshot};

/// Trait for snapshot storage backends.
#[async_trait]
pub trait SnapshotStorage: Send + Sync {
    /// Store a snapshot.
    async fn store(&self, snapshot: &WorkflowStateSnapshot) -> Result<()>;

    /// Load a snapshot by ID.
    async fn load(&self, id: &SnapshotId) -> Result<Option<WorkflowStateSnapshot>>;

    /// Get the latest snapshot for a workflow.
    async fn get_latest(&self, workflow_id: &WorkflowId) -> Result<Option<WorkflowStateSnapshot>>;

    /// All snapshots for a workflow, oldest first.
    async fn history(&self, workflow_id: &WorkflowId) -> Result<Vec<WorkflowStateSnapshot>>;

    /// List snapshot metadata for a workflow, oldest first.
    async fn list(&self, workflow_id: &WorkflowId) -> Result<Vec<SnapshotMetadata>>;

    /// Delete a snapshot.
    async fn delete(&self, id: &SnapshotId) -> Result<()>;

    /// Cleanup old snapshots, keeping only the most recent N.
    ///
    /// Returns the number of snapshots deleted.
    async fn cleanup_old_snapshots(&self, workflow_id: &WorkflowId, keep_count: usize)
        -> Result<usize>;
}
