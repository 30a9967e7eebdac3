//! In-memory snapshot storage.
//!
//! Keeps snapshots for the lifetime of the process only.

use async_trait::async_trait;
use conductor_types::{SnapshotId, WorkflowId};
use dashmap::DashMap;
use std::sync::Arc;

use super::traits::SnapshotStorage;
use crate::error::Result;
use crate::snapshot::{SnapshotMetadata, WorkflowStateSnapshot};

/// In-memory snapshot storage implementation.
pub struct InMemorySnapshotStorage {
    /// All snapshots indexed by ID.
    snapshots: Arc<DashMap<SnapshotId, WorkflowStateSnapshot>>,

    /// Snapshot IDs per workflow, in version order.
    by_workflow: Arc<DashMap<WorkflowId, Vec<SnapshotId>>>,
}

impl InMemorySnapshotStorage {
    /// Create a new in-memory storage.
    pub fn new() -> Self {
        Self {
            snapshots: Arc::new(DashMap::new()),
            by_workflow: Arc::new(DashMap::new()),
        }
    }

    /// Get the total number of snapshots stored.
    pub fn total_count(&self) -> usize {
        self.snapshots.len()
    }

    /// Clear all snapshots.
    pub fn clear(&self) {
        self.snapshots.clear();
        self.by_workflow.clear();
    }

    fn ids_for(&self, workflow_id: &WorkflowId) -> Vec<SnapshotId> {
        self.by_workflow
            .get(workflow_id)
            .map(|ids| ids.clone())
            .unwrap_or_default()
    }
}

impl Default for InMemorySnapshotStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SnapshotStorage for InMemorySnapshotStorage {
    async fn store(&self, snapshot: &WorkflowStateSnapshot) -> Result<()> {
        self.snapshots.insert(snapshot.id(), snapshot.clone());

        let mut ids = self
            .by_workflow
            .entry(snapshot.metadata.workflow_id.clone())
            .or_default();
        // concurrent writers may finish out of order; keep the index sorted by version
        let pos = ids
            .iter()
            .position(|id| {
                self.snapshots
                    .get(id)
                    .map(|s| s.version() > snapshot.version())
                    .unwrap_or(false)
            })
            .unwrap_or(ids.len());
        ids.insert(pos, snapshot.id());

        Ok(())
    }

    async fn load(&self, id: &SnapshotId) -> Result<Option<WorkflowStateSnapshot>> {
        Ok(self.snapshots.get(id).map(|s| s.clone()))
    }

    async fn get_latest(&self, workflow_id: &WorkflowId) -> Result<Option<WorkflowStateSnapshot>> {
        Ok(self
            .ids_for(workflow_id)
            .last()
            .and_then(|id| self.snapshots.get(id).map(|s| s.clone())))
    }

    async fn history(&self, workflow_id: &WorkflowId) -> Result<Vec<WorkflowStateSnapshot>> {
        Ok(self
            .ids_for(workflow_id)
            .iter()
            .filter_map(|id| self.snapshots.get(id).map(|s| s.clone()))
            .collect())
    }

    async fn list(&self, workflow_id: &WorkflowId) -> Result<Vec<SnapshotMetadata>> {
        Ok(self
            .ids_for(workflow_id)
            .iter()
            .filter_map(|id| self.snapshots.get(id).map(|s| s.metadata.clone()))
            .collect())
    }

    async fn delete(&self, id: &SnapshotId) -> Result<()> {
        if let Some((_, snapshot)) = self.snapshots.remove(id) {
            if let Some(mut ids) = self.by_workflow.get_mut(&snapshot.metadata.workflow_id) {
                ids.retain(|i| i != id);
            }
        }
        Ok(())
    }

    async fn cleanup_old_snapshots(
        &self,
        workflow_id: &WorkflowId,
        keep_count: usize,
    ) -> Result<usize> {
        let ids = self.ids_for(workflow_id);
        if ids.len() <= keep_count {
            return Ok(0);
        }

        let to_delete = &ids[..ids.len() - keep_count];
        for id in to_delete {
            self.delete(id).await?;
        }

        Ok(to_delete.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::SnapshotReason;
    use chrono::Utc;
    use conductor_types::{StepConfig, WorkflowState};

    fn create_test_snapshot(workflow_id: &WorkflowId, version: u64) -> WorkflowStateSnapshot {
        let state = WorkflowState::new(
            workflow_id.clone(),
            "test",
            vec![StepConfig::new("s1", "One", "first")],
        );
        WorkflowStateSnapshot::capture(
            state,
            SnapshotMetadata {
                id: SnapshotId::generate(),
                workflow_id: workflow_id.clone(),
                version,
                reason: SnapshotReason::Manual,
                triggered_by: "test".to_string(),
                previous_snapshot_id: None,
                created_at: Utc::now(),
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_store_and_load() {
        let storage = InMemorySnapshotStorage::new();
        let workflow_id = WorkflowId::new("wf1");
        let snapshot = create_test_snapshot(&workflow_id, 1);

        storage.store(&snapshot).await.unwrap();

        let loaded = storage.load(&snapshot.id()).await.unwrap();
        assert_eq!(loaded, Some(snapshot.clone()));
        assert!(storage.load(&snapshot.id()).await.unwrap().is_some());
        assert_eq!(storage.total_count(), 1);
    }

    #[tokio::test]
    async fn test_out_of_order_store_keeps_version_order() {
        let storage = InMemorySnapshotStorage::new();
        let workflow_id = WorkflowId::new("wf1");

        storage.store(&create_test_snapshot(&workflow_id, 2)).await.unwrap();
        storage.store(&create_test_snapshot(&workflow_id, 1)).await.unwrap();
        storage.store(&create_test_snapshot(&workflow_id, 3)).await.unwrap();

        let versions: Vec<u64> = storage
            .list(&workflow_id)
            .await
            .unwrap()
            .iter()
            .map(|m| m.version)
            .collect();
        assert_eq!(versions, vec![1, 2, 3]);

        let latest = storage.get_latest(&workflow_id).await.unwrap().unwrap();
        assert_eq!(latest.version(), 3);
    }

    #[tokio::test]
    async fn test_cleanup_keeps_newest() {
        let storage = InMemorySnapshotStorage::new();
        let workflow_id = WorkflowId::new("wf1");

        for v in 1..=5 {
            storage.store(&create_test_snapshot(&workflow_id, v)).await.unwrap();
        }

        let deleted = storage.cleanup_old_snapshots(&workflow_id, 2).await.unwrap();
        assert_eq!(deleted, 3);

        let remaining: Vec<u64> = storage
            .history(&workflow_id)
            .await
            .unwrap()
            .iter()
            .map(|s| s.version())
            .collect();
        assert_eq!(remaining, vec![4, 5]);
        assert_eq!(storage.list(&workflow_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_workflow_is_empty() {
        let storage = InMemorySnapshotStorage::new();
        let workflow_id = WorkflowId::new("missing");
        assert!(storage.get_latest(&workflow_id).await.unwrap().is_none());
        assert!(storage.list(&workflow_id).await.unwrap().is_empty());
    }
}
