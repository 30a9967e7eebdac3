//! Workflow state snapshots.
//!
//! A snapshot is an immutable deep copy of a [`WorkflowState`] together with
//! the metadata needed to walk the per-workflow chain backwards. Snapshots
//! carry an integrity hash over their canonical JSON form.

use chrono::{DateTime, Utc};
use conductor_types::{SnapshotId, WorkflowId, WorkflowState};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Reason for creating a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SnapshotReason {
    /// Taken automatically before every state update.
    PreUpdate,
    /// Explicit request through the public API.
    Manual,
    /// Taken by the orchestrator before running steps.
    Checkpoint,
    /// Taken before a workflow is reset to `pending`.
    PreReset,
}

impl std::fmt::Display for SnapshotReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SnapshotReason::PreUpdate => write!(f, "pre-update"),
            SnapshotReason::Manual => write!(f, "manual"),
            SnapshotReason::Checkpoint => write!(f, "checkpoint"),
            SnapshotReason::PreReset => write!(f, "pre-reset"),
        }
    }
}

/// Metadata about a snapshot, without the captured state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    pub id: SnapshotId,

    pub workflow_id: WorkflowId,

    /// Position in the workflow's snapshot chain, starting at 1.
    pub version: u64,

    pub reason: SnapshotReason,

    /// Component or caller that asked for the snapshot.
    pub triggered_by: String,

    /// The snapshot taken just before this one, if any.
    pub previous_snapshot_id: Option<SnapshotId>,

    pub created_at: DateTime<Utc>,
}

/// Immutable point-in-time copy of a workflow state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStateSnapshot {
    pub metadata: SnapshotMetadata,

    pub state: WorkflowState,

    /// Base64 SHA-256 over the canonical JSON of `metadata` and `state`.
    pub integrity_hash: String,
}

impl WorkflowStateSnapshot {
    /// Capture `state`, sealing it with an integrity hash.
    pub fn capture(state: WorkflowState, metadata: SnapshotMetadata) -> Result<Self> {
        let mut snapshot = Self {
            metadata,
            state,
            integrity_hash: String::new(),
        };
        snapshot.integrity_hash = snapshot.calculate_hash()?;
        Ok(snapshot)
    }

    pub fn id(&self) -> SnapshotId {
        self.metadata.id
    }

    pub fn version(&self) -> u64 {
        self.metadata.version
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.metadata.created_at
    }

    /// Calculate the integrity hash of the snapshot contents.
    pub fn calculate_hash(&self) -> Result<String> {
        use base64::Engine;
        use sha2::{Digest, Sha256};

        // serde_json::Value orders object keys, so map iteration order does not leak in
        let canonical = serde_json::to_value((&self.metadata, &self.state))?;
        let bytes = serde_json::to_vec(&canonical)?;

        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(base64::engine::general_purpose::STANDARD.encode(hasher.finalize()))
    }

    /// Verify the snapshot has not been altered since capture.
    pub fn verify_integrity(&self) -> bool {
        self.calculate_hash()
            .map(|h| h == self.integrity_hash)
            .unwrap_or(false)
    }
}
