//! Authoritative workflow state for Conductor.
//!
//! The [`StateStore`] owns one [`WorkflowState`](conductor_types::WorkflowState)
//! per workflow. Every write is validated; every update is preceded by a
//! snapshot so that a workflow can be rolled back with
//! [`StateStore::restore_state`].
//!
//! ```text
//! update_state ──► pre-update snapshot ──► merge ──► validate ──► commit
//!                        │
//!                        ▼
//!                 SnapshotStorage (versioned chain per workflow)
//! ```

#![deny(unsafe_code)]

pub mod error;
pub mod restore;
pub mod snapshot;
pub mod storage;
pub mod store;

pub use error::{Result, StateError};
pub use restore::{
    apply_cleanup, CleanupOptions, CleanupSummary, RecoveryMetadata, RecoveryResult,
    RestoreOptions, RestoreStrategy, RestoreValidation,
};
pub use snapshot::{SnapshotMetadata, SnapshotReason, WorkflowStateSnapshot};
pub use storage::{InMemorySnapshotStorage, SnapshotStorage};
pub use store::{StateChange, StateStore, StateStoreConfig};
