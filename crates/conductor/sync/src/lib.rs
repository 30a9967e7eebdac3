//! Synchronization for Conductor workflows.
//!
//! - [`LockManager`]: advisory per-resource locks with retry, expiry and a
//!   FIFO hand-off queue
//! - [`Router`]: append-only conditional routing between steps, with an
//!   audit trail of every decision
//! - [`SyncManager`]: both behind one handle, as the orchestrator uses them

#![deny(unsafe_code)]

pub mod condition;
pub mod error;
pub mod lock;
pub mod manager;
pub mod router;

pub use condition::ConditionEvaluator;
pub use error::{Result, SyncError};
pub use lock::{LockManager, LockOptions};
pub use manager::SyncManager;
pub use router::Router;
