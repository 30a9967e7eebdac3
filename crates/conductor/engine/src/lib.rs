//! Conductor workflow manager.
//!
//! The [`WorkflowManager`] drives workflows through their lifecycle on top
//! of the other Conductor components:
//!
//! - `conductor-state` holds workflow state and snapshots
//! - `conductor-events` validates and delivers lifecycle events
//! - `conductor-sync` provides the workflow lock and conditional routing
//! - `conductor-validation` checks step definitions before anything runs
//!
//! Workflows are described by a [`WorkflowBlueprint`]: step configurations,
//! one [`StepExecutor`] per runnable step, and optional routing paths. Every
//! public operation returns a [`HandlerResult`] carrying
//! [`OperationMetadata`] on both arms.
//!
//! ```ignore
//! let manager = WorkflowManager::builder()
//!     .with_config(EngineConfig::load(None)?)
//!     .build();
//!
//! let blueprint = WorkflowBlueprint::new(steps)
//!     .with_executor("fetch", fetch)
//!     .with_executor("summarize", summarize);
//! manager.initialize_workflow(&id, blueprint).await?;
//! let state = manager.start_workflow(&id, json!({"url": url})).await?.into_value();
//! ```

#![deny(unsafe_code)]

pub mod blueprint;
pub mod builder;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod executor;
pub mod manager;
pub mod result;
pub mod tasks;

pub use blueprint::WorkflowBlueprint;
pub use builder::WorkflowManagerBuilder;
pub use collaborators::{AgentError, AgentPool, AlwaysAvailablePool, NoopTaskBackend, TaskBackend};
pub use config::{EngineConfig, ExecutionConfig, SnapshotConfig};
pub use error::{EngineError, Result};
pub use executor::{executor_fn, ExecutionError, FnExecutor, SharedExecutor, StepExecutor};
pub use manager::WorkflowManager;
pub use result::{Handled, HandlerFailure, HandlerResult, OperationMetadata};
pub use tasks::{TaskErrorNotification, TaskStatusChange};

pub use conductor_observability::{init_tracing, LoggingConfig};
