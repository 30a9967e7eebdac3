//! Typed workflow events for Conductor.
//!
//! Two layers:
//!
//! - [`EventRegistry`]: per-family subscriber sets with idempotent
//!   `on_*`/`off_*` by handler identity
//! - [`EventEmitter`]: wraps caller drafts in a fresh envelope, validates
//!   them per family and fans valid events out to every subscriber
//!   concurrently

#![deny(unsafe_code)]

pub mod draft;
pub mod emitter;
pub mod error;
pub mod handler;
pub mod registry;

pub use draft::{
    validate_agent, validate_control, validate_step, validate_task, AgentEventDraft,
    ControlEventDraft, StepEventDraft, TaskEventDraft,
};
pub use emitter::{EmitterConfig, EventEmitter};
pub use error::{EventError, Result};
pub use handler::{handler_fn, EventHandler, FnHandler, SharedHandler};
pub use registry::{EventRegistry, HandlerSet};
