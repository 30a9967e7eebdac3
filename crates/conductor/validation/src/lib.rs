//! Structural validation for Conductor workflows.
//!
//! Pure, stateless checks:
//!
//! - [`steps`]: step configuration sequences (required fields, bounds,
//!   dependency existence, cycle freedom, aggregate resource ceilings)
//! - [`state`]: in-flight [`WorkflowState`](conductor_types::WorkflowState)
//!   values, producing errors and warnings

#![deny(unsafe_code)]

pub mod error;
pub mod limits;
pub mod state;
pub mod steps;

pub use error::{Result, ValidationError};
pub use limits::{ResourceLimits, MAX_SAFE_INTEGER};
pub use state::{validate_state, validate_state_at, ValidationReport};
pub use steps::{
    detect_cycles, validate_aggregate_resources, validate_dependencies, validate_priorities,
    validate_required_fields, validate_resources, validate_steps, validate_timeouts,
    validate_unique_ids,
};
