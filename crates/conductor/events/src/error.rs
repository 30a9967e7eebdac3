//! Error types for event emission

use conductor_types::EventFamily;
use thiserror::Error;

/// Event subsystem error type
#[derive(Debug, Error)]
pub enum EventError {
    /// The event failed its family validator and was not delivered
    #[error("Invalid {family} event: {}", errors.join("; "))]
    Validation {
        family: EventFamily,
        errors: Vec<String>,
    },
}

/// Result type for event operations
pub type Result<T> = std::result::Result<T, EventError>;

impl EventError {
    /// Validation errors carried by this failure
    pub fn violations(&self) -> &[String] {
        match self {
            Self::Validation { errors, .. } => errors,
        }
    }
}
