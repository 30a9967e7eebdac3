//! Observability error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ObservabilityError {
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("export error: {0}")]
    Export(String),

    #[error("tracing error: {0}")]
    Tracing(String),
}

pub type Result<T> = std::result::Result<T, ObservabilityError>;
