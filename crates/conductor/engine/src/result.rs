//! Uniform operation results.
//!
//! Every public [`WorkflowManager`](crate::WorkflowManager) operation returns
//! a [`HandlerResult`]. Both arms carry [`OperationMetadata`] so a caller can
//! correlate a failure with the log lines and events it produced.

use std::future::Future;
use std::time::Instant;

use chrono::{DateTime, Utc};
use conductor_types::WorkflowId;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::error::{EngineError, Result};

pub(crate) const COMPONENT: &str = "workflow_manager";

/// Who ran what, when, and for how long.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationMetadata {
    pub component: String,
    pub operation: String,
    pub workflow_id: WorkflowId,
    pub correlation_id: String,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: f64,
}

impl OperationMetadata {
    fn finish(operation: &str, workflow_id: &WorkflowId, correlation_id: String, started: Instant) -> Self {
        Self {
            component: COMPONENT.to_string(),
            operation: operation.to_string(),
            workflow_id: workflow_id.clone(),
            correlation_id,
            timestamp: Utc::now(),
            duration_ms: started.elapsed().as_secs_f64() * 1000.0,
        }
    }
}

/// Successful outcome of an operation.
#[derive(Debug, Clone)]
pub struct Handled<T> {
    pub value: T,
    pub metadata: OperationMetadata,
}

impl<T> Handled<T> {
    pub fn into_value(self) -> T {
        self.value
    }
}

/// Failed outcome of an operation.
#[derive(Debug, Error)]
#[error("{} failed for workflow {}: {error}", metadata.operation, metadata.workflow_id)]
pub struct HandlerFailure {
    #[source]
    pub error: EngineError,
    pub metadata: OperationMetadata,
}

pub type HandlerResult<T> = std::result::Result<Handled<T>, HandlerFailure>;

/// Run `body` and wrap its outcome with operation metadata.
pub(crate) async fn run<T, F>(operation: &str, workflow_id: &WorkflowId, body: F) -> HandlerResult<T>
where
    F: Future<Output = Result<T>>,
{
    let started = Instant::now();
    let correlation_id = Uuid::new_v4().to_string();
    let outcome = body.await;
    let metadata = OperationMetadata::finish(operation, workflow_id, correlation_id, started);
    match outcome {
        Ok(value) => Ok(Handled { value, metadata }),
        Err(error) => Err(HandlerFailure { error, metadata }),
    }
}
