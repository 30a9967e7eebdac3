//! Step executors.
//!
//! An executor turns a step's input into its output. The manager invokes
//! executors one step at a time, feeding each step the previous step's
//! output.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

const DEFAULT_FAILURE_MESSAGE: &str = "step execution failed";

/// Failure raised by a step executor
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct ExecutionError {
    pub message: String,
    /// Extra detail recorded with the error
    pub context: Option<Value>,
}

impl ExecutionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }

    /// Replace a blank message with a generic one so the failure can be
    /// recorded and announced.
    pub fn normalized(mut self) -> Self {
        if self.message.trim().is_empty() {
            self.message = DEFAULT_FAILURE_MESSAGE.to_string();
        }
        self
    }
}

#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn invoke(&self, inputs: Value) -> Result<Value, ExecutionError>;
}

pub type SharedExecutor = Arc<dyn StepExecutor>;

/// Closure-backed executor
pub struct FnExecutor<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> StepExecutor for FnExecutor<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ExecutionError>> + Send,
{
    async fn invoke(&self, inputs: Value) -> Result<Value, ExecutionError> {
        (self.f)(inputs).await
    }
}

/// Wrap an async closure as a shared executor.
pub fn executor_fn<F, Fut>(f: F) -> SharedExecutor
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ExecutionError>> + Send + 'static,
{
    Arc::new(FnExecutor { f })
}
