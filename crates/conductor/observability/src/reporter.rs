//! Shared error-handling collaborator

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::error;

/// How bad a reported error is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// An error handed to the [`ErrorReporter`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub component: String,
    pub operation: String,
    pub message: String,
    pub severity: Severity,
    pub recoverable: bool,
    pub correlation_id: Option<String>,
    pub context: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl ErrorReport {
    pub fn new(
        component: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            component: component.into(),
            operation: operation.into(),
            message: message.into(),
            severity: Severity::High,
            recoverable: false,
            correlation_id: None,
            context: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn recoverable(mut self, recoverable: bool) -> Self {
        self.recoverable = recoverable;
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.context.insert(key.into(), value.to_string());
        self
    }
}

/// Receives errors that escaped a component's own handling
pub trait ErrorReporter: Send + Sync {
    fn report(&self, report: &ErrorReport);
}

/// Logs reports through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorReporter;

impl ErrorReporter for TracingErrorReporter {
    fn report(&self, report: &ErrorReport) {
        error!(
            component = %report.component,
            operation = %report.operation,
            severity = ?report.severity,
            recoverable = report.recoverable,
            correlation_id = report.correlation_id.as_deref().unwrap_or(""),
            context = ?report.context,
            "{}",
            report.message
        );
    }
}

/// Collects reports in memory
#[derive(Debug, Default)]
pub struct InMemoryErrorReporter {
    reports: Mutex<Vec<ErrorReport>>,
}

impl InMemoryErrorReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<ErrorReport> {
        self.reports.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.reports.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.lock().is_empty()
    }
}

impl ErrorReporter for InMemoryErrorReporter {
    fn report(&self, report: &ErrorReport) {
        self.reports.lock().push(report.clone());
    }
}
