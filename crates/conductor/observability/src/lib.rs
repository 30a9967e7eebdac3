//! Shared capabilities injected into every Conductor component:
//!
//! - [`MetricsSink`]: fire-and-forget metric recording, with no-op,
//!   in-memory and Prometheus implementations
//! - [`ErrorReporter`]: the shared error-handling collaborator
//! - [`init_tracing`]: installs the `tracing` subscriber that all components
//!   log through

#![deny(unsafe_code)]

pub mod error;
pub mod logging;
pub mod metrics;
pub mod reporter;

pub use error::{ObservabilityError, Result};
pub use logging::{init_tracing, LoggingConfig};
pub use metrics::{
    InMemoryMetricsSink, MetricDomain, MetricSample, MetricsSink, NoopMetricsSink,
    PrometheusMetricsSink,
};
pub use reporter::{ErrorReport, ErrorReporter, InMemoryErrorReporter, Severity, TracingErrorReporter};
