//! Metric recording

pub mod prometheus_sink;
pub mod sink;

pub use prometheus_sink::PrometheusMetricsSink;
pub use sink::{InMemoryMetricsSink, MetricDomain, MetricSample, MetricsSink, NoopMetricsSink};
