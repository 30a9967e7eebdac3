//! The metrics sink capability and its simple implementations

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Domain a metric sample belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricDomain {
    Performance,
    Resource,
    Usage,
    Workflow,
}

impl MetricDomain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Performance => "performance",
            Self::Resource => "resource",
            Self::Usage => "usage",
            Self::Workflow => "workflow",
        }
    }
}

/// One numeric observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub domain: MetricDomain,
    /// What was measured, e.g. `state_update` or `lock_wait`
    #[serde(rename = "type")]
    pub metric_type: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    pub metadata: BTreeMap<String, String>,
}

impl MetricSample {
    pub fn new(domain: MetricDomain, metric_type: impl Into<String>, value: f64) -> Self {
        Self {
            domain,
            metric_type: metric_type.into(),
            value,
            timestamp: Utc::now(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn performance(metric_type: impl Into<String>, value: f64) -> Self {
        Self::new(MetricDomain::Performance, metric_type, value)
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.metadata.insert(key.into(), value.to_string());
        self
    }
}

/// Fire-and-forget metric recording.
///
/// Implementations must not block and must never fail the caller.
pub trait MetricsSink: Send + Sync {
    fn record(&self, sample: MetricSample);
}

/// Discards every sample
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {
    fn record(&self, _sample: MetricSample) {}
}

/// Keeps samples in memory; useful for tests and inspection
#[derive(Debug, Default)]
pub struct InMemoryMetricsSink {
    samples: Mutex<Vec<MetricSample>>,
}

impl InMemoryMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn samples(&self) -> Vec<MetricSample> {
        self.samples.lock().clone()
    }

    /// Samples whose type equals `metric_type`
    pub fn samples_of(&self, metric_type: &str) -> Vec<MetricSample> {
        self.samples
            .lock()
            .iter()
            .filter(|s| s.metric_type == metric_type)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.lock().is_empty()
    }

    pub fn clear(&self) {
        self.samples.lock().clear();
    }
}

impl MetricsSink for InMemoryMetricsSink {
    fn record(&self, sample: MetricSample) {
        self.samples.lock().push(sample);
    }
}
