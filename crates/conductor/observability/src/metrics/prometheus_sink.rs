//! Prometheus-backed metrics sink

use prometheus::{
    Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};

use super::sink::{MetricSample, MetricsSink};
use crate::error::{ObservabilityError, Result};

const LABELS: &[&str] = &["domain", "type"];

/// Forwards samples into a Prometheus registry.
///
/// Each `(domain, type)` pair gets a sample counter, a value histogram and a
/// last-value gauge.
pub struct PrometheusMetricsSink {
    registry: Registry,
    samples_total: IntCounterVec,
    values: HistogramVec,
    last_value: GaugeVec,
}

impl PrometheusMetricsSink {
    /// Create the collectors and register them on a fresh registry
    pub fn new() -> Result<Self> {
        Self::with_registry(Registry::new())
    }

    /// Create the collectors and register them on `registry`
    pub fn with_registry(registry: Registry) -> Result<Self> {
        let samples_total = IntCounterVec::new(
            Opts::new("conductor_metric_samples_total", "Metric samples recorded"),
            LABELS,
        )?;
        registry.register(Box::new(samples_total.clone()))?;

        let values = HistogramVec::new(
            HistogramOpts::new("conductor_metric_value", "Distribution of recorded values")
                .buckets(vec![0.0, 1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0, 5000.0]),
            LABELS,
        )?;
        registry.register(Box::new(values.clone()))?;

        let last_value = GaugeVec::new(
            Opts::new("conductor_metric_last_value", "Most recent recorded value"),
            LABELS,
        )?;
        registry.register(Box::new(last_value.clone()))?;

        Ok(Self {
            registry,
            samples_total,
            values,
            last_value,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render all metrics in the Prometheus text exposition format
    pub fn export(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| ObservabilityError::Export(e.to_string()))
    }
}

impl MetricsSink for PrometheusMetricsSink {
    fn record(&self, sample: MetricSample) {
        let labels = [sample.domain.as_str(), sample.metric_type.as_str()];
        self.samples_total.with_label_values(&labels).inc();
        self.values.with_label_values(&labels).observe(sample.value);
        self.last_value.with_label_values(&labels).set(sample.value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::sink::MetricDomain;

    #[test]
    fn records_and_exports() {
        let sink = PrometheusMetricsSink::new().unwrap();
        sink.record(MetricSample::performance("lock_wait", 12.0));
        sink.record(MetricSample::performance("lock_wait", 4.0));
        sink.record(MetricSample::new(MetricDomain::Usage, "event_emit", 1.0));

        let text = sink.export().unwrap();
        assert!(text.contains("conductor_metric_samples_total"));
        assert!(text.contains("type=\"lock_wait\""));
        assert!(text.contains("domain=\"usage\""));
    }

    #[test]
    fn duplicate_registration_is_an_error() {
        let registry = Registry::new();
        let _first = PrometheusMetricsSink::with_registry(registry.clone()).unwrap();
        assert!(PrometheusMetricsSink::with_registry(registry).is_err());
    }
}
