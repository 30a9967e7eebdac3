//! Tracing subscriber setup

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{ObservabilityError, Result};

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Service name attached to log output
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Filter used when `RUST_LOG` is not set
    #[serde(default = "default_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,

    /// Include source file and line in output
    #[serde(default)]
    pub with_location: bool,
}

fn default_service_name() -> String {
    "conductor".to_string()
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            level: default_level(),
            json: false,
            with_location: false,
        }
    }
}

impl LoggingConfig {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    pub fn with_json(mut self) -> Self {
        self.json = true;
        self
    }
}

/// Install the global tracing subscriber.
///
/// Fails if a global subscriber is already set.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let subscriber = tracing_subscriber::registry().with(env_filter);

    let result = if config.json {
        let layer = fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(true)
            .with_file(config.with_location)
            .with_line_number(config.with_location);
        subscriber.with(layer).try_init()
    } else {
        let layer = fmt::layer()
            .with_target(true)
            .with_file(config.with_location)
            .with_line_number(config.with_location);
        subscriber.with(layer).try_init()
    };

    result.map_err(|e| ObservabilityError::Tracing(e.to_string()))?;
    tracing::info!(service = %config.service_name, level = %config.level, "tracing initialized");
    Ok(())
}
