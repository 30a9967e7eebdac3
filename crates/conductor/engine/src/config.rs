//! Configuration for the workflow manager

use std::path::Path;

use conductor_events::EmitterConfig;
use conductor_observability::LoggingConfig;
use conductor_state::StateStoreConfig;
use conductor_sync::LockOptions;
use conductor_validation::ResourceLimits;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Environment prefix; keys look like `CONDUCTOR__LOCKING__MAX_RETRIES`.
pub const ENV_PREFIX: &str = "CONDUCTOR";

/// Main engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Defaults for the workflow-scoped lock
    #[serde(default)]
    pub locking: LockOptions,

    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Aggregate resource ceilings checked at initialization
    #[serde(default)]
    pub limits: ResourceLimits,

    #[serde(default)]
    pub snapshots: SnapshotConfig,

    #[serde(default)]
    pub events: EmitterConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Step loop configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Step executions allowed per start or resume before the workflow is
    /// failed; bounds routing loops
    #[serde(default = "default_max_step_transitions")]
    pub max_step_transitions: usize,
}

fn default_max_step_transitions() -> usize {
    1000
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_step_transitions: default_max_step_transitions(),
        }
    }
}

/// Snapshot retention
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Snapshots kept per workflow; unbounded when unset
    #[serde(default)]
    pub max_per_workflow: Option<usize>,
}

impl EngineConfig {
    /// Load configuration: defaults, then the optional file, then environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&EngineConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        Ok(builder.build()?.try_deserialize()?)
    }

    /// State store settings derived from this configuration
    pub fn state_store(&self) -> StateStoreConfig {
        StateStoreConfig {
            max_snapshots_per_workflow: self.snapshots.max_per_workflow,
            ..StateStoreConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.locking.lock_timeout_ms, 30_000);
        assert_eq!(config.locking.max_retries, 3);
        assert_eq!(config.execution.max_step_transitions, 1000);
        assert_eq!(config.snapshots.max_per_workflow, None);
        assert_eq!(config.events.source, "workflow_manager");
        assert_eq!(config.state_store().max_snapshots_per_workflow, None);
    }

    #[test]
    fn test_layered_load() {
        let path = std::env::temp_dir().join(format!("conductor-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(
            &path,
            "[locking]\nmax_retries = 7\n\n[snapshots]\nmax_per_workflow = 5\n",
        )
        .unwrap();
        std::env::set_var("CONDUCTOR__EXECUTION__MAX_STEP_TRANSITIONS", "42");

        let loaded = EngineConfig::load(Some(&path));
        std::env::remove_var("CONDUCTOR__EXECUTION__MAX_STEP_TRANSITIONS");
        std::fs::remove_file(&path).ok();

        let config = loaded.unwrap();
        assert_eq!(config.locking.max_retries, 7);
        assert_eq!(config.locking.retry_delay_ms, 100);
        assert_eq!(config.snapshots.max_per_workflow, Some(5));
        assert_eq!(config.execution.max_step_transitions, 42);
        assert_eq!(config.state_store().max_snapshots_per_workflow, Some(5));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let path = std::env::temp_dir().join("conductor-does-not-exist.toml");
        let err = EngineConfig::load(Some(&path)).unwrap_err();
        assert!(matches!(err, crate::error::EngineError::Config(_)));
        assert_eq!(err.kind(), "config_error");
    }
}
