use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the closing engine.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub engine: EngineConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_env("CLOSING")
    }

    /// Load configuration from environment with custom prefix
    pub fn load_from_env(prefix: &str) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(
                Environment::with_prefix(prefix)
                    .separator("__")
                    .try_parsing(true),
            )
            .set_default("engine.handler_timeout_secs", 30)?
            .set_default("engine.max_calculation_retries", 3)?
            .set_default("engine.queue_capacity", 256)?
            .set_default("engine.auto_execute", true)?;

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load configuration from file with environment overrides
    pub fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("CLOSING").separator("__"));

        let config = builder.build()?;
        config.try_deserialize()
    }
}

/// Tunables of the orchestration engine.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Upper bound on one external handler call (calculator, control,
    /// notification dispatch).
    #[serde(default = "default_handler_timeout_secs")]
    pub handler_timeout_secs: u64,
    /// Retry budget for idempotent handler kinds.
    #[serde(default = "default_max_calculation_retries")]
    pub max_calculation_retries: u32,
    /// Capacity of the step-ready work queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Whether newly-ready auto-executable steps are driven in-process.
    /// Disable when dedicated workers consume the work queue instead.
    #[serde(default = "default_auto_execute")]
    pub auto_execute: bool,
}

impl EngineConfig {
    pub fn handler_timeout(&self) -> Duration {
        Duration::from_secs(self.handler_timeout_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            handler_timeout_secs: default_handler_timeout_secs(),
            max_calculation_retries: default_max_calculation_retries(),
            queue_capacity: default_queue_capacity(),
            auto_execute: default_auto_execute(),
        }
    }
}

fn default_handler_timeout_secs() -> u64 {
    30
}

fn default_max_calculation_retries() -> u32 {
    3
}

fn default_queue_capacity() -> usize {
    256
}

fn default_auto_execute() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.handler_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.max_calculation_retries, 3);
        assert!(cfg.auto_execute);
    }

    #[test]
    fn test_load_from_env_uses_defaults() {
        let cfg = AppConfig::load_from_env("CLOSING_TEST_UNSET").unwrap();
        assert_eq!(cfg.engine.queue_capacity, 256);
    }
}
