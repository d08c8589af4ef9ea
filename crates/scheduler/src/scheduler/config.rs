use std::path::Path;

use priosched_core::{ConfigError, EnvOverrides};

use super::types::SchedulerConfig;

/// Prefix for scheduler environment overrides (`PRIOSCHED_<KEY>`).
pub const ENV_PREFIX: &str = "PRIOSCHED";

impl SchedulerConfig {
    /// Parse config from a TOML string, then apply environment overrides.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        Self::from_toml_with(toml_str, &EnvOverrides::from_env(ENV_PREFIX))
    }

    /// Parse config from a TOML string with an explicit override set.
    pub fn from_toml_with(toml_str: &str, env: &EnvOverrides) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides(env)?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Defaults plus environment overrides, for callers without a config file.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_toml("")
    }

    // ── Environment variable overrides ──────────────────────────────

    /// Apply environment variable overrides.
    ///
    /// Convention: `PRIOSCHED_KEY` overrides `key`, e.g.
    /// - `PRIOSCHED_MIN_CRITICAL_PRIORITY` -> `min_critical_priority`
    /// - `PRIOSCHED_WORKER_THREADS` -> `worker_threads`
    /// - `PRIOSCHED_MAX_CONCURRENCY` -> `max_concurrency`
    ///
    /// With `PRIOSCHED_PROFILE=PROD`, `PROD_PRIOSCHED_KEY` takes precedence.
    pub fn apply_env_overrides(&mut self, env: &EnvOverrides) -> Result<(), ConfigError> {
        if let Some(v) = env.parse("min_critical_priority")? {
            self.min_critical_priority = v;
        }
        if let Some(v) = env.parse("worker_threads")? {
            self.worker_threads = v;
        }
        if let Some(v) = env.parse("max_concurrency")? {
            self.max_concurrency = v;
        }
        if let Some(v) = env.parse("event_capacity")? {
            self.event_capacity = v;
        }
        if let Some(v) = env.parse("idle_wait_ms")? {
            self.idle_wait_ms = v;
        }
        if let Some(v) = env.parse("drain_poll_ms")? {
            self.drain_poll_ms = v;
        }
        Ok(())
    }

    /// Validate value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.min_critical_priority.is_finite() {
            return Err(ConfigError::Invalid(format!(
                "min_critical_priority must be finite, got {}",
                self.min_critical_priority
            )));
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::Invalid("event_capacity must be at least 1".into()));
        }
        if self.idle_wait_ms == 0 {
            return Err(ConfigError::Invalid("idle_wait_ms must be at least 1".into()));
        }
        Ok(())
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Scheduler config:");
        tracing::info!("  min_critical_priority = {}", self.min_critical_priority);
        tracing::info!(
            "  workers = {}, max_concurrency = {}",
            self.resolved_worker_threads(),
            self.resolved_max_concurrency()
        );
        tracing::info!(
            "  event_capacity = {}, idle_wait = {}ms, drain_poll = {}ms",
            self.event_capacity,
            self.idle_wait_ms,
            self.drain_poll_ms
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env() -> EnvOverrides {
        EnvOverrides::from_pairs("", ENV_PREFIX, Vec::<(String, String)>::new())
    }

    #[test]
    fn parse_empty_toml_uses_defaults() {
        let cfg = SchedulerConfig::from_toml_with("", &no_env()).unwrap();
        assert_eq!(cfg.min_critical_priority, 100.0);
        assert_eq!(cfg.event_capacity, 1024);
    }

    #[test]
    fn parse_full_toml() {
        let toml = r#"
min_critical_priority = 8.0
worker_threads = 4
max_concurrency = 2
event_capacity = 64
idle_wait_ms = 20
drain_poll_ms = 5
"#;
        let cfg = SchedulerConfig::from_toml_with(toml, &no_env()).unwrap();
        assert_eq!(cfg.min_critical_priority, 8.0);
        assert_eq!(cfg.worker_threads, 4);
        assert_eq!(cfg.resolved_max_concurrency(), 2);
        assert_eq!(cfg.event_capacity, 64);
        assert_eq!(cfg.idle_wait_ms, 20);
        assert_eq!(cfg.drain_poll_ms, 5);
    }

    #[test]
    fn env_overrides_file_values() {
        let env = EnvOverrides::from_pairs(
            "",
            ENV_PREFIX,
            [
                ("PRIOSCHED_MIN_CRITICAL_PRIORITY", "50.5"),
                ("PRIOSCHED_WORKER_THREADS", "6"),
            ],
        );
        let cfg = SchedulerConfig::from_toml_with("worker_threads = 2", &env).unwrap();
        assert_eq!(cfg.min_critical_priority, 50.5);
        assert_eq!(cfg.worker_threads, 6);
    }

    #[test]
    fn invalid_env_value_is_an_error() {
        let env = EnvOverrides::from_pairs("", ENV_PREFIX, [("PRIOSCHED_EVENT_CAPACITY", "lots")]);
        assert!(matches!(
            SchedulerConfig::from_toml_with("", &env),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        assert!(matches!(
            SchedulerConfig::from_toml_with("worker_threads = \"four\"", &no_env()),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn validation_rejects_bad_ranges() {
        for toml in ["event_capacity = 0", "idle_wait_ms = 0", "min_critical_priority = inf"] {
            let err = SchedulerConfig::from_toml_with(toml, &no_env()).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(_)), "{toml}: {err}");
        }
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = SchedulerConfig::from_file("/nonexistent/priosched.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
