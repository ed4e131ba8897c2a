//! Root scheduler configuration.

use std::env;
use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{JobExecutorConfig, WorkerPoolConfig};

/// Environment variable overriding [`WorkerPoolConfig::worker_count`].
pub const ENV_WORKER_COUNT: &str = "JOBS_WORKER_COUNT";
/// Environment variable overriding [`WorkerPoolConfig::max_queue_depth`].
pub const ENV_MAX_QUEUE_DEPTH: &str = "JOBS_MAX_QUEUE_DEPTH";
/// Environment variable overriding [`JobExecutorConfig::rescan_throttle`].
pub const ENV_RESCAN_THROTTLE: &str = "JOBS_RESCAN_THROTTLE";
/// Environment variable overriding [`JobExecutorConfig::rescan_period_ms`].
pub const ENV_RESCAN_PERIOD_MS: &str = "JOBS_RESCAN_PERIOD_MS";

/// Root configuration: one worker pool and one executor on top of it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Worker pool settings.
    pub pool: WorkerPoolConfig,
    /// Executor settings.
    pub executor: JobExecutorConfig,
}

impl SchedulerConfig {
    /// Validate the pool and executor sections.
    ///
    /// # Errors
    ///
    /// A description prefixed with the failing section.
    pub fn validate(&self) -> Result<(), String> {
        self.pool.validate().map_err(|e| format!("pool invalid: {e}"))?;
        self.executor
            .validate()
            .map_err(|e| format!("executor invalid: {e}"))?;
        Ok(())
    }

    /// Parse scheduler configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Parse or validation failure.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Defaults overridden from the process environment (and a `.env` file if present).
    ///
    /// # Errors
    ///
    /// Unparseable variable or validation failure.
    pub fn from_env() -> Result<Self, String> {
        let _ = dotenvy::dotenv();
        Self::default().with_overrides(|name| env::var(name).ok())
    }

    /// Apply overrides from `lookup`, keyed by the `JOBS_*` variable names, and validate.
    ///
    /// # Errors
    ///
    /// Unparseable value or validation failure.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(workers) = parse_var(&lookup, ENV_WORKER_COUNT)? {
            self.pool.worker_count = workers;
        }
        if let Some(depth) = parse_var(&lookup, ENV_MAX_QUEUE_DEPTH)? {
            self.pool.max_queue_depth = depth;
        }
        if let Some(throttle) = parse_var(&lookup, ENV_RESCAN_THROTTLE)? {
            self.executor.rescan_throttle = throttle;
        }
        if let Some(period) = parse_var(&lookup, ENV_RESCAN_PERIOD_MS)? {
            self.executor.rescan_period_ms = Some(period);
        }
        self.validate()?;
        Ok(self)
    }
}

fn parse_var<T, F>(lookup: &F, name: &str) -> Result<Option<T>, String>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|raw| raw.trim().parse().map_err(|e| format!("{name}: {e}")))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_from_json_with_partial_sections() {
        let cfg = SchedulerConfig::from_json_str(
            r#"{ "pool": { "worker_count": 3 }, "executor": { "rescan_period_ms": 250 } }"#,
        )
        .unwrap();
        assert_eq!(cfg.pool.worker_count, 3);
        assert_eq!(cfg.pool.max_queue_depth, 10_000);
        assert_eq!(cfg.executor.rescan_throttle, 2);
        assert_eq!(cfg.executor.rescan_period_ms, Some(250));
    }

    #[test]
    fn test_from_json_rejects_invalid() {
        let err = SchedulerConfig::from_json_str(r#"{ "executor": { "rescan_throttle": 0 } }"#).unwrap_err();
        assert!(err.starts_with("executor invalid"), "{err}");
        let err = SchedulerConfig::from_json_str("not json").unwrap_err();
        assert!(err.starts_with("parse error"), "{err}");
    }

    #[test]
    fn test_overrides() {
        let vars = HashMap::from([
            (ENV_WORKER_COUNT, "6"),
            (ENV_RESCAN_THROTTLE, " 4 "),
            (ENV_RESCAN_PERIOD_MS, "500"),
        ]);
        let cfg = SchedulerConfig::default()
            .with_overrides(|name| vars.get(name).map(ToString::to_string))
            .unwrap();
        assert_eq!(cfg.pool.worker_count, 6);
        assert_eq!(cfg.executor.rescan_throttle, 4);
        assert_eq!(cfg.executor.rescan_period_ms, Some(500));

        let bad = HashMap::from([(ENV_MAX_QUEUE_DEPTH, "lots")]);
        let err = SchedulerConfig::default()
            .with_overrides(|name| bad.get(name).map(ToString::to_string))
            .unwrap_err();
        assert!(err.starts_with(ENV_MAX_QUEUE_DEPTH), "{err}");
    }
}
