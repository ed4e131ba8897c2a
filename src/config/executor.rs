//! Job executor configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default number of concurrent rescan passes for event-driven executors.
pub const DEFAULT_RESCAN_THROTTLE: usize = 2;
/// Default number of concurrent rescan passes for periodic executors.
pub const DEFAULT_SCHEDULED_RESCAN_THROTTLE: usize = 3;
/// Default period between timer-driven rescans.
pub const DEFAULT_RESCAN_PERIOD_MS: u64 = 1_000;

/// Rescan behaviour of a [`JobExecutor`](crate::core::JobExecutor).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobExecutorConfig {
    /// Maximum rescan passes in flight on the worker pool at once.
    pub rescan_throttle: usize,
    /// Period of timer-driven rescans; `None` means event-driven only.
    pub rescan_period_ms: Option<u64>,
}

impl Default for JobExecutorConfig {
    fn default() -> Self {
        Self {
            rescan_throttle: DEFAULT_RESCAN_THROTTLE,
            rescan_period_ms: None,
        }
    }
}

impl JobExecutorConfig {
    /// Event-driven defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults for a periodic executor: throttle 3, one rescan per second.
    #[must_use]
    pub const fn scheduled() -> Self {
        Self {
            rescan_throttle: DEFAULT_SCHEDULED_RESCAN_THROTTLE,
            rescan_period_ms: Some(DEFAULT_RESCAN_PERIOD_MS),
        }
    }

    /// Set the rescan throttle.
    #[must_use]
    pub const fn with_rescan_throttle(mut self, rescan_throttle: usize) -> Self {
        self.rescan_throttle = rescan_throttle;
        self
    }

    /// Set the rescan period.
    #[must_use]
    pub const fn with_rescan_period(mut self, period: Duration) -> Self {
        #[allow(clippy::cast_possible_truncation)]
        let millis = period.as_millis() as u64;
        self.rescan_period_ms = Some(millis);
        self
    }

    /// The rescan period as a duration.
    #[must_use]
    pub const fn rescan_period(&self) -> Option<Duration> {
        match self.rescan_period_ms {
            Some(millis) => Some(Duration::from_millis(millis)),
            None => None,
        }
    }

    /// Validate executor configuration values.
    ///
    /// # Errors
    ///
    /// A human-readable description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.rescan_throttle == 0 {
            return Err("rescan_throttle must be greater than 0".into());
        }
        if self.rescan_period_ms == Some(0) {
            return Err("rescan_period_ms must be greater than 0".into());
        }
        Ok(())
    }
}
