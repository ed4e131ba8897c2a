//! Builders to construct worker pools from configuration.

use crate::config::SchedulerConfig;
use crate::core::{SchedulerError, WorkerPool};

/// Build a native worker pool from the `pool` section of `cfg`.
///
/// # Errors
///
/// - `SchedulerError::InvalidConfig` if `cfg` fails validation
/// - `SchedulerError::Pool` if the worker threads cannot be started
pub fn build_worker_pool(cfg: &SchedulerConfig) -> Result<WorkerPool, SchedulerError> {
    cfg.validate()
        .map_err(|e| SchedulerError::InvalidConfig(format!("config invalid: {e}")))?;
    Ok(WorkerPool::new(cfg.pool.clone())?)
}
