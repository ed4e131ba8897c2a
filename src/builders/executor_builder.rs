//! Builders to construct job executors from configuration.

use std::sync::Arc;

use tracing::info;

use crate::config::SchedulerConfig;
use crate::core::{JobExecutor, ScheduledJobExecutor, SchedulerError, WorkSubmitter, WorkerPool};

use super::pool_builder::build_worker_pool;

/// A worker pool together with the executor that feeds it.
pub struct Scheduler {
    /// The pool running job bodies and rescan passes.
    pub pool: Arc<WorkerPool>,
    /// The executor submitting to `pool`.
    pub executor: JobExecutor,
}

impl Scheduler {
    /// Shut down the executor, wait up to `timeout` for its jobs to drain,
    /// then stop the pool.
    ///
    /// Returns whether the executor drained in time.
    pub fn shutdown(&self, timeout: std::time::Duration) -> bool {
        self.executor.shutdown();
        let drained = self.executor.await_termination(timeout).unwrap_or(false);
        self.pool.shutdown();
        drained
    }
}

/// Build an event-driven executor on top of `submitter`.
///
/// # Errors
///
/// `SchedulerError::InvalidConfig` if `cfg` fails validation.
pub fn build_executor(cfg: &SchedulerConfig, submitter: Arc<dyn WorkSubmitter>) -> Result<JobExecutor, SchedulerError> {
    cfg.validate()
        .map_err(|e| SchedulerError::InvalidConfig(format!("config invalid: {e}")))?;
    Ok(JobExecutor::with_config(submitter, &cfg.executor))
}

/// Build a periodically rescanning executor on top of `submitter`.
///
/// # Errors
///
/// - `SchedulerError::InvalidConfig` if `cfg` fails validation
/// - `SchedulerError::Io` if the timer thread cannot be spawned
pub fn build_scheduled_executor(
    cfg: &SchedulerConfig,
    submitter: Arc<dyn WorkSubmitter>,
) -> Result<ScheduledJobExecutor, SchedulerError> {
    cfg.validate()
        .map_err(|e| SchedulerError::InvalidConfig(format!("config invalid: {e}")))?;
    ScheduledJobExecutor::with_config(submitter, &cfg.executor)
}

/// Build a native worker pool and an executor feeding it.
///
/// # Errors
///
/// Fails like [`build_worker_pool`].
pub fn build_scheduler(cfg: &SchedulerConfig) -> Result<Scheduler, SchedulerError> {
    let pool = Arc::new(build_worker_pool(cfg)?);
    let executor = build_executor(cfg, Arc::clone(&pool) as Arc<dyn WorkSubmitter>)?;
    info!(
        worker_count = cfg.pool.worker_count,
        rescan_throttle = cfg.executor.rescan_throttle,
        "Scheduler built"
    );
    Ok(Scheduler { pool, executor })
}
