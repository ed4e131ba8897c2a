//! Executor with periodic rescans.
//!
//! Event-driven rescans only notice readiness changes caused by other jobs.
//! Dependencies that flip for outside reasons (wall-clock gates, external
//! flags) are picked up by a dedicated timer thread that requests a rescan
//! every period.

use std::ops::Deref;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, select, tick, Sender};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::JobExecutorConfig;
use crate::config::executor::DEFAULT_RESCAN_PERIOD_MS;
use crate::core::error::SchedulerError;
use crate::core::executor::JobExecutor;
use crate::core::worker_pool::WorkSubmitter;

/// A [`JobExecutor`] that also rescans on a fixed period.
///
/// Dereferences to the inner executor for everything but
/// [`ScheduledJobExecutor::shutdown`], which also stops the timer.
pub struct ScheduledJobExecutor {
    executor: JobExecutor,
    period: Duration,
    stop_tx: Mutex<Option<Sender<()>>>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl ScheduledJobExecutor {
    /// Periodic executor with default settings (throttle 3, period 1 s).
    ///
    /// # Errors
    ///
    /// `SchedulerError::Io` if the timer thread cannot be spawned.
    pub fn new(submitter: Arc<dyn WorkSubmitter>) -> Result<Self, SchedulerError> {
        Self::with_config(submitter, &JobExecutorConfig::scheduled())
    }

    /// Periodic executor configured from `config`. A missing period falls
    /// back to one second.
    ///
    /// # Errors
    ///
    /// - `SchedulerError::InvalidConfig` if `config` fails validation
    /// - `SchedulerError::Io` if the timer thread cannot be spawned
    pub fn with_config(submitter: Arc<dyn WorkSubmitter>, config: &JobExecutorConfig) -> Result<Self, SchedulerError> {
        config.validate().map_err(SchedulerError::InvalidConfig)?;
        let period = config
            .rescan_period()
            .unwrap_or(Duration::from_millis(DEFAULT_RESCAN_PERIOD_MS));
        let executor = JobExecutor::with_config(submitter, config);

        let (stop_tx, stop_rx) = bounded::<()>(0);
        let ticking = executor.clone();
        let timer = thread::Builder::new()
            .name("job-rescan-timer".into())
            .spawn(move || {
                let ticker = tick(period);
                loop {
                    select! {
                        recv(ticker) -> _ => ticking.rescan_jobs(),
                        recv(stop_rx) -> _ => break,
                    }
                }
                debug!("Rescan timer stopped");
            })?;

        info!(period_ms = u64::try_from(period.as_millis()).unwrap_or(u64::MAX), "Scheduled job executor started");

        Ok(Self {
            executor,
            period,
            stop_tx: Mutex::new(Some(stop_tx)),
            timer: Mutex::new(Some(timer)),
        })
    }

    /// Period between timer-driven rescans.
    #[must_use]
    pub const fn period(&self) -> Duration {
        self.period
    }

    /// The underlying executor handle.
    #[must_use]
    pub const fn executor(&self) -> &JobExecutor {
        &self.executor
    }

    /// Stop the timer, then shut the executor down.
    pub fn shutdown(&self) {
        self.stop_timer();
        self.executor.shutdown();
    }

    fn stop_timer(&self) {
        // Dropping the sender disconnects the stop channel and ends the timer loop.
        drop(self.stop_tx.lock().take());
        if let Some(timer) = self.timer.lock().take() {
            let _ = timer.join();
        }
    }
}

impl Deref for ScheduledJobExecutor {
    type Target = JobExecutor;

    fn deref(&self) -> &JobExecutor {
        &self.executor
    }
}

impl Drop for ScheduledJobExecutor {
    fn drop(&mut self) {
        drop(self.stop_tx.lock().take());
    }
}
