//! The job executor and its throttled rescan engine.
//!
//! A [`JobExecutor`] owns the set of live jobs. It never runs bodies itself:
//! every *rescan pass* sweeps a snapshot of the set, discards jobs that are
//! finished or can no longer run, marks ready jobs scheduled and hands them
//! to the injected [`WorkSubmitter`]. Passes themselves also run on the
//! submitter.
//!
//! Rescans are requested whenever a job gives up its execution claim, fails
//! to start, or is cancelled, and whenever a job is submitted. At most `rescan_throttle`
//! passes are in flight at once; requests beyond that set a *debt* flag so
//! the last pass to finish requests one more. No request is lost, and event
//! storms do not flood the pool with redundant passes.

use std::sync::atomic::{AtomicBool, AtomicIsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, trace, warn};

use crate::config::JobExecutorConfig;
use crate::core::error::SchedulerError;
use crate::core::event::SystemEvent;
use crate::core::job::Job;
use crate::core::worker_pool::WorkSubmitter;

/// Events after which a job's neighbours may have become ready or discardable.
///
/// Finishing is not listed: a job reports it by releasing its execution
/// claim, after its outcome listeners have returned.
const RESCAN_TRIGGERS: [SystemEvent; 2] = [SystemEvent::FailedToStart, SystemEvent::Cancel];

/// Re-arming "the live set became empty" signal.
///
/// Each completion bumps a generation number; waiters wake on any bump.
#[derive(Default)]
struct EmptinessSignal {
    generation: Mutex<u64>,
    changed: Condvar,
}

impl EmptinessSignal {
    fn complete(&self) {
        let mut generation = self.generation.lock();
        *generation = generation.wrapping_add(1);
        self.changed.notify_all();
    }

    /// Wait until `is_empty` holds, re-checking after every completion.
    fn wait(&self, timeout: Duration, is_empty: impl Fn() -> bool) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut generation = self.generation.lock();
        loop {
            if is_empty() {
                return true;
            }
            let seen = *generation;
            while *generation == seen {
                match deadline {
                    Some(deadline) => {
                        if self.changed.wait_until(&mut generation, deadline).timed_out() {
                            return is_empty();
                        }
                    }
                    None => self.changed.wait(&mut generation),
                }
            }
        }
    }
}

struct ExecutorInner {
    submitter: Arc<dyn WorkSubmitter>,
    jobs: DashMap<u64, Arc<Job>>,
    shutdown: AtomicBool,
    permits: AtomicIsize,
    threshold: isize,
    rescan_debt: AtomicBool,
    emptiness: EmptinessSignal,
}

/// Restores the pass permit when a pass ends, even by panic.
struct PassGuard<'a>(&'a Arc<ExecutorInner>);

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        let inner = self.0;
        if inner.jobs.is_empty() {
            inner.emptiness.complete();
        }
        inner.restore_permit();
    }
}

impl ExecutorInner {
    fn request_rescan(self: &Arc<Self>) {
        if self.permits.fetch_sub(1, Ordering::SeqCst) > 0 {
            let inner = Arc::clone(self);
            if let Err(err) = self.submitter.execute(Box::new(move || inner.rescan_pass())) {
                self.rescan_debt.store(true, Ordering::SeqCst);
                self.permits.fetch_add(1, Ordering::SeqCst);
                warn!(error = %err, "Failed to submit rescan pass");
            }
        } else {
            // Debt is recorded before the permit comes back, so whoever
            // restores the last permit sees it.
            self.rescan_debt.store(true, Ordering::SeqCst);
            self.restore_permit();
        }
    }

    fn restore_permit(self: &Arc<Self>) {
        let permits = self.permits.fetch_add(1, Ordering::SeqCst) + 1;
        if permits >= self.threshold
            && self
                .rescan_debt
                .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            trace!("Paying rescan debt");
            self.request_rescan();
        }
    }

    fn rescan_pass(self: &Arc<Self>) {
        let _guard = PassGuard(self);

        let mut snapshot: Vec<Arc<Job>> = self.jobs.iter().map(|entry| Arc::clone(entry.value())).collect();
        snapshot.sort_unstable_by_key(|job| job.key());

        for job in snapshot {
            if Self::is_discardable(&job) {
                self.discard(&job);
            } else if !job.is_executed() && !job.is_scheduled() && job.can_run() && job.try_schedule() {
                self.dispatch(job);
            }
        }
    }

    fn is_discardable(job: &Job) -> bool {
        // Read before `running`: executed and no longer running means the body has returned.
        let executed = job.is_executed();
        if job.is_running() {
            return false;
        }
        if executed || job.is_done() {
            return true;
        }
        !job.is_scheduled() && !job.is_possible_to_run()
    }

    fn discard(&self, job: &Arc<Job>) {
        if job.claim_discard() {
            self.jobs.remove(&job.key());
            debug!(job_id = %job.id(), "Job discarded");
            job.fire_system(SystemEvent::Discarded, None);
        }
    }

    fn dispatch(&self, job: Arc<Job>) {
        debug!(job_id = %job.id(), "Job scheduled");
        job.fire_system(SystemEvent::Scheduled, None);
        let runner = Arc::clone(&job);
        if let Err(err) = self.submitter.execute(Box::new(move || runner.run())) {
            warn!(job_id = %job.id(), error = %err, "Failed to submit job, rolling back schedule");
            job.fail_to_start();
        }
    }
}

/// Dependency-aware job executor.
///
/// Cloning is cheap and yields another handle to the same executor.
#[derive(Clone)]
pub struct JobExecutor {
    inner: Arc<ExecutorInner>,
}

impl JobExecutor {
    /// Executor with the default rescan throttle.
    pub fn new(submitter: Arc<dyn WorkSubmitter>) -> Self {
        Self::with_config(submitter, &JobExecutorConfig::default())
    }

    /// Executor configured from `config`. The rescan period is ignored here;
    /// see [`ScheduledJobExecutor`](crate::core::ScheduledJobExecutor).
    pub fn with_config(submitter: Arc<dyn WorkSubmitter>, config: &JobExecutorConfig) -> Self {
        let threshold = isize::try_from(config.rescan_throttle.max(1)).unwrap_or(isize::MAX);
        Self {
            inner: Arc::new(ExecutorInner {
                submitter,
                jobs: DashMap::new(),
                shutdown: AtomicBool::new(false),
                permits: AtomicIsize::new(threshold),
                threshold,
                rescan_debt: AtomicBool::new(false),
                emptiness: EmptinessSignal::default(),
            }),
        }
    }

    /// Add a job to the live set and request a rescan.
    ///
    /// # Errors
    ///
    /// - `SchedulerError::Shutdown` after [`JobExecutor::shutdown`]
    /// - `SchedulerError::TopologyFrozen` if the job was already scheduled elsewhere
    pub fn submit(&self, job: &Arc<Job>) -> Result<(), SchedulerError> {
        if self.is_shutdown() {
            return Err(SchedulerError::Shutdown);
        }
        for event in RESCAN_TRIGGERS {
            let executor = Arc::downgrade(&self.inner);
            job.add_listener(event, move |_| {
                if let Some(inner) = Weak::upgrade(&executor) {
                    inner.request_rescan();
                }
                Ok(())
            })?;
        }
        let executor = Arc::downgrade(&self.inner);
        job.add_release_hook(Arc::new(move || {
            if let Some(inner) = Weak::upgrade(&executor) {
                inner.request_rescan();
            }
        }))?;
        self.inner.jobs.insert(job.key(), Arc::clone(job));
        debug!(job_id = %job.id(), "Job submitted");
        self.inner.request_rescan();
        Ok(())
    }

    /// Submit every job in order, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// As [`JobExecutor::submit`].
    pub fn submit_all<'a, I>(&self, jobs: I) -> Result<(), SchedulerError>
    where
        I: IntoIterator<Item = &'a Arc<Job>>,
    {
        jobs.into_iter().try_for_each(|job| self.submit(job))
    }

    /// Request a rescan pass.
    pub fn rescan_jobs(&self) {
        self.inner.request_rescan();
    }

    /// Whether the live set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.jobs.is_empty()
    }

    /// Number of live jobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.jobs.len()
    }

    /// Snapshot of the live jobs, in submission order.
    #[must_use]
    pub fn jobs(&self) -> Vec<Arc<Job>> {
        let mut jobs: Vec<_> = self.inner.jobs.iter().map(|entry| Arc::clone(entry.value())).collect();
        jobs.sort_unstable_by_key(|job| job.key());
        jobs
    }

    /// Whether `shutdown` was called.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::SeqCst)
    }

    /// Stop accepting jobs and request a final rescan. Live jobs keep running.
    pub fn shutdown(&self) {
        if !self.inner.shutdown.swap(true, Ordering::SeqCst) {
            info!(live_jobs = self.len(), "Job executor shutting down");
        }
        self.inner.request_rescan();
    }

    /// Block until the live set is empty or `timeout` elapses.
    ///
    /// Returns whether the set was empty.
    pub fn await_job_emptiness(&self, timeout: Duration) -> bool {
        let inner = &self.inner;
        inner.emptiness.wait(timeout, || inner.jobs.is_empty())
    }

    /// After [`JobExecutor::shutdown`], wait for the live set to drain.
    ///
    /// # Errors
    ///
    /// `SchedulerError::NotShutdown` if the executor was not shut down.
    pub fn await_termination(&self, timeout: Duration) -> Result<bool, SchedulerError> {
        if !self.is_shutdown() {
            return Err(SchedulerError::NotShutdown);
        }
        Ok(self.await_job_emptiness(timeout))
    }
}

impl std::fmt::Debug for JobExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobExecutor")
            .field("live_jobs", &self.len())
            .field("shutdown", &self.is_shutdown())
            .finish_non_exhaustive()
    }
}
