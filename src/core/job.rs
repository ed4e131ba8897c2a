//! The job lifecycle state machine.
//!
//! A [`Job`] wraps a body closure together with:
//!
//! - **Dependencies**: readiness predicates that must all hold before the body may run
//! - **Reverse edges**: jobs to cancel when this job is cancelled with propagation
//! - **Listeners**: callbacks per [`EventKey`], isolated from each other and from the job
//! - **Lifecycle flags**: lock-free atomics readable at any time through [`Job::flags`]
//!
//! Topology (dependencies, reverse edges, listeners) is frozen the first time
//! the job is scheduled or run. Freezing moves it into an immutable snapshot,
//! so readiness checks and event dispatch after that point take no lock.
//!
//! # Example
//!
//! ```rust,ignore
//! use prometheus_jobs::core::{Job, SystemEvent};
//!
//! let fetch = Job::new(|_job| Ok(42_u32));
//! let report = Job::new(|_job| Ok(()));
//! fetch.chain_forward(SystemEvent::Successful, &report)?;
//! ```

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::dependency::{Dependency, SystemJobDependency};
use crate::core::error::{JobError, SchedulerError};
use crate::core::event::{EventKey, EventPayload, JobEvent, SystemEvent};
use crate::util::{new_job_id, panic_message};

/// Type-erased job output.
pub type JobOutput = Arc<dyn Any + Send + Sync>;

type Body = Box<dyn FnOnce(&Job) -> anyhow::Result<JobOutput> + Send>;

/// A registered event callback.
pub type Listener = Arc<dyn Fn(&JobEvent<'_>) -> anyhow::Result<()> + Send + Sync>;

/// Called every time a thread gives up the job's execution claim.
pub(crate) type ReleaseHook = Arc<dyn Fn() + Send + Sync>;

static NEXT_KEY: AtomicU64 = AtomicU64::new(1);

const NOT_STARTED: u8 = 0;
const STARTED: u8 = 1;
const ABORTED: u8 = 2;

/// Stable, caller-visible job identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Generate a fresh random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(new_job_id())
    }

    /// Borrow the identifier as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Error a job body returns to report that it honoured an interrupt request.
///
/// Bodies poll [`Job::check_interrupt`] and propagate this with `?`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Error)]
#[error("job interrupted")]
pub struct Interrupted;

/// Point-in-time view of a job's lifecycle flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct JobFlags {
    /// The job was cancelled.
    pub cancelled: bool,
    /// The job was cancelled before its body started.
    pub aborted: bool,
    /// The body completed successfully.
    pub successful: bool,
    /// The body failed.
    pub exceptional: bool,
    /// The body stopped on an interrupt request.
    pub interrupted: bool,
    /// At least one listener failed.
    pub exceptional_event: bool,
    /// The body was started.
    pub executed: bool,
    /// The job is dispatched to a worker pool.
    pub scheduled: bool,
    /// The executor dropped the job.
    pub discarded: bool,
    /// A thread currently holds the execution claim.
    pub running: bool,
    /// Number of dispatches whose dependencies no longer held at run time.
    pub failed_to_start: u32,
}

impl JobFlags {
    /// Cancelled, successful or exceptional.
    #[must_use]
    pub const fn is_done(&self) -> bool {
        self.cancelled || self.successful || self.exceptional
    }

    /// Discarded or done.
    #[must_use]
    pub const fn is_discarded_or_done(&self) -> bool {
        self.discarded || self.is_done()
    }
}

#[derive(Default)]
struct Topology {
    dependencies: Vec<Arc<dyn Dependency>>,
    after: Vec<Weak<Job>>,
    listeners: HashMap<EventKey, Vec<Listener>>,
    release_hooks: Vec<ReleaseHook>,
}

struct CancelLineage {
    parent: Weak<Job>,
    root: Weak<Job>,
}

enum Outcome {
    Value(JobOutput),
    Failed(Arc<anyhow::Error>),
    Interrupted,
}

/// A schedulable unit of work.
///
/// Jobs are always handled through `Arc<Job>`; constructors return one.
pub struct Job {
    id: JobId,
    key: u64,
    this: Weak<Job>,
    topology: RwLock<Topology>,
    frozen: AtomicBool,
    snapshot: OnceLock<Topology>,
    body: Mutex<Option<Body>>,
    start: AtomicU8,
    cancelled: AtomicBool,
    successful: AtomicBool,
    exceptional: AtomicBool,
    interrupted: AtomicBool,
    exceptional_event: AtomicBool,
    scheduled: AtomicBool,
    discarded: AtomicBool,
    running: AtomicBool,
    interrupt_requested: AtomicBool,
    failed_to_start: AtomicU32,
    lineage: OnceLock<CancelLineage>,
    outcome: Mutex<Option<Outcome>>,
    settled: Condvar,
    execution_thread: OnceLock<ThreadId>,
}

impl Job {
    /// Create a job with a generated id.
    pub fn new<T, F>(body: F) -> Arc<Self>
    where
        T: Send + Sync + 'static,
        F: FnOnce(&Self) -> anyhow::Result<T> + Send + 'static,
    {
        Self::with_id(JobId::generate(), body)
    }

    /// Create a job with a caller-supplied id.
    pub fn with_id<T, F>(id: impl Into<JobId>, body: F) -> Arc<Self>
    where
        T: Send + Sync + 'static,
        F: FnOnce(&Self) -> anyhow::Result<T> + Send + 'static,
    {
        let body: Body = Box::new(move |job| body(job).map(|value| Arc::new(value) as JobOutput));
        let id = id.into();
        Arc::new_cyclic(|this| Self {
            id,
            key: NEXT_KEY.fetch_add(1, Ordering::Relaxed),
            this: this.clone(),
            topology: RwLock::new(Topology::default()),
            frozen: AtomicBool::new(false),
            snapshot: OnceLock::new(),
            body: Mutex::new(Some(body)),
            start: AtomicU8::new(NOT_STARTED),
            cancelled: AtomicBool::new(false),
            successful: AtomicBool::new(false),
            exceptional: AtomicBool::new(false),
            interrupted: AtomicBool::new(false),
            exceptional_event: AtomicBool::new(false),
            scheduled: AtomicBool::new(false),
            discarded: AtomicBool::new(false),
            running: AtomicBool::new(false),
            interrupt_requested: AtomicBool::new(false),
            failed_to_start: AtomicU32::new(0),
            lineage: OnceLock::new(),
            outcome: Mutex::new(None),
            settled: Condvar::new(),
            execution_thread: OnceLock::new(),
        })
    }

    /// The job's identifier.
    #[must_use]
    pub const fn id(&self) -> &JobId {
        &self.id
    }

    /// Process-unique numeric key, never zero.
    #[must_use]
    pub const fn key(&self) -> u64 {
        self.key
    }

    /// A strong handle to this job, if it is still alive.
    #[must_use]
    pub fn handle(&self) -> Option<Arc<Self>> {
        self.this.upgrade()
    }

    // ------------------------------------------------------------------
    // Topology
    // ------------------------------------------------------------------

    fn topology_mut(&self) -> Result<RwLockWriteGuard<'_, Topology>, SchedulerError> {
        let guard = self.topology.write();
        if self.frozen.load(Ordering::SeqCst) {
            return Err(SchedulerError::TopologyFrozen(self.id.to_string()));
        }
        Ok(guard)
    }

    /// Move the topology into the lock-free snapshot. Callers hold the write lock.
    fn freeze(&self, topology: &mut Topology) {
        if !self.frozen.swap(true, Ordering::SeqCst) {
            let _ = self.snapshot.set(std::mem::take(topology));
        }
    }

    fn with_topology<R>(&self, read: impl FnOnce(&Topology) -> R) -> R {
        if let Some(frozen) = self.snapshot.get() {
            return read(frozen);
        }
        let guard = self.topology.read();
        // A freeze may have completed while this thread waited for the lock.
        match self.snapshot.get() {
            Some(frozen) => read(frozen),
            None => read(&guard),
        }
    }

    /// Add a readiness predicate.
    ///
    /// # Errors
    ///
    /// `SchedulerError::TopologyFrozen` once the job has been scheduled.
    pub fn add_dependency(&self, dependency: Arc<dyn Dependency>) -> Result<(), SchedulerError> {
        self.topology_mut()?.dependencies.push(dependency);
        Ok(())
    }

    /// Register `job` to be cancelled when this job is cancelled with propagation.
    ///
    /// # Errors
    ///
    /// - `SchedulerError::TopologyFrozen` once the job has been scheduled
    /// - `SchedulerError::CancellationCycle` if `job` already reaches this job
    pub fn add_after(&self, job: &Arc<Self>) -> Result<(), SchedulerError> {
        if job.reaches(self.key) {
            return Err(SchedulerError::CancellationCycle {
                from: self.id.to_string(),
                to: job.id.to_string(),
            });
        }
        self.topology_mut()?.after.push(Arc::downgrade(job));
        Ok(())
    }

    /// Register a listener for a system event or a custom event name.
    ///
    /// # Errors
    ///
    /// `SchedulerError::TopologyFrozen` once the job has been scheduled.
    pub fn add_listener<F>(&self, key: impl Into<EventKey>, listener: F) -> Result<(), SchedulerError>
    where
        F: Fn(&JobEvent<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.topology_mut()?
            .listeners
            .entry(key.into())
            .or_default()
            .push(Arc::new(listener));
        Ok(())
    }

    /// `job` may run only after this job reaches `event`; cancelling this job cancels `job`.
    ///
    /// Returns `self` so calls can be chained.
    ///
    /// # Errors
    ///
    /// Fails like [`Job::add_after`] and [`Job::add_dependency`].
    pub fn chain_forward(self: &Arc<Self>, event: SystemEvent, job: &Arc<Self>) -> Result<&Arc<Self>, SchedulerError> {
        self.add_after(job)?;
        job.add_dependency(Arc::new(SystemJobDependency::new(Arc::clone(self), event)))?;
        Ok(self)
    }

    /// This job may run only after `job` reaches `event`; cancelling `job` cancels this job.
    ///
    /// Returns `self` so calls can be chained.
    ///
    /// # Errors
    ///
    /// Fails like [`Job::add_after`] and [`Job::add_dependency`].
    pub fn chain_backward(self: &Arc<Self>, event: SystemEvent, job: &Arc<Self>) -> Result<&Arc<Self>, SchedulerError> {
        job.add_after(self)?;
        self.add_dependency(Arc::new(SystemJobDependency::new(Arc::clone(job), event)))?;
        Ok(self)
    }

    /// [`Job::chain_forward`] on [`SystemEvent::Successful`].
    ///
    /// # Errors
    ///
    /// Fails like [`Job::chain_forward`].
    pub fn chain_forward_on_success(self: &Arc<Self>, job: &Arc<Self>) -> Result<&Arc<Self>, SchedulerError> {
        self.chain_forward(SystemEvent::Successful, job)
    }

    /// [`Job::chain_backward`] on [`SystemEvent::Successful`].
    ///
    /// # Errors
    ///
    /// Fails like [`Job::chain_backward`].
    pub fn chain_backward_on_success(self: &Arc<Self>, job: &Arc<Self>) -> Result<&Arc<Self>, SchedulerError> {
        self.chain_backward(SystemEvent::Successful, job)
    }

    pub(crate) fn add_release_hook(&self, hook: ReleaseHook) -> Result<(), SchedulerError> {
        self.topology_mut()?.release_hooks.push(hook);
        Ok(())
    }

    /// Snapshot of the dependency set.
    #[must_use]
    pub fn dependencies(&self) -> Vec<Arc<dyn Dependency>> {
        self.with_topology(|topology| topology.dependencies.clone())
    }

    /// Whether the job has no dependencies of any kind.
    #[must_use]
    pub fn has_no_dependencies(&self) -> bool {
        self.with_topology(|topology| topology.dependencies.is_empty())
    }

    /// Live jobs on this job's reverse edges.
    #[must_use]
    pub fn after_jobs(&self) -> Vec<Arc<Self>> {
        self.with_topology(|topology| topology.after.iter().filter_map(Weak::upgrade).collect())
    }

    fn reaches(&self, target: u64) -> bool {
        if self.key == target {
            return true;
        }
        let mut visited = HashSet::from([self.key]);
        let mut stack = self.after_jobs();
        while let Some(job) = stack.pop() {
            if job.key == target {
                return true;
            }
            if visited.insert(job.key) {
                stack.extend(job.after_jobs());
            }
        }
        false
    }

    // ------------------------------------------------------------------
    // Readiness
    // ------------------------------------------------------------------

    /// True iff the job is not done and every dependency is completed for it.
    #[must_use]
    pub fn can_run(&self) -> bool {
        if self.is_done() {
            return false;
        }
        self.dependencies().iter().all(|dependency| dependency.is_completed(self))
    }

    /// False once the job is discarded or done, or once any dependency can never complete.
    #[must_use]
    pub fn is_possible_to_run(&self) -> bool {
        if self.is_discarded_or_done() {
            return false;
        }
        self.dependencies().iter().all(|dependency| dependency.is_possible())
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    /// Run the body on the calling thread, at most once over the job's lifetime.
    ///
    /// If the dependencies no longer hold, the job records a failed start,
    /// becomes unscheduled again and fires `FailedToStart`.
    ///
    /// The outcome event and `Done` are fired while the execution claim is
    /// still held. An executor can therefore not discard the job, nor report
    /// emptiness, before those listeners have returned.
    ///
    /// # Panics
    ///
    /// If the execution claim cannot be released, which means the job's
    /// state was corrupted.
    pub fn run(&self) {
        if self.is_executed() || self.is_discarded() {
            return;
        }
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        if self.snapshot.get().is_none() {
            self.freeze(&mut self.topology.write());
        }

        if self.start.load(Ordering::SeqCst) != NOT_STARTED {
            self.release_running();
            return;
        }
        if !self.can_run() {
            self.release_running();
            self.fail_to_start();
            return;
        }
        if self
            .start
            .compare_exchange(NOT_STARTED, STARTED, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            self.release_running();
            return;
        }

        let _ = self.execution_thread.set(thread::current().id());
        debug!(job_id = %self.id, "Job executing");
        self.fire_system(SystemEvent::Execute, None);

        let Some(body) = self.body.lock().take() else {
            self.release_running();
            return;
        };
        let result = panic::catch_unwind(AssertUnwindSafe(move || body(self))).unwrap_or_else(|panic| {
            Err(anyhow::anyhow!("job panicked: {}", panic_message(panic.as_ref())))
        });

        let (event, payload) = {
            let mut outcome = self.outcome.lock();
            let settled = match result {
                Ok(value) => {
                    *outcome = Some(Outcome::Value(value));
                    self.successful.store(true, Ordering::SeqCst);
                    (SystemEvent::Successful, None)
                }
                Err(err) if err.is::<Interrupted>() => {
                    *outcome = Some(Outcome::Interrupted);
                    self.interrupted.store(true, Ordering::SeqCst);
                    (SystemEvent::Interrupted, None)
                }
                Err(err) => {
                    let err = Arc::new(err);
                    *outcome = Some(Outcome::Failed(Arc::clone(&err)));
                    self.exceptional.store(true, Ordering::SeqCst);
                    (SystemEvent::Exceptional, Some(EventPayload::Error(err)))
                }
            };
            self.settled.notify_all();
            settled
        };

        debug!(job_id = %self.id, event = %event, "Job finished");
        self.fire_system(event, payload);
        if self.is_done() {
            self.fire_system(SystemEvent::Done, None);
        }
        self.release_running();
    }

    fn release_running(&self) {
        let released = self
            .running
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst);
        assert!(released.is_ok(), "job `{}` lost its execution claim", self.id);
        for hook in self.with_topology(|topology| topology.release_hooks.clone()) {
            hook();
        }
    }

    pub(crate) fn fail_to_start(&self) {
        // The counter moves before the flag so a snapshot never sees neither.
        let attempts = self.failed_to_start.fetch_add(1, Ordering::SeqCst) + 1;
        self.scheduled.store(false, Ordering::SeqCst);
        debug!(job_id = %self.id, attempts = attempts, "Job failed to start");
        self.fire_system(SystemEvent::FailedToStart, None);
    }

    pub(crate) fn try_schedule(&self) -> bool {
        let mut topology = self.topology.write();
        if self
            .scheduled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        self.freeze(&mut topology);
        true
    }

    pub(crate) fn claim_discard(&self) -> bool {
        if self
            .discarded
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        let _outcome = self.outcome.lock();
        self.settled.notify_all();
        true
    }

    // ------------------------------------------------------------------
    // Cancellation
    // ------------------------------------------------------------------

    /// Cancel the job. The first caller wins and gets `true`.
    ///
    /// With `interrupt`, a running body observes the request through
    /// [`Job::check_interrupt`]. With `propagate`, every job on the reverse
    /// edges is cancelled too, recording this job as its parent and the
    /// original job as root. Safe to call on finished jobs.
    pub fn cancel(&self, interrupt: bool, propagate: bool) -> bool {
        if !self.cancel_once(interrupt, None) {
            return false;
        }
        let Some(root) = self.handle() else {
            return true;
        };
        if propagate {
            let mut visited = HashSet::from([root.key]);
            let mut pending = vec![Arc::clone(&root)];
            while let Some(parent) = pending.pop() {
                for child in parent.after_jobs() {
                    if !visited.insert(child.key) {
                        continue;
                    }
                    let lineage = CancelLineage {
                        parent: Arc::downgrade(&parent),
                        root: Arc::downgrade(&root),
                    };
                    if child.cancel_once(interrupt, Some(lineage)) {
                        pending.push(child);
                    }
                }
            }
        }
        true
    }

    /// Cancel with interrupt and propagation.
    pub fn cancel_all(&self) -> bool {
        self.cancel(true, true)
    }

    fn cancel_once(&self, interrupt: bool, lineage: Option<CancelLineage>) -> bool {
        if self.is_cancelled() {
            return false;
        }
        // The start gate is closed before the flag so `cancelled` implies a final gate.
        let gated = self
            .start
            .compare_exchange(NOT_STARTED, ABORTED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if self
            .cancelled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        if let Some(lineage) = lineage {
            let _ = self.lineage.set(lineage);
        }
        if interrupt {
            self.interrupt_requested.store(true, Ordering::SeqCst);
        }
        {
            let _outcome = self.outcome.lock();
            self.settled.notify_all();
        }
        debug!(job_id = %self.id, interrupt = interrupt, "Job cancelled");
        self.fire_system(SystemEvent::Cancel, None);
        if gated || self.is_aborted() {
            self.fire_system(SystemEvent::Aborted, None);
        }
        true
    }

    /// Request the running body to stop without cancelling the job.
    ///
    /// A body that honours the request ends interrupted, which is not a
    /// terminal state.
    pub fn interrupt(&self) {
        self.interrupt_requested.store(true, Ordering::SeqCst);
    }

    /// Poll point for bodies.
    ///
    /// # Errors
    ///
    /// [`Interrupted`] if an interrupt was requested.
    pub fn check_interrupt(&self) -> Result<(), Interrupted> {
        if self.interrupt_requested.load(Ordering::SeqCst) {
            Err(Interrupted)
        } else {
            Ok(())
        }
    }

    /// Whether an interrupt was requested.
    #[must_use]
    pub fn is_interrupt_requested(&self) -> bool {
        self.interrupt_requested.load(Ordering::SeqCst)
    }

    /// The job whose propagated cancel reached this one.
    #[must_use]
    pub fn canceled_parent(&self) -> Option<Arc<Self>> {
        self.lineage.get().and_then(|lineage| lineage.parent.upgrade())
    }

    /// The job where the propagated cancel started.
    #[must_use]
    pub fn canceled_root(&self) -> Option<Arc<Self>> {
        self.lineage.get().and_then(|lineage| lineage.root.upgrade())
    }

    /// This job followed by each cancelling parent, ending at the root cause.
    #[must_use]
    pub fn canceled_chain(&self) -> Vec<Arc<Self>> {
        let mut chain = Vec::new();
        let mut current = self.handle();
        while let Some(job) = current {
            if !job.is_cancelled() {
                break;
            }
            current = job.canceled_parent();
            chain.push(job);
        }
        chain
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// Dispatch an event to the listeners registered under `key`.
    pub fn fire_event(&self, key: impl Into<EventKey>, payload: Option<EventPayload>) {
        let event = JobEvent { key: key.into(), source: self, payload };
        self.dispatch(&event);
    }

    pub(crate) fn fire_system(&self, event: SystemEvent, payload: Option<EventPayload>) {
        self.fire_event(event, payload);
    }

    fn listeners_for(&self, key: &EventKey) -> Vec<Listener> {
        self.with_topology(|topology| topology.listeners.get(key).cloned().unwrap_or_default())
    }

    fn dispatch(&self, event: &JobEvent<'_>) {
        let fault_key = EventKey::System(SystemEvent::ExceptionalEvent);
        for listener in self.listeners_for(&event.key) {
            let Err(err) = invoke(&listener, event) else {
                continue;
            };
            self.exceptional_event.store(true, Ordering::SeqCst);
            warn!(job_id = %self.id, event = %event.key, error = %err, "Job listener failed");
            if event.key == fault_key {
                continue;
            }
            let fault = JobEvent {
                key: fault_key.clone(),
                source: self,
                payload: Some(EventPayload::Error(Arc::new(err))),
            };
            for handler in self.listeners_for(&fault_key) {
                if let Err(err) = invoke(&handler, &fault) {
                    warn!(job_id = %self.id, error = %err, "Exceptional event listener failed, ignoring");
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Results
    // ------------------------------------------------------------------

    /// Block until the job settles and return its output as `T`.
    ///
    /// # Errors
    ///
    /// - `JobError::Failed` with the body's error
    /// - `JobError::Cancelled`, `JobError::Discarded` or `JobError::Interrupted`
    /// - `JobError::Timeout` if nothing happened in time
    /// - `JobError::OutputType` if the output is not a `T`
    pub fn get<T: Any + Send + Sync>(&self, timeout: Duration) -> Result<Arc<T>, JobError> {
        self.wait_output(timeout)?
            .downcast::<T>()
            .map_err(|_| JobError::OutputType)
    }

    /// Block until the job settles, ignoring its output.
    ///
    /// # Errors
    ///
    /// As [`Job::get`], minus `OutputType`.
    pub fn wait(&self, timeout: Duration) -> Result<(), JobError> {
        self.wait_output(timeout).map(drop)
    }

    fn wait_output(&self, timeout: Duration) -> Result<JobOutput, JobError> {
        let deadline = Instant::now().checked_add(timeout);
        let mut outcome = self.outcome.lock();
        loop {
            match outcome.as_ref() {
                Some(Outcome::Value(value)) => return Ok(Arc::clone(value)),
                Some(Outcome::Failed(err)) => return Err(JobError::Failed(Arc::clone(err))),
                Some(Outcome::Interrupted) => return Err(JobError::Interrupted),
                None => {}
            }
            if self.is_cancelled() {
                return Err(JobError::Cancelled);
            }
            if self.is_discarded() {
                return Err(JobError::Discarded);
            }
            match deadline {
                Some(deadline) if Instant::now() >= deadline => return Err(JobError::Timeout),
                Some(deadline) => {
                    self.settled.wait_until(&mut outcome, deadline);
                }
                None => self.settled.wait(&mut outcome),
            }
        }
    }

    // ------------------------------------------------------------------
    // State queries
    // ------------------------------------------------------------------

    /// Consistent snapshot of every lifecycle flag.
    #[must_use]
    pub fn flags(&self) -> JobFlags {
        loop {
            let start = self.start.load(Ordering::SeqCst);
            let cancelled = self.cancelled.load(Ordering::SeqCst);
            let discarded = self.discarded.load(Ordering::SeqCst);
            let scheduled = self.scheduled.load(Ordering::SeqCst);
            let failed_to_start = self.failed_to_start.load(Ordering::SeqCst);
            let running = self.running.load(Ordering::SeqCst);
            let successful = self.successful.load(Ordering::SeqCst);
            let exceptional = self.exceptional.load(Ordering::SeqCst);
            let interrupted = self.interrupted.load(Ordering::SeqCst);
            let exceptional_event = self.exceptional_event.load(Ordering::SeqCst);
            // The gate moves at most once, so this retries at most once.
            if self.start.load(Ordering::SeqCst) != start {
                continue;
            }
            return JobFlags {
                cancelled,
                aborted: start == ABORTED,
                successful,
                exceptional,
                interrupted,
                exceptional_event,
                executed: start == STARTED,
                scheduled,
                discarded,
                running,
                failed_to_start,
            };
        }
    }

    /// Cancelled, successful or exceptional.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.is_cancelled() || self.is_successful() || self.is_exceptional()
    }

    /// Discarded or done.
    #[must_use]
    pub fn is_discarded_or_done(&self) -> bool {
        self.is_discarded() || self.is_done()
    }

    /// Dispatched to a worker pool and not rolled back.
    #[must_use]
    pub fn is_scheduled(&self) -> bool {
        self.scheduled.load(Ordering::SeqCst)
    }

    /// A thread holds the execution claim.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// The body completed successfully.
    #[must_use]
    pub fn is_successful(&self) -> bool {
        self.successful.load(Ordering::SeqCst)
    }

    /// The body failed or panicked.
    #[must_use]
    pub fn is_exceptional(&self) -> bool {
        self.exceptional.load(Ordering::SeqCst)
    }

    /// The job was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// The executor dropped the job.
    #[must_use]
    pub fn is_discarded(&self) -> bool {
        self.discarded.load(Ordering::SeqCst)
    }

    /// Cancelled before the body started.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.start.load(Ordering::SeqCst) == ABORTED
    }

    /// The body stopped on an interrupt request.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// The body was started.
    #[must_use]
    pub fn is_executed(&self) -> bool {
        self.start.load(Ordering::SeqCst) == STARTED
    }

    /// At least one listener failed.
    #[must_use]
    pub fn is_exceptional_event(&self) -> bool {
        self.exceptional_event.load(Ordering::SeqCst)
    }

    /// Number of failed starts.
    #[must_use]
    pub fn failed_to_start(&self) -> u32 {
        self.failed_to_start.load(Ordering::SeqCst)
    }

    /// Thread that ran the body, once it started.
    #[must_use]
    pub fn execution_thread(&self) -> Option<ThreadId> {
        self.execution_thread.get().copied()
    }
}

fn invoke(listener: &Listener, event: &JobEvent<'_>) -> anyhow::Result<()> {
    panic::catch_unwind(AssertUnwindSafe(|| listener(event)))
        .unwrap_or_else(|panic| Err(anyhow::anyhow!("listener panicked: {}", panic_message(panic.as_ref()))))
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Job {}

impl std::hash::Hash for Job {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("flags", &self.flags())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn noop() -> Arc<Job> {
        Job::new(|_| Ok(()))
    }

    #[test]
    fn test_run_success_stores_value() {
        let job = Job::new(|_| Ok(21 * 2));
        job.run();
        assert!(job.is_successful());
        assert!(job.is_done());
        assert!(job.is_executed());
        assert!(!job.is_running());
        assert_eq!(*job.get::<i32>(Duration::from_secs(1)).unwrap(), 42);
        assert_eq!(job.execution_thread(), Some(thread::current().id()));
    }

    #[test]
    fn test_run_failure_is_exceptional() {
        let job = Job::new(|_| -> anyhow::Result<()> { Err(anyhow::anyhow!("boom")) });
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        job.add_listener(SystemEvent::Exceptional, move |event| {
            *sink.lock() = event.payload.as_ref().and_then(|p| p.error()).map(ToString::to_string);
            Ok(())
        })
        .unwrap();
        job.run();
        assert!(job.is_exceptional());
        assert!(!job.is_successful());
        assert_eq!(seen.lock().as_deref(), Some("boom"));
        match job.wait(Duration::from_secs(1)) {
            Err(JobError::Failed(err)) => assert_eq!(err.to_string(), "boom"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_panicking_body_is_exceptional() {
        let job = Job::new(|_| -> anyhow::Result<()> { panic!("kaput") });
        job.run();
        assert!(job.is_exceptional());
        assert!(!job.is_running());
    }

    #[test]
    fn test_interrupted_body_is_not_terminal() {
        let job = Job::new(|job| {
            job.check_interrupt()?;
            Ok(())
        });
        job.interrupt();
        job.run();
        assert!(job.is_interrupted());
        assert!(job.is_executed());
        assert!(!job.is_done());
        assert!(matches!(job.wait(Duration::from_secs(1)), Err(JobError::Interrupted)));
    }

    #[test]
    fn test_run_is_noop_after_execution() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let job = Job::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        job.run();
        job.run();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_blocked_run_fails_to_start() {
        let job = noop();
        job.add_dependency(Arc::new(|_: &Job| false)).unwrap();
        job.run();
        job.run();
        assert_eq!(job.failed_to_start(), 2);
        assert!(!job.is_executed());
        assert!(!job.is_scheduled());
    }

    #[test]
    fn test_topology_frozen_after_schedule() {
        let job = noop();
        assert!(job.try_schedule());
        assert!(!job.try_schedule());
        let err = job.add_dependency(Arc::new(|_: &Job| true)).unwrap_err();
        assert!(matches!(err, SchedulerError::TopologyFrozen(_)));
        assert!(job.add_listener("custom", |_| Ok(())).is_err());
        assert!(job.add_after(&noop()).is_err());
    }

    #[test]
    fn test_frozen_topology_stays_readable() {
        let job = noop();
        let dependent = noop();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        job.add_dependency(Arc::new(|_: &Job| true)).unwrap();
        job.add_after(&dependent).unwrap();
        job.add_listener(SystemEvent::Successful, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

        assert!(job.try_schedule());
        assert_eq!(job.dependencies().len(), 1);
        assert!(!job.has_no_dependencies());
        assert_eq!(job.after_jobs().len(), 1);
        assert!(job.add_dependency(Arc::new(|_: &Job| false)).is_err());
        assert_eq!(job.dependencies().len(), 1);
        assert!(job.can_run());

        job.run();
        assert!(job.is_successful());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_run_freezes_unscheduled_job() {
        let job = noop();
        job.add_dependency(Arc::new(|_: &Job| true)).unwrap();
        job.run();
        assert!(job.add_listener(SystemEvent::Done, |_| Ok(())).is_err());
        assert_eq!(job.dependencies().len(), 1);
    }

    #[test]
    fn test_done_listeners_run_before_claim_release() {
        let job = noop();
        let released = Arc::new(AtomicBool::new(false));
        let seen_running = Arc::new(AtomicBool::new(false));
        let (running, flag) = (Arc::clone(&seen_running), Arc::clone(&released));
        job.add_listener(SystemEvent::Done, move |event| {
            running.store(event.source.is_running() && !flag.load(Ordering::SeqCst), Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
        let flag = Arc::clone(&released);
        job.add_release_hook(Arc::new(move || flag.store(true, Ordering::SeqCst))).unwrap();

        job.run();
        assert!(seen_running.load(Ordering::SeqCst));
        assert!(released.load(Ordering::SeqCst));
        assert!(!job.is_running());
    }

    #[test]
    fn test_chain_on_success_defaults() {
        let first = noop();
        let second = noop();
        let third = noop();
        first.chain_forward_on_success(&second).unwrap();
        third.chain_backward_on_success(&second).unwrap();

        assert!(first.can_run());
        assert!(!second.can_run());
        assert!(!third.can_run());
        first.run();
        assert!(second.can_run());
        second.run();
        assert!(third.can_run());
        assert_eq!(first.after_jobs().first().map(|job| job.key()), Some(second.key()));
        assert_eq!(second.after_jobs().first().map(|job| job.key()), Some(third.key()));
    }

    #[test]
    fn test_chain_on_success_blocks_after_failure() {
        let failing = Job::new(|_| -> anyhow::Result<()> { anyhow::bail!("no") });
        let dependent = noop();
        failing.chain_forward_on_success(&dependent).unwrap();
        failing.run();
        assert!(!dependent.is_possible_to_run());
    }

    #[test]
    fn test_cancel_all_interrupts_and_propagates() {
        let root = noop();
        let child = noop();
        root.chain_forward_on_success(&child).unwrap();

        assert!(root.cancel_all());
        assert!(root.is_interrupt_requested());
        assert!(child.is_cancelled());
        assert!(child.is_interrupt_requested());
        assert_eq!(child.canceled_root().map(|job| job.key()), Some(root.key()));
        assert!(!root.cancel_all());
    }

    #[test]
    fn test_add_after_rejects_cycles() {
        let a = noop();
        let b = noop();
        let c = noop();
        a.add_after(&b).unwrap();
        b.add_after(&c).unwrap();
        assert!(matches!(c.add_after(&a), Err(SchedulerError::CancellationCycle { .. })));
        assert!(matches!(a.add_after(&a), Err(SchedulerError::CancellationCycle { .. })));
    }

    #[test]
    fn test_cancel_first_caller_wins() {
        let job = noop();
        assert!(job.cancel(false, false));
        assert!(!job.cancel(true, true));
        assert!(job.is_cancelled());
        assert!(job.is_aborted());
        assert!(!job.can_run());
        job.run();
        assert!(!job.is_executed());
        assert!(matches!(job.wait(Duration::from_millis(10)), Err(JobError::Cancelled)));
    }

    #[test]
    fn test_cancel_after_success_is_not_abort() {
        let job = noop();
        let aborted = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&aborted);
        job.add_listener(SystemEvent::Aborted, move |_| {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
        job.run();
        assert!(job.cancel(true, true));
        assert!(!job.is_aborted());
        assert!(!aborted.load(Ordering::SeqCst));
    }

    #[test]
    fn test_cancel_propagates_with_lineage() {
        let root = noop();
        let middle = noop();
        let leaf = noop();
        root.chain_forward(SystemEvent::Successful, &middle).unwrap();
        middle.chain_forward(SystemEvent::Successful, &leaf).unwrap();

        assert!(root.cancel(false, true));
        assert!(leaf.is_cancelled());
        let chain: Vec<_> = leaf.canceled_chain().iter().map(|j| j.key()).collect();
        assert_eq!(chain, vec![leaf.key(), middle.key(), root.key()]);
        assert_eq!(leaf.canceled_root().map(|j| j.key()), Some(root.key()));
        assert_eq!(leaf.canceled_parent().map(|j| j.key()), Some(middle.key()));
        assert!(root.canceled_root().is_none());
    }

    #[test]
    fn test_cancel_without_propagation_leaves_dependents() {
        let root = noop();
        let dependent = noop();
        root.chain_forward(SystemEvent::Successful, &dependent).unwrap();
        root.cancel(false, false);
        assert!(!dependent.is_cancelled());
        assert!(!dependent.is_possible_to_run());
    }

    #[test]
    fn test_listener_fault_is_isolated() {
        let job = noop();
        let reached = Arc::new(AtomicUsize::new(0));
        let faults = Arc::new(AtomicUsize::new(0));
        job.add_listener(SystemEvent::Successful, |_| Err(anyhow::anyhow!("bad listener"))).unwrap();
        job.add_listener(SystemEvent::Successful, |_| panic!("worse listener")).unwrap();
        let counter = Arc::clone(&reached);
        job.add_listener(SystemEvent::Successful, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
        let counter = Arc::clone(&faults);
        job.add_listener(SystemEvent::ExceptionalEvent, move |event| {
            assert!(event.payload.as_ref().and_then(EventPayload::error).is_some());
            counter.fetch_add(1, Ordering::SeqCst);
            Err(anyhow::anyhow!("ignored"))
        })
        .unwrap();

        job.run();
        assert!(job.is_successful());
        assert!(job.is_exceptional_event());
        assert_eq!(reached.load(Ordering::SeqCst), 1);
        assert_eq!(faults.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_custom_event_carries_data() {
        let job = noop();
        let seen = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&seen);
        job.add_listener("progress", move |event| {
            if let Some(step) = event.payload.as_ref().and_then(|p| p.data::<usize>()) {
                sink.store(*step, Ordering::SeqCst);
            }
            Ok(())
        })
        .unwrap();
        job.fire_event("progress", Some(EventPayload::Data(Arc::new(7_usize))));
        assert_eq!(seen.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn test_get_wrong_type() {
        let job = Job::new(|_| Ok("text"));
        job.run();
        assert!(matches!(job.get::<u64>(Duration::from_secs(1)), Err(JobError::OutputType)));
    }

    #[test]
    fn test_get_times_out_on_idle_job() {
        let job = noop();
        assert!(matches!(job.wait(Duration::from_millis(20)), Err(JobError::Timeout)));
    }

    #[test]
    fn test_flags_snapshot() {
        let job = noop();
        job.try_schedule();
        job.run();
        let flags = job.flags();
        assert!(flags.scheduled && flags.executed && flags.successful);
        assert!(!flags.running && !flags.aborted);
        assert!(flags.is_done());
    }

    #[test]
    fn test_job_ids() {
        let a = Job::with_id("fixed", |_| Ok(()));
        assert_eq!(a.id().as_str(), "fixed");
        let b = noop();
        let c = noop();
        assert_ne!(b.id(), c.id());
        assert_ne!(b.key(), c.key());
        assert_ne!(b.key(), 0);
    }
}
