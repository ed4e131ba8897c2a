//! Readiness predicates.
//!
//! A [`Dependency`] answers two questions about a job it gates: is it
//! satisfied right now, and can it still become satisfied. Any
//! `Fn(&Job) -> bool` closure is a dependency that is always possible.

use std::fmt;
use std::sync::{Arc, Weak};

use crate::core::event::SystemEvent;
use crate::core::job::Job;

/// Readiness predicate gating a job.
pub trait Dependency: Send + Sync {
    /// Whether `caller` may run as far as this dependency is concerned.
    fn is_completed(&self, caller: &Job) -> bool;

    /// Whether completion can still happen. Jobs gated by an impossible
    /// dependency are discarded by the executor.
    fn is_possible(&self) -> bool {
        true
    }

    /// The job this dependency observes, for graph traversal. `None` for
    /// dependencies not bound to a job, or whose job is gone.
    fn target(&self) -> Option<Arc<Job>> {
        None
    }
}

impl<F> Dependency for F
where
    F: Fn(&Job) -> bool + Send + Sync,
{
    fn is_completed(&self, caller: &Job) -> bool {
        self(caller)
    }
}

/// A dependency bound to one specific job.
pub trait JobDependency: Dependency {
    /// The observed job, if it is still alive.
    fn job(&self) -> Option<Arc<Job>>;
}

/// Completed once the observed job reaches a lifecycle event.
#[derive(Clone)]
pub struct SystemJobDependency {
    job: Arc<Job>,
    event: SystemEvent,
}

impl SystemJobDependency {
    /// Wait for `job` to reach `event`.
    #[must_use]
    pub const fn new(job: Arc<Job>, event: SystemEvent) -> Self {
        Self { job, event }
    }

    /// The awaited event.
    #[must_use]
    pub const fn event(&self) -> SystemEvent {
        self.event
    }
}

impl Dependency for SystemJobDependency {
    fn is_completed(&self, _caller: &Job) -> bool {
        self.event.is_reached(&self.job.flags())
    }

    fn is_possible(&self) -> bool {
        let flags = self.job.flags();
        self.event.is_reached(&flags) || !self.event.is_impossible(&flags)
    }

    fn target(&self) -> Option<Arc<Job>> {
        Some(Arc::clone(&self.job))
    }
}

impl JobDependency for SystemJobDependency {
    fn job(&self) -> Option<Arc<Job>> {
        Some(Arc::clone(&self.job))
    }
}

impl fmt::Debug for SystemJobDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemJobDependency")
            .field("job", self.job.id())
            .field("event", &self.event)
            .finish()
    }
}

type JobPredicate = Box<dyn Fn(&Job, &Job) -> bool + Send + Sync>;

/// Completed when a predicate over (observed job, caller) holds.
///
/// Only a weak reference to the observed job is kept, so jobs may observe
/// each other without keeping each other alive. Once the observed job is
/// dropped the dependency counts as completed.
pub struct JobPredicateDependency {
    job: Weak<Job>,
    predicate: JobPredicate,
}

impl JobPredicateDependency {
    /// Gate on `predicate(job, caller)`.
    pub fn new<F>(job: &Arc<Job>, predicate: F) -> Self
    where
        F: Fn(&Job, &Job) -> bool + Send + Sync + 'static,
    {
        Self { job: Arc::downgrade(job), predicate: Box::new(predicate) }
    }
}

impl Dependency for JobPredicateDependency {
    fn is_completed(&self, caller: &Job) -> bool {
        self.job.upgrade().is_none_or(|job| (self.predicate)(&job, caller))
    }

    fn target(&self) -> Option<Arc<Job>> {
        self.job.upgrade()
    }
}

impl JobDependency for JobPredicateDependency {
    fn job(&self) -> Option<Arc<Job>> {
        self.job.upgrade()
    }
}

impl fmt::Debug for JobPredicateDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobPredicateDependency")
            .field("job", &self.job.upgrade().map(|job| job.id().clone()))
            .finish_non_exhaustive()
    }
}
