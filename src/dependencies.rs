//! Dependency combinators and graph helpers.
//!
//! Builders that wire common job graphs out of the primitives in
//! [`crate::core`]: linear chains, fan-out to a root, pairwise mutual
//! exclusion, `any`/`all` over a fixed dependency list, and a caching
//! wrapper for monotonic dependencies.
//!
//! # Example
//!
//! ```rust,ignore
//! use prometheus_jobs::core::{Job, SystemEvent};
//! use prometheus_jobs::dependencies;
//!
//! let steps: Vec<_> = (0..3).map(|_| Job::new(|_| Ok(()))).collect();
//! dependencies::forward_chain(SystemEvent::Successful, &steps)?;
//! ```

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::core::dependency::{Dependency, JobPredicateDependency, SystemJobDependency};
use crate::core::error::SchedulerError;
use crate::core::event::SystemEvent;
use crate::core::job::Job;

struct Cached {
    inner: Arc<dyn Dependency>,
    completed: AtomicBool,
}

impl Dependency for Cached {
    fn is_completed(&self, caller: &Job) -> bool {
        if self.completed.load(Ordering::Acquire) {
            return true;
        }
        let completed = self.inner.is_completed(caller);
        if completed {
            self.completed.store(true, Ordering::Release);
        }
        completed
    }

    fn is_possible(&self) -> bool {
        self.completed.load(Ordering::Acquire) || self.inner.is_possible()
    }

    fn target(&self) -> Option<Arc<Job>> {
        self.inner.target()
    }
}

/// Remember the first `true` from `dependency` and return `true` forever after.
///
/// Only sound for dependencies that never flip back once completed.
#[must_use]
pub fn cache_on_complete(dependency: Arc<dyn Dependency>) -> Arc<dyn Dependency> {
    Arc::new(Cached { inner: dependency, completed: AtomicBool::new(false) })
}

/// Completed once `job` reaches `event`.
#[must_use]
pub fn standard(job: &Arc<Job>, event: SystemEvent) -> SystemJobDependency {
    SystemJobDependency::new(Arc::clone(job), event)
}

/// Completed while `job` is not between scheduling and completion, or once it is dropped.
#[must_use]
pub fn while_not_executing(job: &Arc<Job>) -> JobPredicateDependency {
    of_job(job, |other| {
        other.is_discarded_or_done() || (!other.is_scheduled() && !other.is_running())
    })
}

/// Completed while `predicate` holds for `job`. Holds `job` weakly; a
/// dropped job counts as completed.
pub fn of_job<F>(job: &Arc<Job>, predicate: F) -> JobPredicateDependency
where
    F: Fn(&Job) -> bool + Send + Sync + 'static,
{
    JobPredicateDependency::new(job, move |observed, _caller| predicate(observed))
}

/// Let at most one of `jobs` execute at a time.
///
/// Adds a [`while_not_executing`] edge between every ordered pair, so the
/// cost grows quadratically. Prefer an exclusion point for large groups.
///
/// # Errors
///
/// `SchedulerError::TopologyFrozen` if any job is already scheduled.
pub fn mutually_exclusive(jobs: &[Arc<Job>]) -> Result<(), SchedulerError> {
    for (i, main) in jobs.iter().enumerate() {
        for (j, other) in jobs.iter().enumerate() {
            if i != j {
                main.add_dependency(Arc::new(while_not_executing(other)))?;
            }
        }
    }
    Ok(())
}

/// Every job in `jobs` waits for `root` to reach `event`.
///
/// # Errors
///
/// Fails like [`Job::chain_forward`].
pub fn chain_to_root_forward(root: &Arc<Job>, event: SystemEvent, jobs: &[Arc<Job>]) -> Result<(), SchedulerError> {
    for job in jobs {
        root.chain_forward(event, job)?;
    }
    Ok(())
}

/// `root` waits for every job in `jobs` to reach `event`.
///
/// # Errors
///
/// Fails like [`Job::chain_backward`].
pub fn chain_to_root_backward(root: &Arc<Job>, event: SystemEvent, jobs: &[Arc<Job>]) -> Result<(), SchedulerError> {
    for job in jobs {
        root.chain_backward(event, job)?;
    }
    Ok(())
}

/// Each job waits for its predecessor in `jobs` to reach `event`.
///
/// # Errors
///
/// Fails like [`Job::chain_forward`].
pub fn forward_chain(event: SystemEvent, jobs: &[Arc<Job>]) -> Result<(), SchedulerError> {
    for pair in jobs.windows(2) {
        pair[0].chain_forward(event, &pair[1])?;
    }
    Ok(())
}

/// Each job waits for its successor in `jobs` to reach `event`.
///
/// # Errors
///
/// Fails like [`Job::chain_backward`].
pub fn backward_chain(event: SystemEvent, jobs: &[Arc<Job>]) -> Result<(), SchedulerError> {
    for pair in jobs.windows(2) {
        pair[0].chain_backward(event, &pair[1])?;
    }
    Ok(())
}

struct AnyOf(Vec<Arc<dyn Dependency>>);

impl Dependency for AnyOf {
    fn is_completed(&self, caller: &Job) -> bool {
        self.0.iter().any(|dependency| dependency.is_completed(caller))
    }

    fn is_possible(&self) -> bool {
        self.0.iter().any(|dependency| dependency.is_possible())
    }
}

struct AllOf(Vec<Arc<dyn Dependency>>);

impl Dependency for AllOf {
    fn is_completed(&self, caller: &Job) -> bool {
        self.0.iter().all(|dependency| dependency.is_completed(caller))
    }

    fn is_possible(&self) -> bool {
        self.0.iter().all(|dependency| dependency.is_possible())
    }
}

/// Completed when at least one of `dependencies` is.
///
/// # Errors
///
/// `SchedulerError::EmptyDependencies` if `dependencies` is empty.
pub fn any(dependencies: Vec<Arc<dyn Dependency>>) -> Result<Arc<dyn Dependency>, SchedulerError> {
    if dependencies.is_empty() {
        return Err(SchedulerError::EmptyDependencies);
    }
    Ok(Arc::new(AnyOf(dependencies)))
}

/// Completed when every one of `dependencies` is.
///
/// # Errors
///
/// `SchedulerError::EmptyDependencies` if `dependencies` is empty.
pub fn all(dependencies: Vec<Arc<dyn Dependency>>) -> Result<Arc<dyn Dependency>, SchedulerError> {
    if dependencies.is_empty() {
        return Err(SchedulerError::EmptyDependencies);
    }
    Ok(Arc::new(AllOf(dependencies)))
}

fn bfs_leaves<L, F>(root: &Arc<Job>, is_leaf: L, next: F) -> Vec<Arc<Job>>
where
    L: Fn(&Job) -> bool,
    F: Fn(&Job) -> Vec<Arc<Job>>,
{
    let mut leaves = Vec::new();
    let mut seen = HashSet::from([root.key()]);
    let mut queue = VecDeque::from([Arc::clone(root)]);
    while let Some(job) = queue.pop_front() {
        if is_leaf(&job) {
            leaves.push(job);
            continue;
        }
        for child in next(&job) {
            if seen.insert(child.key()) {
                queue.push_back(child);
            }
        }
    }
    leaves
}

/// Jobs reachable from `root` over reverse edges that have none of their own.
#[must_use]
pub fn child_leaves(root: &Arc<Job>) -> Vec<Arc<Job>> {
    bfs_leaves(root, |job| job.after_jobs().is_empty(), Job::after_jobs)
}

/// Jobs without any dependency, reachable from `root` through job-bound dependencies.
///
/// A job gated only by closures or exclusion points is not a leaf, and
/// since those edges lead nowhere it contributes nothing.
#[must_use]
pub fn root_leaves(root: &Arc<Job>) -> Vec<Arc<Job>> {
    bfs_leaves(root, Job::has_no_dependencies, |job| {
        job.dependencies().iter().filter_map(|dependency| dependency.target()).collect()
    })
}
