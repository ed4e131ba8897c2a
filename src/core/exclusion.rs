//! Mutual exclusion between jobs.
//!
//! An exclusion point models a shared resource: among the jobs registered
//! with it, at most one may be between "scheduled" and "done or discarded" at
//! any instant. A point is itself a [`Dependency`] of every participant, so a
//! job that shares several resources is ready only when every point agrees.
//!
//! Two interchangeable implementations are provided:
//!
//! - [`MutuallyExclusivePoint`]: scans the registry on every check, O(n)
//! - [`MutuallyExclusivePointCas`]: arbitrates through two single-slot atomic
//!   claims ("dibs" and "scheduled"), amortized O(1)
//!
//! Jobs that are not registered with a point are never blocked by it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tracing::trace;

use crate::core::dependency::Dependency;
use crate::core::error::SchedulerError;
use crate::core::event::SystemEvent;
use crate::core::job::Job;

const NOBODY: u64 = 0;

/// A shared resource that at most one registered job may use at a time.
pub trait ExclusionPoint: Dependency {
    /// Make `job` a participant: gate it on this point and install cleanup listeners.
    ///
    /// # Errors
    ///
    /// `SchedulerError::TopologyFrozen` if `job` is already scheduled.
    fn add_sharing_job(self: &Arc<Self>, job: &Arc<Job>) -> Result<(), SchedulerError>;

    /// Number of registered participants that are not done or discarded yet.
    fn participants(&self) -> usize;
}

/// Exclusion by scanning every other participant.
#[derive(Debug, Default)]
pub struct MutuallyExclusivePoint {
    jobs: DashMap<u64, Weak<Job>>,
}

impl MutuallyExclusivePoint {
    /// Create an empty point.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl Dependency for MutuallyExclusivePoint {
    fn is_completed(&self, caller: &Job) -> bool {
        let key = caller.key();
        if !self.jobs.contains_key(&key) {
            return true;
        }
        self.jobs.iter().all(|entry| {
            if *entry.key() == key {
                return true;
            }
            entry.value().upgrade().is_none_or(|other| {
                !other.is_running() && (other.is_discarded_or_done() || !other.is_scheduled())
            })
        })
    }
}

impl ExclusionPoint for MutuallyExclusivePoint {
    fn add_sharing_job(self: &Arc<Self>, job: &Arc<Job>) -> Result<(), SchedulerError> {
        job.add_dependency(Arc::clone(self) as Arc<dyn Dependency>)?;
        let key = job.key();
        for event in [SystemEvent::Done, SystemEvent::Discarded] {
            let point = Arc::clone(self);
            job.add_listener(event, move |_| {
                point.jobs.remove(&key);
                Ok(())
            })?;
        }
        self.jobs.insert(key, Arc::downgrade(job));
        Ok(())
    }

    fn participants(&self) -> usize {
        self.jobs.len()
    }
}

/// Exclusion through compare-and-swap claims.
///
/// A participant first takes the soft `dibsed` claim while it is merely
/// ready; the claim is promoted to the hard `scheduled` claim once the
/// executor dispatches it. A dibs holder that is not dispatched yet can have
/// its claim stolen, which is rolled back if the holder got promoted in the
/// meantime. A dispatched job may run only while it holds both claims.
#[derive(Debug, Default)]
pub struct MutuallyExclusivePointCas {
    jobs: DashMap<u64, Weak<Job>>,
    dibsed: AtomicU64,
    scheduled: AtomicU64,
}

impl MutuallyExclusivePointCas {
    /// Create an empty point.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Key of the current dibs holder, if any.
    #[must_use]
    pub fn dibs_holder(&self) -> Option<u64> {
        Some(self.dibsed.load(Ordering::SeqCst)).filter(|key| *key != NOBODY)
    }

    /// Key of the dispatched holder, if any.
    #[must_use]
    pub fn scheduled_holder(&self) -> Option<u64> {
        Some(self.scheduled.load(Ordering::SeqCst)).filter(|key| *key != NOBODY)
    }

    fn participant(&self, key: u64) -> Option<Arc<Job>> {
        self.jobs.get(&key).and_then(|entry| entry.value().upgrade())
    }

    fn release(&self, key: u64) {
        let _ = self.scheduled.compare_exchange(key, NOBODY, Ordering::SeqCst, Ordering::SeqCst);
        let _ = self.dibsed.compare_exchange(key, NOBODY, Ordering::SeqCst, Ordering::SeqCst);
    }

    fn promote(&self, key: u64) {
        if self.dibsed.load(Ordering::SeqCst) == key {
            let _ = self.scheduled.compare_exchange(NOBODY, key, Ordering::SeqCst, Ordering::SeqCst);
        }
    }

    fn try_steal(&self, key: u64) -> bool {
        let holder = self.dibsed.load(Ordering::SeqCst);
        if holder == NOBODY || holder == key {
            return holder == key;
        }
        let holder_active = self
            .participant(holder)
            .is_some_and(|job| job.is_scheduled() && !job.is_discarded_or_done());
        if holder_active || self.scheduled.load(Ordering::SeqCst) != NOBODY {
            return false;
        }
        if self
            .dibsed
            .compare_exchange(holder, key, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        if self.scheduled.load(Ordering::SeqCst) != NOBODY {
            // The previous holder was promoted while we stole; hand dibs back.
            let _ = self.dibsed.compare_exchange(key, holder, Ordering::SeqCst, Ordering::SeqCst);
            trace!(job_key = key, holder = holder, "Dibs steal rolled back");
            return false;
        }
        trace!(job_key = key, holder = holder, "Dibs stolen");
        true
    }
}

impl Dependency for MutuallyExclusivePointCas {
    fn is_completed(&self, caller: &Job) -> bool {
        let key = caller.key();
        if !self.jobs.contains_key(&key) {
            return true;
        }
        if caller.is_scheduled() {
            return self.scheduled.load(Ordering::SeqCst) == key
                && self.dibsed.load(Ordering::SeqCst) == key;
        }
        if self
            .dibsed
            .compare_exchange(NOBODY, key, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            return true;
        }
        self.try_steal(key)
    }
}

impl ExclusionPoint for MutuallyExclusivePointCas {
    fn add_sharing_job(self: &Arc<Self>, job: &Arc<Job>) -> Result<(), SchedulerError> {
        job.add_dependency(Arc::clone(self) as Arc<dyn Dependency>)?;
        let key = job.key();

        let point = Arc::clone(self);
        job.add_listener(SystemEvent::FailedToStart, move |_| {
            point.release(key);
            Ok(())
        })?;
        let point = Arc::clone(self);
        job.add_listener(SystemEvent::Scheduled, move |_| {
            point.promote(key);
            Ok(())
        })?;
        for event in [SystemEvent::Done, SystemEvent::Discarded] {
            let point = Arc::clone(self);
            job.add_listener(event, move |_| {
                point.release(key);
                point.jobs.remove(&key);
                Ok(())
            })?;
        }
        self.jobs.insert(key, Arc::downgrade(job));
        Ok(())
    }

    fn participants(&self) -> usize {
        self.jobs.len()
    }
}
