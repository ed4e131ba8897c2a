//! Work submission for job executors.
//!
//! Executors never run job bodies themselves. They hand closures to a
//! [`WorkSubmitter`], which is "run this eventually" with no assumptions on
//! ordering or fairness. This module defines that capability and ships a
//! native implementation backed by dedicated OS threads.
//!
//! # Key Features
//!
//! - **Minimal contract**: one fallible `execute` call per unit of work
//! - **Closures are submitters**: any `Fn(Work) -> Result<(), PoolError>` works
//! - **Native pool**: bounded queue, named threads, panics isolated per work item
//!
//! # Example
//!
//! ```rust,ignore
//! use prometheus_jobs::core::{WorkerPool, WorkSubmitter};
//! use prometheus_jobs::config::WorkerPoolConfig;
//!
//! let pool = WorkerPool::new(WorkerPoolConfig::new().with_worker_count(4))?;
//! pool.execute(Box::new(|| println!("hello from a worker")))?;
//! ```

mod native;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

pub use native::WorkerPool;

/// A unit of work handed to a submitter.
pub type Work = Box<dyn FnOnce() + Send + 'static>;

/// Capability to run work eventually on some other thread.
pub trait WorkSubmitter: Send + Sync {
    /// Queue `work` for execution.
    ///
    /// # Errors
    ///
    /// Implementation specific; the work is dropped unexecuted.
    fn execute(&self, work: Work) -> Result<(), PoolError>;
}

impl<F> WorkSubmitter for F
where
    F: Fn(Work) -> Result<(), PoolError> + Send + Sync,
{
    fn execute(&self, work: Work) -> Result<(), PoolError> {
        self(work)
    }
}

/// Errors that can occur when submitting work.
#[derive(Debug)]
pub enum PoolError {
    /// The work queue is full; no more work can be accepted.
    QueueFull,

    /// The pool has been shut down.
    PoolShutdown,

    /// Configuration validation failed.
    InvalidConfig(String),

    /// Internal error (thread spawn failure, runtime gone, etc.).
    Internal(String),
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueueFull => write!(f, "task queue is full"),
            Self::PoolShutdown => write!(f, "pool has been shut down"),
            Self::InvalidConfig(msg) => write!(f, "invalid configuration: {msg}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for PoolError {}

/// Statistics about pool utilization.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Number of worker threads.
    pub worker_count: usize,

    /// Work items currently executing.
    pub active_tasks: u64,

    /// Work items waiting in the queue.
    pub queued_tasks: u64,

    /// Work items that returned normally.
    pub completed_tasks: u64,

    /// Work items that panicked.
    pub failed_tasks: u64,

    /// Work items accepted.
    pub submitted_tasks: u64,
}

/// Internal counters for pool statistics (thread-safe).
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    pub active_tasks: AtomicU64,
    pub queued_tasks: AtomicU64,
    pub completed_tasks: AtomicU64,
    pub failed_tasks: AtomicU64,
    pub submitted_tasks: AtomicU64,
}

impl PoolCounters {
    /// Get a snapshot of current statistics.
    pub fn snapshot(&self, worker_count: usize) -> PoolStats {
        PoolStats {
            worker_count,
            active_tasks: self.active_tasks.load(Ordering::Relaxed),
            queued_tasks: self.queued_tasks.load(Ordering::Relaxed),
            completed_tasks: self.completed_tasks.load(Ordering::Relaxed),
            failed_tasks: self.failed_tasks.load(Ordering::Relaxed),
            submitted_tasks: self.submitted_tasks.load(Ordering::Relaxed),
        }
    }
}
