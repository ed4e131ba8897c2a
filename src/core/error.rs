//! Error types for scheduler operations.

use std::sync::Arc;

use thiserror::Error;

use crate::core::worker_pool::PoolError;

/// Errors produced by illegal use of scheduler components.
///
/// These are raised synchronously by the call that misused the API; they never
/// describe the outcome of a job body (see [`JobError`] for that).
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Dependencies, reverse edges or listeners were modified after the job was scheduled.
    #[error("job `{0}` is already scheduled, its topology is frozen")]
    TopologyFrozen(String),
    /// Adding the reverse edge would make cancellation propagation cyclic.
    #[error("reverse edge `{from}` -> `{to}` would create a cancellation cycle")]
    CancellationCycle {
        /// Job that would cancel `to`.
        from: String,
        /// Job that would transitively cancel `from`.
        to: String,
    },
    /// The executor no longer accepts jobs.
    #[error("executor has been shut down")]
    Shutdown,
    /// `await_termination` was called before `shutdown`.
    #[error("executor must be shut down before awaiting termination")]
    NotShutdown,
    /// `any`/`all` was given no dependencies.
    #[error("dependency combinator requires at least one dependency")]
    EmptyDependencies,
    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The worker pool rejected an operation.
    #[error("worker pool error: {0}")]
    Pool(#[from] PoolError),
    /// Spawning a runtime or thread failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome failures observed when waiting on a job's result.
#[derive(Debug, Clone, Error)]
pub enum JobError {
    /// The job body returned an error or panicked.
    #[error("job failed: {0}")]
    Failed(Arc<anyhow::Error>),
    /// The job was cancelled before producing a value.
    #[error("job was cancelled")]
    Cancelled,
    /// The job body observed an interrupt request and stopped.
    #[error("job was interrupted")]
    Interrupted,
    /// The job was discarded by its executor without producing a value.
    #[error("job was discarded")]
    Discarded,
    /// No outcome was available before the timeout elapsed.
    #[error("timed out waiting for job")]
    Timeout,
    /// The job produced a value of a different type than requested.
    #[error("job output has a different type than requested")]
    OutputType,
}
