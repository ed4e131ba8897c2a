//! Core scheduling abstractions: jobs, dependencies, exclusion and executors.

pub mod error;
pub mod event;
pub mod job;
pub mod dependency;
pub mod exclusion;
pub mod executor;
pub mod scheduled;
pub mod worker_pool;

pub use error::{JobError, SchedulerError};
pub use event::{EventKey, EventPayload, JobEvent, SystemEvent};
pub use job::{Interrupted, Job, JobFlags, JobId, JobOutput, Listener};
pub use dependency::{Dependency, JobDependency, JobPredicateDependency, SystemJobDependency};
pub use exclusion::{ExclusionPoint, MutuallyExclusivePoint, MutuallyExclusivePointCas};
pub use executor::JobExecutor;
pub use scheduled::ScheduledJobExecutor;
pub use worker_pool::{PoolError, PoolStats, Work, WorkSubmitter, WorkerPool};
