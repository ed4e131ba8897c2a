//! # Prometheus Jobs
//!
//! Dependency-gated concurrent job scheduling for the Prometheus AI Platform.
//!
//! This library runs a dynamic graph of jobs on an injected worker pool. A job
//! runs once every readiness predicate attached to it holds; jobs that can no
//! longer become ready are discarded instead of waiting forever.
//!
//! ## Key Features
//!
//! - **Lifecycle Events**: every job fires `SCHEDULED`, `EXECUTE`, `SUCCESSFUL`,
//!   `DONE` and friends to isolated listeners
//! - **Impossibility Analysis**: dependencies report when they can never
//!   complete, so dependent jobs are discarded early
//! - **Cancellation Propagation**: cancelling a job cancels the jobs that
//!   were chained after it, with lineage kept for diagnostics
//! - **Mutual Exclusion**: scan-based and compare-and-swap exclusion points
//!   arbitrate shared resources between jobs
//! - **Throttled Rescans**: bursts of lifecycle events collapse into a bounded
//!   number of executor passes
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use prometheus_jobs::config::WorkerPoolConfig;
//! use prometheus_jobs::core::{Job, JobExecutor, SystemEvent, WorkerPool, WorkSubmitter};
//!
//! let pool = Arc::new(WorkerPool::new(WorkerPoolConfig::new().with_worker_count(4))?);
//! let executor = JobExecutor::new(pool.clone() as Arc<dyn WorkSubmitter>);
//!
//! let load = Job::new(|_job| Ok(vec![1, 2, 3]));
//! let sum = Job::new(|_job| Ok(()));
//! load.chain_forward(SystemEvent::Successful, &sum)?;
//!
//! executor.submit_all([&load, &sum])?;
//! assert!(executor.await_job_emptiness(Duration::from_secs(5)));
//! let values = load.get::<Vec<i32>>(Duration::ZERO)?;
//! ```
//!
//! ## Configuration
//!
//! ```rust,ignore
//! use prometheus_jobs::builders::build_scheduler;
//! use prometheus_jobs::config::SchedulerConfig;
//!
//! let scheduler = build_scheduler(&SchedulerConfig::from_env()?)?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling abstractions: jobs, dependencies, exclusion and executors.
pub mod core;
/// Configuration models for worker pools and executors.
pub mod config;
/// Builders to construct scheduler components from configuration.
pub mod builders;
/// Dependency combinators and graph helpers.
pub mod dependencies;
/// Runtime adapters for async executors.
#[cfg(feature = "tokio-runtime")]
pub mod runtime;
/// Shared utilities.
pub mod util;
