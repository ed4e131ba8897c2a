//! Configuration models for worker pools and job executors.

pub mod executor;
pub mod pool;
pub mod scheduler;

pub use executor::JobExecutorConfig;
pub use pool::WorkerPoolConfig;
pub use scheduler::SchedulerConfig;
