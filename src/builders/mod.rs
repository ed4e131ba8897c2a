//! Builders to construct scheduler components from configuration.

pub mod executor_builder;
pub mod pool_builder;

pub use executor_builder::{build_executor, build_scheduled_executor, build_scheduler, Scheduler};
pub use pool_builder::build_worker_pool;
