//! Runtime adapters that let job bodies run on an existing async runtime.

pub mod tokio_spawner;

pub use tokio_spawner::TokioSpawner;
