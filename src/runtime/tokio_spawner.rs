//! Tokio runtime spawner implementation.

use std::sync::Arc;

use tokio::runtime::{Handle, Runtime};

use crate::core::{PoolError, Work, WorkSubmitter};

/// Submits work to a tokio runtime's blocking thread pool.
///
/// Job bodies are synchronous and may block for their whole duration, so
/// they go through `spawn_blocking` rather than onto the async workers.
#[derive(Clone)]
pub struct TokioSpawner {
    handle: Handle,
    _runtime: Option<Arc<Runtime>>,
}

impl TokioSpawner {
    /// Create a new `TokioSpawner` from a tokio runtime handle.
    #[must_use]
    pub const fn new(handle: Handle) -> Self {
        Self { handle, _runtime: None }
    }

    /// Create a `TokioSpawner` owning a new multi-threaded runtime with the
    /// specified worker threads. The runtime lives as long as any clone.
    ///
    /// # Errors
    ///
    /// The runtime cannot be built.
    pub fn with_worker_threads(worker_threads: usize) -> Result<Self, std::io::Error> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(worker_threads)
            .thread_name("job-tokio")
            .enable_all()
            .build()?;
        Ok(Self {
            handle: runtime.handle().clone(),
            _runtime: Some(Arc::new(runtime)),
        })
    }

    /// The runtime handle work is spawned on.
    #[must_use]
    pub const fn handle(&self) -> &Handle {
        &self.handle
    }
}

impl WorkSubmitter for TokioSpawner {
    fn execute(&self, work: Work) -> Result<(), PoolError> {
        drop(self.handle.spawn_blocking(work));
        Ok(())
    }
}
