//! Integration tests for ScheduledJobExecutor
//!
//! Readiness that depends on the outside world (here: the wall clock) is
//! only noticed by the periodic timer.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use prometheus_jobs::config::{JobExecutorConfig, WorkerPoolConfig};
use prometheus_jobs::core::{Job, ScheduledJobExecutor, WorkSubmitter, WorkerPool};

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn pool() -> Arc<WorkerPool> {
    Arc::new(WorkerPool::new(WorkerPoolConfig::new().with_worker_count(2)).unwrap())
}

fn fast_executor(pool: &Arc<WorkerPool>) -> ScheduledJobExecutor {
    let config = JobExecutorConfig::scheduled().with_rescan_period(Duration::from_millis(20));
    ScheduledJobExecutor::with_config(Arc::clone(pool) as Arc<dyn WorkSubmitter>, &config).unwrap()
}

// ============================================================================
// TIMER-DRIVEN READINESS
// ============================================================================

#[test]
fn test_wall_clock_gate_opens() {
    let pool = pool();
    let executor = fast_executor(&pool);
    let opens_at = Instant::now() + Duration::from_millis(150);
    let ran_at = Arc::new(Mutex::new(None));
    let record = Arc::clone(&ran_at);
    let job = Job::new(move |_| {
        *record.lock() = Some(Instant::now());
        Ok(())
    });
    job.add_dependency(Arc::new(move |_: &Job| Instant::now() >= opens_at)).unwrap();

    executor.submit(&job).unwrap();
    assert!(executor.await_job_emptiness(Duration::from_secs(10)));
    let ran_at = ran_at.lock().unwrap();
    assert!(ran_at >= opens_at);

    executor.shutdown();
    assert!(executor.await_termination(Duration::from_secs(1)).unwrap());
    pool.shutdown();
}

#[test]
fn test_staggered_gates_all_run() {
    let pool = pool();
    let executor = fast_executor(&pool);
    let start = Instant::now();
    let ran = Arc::new(AtomicUsize::new(0));
    let jobs: Vec<Arc<Job>> = (1..=5_u64)
        .map(|step| {
            let ran = Arc::clone(&ran);
            let opens_at = start + Duration::from_millis(step * 30);
            let job = Job::new(move |_| {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            job.add_dependency(Arc::new(move |_: &Job| Instant::now() >= opens_at)).unwrap();
            job
        })
        .collect();

    executor.submit_all(&jobs).unwrap();
    assert!(executor.await_job_emptiness(Duration::from_secs(10)));
    assert_eq!(ran.load(Ordering::SeqCst), 5);
    executor.shutdown();
    pool.shutdown();
}

#[test]
fn test_shutdown_stops_accepting_jobs() {
    let pool = pool();
    let executor = fast_executor(&pool);
    executor.shutdown();
    assert!(executor.is_shutdown());
    assert!(executor.submit(&Job::new(|_| Ok(()))).is_err());
    pool.shutdown();
}
