//! Tests for the tokio spawner adapter

#![cfg(feature = "tokio-runtime")]

use std::sync::Arc;
use std::time::Duration;

use prometheus_jobs::core::{Job, JobExecutor, SystemEvent, WorkSubmitter};
use prometheus_jobs::runtime::TokioSpawner;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tokio_spawner_runs_work() {
    let spawner = TokioSpawner::new(tokio::runtime::Handle::current());

    let (tx, rx) = tokio::sync::oneshot::channel();
    spawner
        .execute(Box::new(move || {
            tx.send(123).unwrap();
        }))
        .unwrap();

    let result = rx.await.expect("oneshot result");
    assert_eq!(result, 123);
}

#[test]
fn test_owned_runtime_runs_work() {
    let spawner = TokioSpawner::with_worker_threads(1).unwrap();
    let (tx, rx) = std::sync::mpsc::channel();
    spawner
        .execute(Box::new(move || {
            tx.send(std::thread::current().name().map(str::to_owned)).unwrap();
        }))
        .unwrap();
    let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(name.as_deref(), Some("job-tokio"));
}

#[test]
fn test_executor_on_tokio_blocking_pool() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();
    let spawner = TokioSpawner::new(runtime.handle().clone());
    let executor = JobExecutor::new(Arc::new(spawner) as Arc<dyn WorkSubmitter>);

    let first = Job::new(|_| Ok(20));
    let second = Job::new(|_| Ok(22));
    first.chain_forward(SystemEvent::Successful, &second).unwrap();
    executor.submit_all([&second, &first]).unwrap();

    assert!(executor.await_job_emptiness(Duration::from_secs(10)));
    let total = *first.get::<i32>(Duration::ZERO).unwrap() + *second.get::<i32>(Duration::ZERO).unwrap();
    assert_eq!(total, 42);

    drop(executor);
    runtime.shutdown_timeout(Duration::from_secs(1));
}
