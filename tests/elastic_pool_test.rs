//! Integration tests for the elastic pool: runtime resizing, dead-worker
//! recycling, throughput sampling, and drain semantics.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use taskmill::{ElasticConfig, ElasticPool, FutureError, PoolError, Task};

#[test]
fn test_resize_ladder() {
    let pool = ElasticPool::new(4);
    pool.wait_threads();
    assert_eq!(pool.running_thread_count(), 4);
    assert_eq!(pool.expect_thread_count(), 4);

    pool.add_threads(4);
    pool.wait_threads();
    assert_eq!(pool.running_thread_count(), 8);

    pool.del_threads(5);
    pool.wait_threads();
    pool.join_dead_threads();
    assert_eq!(pool.running_thread_count(), 3);
    assert_eq!(pool.expect_thread_count(), 3);

    pool.adjust_threads(1);
    pool.wait_threads();
    assert_eq!(pool.running_thread_count(), 1);

    let counter = Arc::new(AtomicUsize::new(0));
    for _ in 0..300 {
        let counter = Arc::clone(&counter);
        pool.submit(move || {
            counter.fetch_add(1, Ordering::Relaxed);
        })
        .unwrap();
    }
    pool.wait_tasks();
    assert_eq!(counter.load(Ordering::Relaxed), 300);
    assert_eq!(pool.tasks_remain(), 0);

    pool.close();
    assert_eq!(pool.running_thread_count(), 0);
}

#[test]
fn test_batch_submit_and_drain() {
    let pool = ElasticPool::new(3);
    let counter = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<Task> = (0..200)
        .map(|_| {
            let counter = Arc::clone(&counter);
            Task::new(move || {
                counter.fetch_add(1, Ordering::Relaxed);
            })
        })
        .collect();
    pool.submit_batch(tasks).unwrap();

    pool.wait_tasks();
    assert_eq!(counter.load(Ordering::Relaxed), 200);
}

#[test]
fn test_throughput_sampling() {
    let pool = ElasticPool::new(2);
    let counter = Arc::new(AtomicUsize::new(0));

    for _ in 0..50 {
        let counter = Arc::clone(&counter);
        pool.submit(move || {
            counter.fetch_add(1, Ordering::Relaxed);
        })
        .unwrap();
    }
    pool.wait_tasks();

    assert_eq!(pool.tasks_loaded(), 50);
    // the sample is fetch-and-zero, the way a controller reads it
    assert_eq!(pool.reset_tasks_loaded(), 50);
    assert_eq!(pool.tasks_loaded(), 0);
    assert_eq!(pool.reset_tasks_loaded(), 0);
}

#[test]
fn test_future_round_trip() {
    let pool = ElasticPool::new(2);

    let future = pool.submit_for_return(|| vec![1, 2, 3]).unwrap();
    assert_eq!(future.get(), Ok(vec![1, 2, 3]));

    let future = pool
        .submit_for_return(|| -> i32 { panic!("elastic failure") })
        .unwrap();
    assert_eq!(
        future.get(),
        Err(FutureError::Panicked("elastic failure".into()))
    );

    // the worker that caught the panic is still serving
    let future = pool.submit_for_return(|| 5).unwrap();
    assert_eq!(future.get(), Ok(5));
}

#[test]
fn test_with_config() {
    let config = ElasticConfig::new().with_initial_workers(3);
    let pool = ElasticPool::with_config(&config).unwrap();
    pool.wait_threads();
    assert_eq!(pool.running_thread_count(), 3);
}

#[test]
fn test_close_is_idempotent_and_rejects_submits() {
    let pool = ElasticPool::new(2);
    pool.submit(|| {}).unwrap();
    pool.wait_tasks();

    pool.close();
    pool.close();
    assert_eq!(pool.running_thread_count(), 0);
    assert_eq!(pool.submit(|| {}), Err(PoolError::Shutdown));
    assert!(matches!(
        pool.submit_batch(vec![Task::new(|| {})]),
        Err(PoolError::Shutdown)
    ));
}

#[test]
fn test_grow_while_loaded() {
    let pool = ElasticPool::new(1);
    let counter = Arc::new(AtomicUsize::new(0));

    for _ in 0..500 {
        let counter = Arc::clone(&counter);
        pool.submit(move || {
            counter.fetch_add(1, Ordering::Relaxed);
            std::thread::sleep(std::time::Duration::from_micros(100));
        })
        .unwrap();
    }

    // scale up mid-drain; nothing may be lost
    pool.add_threads(3);
    pool.wait_tasks();
    assert_eq!(counter.load(Ordering::Relaxed), 500);

    pool.del_threads(3);
    pool.wait_threads();
    pool.join_dead_threads();
    assert_eq!(pool.running_thread_count(), 1);
}
