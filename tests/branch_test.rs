//! Integration tests for the supervised branch and its supervisor.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::bounded;
use parking_lot::Mutex;
use taskmill::{PoolError, Supervisor, Task, WaitStrategy, WorkBranch};

fn wait_until<F: Fn() -> bool>(what: &str, deadline: Duration, cond: F) {
    let limit = Instant::now() + deadline;
    while !cond() {
        assert!(Instant::now() < limit, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn test_basic_execution_all_strategies() {
    for strategy in [
        WaitStrategy::LowLatency,
        WaitStrategy::Balanced,
        WaitStrategy::Blocking,
    ] {
        let branch = WorkBranch::new(2, strategy);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..200 {
            let counter = Arc::clone(&counter);
            branch.submit(move || {
                counter.fetch_add(1, Ordering::Relaxed);
            });
        }
        assert!(branch.wait_tasks(None));
        assert_eq!(counter.load(Ordering::Relaxed), 200, "{strategy:?}");
        branch.close();
    }
}

#[test]
fn test_sequence_runs_in_order_on_one_worker() {
    let branch = WorkBranch::new(3, WaitStrategy::LowLatency);
    let noise = Arc::new(AtomicUsize::new(0));
    let log = Arc::new(Mutex::new(String::new()));
    let threads = Arc::new(Mutex::new(Vec::new()));

    // background noise fighting for workers
    for _ in 0..50 {
        let noise = Arc::clone(&noise);
        branch.submit(move || {
            noise.fetch_add(1, Ordering::Relaxed);
        });
    }

    let seq: Vec<Task> = ['1', '2', '3']
        .into_iter()
        .map(|c| {
            let log = Arc::clone(&log);
            let threads = Arc::clone(&threads);
            Task::new(move || {
                log.lock().push(c);
                threads.lock().push(std::thread::current().id());
            })
        })
        .collect();
    branch.submit_sequence(seq);

    for _ in 0..50 {
        let noise = Arc::clone(&noise);
        branch.submit(move || {
            noise.fetch_add(1, Ordering::Relaxed);
        });
    }

    assert!(branch.wait_tasks(None));
    assert_eq!(noise.load(Ordering::Relaxed), 100);
    assert_eq!(log.lock().as_str(), "123", "sequence must run in order");
    let threads = threads.lock();
    assert!(
        threads.windows(2).all(|pair| pair[0] == pair[1]),
        "sequence must stay on a single worker"
    );
}

#[test]
fn test_urgent_jumps_the_queue() {
    let branch = WorkBranch::new(1, WaitStrategy::LowLatency);
    let (tx, rx) = bounded::<()>(0);
    let started = Arc::new(AtomicUsize::new(0));

    {
        let started = Arc::clone(&started);
        branch.submit(move || {
            started.fetch_add(1, Ordering::SeqCst);
            let _ = rx.recv();
        });
    }
    wait_until("gate pickup", Duration::from_secs(5), || {
        started.load(Ordering::SeqCst) == 1
    });

    let log = Arc::new(Mutex::new(String::new()));
    {
        let log = Arc::clone(&log);
        branch.submit(move || {
            log.lock().push('n');
        });
    }
    {
        let log = Arc::clone(&log);
        branch.submit_urgent(move || {
            log.lock().push('u');
        });
    }

    tx.send(()).unwrap();
    assert!(branch.wait_tasks(Some(Duration::from_secs(5))));
    assert_eq!(log.lock().as_str(), "un");
}

#[test]
fn test_futures_normal_and_urgent() {
    let branch = WorkBranch::new(2, WaitStrategy::Balanced);

    let future = branch.submit_with_return(|| 3 * 3);
    assert_eq!(future.get(), Ok(9));

    let future = branch.submit_urgent_with_return(|| "ok".to_string());
    assert_eq!(future.get(), Ok("ok".to_string()));

    let future = branch.submit_with_return(|| -> u8 { panic!("branch failure") });
    assert!(future.get().is_err());
}

#[test]
fn test_wait_tasks_timeout_expires() {
    let branch = WorkBranch::new(1, WaitStrategy::LowLatency);
    let (tx, rx) = bounded::<()>(0);
    branch.submit(move || {
        let _ = rx.recv();
    });

    // the worker is stuck; a short wait must report failure
    assert!(!branch.wait_tasks(Some(Duration::from_millis(50))));

    tx.send(()).unwrap();
    assert!(branch.wait_tasks(Some(Duration::from_secs(5))));
}

#[test]
fn test_add_del_workers() {
    let branch = WorkBranch::new(2, WaitStrategy::LowLatency);
    assert_eq!(branch.worker_count(), 2);

    branch.add_worker();
    wait_until("grow to 3", Duration::from_secs(5), || {
        branch.worker_count() == 3
    });

    branch.del_worker().unwrap();
    branch.del_worker().unwrap();
    wait_until("shrink to 1", Duration::from_secs(5), || {
        branch.worker_count() == 1
    });

    branch.del_worker().unwrap();
    wait_until("shrink to 0", Duration::from_secs(5), || {
        branch.worker_count() == 0
    });
    assert_eq!(branch.del_worker(), Err(PoolError::NoWorker));
}

#[test]
fn test_del_worker_wakes_blocking_branch() {
    let branch = WorkBranch::new(2, WaitStrategy::Blocking);
    // workers are parked on the task condvar with nothing queued
    std::thread::sleep(Duration::from_millis(50));

    branch.del_worker().unwrap();
    wait_until("blocked worker exits", Duration::from_secs(5), || {
        branch.worker_count() == 1
    });

    // the survivor still serves
    let counter = Arc::new(AtomicUsize::new(0));
    let observer = Arc::clone(&counter);
    branch.submit(move || {
        observer.fetch_add(1, Ordering::SeqCst);
    });
    assert!(branch.wait_tasks(Some(Duration::from_secs(5))));
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[test]
fn test_worker_survives_panicking_task() {
    let branch = WorkBranch::new(1, WaitStrategy::LowLatency);
    branch.submit(|| panic!("scheduled failure"));

    let counter = Arc::new(AtomicUsize::new(0));
    let observer = Arc::clone(&counter);
    branch.submit(move || {
        observer.fetch_add(1, Ordering::SeqCst);
    });

    assert!(branch.wait_tasks(None));
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(branch.worker_count(), 1);
}

#[test]
fn test_supervisor_scales_up_and_back_down() {
    let branch = WorkBranch::new(2, WaitStrategy::Balanced);
    let supervisor = Supervisor::new(2, 4, Duration::from_millis(100)).unwrap();
    let ticks = Arc::new(AtomicUsize::new(0));
    {
        let ticks = Arc::clone(&ticks);
        supervisor.set_tick_callback(move || {
            ticks.fetch_add(1, Ordering::Relaxed);
        });
    }

    let counter = Arc::new(AtomicUsize::new(0));
    for _ in 0..600 {
        let counter = Arc::clone(&counter);
        branch.submit(move || {
            counter.fetch_add(1, Ordering::Relaxed);
            std::thread::sleep(Duration::from_millis(2));
        });
    }

    supervisor.supervise(&branch);

    // backlog drives expansion to the upper bound
    wait_until("scale up to 4", Duration::from_secs(10), || {
        branch.worker_count() == 4
    });

    // after the drain the supervisor trims one worker per tick back to min
    wait_until("drain", Duration::from_secs(30), || {
        counter.load(Ordering::Relaxed) == 600
    });
    wait_until("scale down to 2", Duration::from_secs(10), || {
        branch.worker_count() == 2
    });

    assert!(ticks.load(Ordering::Relaxed) > 0);
    supervisor.close();
    branch.close();
}

#[test]
fn test_supervisor_suspend_and_resume() {
    // the branch starts at the lower bound so idle ticks are no-ops
    let branch = WorkBranch::new(2, WaitStrategy::LowLatency);
    let supervisor = Supervisor::new(2, 4, Duration::from_millis(50)).unwrap();
    supervisor.supervise(&branch);

    // park the tick loop, then pile up a backlog it must not react to
    supervisor.suspend(Duration::from_secs(60));
    std::thread::sleep(Duration::from_millis(150));

    let (tx, rx) = bounded::<()>(0);
    for _ in 0..20 {
        let rx = rx.clone();
        branch.submit(move || {
            let _ = rx.recv();
        });
    }
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(branch.worker_count(), 2, "suspended supervisor must not act");

    supervisor.resume();
    wait_until("resumed supervisor expands", Duration::from_secs(10), || {
        branch.worker_count() == 4
    });

    drop(tx);
    supervisor.close();
    branch.close();
}

#[test]
fn test_supervisor_validates_bounds() {
    assert!(matches!(
        Supervisor::new(4, 4, Duration::from_millis(100)),
        Err(PoolError::InvalidConfig(_))
    ));
    assert!(matches!(
        Supervisor::new(2, 4, Duration::ZERO),
        Err(PoolError::InvalidConfig(_))
    ));
}

#[test]
fn test_supervisor_outlives_dropped_branch() {
    let supervisor = Supervisor::new(1, 2, Duration::from_millis(20)).unwrap();
    {
        let branch = WorkBranch::new(1, WaitStrategy::LowLatency);
        supervisor.supervise(&branch);
        std::thread::sleep(Duration::from_millis(60));
        branch.close();
    }
    // the monitor notices the dead branch and exits on its own
    std::thread::sleep(Duration::from_millis(100));
    supervisor.close();
}
