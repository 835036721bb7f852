//   Copyright (c) 2024-2026 Anton Kundenko <singaraiona@gmail.com>
//   All rights reserved.
//
//   Permission is hereby granted, free of charge, to any person obtaining a copy
//   of this software and associated documentation files (the "Software"), to deal
//   in the Software without restriction, including without limitation the rights
//   to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
//   copies of the Software, and to permit persons to whom the Software is
//   furnished to do so, subject to the following conditions:
//
//   The above copyright notice and this permission notice shall be included in all
//   copies or substantial portions of the Software.
//
//   THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
//   IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
//   FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
//   AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
//   LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
//   OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
//   SOFTWARE.

//! Task manager behavior tests: completion signaling, cooperative
//! interruption, failure containment, deferred calls, shutdown.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hekla::task::{TaskError, TaskManager};

#[test]
fn job_runs_and_signals_completion() {
    let manager = TaskManager::with_workers(2);
    let ran = Arc::new(AtomicUsize::new(0));
    let ran2 = Arc::clone(&ran);

    let handle = manager.submit("count", 0, move |_| {
        ran2.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    handle.wait();

    assert_eq!(ran.load(Ordering::SeqCst), 1);
    assert!(!handle.is_running());
    assert!(!handle.had_error());
    assert!(!handle.was_interrupted());
}

#[test]
fn progress_is_reported_in_percent() {
    let manager = TaskManager::with_workers(1);
    let handle = manager.submit("progress", 10, move |task| {
        for _ in 0..10 {
            task.increment()?;
        }
        Ok(())
    });
    handle.wait();
    assert_eq!(handle.progress(), 100);
}

#[test]
fn interrupt_stops_a_long_job() {
    let manager = TaskManager::with_workers(1);
    let handle = manager.submit("spin", 0, move |task| {
        loop {
            task.increment()?;
            std::thread::sleep(Duration::from_millis(1));
        }
    });

    std::thread::sleep(Duration::from_millis(20));
    handle.interrupt();
    handle.wait();

    assert!(handle.was_interrupted());
    assert!(!handle.had_error());
    // Interrupting a finished task is a no-op.
    handle.interrupt();
}

#[test]
fn failure_is_recorded_on_the_handle() {
    let manager = TaskManager::with_workers(1);
    let handle =
        manager.submit("fail", 0, move |_| Err(TaskError::Failed("bad input".to_string())));
    handle.wait();
    assert!(handle.had_error());
    assert_eq!(handle.exception_message().as_deref(), Some("bad input"));
}

#[test]
fn panic_does_not_hang_waiters() {
    let manager = TaskManager::with_workers(1);
    let handle = manager.submit("panic", 0, move |_| panic!("boom"));
    handle.wait();
    assert!(handle.had_error());
    assert_eq!(handle.exception_message().as_deref(), Some("boom"));

    // The worker survives the panic and keeps serving jobs.
    let after = manager.submit("after", 0, move |_| Ok(()));
    after.wait();
    assert!(!after.had_error());
}

#[test]
fn jobs_on_one_worker_run_in_submission_order() {
    let manager = TaskManager::with_workers(1);
    let order = Arc::new(Mutex::new(Vec::new()));

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let order = Arc::clone(&order);
            manager.submit(format!("job-{i}"), 0, move |_| {
                order.lock().unwrap().push(i);
                Ok(())
            })
        })
        .collect();
    for handle in &handles {
        handle.wait();
    }

    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
}

#[test]
fn deferred_calls_run_on_demand_in_order() {
    let manager = TaskManager::with_workers(1);
    let seen = Arc::new(Mutex::new(Vec::new()));

    for i in 0..3 {
        let seen = Arc::clone(&seen);
        manager.do_later(move || seen.lock().unwrap().push(i));
    }
    assert!(seen.lock().unwrap().is_empty());

    manager.run_deferred_calls();
    assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
}

#[test]
fn deferred_once_collapses_by_call_site() {
    let manager = TaskManager::with_workers(1);
    let count = Arc::new(AtomicUsize::new(0));

    for _ in 0..5 {
        let count = Arc::clone(&count);
        // Same call site each iteration: only the last request survives.
        manager.do_later_once(move || {
            count.fetch_add(1, Ordering::SeqCst);
        });
    }
    manager.run_deferred_calls();
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn shutdown_drops_queued_jobs_without_running_them() {
    let mut manager = TaskManager::with_workers(1);
    let ran = Arc::new(AtomicUsize::new(0));

    // First job blocks the only worker long enough for the queue to fill.
    let gate = Arc::new(AtomicUsize::new(0));
    let gate2 = Arc::clone(&gate);
    let blocker = manager.submit("blocker", 0, move |task| {
        gate2.store(1, Ordering::SeqCst);
        loop {
            task.increment()?;
            std::thread::sleep(Duration::from_millis(1));
        }
    });
    while gate.load(Ordering::SeqCst) == 0 {
        std::thread::yield_now();
    }

    let queued: Vec<_> = (0..3)
        .map(|_| {
            let ran = Arc::clone(&ran);
            manager.submit("queued", 0, move |_| {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
        .collect();

    manager.shutdown();

    assert_eq!(ran.load(Ordering::SeqCst), 0);
    assert!(blocker.was_interrupted());
    for handle in &queued {
        // Dropped jobs still reach a terminal state.
        handle.wait();
        assert!(!handle.is_running());
    }
}
