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

// Task manager: a fixed worker pool running evaluation jobs with cooperative
// interruption. Jobs observe the interrupt flag only at their own `tick`
// points; every exit path signals completion so `wait()` cannot hang.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe, Location};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{select, unbounded, Receiver, Sender};
use tracing::{debug, error};

/// Shared cooperative-cancellation flag. Raised asynchronously by
/// `interrupt()`, observed by the job at its next `check()`.
#[derive(Debug, Default)]
pub struct InterruptFlag(AtomicBool);

impl InterruptFlag {
    pub fn new() -> Self {
        InterruptFlag(AtomicBool::new(false))
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Returns `Err(TaskError::Interrupted)` once the flag has been raised.
    pub fn check(&self) -> std::result::Result<(), TaskError> {
        if self.is_raised() {
            Err(TaskError::Interrupted)
        } else {
            Ok(())
        }
    }
}

/// Outcome a job closure reports to its worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// The job observed its interrupt flag and unwound cooperatively.
    Interrupted,
    /// The job failed with a diagnostic message.
    Failed(String),
}

impl std::fmt::Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskError::Interrupted => f.write_str("interrupted"),
            TaskError::Failed(msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for TaskError {}

type JobFn = Box<dyn FnOnce(&Task) -> std::result::Result<(), TaskError> + Send + 'static>;
type Callback = Box<dyn FnOnce() + Send + 'static>;
type CallSite = (&'static str, u32, u32);

#[derive(Default)]
struct TaskState {
    finished: bool,
    interrupted: bool,
    failed: bool,
    message: Option<String>,
}

/// One unit of work tracked by the manager. Jobs receive `&Task` so they can
/// report progress and poll the interrupt flag.
pub struct Task {
    name: String,
    max_progress: AtomicU64,
    progress: AtomicU64,
    background: bool,
    blocking: bool,
    interrupt: Arc<InterruptFlag>,
    interrupt_callback: Mutex<Option<Box<dyn Fn() + Send>>>,
    state: Mutex<TaskState>,
    done: Condvar,
    job: Mutex<Option<JobFn>>,
}

impl Task {
    fn new(name: String, max_progress: u64, background: bool, blocking: bool, job: JobFn) -> Self {
        Task {
            name,
            max_progress: AtomicU64::new(max_progress),
            progress: AtomicU64::new(0),
            background,
            blocking,
            interrupt: Arc::new(InterruptFlag::new()),
            interrupt_callback: Mutex::new(None),
            state: Mutex::new(TaskState::default()),
            done: Condvar::new(),
            job: Mutex::new(Some(job)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_background(&self) -> bool {
        self.background
    }

    pub fn is_blocking(&self) -> bool {
        self.blocking
    }

    /// The flag a job threads into its evaluator for `tick()` checks.
    pub fn interrupt_flag(&self) -> Arc<InterruptFlag> {
        Arc::clone(&self.interrupt)
    }

    /// Record progress and observe the interrupt flag.
    pub fn update(&self, value: u64) -> std::result::Result<(), TaskError> {
        self.progress.store(value, Ordering::Relaxed);
        self.interrupt.check()
    }

    /// Bump progress by one and observe the interrupt flag.
    pub fn increment(&self) -> std::result::Result<(), TaskError> {
        self.progress.fetch_add(1, Ordering::Relaxed);
        self.interrupt.check()
    }

    pub fn set_max_progress(&self, value: u64) {
        self.max_progress.store(value, Ordering::Relaxed);
    }

    pub fn set_interrupt_callback(&self, callback: Box<dyn Fn() + Send>) {
        *self.interrupt_callback.lock().expect("task lock poisoned") = Some(callback);
    }

    pub fn interrupt(&self) {
        self.interrupt.raise();
        if let Some(callback) = &*self.interrupt_callback.lock().expect("task lock poisoned") {
            callback();
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state.lock().expect("task lock poisoned").finished
    }

    pub fn was_interrupted(&self) -> bool {
        self.state.lock().expect("task lock poisoned").interrupted
    }

    pub fn had_error(&self) -> bool {
        self.state.lock().expect("task lock poisoned").failed
    }

    pub fn exception_message(&self) -> Option<String> {
        self.state.lock().expect("task lock poisoned").message.clone()
    }

    /// Block until the job reaches any terminal state.
    pub fn wait(&self) {
        let mut state = self.state.lock().expect("task lock poisoned");
        while !state.finished {
            state = self.done.wait(state).expect("task lock poisoned");
        }
    }

    fn mark_interrupted(&self) {
        let mut state = self.state.lock().expect("task lock poisoned");
        state.interrupted = true;
    }

    fn mark_failed(&self, message: String) {
        let mut state = self.state.lock().expect("task lock poisoned");
        state.failed = true;
        state.message = Some(message);
    }

    fn finish(&self) {
        let mut state = self.state.lock().expect("task lock poisoned");
        state.finished = true;
        self.done.notify_all();
    }
}

/// Weak handle to a submitted task. Outlives the manager's bookkeeping; every
/// accessor degrades gracefully once the task is gone.
#[derive(Clone)]
pub struct TaskHandle {
    task: Weak<Task>,
}

impl TaskHandle {
    pub fn is_running(&self) -> bool {
        self.task.upgrade().map_or(false, |t| !t.is_finished())
    }

    /// Request cooperative interruption. A no-op after completion.
    pub fn interrupt(&self) {
        if let Some(task) = self.task.upgrade() {
            task.interrupt();
        }
    }

    pub fn wait(&self) {
        if let Some(task) = self.task.upgrade() {
            task.wait();
        }
    }

    pub fn was_interrupted(&self) -> bool {
        self.task.upgrade().map_or(false, |t| t.was_interrupted())
    }

    pub fn had_error(&self) -> bool {
        self.task.upgrade().map_or(false, |t| t.had_error())
    }

    pub fn exception_message(&self) -> Option<String> {
        self.task.upgrade().and_then(|t| t.exception_message())
    }

    /// Progress in percent, 0 when the task reports no maximum.
    pub fn progress(&self) -> u32 {
        let Some(task) = self.task.upgrade() else { return 0 };
        let max = task.max_progress.load(Ordering::Relaxed);
        if max == 0 {
            return 0;
        }
        ((task.progress.load(Ordering::Relaxed).min(max) * 100) / max) as u32
    }
}

/// Worker pool with a FIFO job queue and a main-loop deferred-call channel.
pub struct TaskManager {
    job_tx: Sender<Arc<Task>>,
    job_rx: Receiver<Arc<Task>>,
    stop_tx: Option<Sender<()>>,
    stopping: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
    tasks: Mutex<Vec<Weak<Task>>>,
    deferred: Mutex<VecDeque<Callback>>,
    deferred_once: Mutex<Vec<(CallSite, Callback)>>,
}

impl TaskManager {
    /// Pool sized to the host's available parallelism.
    pub fn new() -> Self {
        let workers = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Self::with_workers(workers)
    }

    pub fn with_workers(count: usize) -> Self {
        debug!(count, "starting task manager worker pool");
        let (job_tx, job_rx) = unbounded::<Arc<Task>>();
        let (stop_tx, stop_rx) = unbounded::<()>();
        let stopping = Arc::new(AtomicBool::new(false));

        let workers = (0..count.max(1))
            .map(|i| {
                let jobs = job_rx.clone();
                let stop = stop_rx.clone();
                let stopping = Arc::clone(&stopping);
                thread::Builder::new()
                    .name(format!("hekla-worker-{i}"))
                    .spawn(move || worker_loop(jobs, stop, stopping))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        TaskManager {
            job_tx,
            job_rx,
            stop_tx: Some(stop_tx),
            stopping,
            workers,
            tasks: Mutex::new(Vec::new()),
            deferred: Mutex::new(VecDeque::new()),
            deferred_once: Mutex::new(Vec::new()),
        }
    }

    /// Enqueue a job. Non-blocking; workers pick jobs up in submission order.
    pub fn submit<F>(&self, name: impl Into<String>, max_progress: u64, job: F) -> TaskHandle
    where
        F: FnOnce(&Task) -> std::result::Result<(), TaskError> + Send + 'static,
    {
        self.create_task(name.into(), max_progress, false, false, Box::new(job))
    }

    /// Enqueue a background job (not reflected in foreground task counts).
    pub fn submit_background<F>(&self, name: impl Into<String>, job: F) -> TaskHandle
    where
        F: FnOnce(&Task) -> std::result::Result<(), TaskError> + Send + 'static,
    {
        self.create_task(name.into(), 0, true, false, Box::new(job))
    }

    fn create_task(
        &self,
        name: String,
        max_progress: u64,
        background: bool,
        blocking: bool,
        job: JobFn,
    ) -> TaskHandle {
        debug!(name = %name, "queueing task");
        let task = Arc::new(Task::new(name, max_progress, background, blocking, job));
        let handle = TaskHandle { task: Arc::downgrade(&task) };

        let mut tasks = self.tasks.lock().expect("task list lock poisoned");
        tasks.retain(|t| t.upgrade().map_or(false, |t| !t.is_finished()));
        tasks.push(Arc::downgrade(&task));
        drop(tasks);

        // The queue keeps the only strong reference until a worker is done
        // with the task; handles stay weak.
        self.job_tx.send(task).expect("worker pool is gone");
        handle
    }

    /// Number of queued or running foreground tasks.
    pub fn running_task_count(&self) -> usize {
        self.tasks
            .lock()
            .expect("task list lock poisoned")
            .iter()
            .filter_map(|t| t.upgrade())
            .filter(|t| !t.is_background() && !t.is_finished())
            .count()
    }

    /// Interrupt every queued or running task.
    pub fn interrupt_all(&self) {
        for task in self.tasks.lock().expect("task list lock poisoned").iter() {
            if let Some(task) = task.upgrade() {
                task.interrupt();
            }
        }
    }

    /// Queue a closure for the host's main loop.
    pub fn do_later<F: FnOnce() + Send + 'static>(&self, callback: F) {
        self.deferred.lock().expect("deferred lock poisoned").push_back(Box::new(callback));
    }

    /// Queue a closure for the host's main loop, collapsing repeated requests
    /// from the same call site into the latest one. First-submission order is
    /// preserved.
    #[track_caller]
    pub fn do_later_once<F: FnOnce() + Send + 'static>(&self, callback: F) {
        let loc = Location::caller();
        let site: CallSite = (loc.file(), loc.line(), loc.column());
        let mut queue = self.deferred_once.lock().expect("deferred lock poisoned");
        if let Some(entry) = queue.iter_mut().find(|(s, _)| *s == site) {
            entry.1 = Box::new(callback);
        } else {
            queue.push((site, Box::new(callback)));
        }
    }

    /// Run all deferred calls. Must be invoked from the host's main loop.
    pub fn run_deferred_calls(&self) {
        loop {
            let Some(callback) = self.deferred.lock().expect("deferred lock poisoned").pop_front()
            else {
                break;
            };
            callback();
        }
        let once: Vec<_> =
            std::mem::take(&mut *self.deferred_once.lock().expect("deferred lock poisoned"));
        for (_, callback) in once {
            callback();
        }
    }

    /// Stop the pool: interrupt running jobs, wake idle workers, drop any
    /// still-enqueued jobs without running their closures.
    pub fn shutdown(&mut self) {
        if self.stop_tx.is_none() {
            return;
        }
        debug!("shutting down task manager");
        self.stopping.store(true, Ordering::SeqCst);
        self.interrupt_all();
        // Dropping the stop sender broadcasts shutdown to every worker.
        self.stop_tx = None;
        // Whatever is still queued is dropped unrun, but finished so waiters
        // wake up.
        while let Ok(task) = self.job_rx.try_recv() {
            task.mark_interrupted();
            task.finish();
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TaskManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(jobs: Receiver<Arc<Task>>, stop: Receiver<()>, stopping: Arc<AtomicBool>) {
    loop {
        select! {
            recv(jobs) -> msg => match msg {
                Ok(task) => {
                    if stopping.load(Ordering::SeqCst) {
                        task.mark_interrupted();
                        task.finish();
                        continue;
                    }
                    run_task(&task);
                }
                Err(_) => break,
            },
            recv(stop) -> msg => {
                // The manager never sends on this channel; an Err means the
                // sender was dropped during shutdown.
                if msg.is_err() {
                    break;
                }
            }
        }
    }
}

fn run_task(task: &Arc<Task>) {
    let job = task.job.lock().expect("task lock poisoned").take();
    let Some(job) = job else {
        task.finish();
        return;
    };

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| job(task)));
    match outcome {
        Ok(Ok(())) => debug!(name = task.name(), "task finished"),
        Ok(Err(TaskError::Interrupted)) => {
            debug!(name = task.name(), "task interrupted");
            task.mark_interrupted();
        }
        Ok(Err(TaskError::Failed(message))) => {
            error!(name = task.name(), %message, "task failed");
            task.mark_failed(message);
        }
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(name = task.name(), %message, "task panicked");
            task.mark_failed(message);
        }
    }
    // Every path signals completion, including panics.
    task.finish();
}
