//! Where continuations run.
//!
//! An [`Executor`] takes ownership of a [`Task`] and runs it later, on some
//! other stack. A task that panics is contained by the executor's run loop and
//! logged; it never reaches the thread that completed the promise.
use std::{
    collections::VecDeque,
    fmt, io,
    num::NonZeroUsize,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{Arc, Mutex, OnceLock, PoisonError},
    thread::{self, JoinHandle},
};

use crossbeam_channel::{unbounded, Sender};

/// A unit of work handed to an [`Executor`].
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Environment variable read by [`default_executor`] for its worker count.
pub const WORKERS_ENV: &str = "PROMISE_FLOW_WORKERS";

/// Runs scheduled tasks at some later point.
///
/// No ordering is promised between tasks; implementations in this crate
/// happen to start tasks in submission order.
pub trait Executor: Send + Sync {
    fn schedule(&self, task: Task);
}

fn run_contained(task: Task) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(task)) {
        log::error!(
            "continuation panicked: {}",
            crate::panic_message(payload.as_ref())
        );
    }
}

/// Builder for a [`ThreadPool`].
#[derive(Debug, Clone)]
pub struct ThreadPoolBuilder {
    name: Option<String>,
    workers: usize,
}

impl ThreadPoolBuilder {
    /// Prefix for worker thread names; workers are named `{name}-{index}`.
    pub fn name<N: Into<String>>(self, name: N) -> Self {
        Self {
            name: Some(name.into()),
            ..self
        }
    }

    /// Number of worker threads. Zero is treated as one.
    pub fn workers(self, workers: usize) -> Self {
        Self { workers, ..self }
    }

    pub fn spawn(self) -> io::Result<ThreadPool> {
        let (sender, receiver) = unbounded::<Task>();
        let count = self.workers.max(1);
        let mut handles = Vec::with_capacity(count);
        for index in 0..count {
            let receiver = receiver.clone();
            let mut builder = thread::Builder::new();
            let label = self
                .name
                .as_ref()
                .map(|name| format!("{name}-{index}"))
                .unwrap_or_else(|| format!("worker-{index}"));
            builder = builder.name(label.clone());
            let handle = builder.spawn(move || {
                log::trace!("worker '{label}' starting");
                for task in receiver {
                    run_contained(task);
                }
                log::trace!("worker '{label}' exiting");
            })?;
            handles.push(handle);
        }
        log::debug!(
            "spawned thread pool {:?} with {count} workers",
            self.name.as_deref().unwrap_or("unnamed")
        );
        Ok(ThreadPool {
            sender: Some(sender),
            handles,
        })
    }
}

/// A fixed set of worker threads pulling tasks from a shared queue.
///
/// Dropping the pool closes the queue, lets the workers finish what was
/// already scheduled, and joins them.
pub struct ThreadPool {
    sender: Option<Sender<Task>>,
    handles: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    pub fn builder() -> ThreadPoolBuilder {
        ThreadPoolBuilder {
            name: None,
            workers: available_workers(),
        }
    }

    pub fn workers(&self) -> usize {
        self.handles.len()
    }
}

impl Executor for ThreadPool {
    fn schedule(&self, task: Task) {
        let sent = match self.sender.as_ref() {
            Some(sender) => sender.send(task).is_ok(),
            None => false,
        };
        if !sent {
            log::error!("thread pool is shut down; dropping task");
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        drop(self.sender.take());
        let current = thread::current().id();
        for handle in self.handles.drain(..) {
            if handle.thread().id() == current {
                // Dropped from one of our own tasks; that worker exits when the queue closes.
                continue;
            }
            // Tasks are run under catch_unwind, so a worker only dies with the process.
            if handle.join().is_err() {
                log::error!("thread pool worker terminated abnormally");
            }
        }
        log::debug!("thread pool shut down");
    }
}

impl fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPool")
            .field("workers", &self.handles.len())
            .finish()
    }
}

/// Queues tasks until [`ManualExecutor::run_until_idle`] is called.
///
/// Useful where the interleaving of continuations has to be controlled, such
/// as in tests.
#[derive(Default)]
pub struct ManualExecutor {
    queue: Mutex<VecDeque<Task>>,
}

impl ManualExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    /// Runs one queued task. Returns `false` if the queue was empty.
    pub fn run_one(&self) -> bool {
        // The lock is released before the task runs; tasks schedule more tasks.
        let task = self.lock().pop_front();
        match task {
            Some(task) => {
                run_contained(task);
                true
            }
            None => false,
        }
    }

    /// Runs tasks, including ones scheduled meanwhile, until none are left.
    /// Returns how many ran.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while self.run_one() {
            ran += 1;
        }
        ran
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Task>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Executor for ManualExecutor {
    fn schedule(&self, task: Task) {
        self.lock().push_back(task);
    }
}

impl fmt::Debug for ManualExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualExecutor")
            .field("pending", &self.pending())
            .finish()
    }
}

fn available_workers() -> usize {
    thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(4)
}

fn configured_workers(value: Option<&str>) -> usize {
    match value.map(str::trim).map(str::parse::<usize>) {
        Some(Ok(n)) if n > 0 => n,
        Some(_) => {
            log::warn!("ignoring invalid {WORKERS_ENV}={:?}", value.unwrap_or_default());
            available_workers()
        }
        None => available_workers(),
    }
}

static DEFAULT: OnceLock<Arc<dyn Executor>> = OnceLock::new();

/// The process-wide executor used by [`Promise::new`](crate::Promise::new)
/// and [`Future::successful`](crate::Future::successful).
///
/// It is a [`ThreadPool`] named `promise-flow`, spawned on first use. Its size
/// comes from `PROMISE_FLOW_WORKERS` or else the available parallelism.
///
/// # Panics
///
/// Panics if the operating system refuses to spawn the worker threads.
pub fn default_executor() -> Arc<dyn Executor> {
    DEFAULT
        .get_or_init(|| {
            let workers = configured_workers(std::env::var(WORKERS_ENV).ok().as_deref());
            let pool = ThreadPool::builder()
                .name("promise-flow")
                .workers(workers)
                .spawn()
                .expect("failed to spawn the default promise-flow thread pool");
            Arc::new(pool)
        })
        .clone()
}
