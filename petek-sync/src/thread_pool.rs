//! Fixed-size thread pool.
//!
//! Workers share one task list behind a mutex and sleep on a condition
//! variable while it is empty. Each submitted closure gets a
//! [`TaskHandle`] the caller can block on for the closure's return value.

use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use crate::error::{PoolError, TaskError};
use crate::trace::{debug, info, warn};

type Task = Box<dyn FnOnce() + Send + 'static>;

const DEFAULT_THREAD_NAME: &str = "petek-worker";
const FALLBACK_THREADS: usize = 2;

struct State {
    tasks: VecDeque<Task>,
    running: bool,
}

struct Shared {
    state: Mutex<State>,
    available: Condvar,
}

// Tasks run outside the lock and their panics are caught, so a poisoned
// lock still guards consistent state.
fn lock<S>(m: &Mutex<S>) -> MutexGuard<'_, S> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Builder for a [`ThreadPool`].
///
/// ```
/// use petek_sync::ThreadPool;
///
/// let pool = ThreadPool::builder()
///     .num_threads(2)
///     .thread_name("io")
///     .build()
///     .unwrap();
/// assert_eq!(pool.num_threads(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct ThreadPoolBuilder {
    /// Worker count; `None` means one per available core.
    num_threads: Option<usize>,
    /// Prefix of each worker's name; the worker index is appended.
    thread_name: String,
    /// Stack size of each worker in bytes.
    stack_size: Option<usize>,
}

impl Default for ThreadPoolBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadPoolBuilder {
    /// Creates a builder with default settings.
    pub fn new() -> Self {
        Self {
            num_threads: None,
            thread_name: DEFAULT_THREAD_NAME.to_string(),
            stack_size: None,
        }
    }

    /// Sets the number of worker threads.
    pub fn num_threads(mut self, n: usize) -> Self {
        self.num_threads = Some(n);
        self
    }

    /// Sets the worker name prefix.
    pub fn thread_name(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name = prefix.into();
        self
    }

    /// Sets the stack size of each worker.
    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    /// Spawns the workers.
    ///
    /// Fails with [`PoolError::ZeroThreads`] if zero threads were requested
    /// and with [`PoolError::Spawn`] if the OS refused a thread. Workers
    /// already started are shut down before the error is returned.
    pub fn build(self) -> Result<ThreadPool, PoolError> {
        let num_threads = match self.num_threads {
            Some(0) => return Err(PoolError::ZeroThreads),
            Some(n) => n,
            None => thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(FALLBACK_THREADS),
        };

        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                tasks: VecDeque::new(),
                running: true,
            }),
            available: Condvar::new(),
        });

        let mut pool = ThreadPool {
            shared,
            workers: Vec::with_capacity(num_threads),
        };

        for index in 0..num_threads {
            let mut builder = thread::Builder::new().name(format!("{}-{}", self.thread_name, index));
            if let Some(bytes) = self.stack_size {
                builder = builder.stack_size(bytes);
            }
            let shared = Arc::clone(&pool.shared);
            // On error `pool` drops here and joins the workers spawned so far.
            let handle = builder.spawn(move || worker_loop(&shared))?;
            pool.workers.push(handle);
        }

        info!(threads = num_threads, name = %self.thread_name, "thread pool started");
        Ok(pool)
    }
}

fn worker_loop(shared: &Shared) {
    debug!("worker started");
    loop {
        let task = {
            let mut state = lock(&shared.state);
            loop {
                if let Some(task) = state.tasks.pop_front() {
                    break Some(task);
                }
                if !state.running {
                    break None;
                }
                state = shared
                    .available
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        };

        match task {
            Some(task) => task(),
            None => break,
        }
    }
    debug!("worker stopped");
}

/// A fixed set of worker threads running submitted closures in FIFO order.
///
/// Dropping the pool stops accepting work, lets the workers finish every
/// task already queued, then joins them.
///
/// ```
/// use petek_sync::ThreadPool;
///
/// let pool = ThreadPool::new(4).unwrap();
/// let handles: Vec<_> = (0..8).map(|i| pool.execute(move || i * i)).collect();
/// let squares: Vec<i32> = handles.into_iter().map(|h| h.join().unwrap()).collect();
/// assert_eq!(squares, vec![0, 1, 4, 9, 16, 25, 36, 49]);
/// ```
pub struct ThreadPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// Creates a pool of `num_threads` workers with default settings.
    pub fn new(num_threads: usize) -> Result<Self, PoolError> {
        ThreadPoolBuilder::new().num_threads(num_threads).build()
    }

    /// Creates a new builder.
    pub fn builder() -> ThreadPoolBuilder {
        ThreadPoolBuilder::new()
    }

    /// Queues `f` and wakes one idle worker.
    ///
    /// A panic inside `f` is caught on the worker and reported through
    /// [`TaskHandle::join`] as [`TaskError::Panicked`].
    pub fn execute<F, R>(&self, f: F) -> TaskHandle<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let slot = Arc::new(TaskSlot::new());
        let completer = Completer {
            slot: Arc::clone(&slot),
            completed: false,
        };

        let task: Task = Box::new(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
                let msg = panic_message(payload.as_ref());
                warn!(panic = %msg, "task panicked");
                TaskError::Panicked(msg)
            });
            completer.complete(result);
        });

        lock(&self.shared.state).tasks.push_back(task);
        self.shared.available.notify_one();

        TaskHandle { slot }
    }

    /// Number of worker threads.
    pub fn num_threads(&self) -> usize {
        self.workers.len()
    }

    /// Number of tasks waiting for a worker.
    pub fn queued(&self) -> usize {
        lock(&self.shared.state).tasks.len()
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        lock(&self.shared.state).running = false;
        self.shared.available.notify_all();

        for worker in self.workers.drain(..) {
            // Task panics are caught, so a worker only fails on a bug here.
            let _ = worker.join();
        }
        debug!("thread pool shut down");
    }
}

impl fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPool")
            .field("num_threads", &self.num_threads())
            .field("queued", &self.queued())
            .finish()
    }
}

struct TaskSlot<R> {
    result: Mutex<Option<Result<R, TaskError>>>,
    done: Condvar,
}

impl<R> TaskSlot<R> {
    fn new() -> Self {
        Self {
            result: Mutex::new(None),
            done: Condvar::new(),
        }
    }

    fn fill(&self, result: Result<R, TaskError>) {
        *lock(&self.result) = Some(result);
        self.done.notify_all();
    }
}

/// Write side of a [`TaskSlot`]. Fills the slot with
/// [`TaskError::Cancelled`] if dropped before the task ran.
struct Completer<R> {
    slot: Arc<TaskSlot<R>>,
    completed: bool,
}

impl<R> Completer<R> {
    fn complete(mut self, result: Result<R, TaskError>) {
        self.completed = true;
        self.slot.fill(result);
    }
}

impl<R> Drop for Completer<R> {
    fn drop(&mut self) {
        if !self.completed {
            self.slot.fill(Err(TaskError::Cancelled));
        }
    }
}

/// Handle to the result of a closure submitted with
/// [`ThreadPool::execute`].
pub struct TaskHandle<R> {
    slot: Arc<TaskSlot<R>>,
}

impl<R> TaskHandle<R> {
    /// Blocks until the task has finished and returns its outcome.
    pub fn join(self) -> Result<R, TaskError> {
        let mut result = lock(&self.slot.result);
        loop {
            if let Some(result) = result.take() {
                return result;
            }
            result = self
                .slot
                .done
                .wait(result)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Whether the task has finished, successfully or not.
    pub fn is_finished(&self) -> bool {
        lock(&self.slot.result).is_some()
    }
}

impl<R> fmt::Debug for TaskHandle<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("finished", &self.is_finished())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dropped_completer_cancels() {
        let slot = Arc::new(TaskSlot::<u32>::new());
        let handle = TaskHandle {
            slot: Arc::clone(&slot),
        };
        assert!(!handle.is_finished());
        drop(Completer {
            slot,
            completed: false,
        });
        assert!(handle.is_finished());
        assert_eq!(handle.join(), Err(TaskError::Cancelled));
    }

    #[test]
    fn test_completed_completer_keeps_result() {
        let slot = Arc::new(TaskSlot::new());
        let handle = TaskHandle {
            slot: Arc::clone(&slot),
        };
        Completer {
            slot,
            completed: false,
        }
        .complete(Ok(7));
        assert_eq!(handle.join(), Ok(7));
    }

    #[test]
    fn test_panic_message() {
        let p: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(p.as_ref()), "boom");
        let p: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(p.as_ref()), "bang");
        let p: Box<dyn Any + Send> = Box::new(3u8);
        assert_eq!(panic_message(p.as_ref()), "<non-string panic payload>");
    }

    #[test]
    fn test_builder_defaults() {
        let b = ThreadPoolBuilder::new();
        assert_eq!(b.num_threads, None);
        assert_eq!(b.thread_name, "petek-worker");
        assert_eq!(b.stack_size, None);
    }

    #[test]
    fn test_zero_threads_rejected() {
        assert!(matches!(ThreadPool::new(0), Err(PoolError::ZeroThreads)));
    }
}
