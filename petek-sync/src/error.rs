use std::fmt;
use std::io;

/// Errors building a [`ThreadPool`](crate::ThreadPool)
#[derive(Debug)]
pub enum PoolError {
    /// A pool needs at least one worker
    ZeroThreads,
    /// The operating system refused to start a worker thread
    Spawn(io::Error),
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolError::ZeroThreads => write!(f, "Thread pool requires at least one thread"),
            PoolError::Spawn(err) => write!(f, "Failed to spawn worker thread: {}", err),
        }
    }
}

impl std::error::Error for PoolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PoolError::ZeroThreads => None,
            PoolError::Spawn(err) => Some(err),
        }
    }
}

impl From<io::Error> for PoolError {
    fn from(err: io::Error) -> Self {
        PoolError::Spawn(err)
    }
}

/// Why a task submitted to a [`ThreadPool`](crate::ThreadPool) produced no
/// value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// The task panicked; carries the panic message when it was a string
    Panicked(String),
    /// The task was dropped before it ran
    Cancelled,
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskError::Panicked(msg) => write!(f, "Task panicked: {}", msg),
            TaskError::Cancelled => write!(f, "Task was cancelled before it ran"),
        }
    }
}

impl std::error::Error for TaskError {}
