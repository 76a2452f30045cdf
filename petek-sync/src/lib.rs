//! Blocking companions to the `petek` lock-free queue.
//!
//! - [`SpinLock`]: a test-test-and-set lock for very short critical sections
//! - [`TwoLockQueue`]: an unbounded FIFO with separate head and tail locks
//! - [`ThreadPool`]: a fixed set of workers with joinable task handles
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use petek_sync::{SpinLock, ThreadPool};
//!
//! let pool = ThreadPool::new(4).unwrap();
//! let total = Arc::new(SpinLock::new(0u64));
//!
//! let handles: Vec<_> = (1..=10u64)
//!     .map(|i| {
//!         let total = total.clone();
//!         pool.execute(move || *total.lock() += i)
//!     })
//!     .collect();
//!
//! for h in handles {
//!     h.join().unwrap();
//! }
//! assert_eq!(*total.lock(), 55);
//! ```

#![warn(missing_docs)]

mod error;
mod spin_lock;
mod thread_pool;
mod trace;
mod two_lock_queue;

pub use error::{PoolError, TaskError};
pub use spin_lock::{SPIN_LIMIT, SpinLock, SpinLockGuard};
pub use thread_pool::{TaskHandle, ThreadPool, ThreadPoolBuilder};
pub use trace::init_tracing;
pub use two_lock_queue::TwoLockQueue;
