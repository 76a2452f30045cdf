//! Petek: a lock-free MPMC queue that reclaims its own memory.
//!
//! [`LockFreeQueue`] is an unbounded multi-producer multi-consumer queue.
//! It frees nodes without a garbage collector, hazard pointers or epochs,
//! using split reference counting instead: each node knows how many threads
//! may still be looking at it, and the last one out frees it.
//!
//! # Key Features
//!
//! - **Lock-Free Progress**: every operation is a CAS retry loop; some thread
//!   always completes
//! - **Immediate Reclamation**: a node is freed the moment its last reference
//!   is given back, no deferred retire lists
//! - **Producer Helping**: a producer stalled between filling a node and
//!   linking its successor is finished off by the others
//! - **No Global State**: all bookkeeping lives in the queue and its nodes
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use std::thread;
//! use petek::LockFreeQueue;
//!
//! let q = Arc::new(LockFreeQueue::new());
//!
//! let producers: Vec<_> = (0..4)
//!     .map(|p| {
//!         let q = q.clone();
//!         thread::spawn(move || {
//!             for i in 0..100 {
//!                 q.push(p * 100 + i);
//!             }
//!         })
//!     })
//!     .collect();
//!
//! for h in producers {
//!     h.join().unwrap();
//! }
//!
//! let mut sum = 0;
//! while let Some(v) = q.pop() {
//!     sum += v;
//! }
//! assert_eq!(sum, (0..400).sum());
//! ```
//!
//! # Platform support
//!
//! Counted pointers are 128 bits wide. On targets without a native
//! double-word CAS, `portable-atomic` emulates it with a lock; check
//! [`LockFreeQueue::is_lock_free`] if that matters.

#![warn(missing_docs)]

mod counted;
mod node;
mod queue;
mod refcount;
mod trace;

pub use queue::LockFreeQueue;
pub use trace::init_tracing;
