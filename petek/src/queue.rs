//! Lock-free unbounded MPMC queue.

use crate::counted::{AtomicCountedPtr, CountedPtr};
use crate::node::{Node, taken};
use crate::refcount::{Claim, increase_ref};
use crate::trace::{debug, trace};
use core::fmt;
use core::ptr;
use core::sync::atomic::Ordering;
use crossbeam_utils::{Backoff, CachePadded};

/// An unbounded multi-producer multi-consumer queue.
///
/// Elements live in a singly linked chain of nodes that always ends in one
/// empty node, the insertion point addressed by `tail`. Producers race to
/// fill that node, consumers race to move `head` past the oldest filled one.
/// Nodes are reclaimed by split reference counting: no epochs, no hazard
/// pointers, no global state.
///
/// Every operation is lock-free. A stalled producer is helped along by the
/// others, who link the missing successor node and advance `tail` for it.
///
/// # Examples
///
/// ```
/// use petek::LockFreeQueue;
///
/// let q = LockFreeQueue::new();
/// q.push("a");
/// q.push("b");
///
/// assert_eq!(q.pop(), Some("a"));
/// assert_eq!(q.pop(), Some("b"));
/// assert_eq!(q.pop(), None);
/// ```
pub struct LockFreeQueue<T> {
    head: CachePadded<AtomicCountedPtr<Node<T>>>,
    tail: CachePadded<AtomicCountedPtr<Node<T>>>,
}

unsafe impl<T: Send> Send for LockFreeQueue<T> {}
unsafe impl<T: Send> Sync for LockFreeQueue<T> {}

impl<T> Default for LockFreeQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LockFreeQueue<T> {
    /// Creates an empty queue.
    pub fn new() -> LockFreeQueue<T> {
        let sentinel = CountedPtr::new(Box::into_raw(Box::new(Node::new())), 1);
        LockFreeQueue {
            head: CachePadded::new(AtomicCountedPtr::new(sentinel)),
            tail: CachePadded::new(AtomicCountedPtr::new(sentinel)),
        }
    }

    /// Appends an element to the back of the queue.
    pub fn push(&self, value: T) {
        self.push_with(|| value)
    }

    /// Appends the element produced by `make`.
    ///
    /// The node and the element are allocated before the queue is touched;
    /// if `make` panics the queue is left exactly as it was.
    pub fn push_with<F>(&self, make: F)
    where
        F: FnOnce() -> T,
    {
        let spare = Box::new(Node::new());
        let data = Box::new(make());
        self.push_boxed(spare, data);
    }

    /// Appends the element produced by `make`, or returns its error with the
    /// queue untouched.
    ///
    /// ```
    /// use petek::LockFreeQueue;
    ///
    /// let q: LockFreeQueue<u8> = LockFreeQueue::new();
    /// assert!(q.try_push_with(|| "300".parse::<u8>()).is_err());
    /// assert!(q.try_push_with(|| "30".parse::<u8>()).is_ok());
    /// assert_eq!(q.pop(), Some(30));
    /// ```
    pub fn try_push_with<F, E>(&self, make: F) -> Result<(), E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let spare = Box::new(Node::new());
        let data = Box::new(make()?);
        self.push_boxed(spare, data);
        Ok(())
    }

    fn push_boxed(&self, mut spare: Box<Node<T>>, data: Box<T>) {
        let data = Box::into_raw(data);
        let backoff = Backoff::new();
        let mut tail = self.tail.load(Ordering::SeqCst);

        loop {
            let claim = increase_ref(&self.tail, tail);
            let node = claim.node();

            match node
                .data
                .compare_exchange(ptr::null_mut(), data, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => {
                    // The element is in. Link a successor unless a helper
                    // already did, then move `tail` onto it.
                    let ours = CountedPtr::new(Box::into_raw(spare), 1);
                    let next = match node.next.compare_exchange(
                        CountedPtr::null(),
                        ours,
                        Ordering::SeqCst,
                        Ordering::SeqCst,
                    ) {
                        Ok(_) => ours,
                        Err(installed) => {
                            trace!(spare = ?ours.node, "successor installed by helper, discarding spare");
                            // SAFETY: the spare was never published.
                            unsafe { drop(Box::from_raw(ours.node)) };
                            installed
                        }
                    };
                    self.advance_tail(claim, next);
                    return;
                }
                Err(_) => {
                    // Another producer owns this node. Help it finish by
                    // linking our spare as its successor if it has not yet.
                    let candidate = CountedPtr::new(Box::into_raw(spare), 1);
                    let next = match node.next.compare_exchange(
                        CountedPtr::null(),
                        candidate,
                        Ordering::SeqCst,
                        Ordering::SeqCst,
                    ) {
                        Ok(_) => {
                            trace!(node = ?claim.node_ptr(), "helped link successor");
                            spare = Box::new(Node::new());
                            candidate
                        }
                        Err(installed) => {
                            // SAFETY: the candidate was never published.
                            spare = unsafe { Box::from_raw(candidate.node) };
                            installed
                        }
                    };
                    self.advance_tail(claim, next);
                    backoff.spin();
                    tail = self.tail.load(Ordering::SeqCst);
                }
            }
        }
    }

    /// Move `tail` off the claimed node onto `next`.
    ///
    /// Retries only while `tail` still addresses the claimed node. Whoever
    /// moves it retires the tail role; everyone else just gives their claim
    /// back.
    fn advance_tail(&self, claim: Claim<'_, T>, next: CountedPtr<Node<T>>) {
        debug_assert!(!next.is_null());
        let node = claim.node_ptr();
        let mut current = claim.counted();

        loop {
            match self.tail.compare_exchange_weak(
                current,
                next,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    claim.reconcile_as(current);
                    return;
                }
                Err(actual) if actual.node == node => current = actual,
                Err(_) => return,
            }
        }
    }

    /// Removes the element at the front of the queue.
    ///
    /// Returns `None` if the queue was empty at the instant it was checked.
    pub fn pop(&self) -> Option<T> {
        let backoff = Backoff::new();
        let mut head = self.head.load(Ordering::SeqCst);

        loop {
            let claim = increase_ref(&self.head, head);
            if claim.node_ptr() == self.tail.load(Ordering::SeqCst).node {
                return None;
            }

            // `tail` has moved past this node, so its successor is linked.
            let next = claim.node().next.load(Ordering::SeqCst);
            debug_assert!(!next.is_null());

            match self.head.compare_exchange(
                claim.counted(),
                next,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    let data = claim.node().data.swap(taken(), Ordering::AcqRel);
                    claim.reconcile();
                    debug_assert!(!data.is_null() && data != taken());
                    // SAFETY: the winning producer boxed it and we are the only
                    // consumer that moved head off this node.
                    return Some(*unsafe { Box::from_raw(data) });
                }
                Err(actual) => {
                    drop(claim);
                    backoff.spin();
                    head = actual;
                }
            }
        }
    }

    /// Returns `true` if the queue was empty at the instant it was checked.
    pub fn is_empty(&self) -> bool {
        let head = self.head.load(Ordering::SeqCst);
        let tail = self.tail.load(Ordering::SeqCst);
        head.node == tail.node
    }

    /// Returns `true` if the double-width CAS backing `head`, `tail` and
    /// `next` is native on this platform.
    ///
    /// When it is not, `portable-atomic` falls back to a lock and the queue
    /// is no longer lock-free.
    pub fn is_lock_free() -> bool {
        AtomicCountedPtr::<Node<T>>::is_lock_free()
    }
}

impl<T> Drop for LockFreeQueue<T> {
    fn drop(&mut self) {
        let tail = self.tail.load(Ordering::Relaxed).node;
        let mut current = self.head.load(Ordering::Relaxed).node;
        let mut remaining = 0usize;

        // With exclusive access every node from head up to (not including)
        // tail holds an unpopped element.
        while current != tail {
            // SAFETY: nodes between head and tail are owned by the queue.
            let mut node = unsafe { Box::from_raw(current) };
            let data = *node.data.get_mut();
            debug_assert!(!data.is_null() && data != taken());
            // SAFETY: unpopped payload, boxed by its producer.
            unsafe { drop(Box::from_raw(data)) };
            remaining += 1;
            current = node.next.load(Ordering::Relaxed).node;
        }

        // SAFETY: the final sentinel is owned by the queue.
        let mut sentinel = unsafe { Box::from_raw(current) };
        debug_assert!(sentinel.data.get_mut().is_null());
        if remaining > 0 {
            debug!(remaining, "dropped queue with unpopped elements");
        }
    }
}

impl<T> fmt::Debug for LockFreeQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("LockFreeQueue { .. }")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    struct Counted(Arc<AtomicUsize>);

    impl Drop for Counted {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_fifo() {
        let q = LockFreeQueue::new();
        q.push('a');
        q.push('b');
        q.push('c');
        assert_eq!(q.pop(), Some('a'));
        assert_eq!(q.pop(), Some('b'));
        assert_eq!(q.pop(), Some('c'));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn test_is_empty() {
        let q = LockFreeQueue::new();
        assert!(q.is_empty());
        q.push(1);
        assert!(!q.is_empty());
        q.pop();
        assert!(q.is_empty());
    }

    #[test]
    fn test_sentinel_refcount_after_pop() {
        let q = LockFreeQueue::new();
        q.push(7u32);
        assert_eq!(q.pop(), Some(7));

        // The popped node is gone; the remaining node is the fresh sentinel,
        // still owned by both roles.
        let head = q.head.load(Ordering::SeqCst);
        let tail = q.tail.load(Ordering::SeqCst);
        assert_eq!(head.node, tail.node);
        let counts = unsafe { &(*head.node).count }.load();
        assert_eq!(counts.external_counters, 2);
        assert_eq!(counts.internal, 0);
    }

    #[test]
    fn test_panicking_constructor_leaves_queue_unchanged() {
        let q = LockFreeQueue::new();
        q.push(1);

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            q.push_with(|| -> i32 { panic!("constructor failed") });
        }));
        assert!(result.is_err());

        q.push(2);
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn test_try_push_with_error() {
        let q: LockFreeQueue<u32> = LockFreeQueue::new();
        assert_eq!(q.try_push_with(|| Err::<u32, _>("nope")), Err("nope"));
        assert!(q.is_empty());
        assert_eq!(q.try_push_with(|| Ok::<_, ()>(5)), Ok(()));
        assert_eq!(q.pop(), Some(5));
    }

    #[test]
    fn test_drop_releases_unpopped() {
        let drops = Arc::new(AtomicUsize::new(0));
        {
            let q = LockFreeQueue::new();
            for _ in 0..10 {
                q.push(Counted(drops.clone()));
            }
            for _ in 0..4 {
                drop(q.pop());
            }
            assert_eq!(drops.load(Ordering::Relaxed), 4);
        }
        assert_eq!(drops.load(Ordering::Relaxed), 10);
    }

    #[test]
    fn test_zero_sized_elements() {
        let q = LockFreeQueue::new();
        for _ in 0..3 {
            q.push(());
        }
        assert_eq!(q.pop(), Some(()));
        assert_eq!(q.pop(), Some(()));
        assert_eq!(q.pop(), Some(()));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn test_debug() {
        let q: LockFreeQueue<i32> = LockFreeQueue::default();
        assert_eq!(format!("{q:?}"), "LockFreeQueue { .. }");
    }
}
