//! Two-lock queue.

use crossbeam_utils::CachePadded;
use std::fmt;
use std::ptr;
use std::sync::{Mutex, MutexGuard, PoisonError};

struct Node<T> {
    data: Option<T>,
    next: *mut Node<T>,
}

impl<T> Node<T> {
    fn dummy() -> *mut Self {
        Box::into_raw(Box::new(Self {
            data: None,
            next: ptr::null_mut(),
        }))
    }
}

/// An unbounded MPMC queue guarded by two mutexes.
///
/// Producers serialize on the tail lock, consumers on the head lock, so one
/// producer and one consumer never block each other. The chain always ends
/// in an empty dummy node: `push` fills the dummy and appends a fresh one,
/// which keeps head and tail from ever sharing a node the two sides could
/// both write.
///
/// ```
/// use petek_sync::TwoLockQueue;
///
/// let q = TwoLockQueue::new();
/// q.push(1);
/// q.push(2);
/// assert_eq!(q.pop(), Some(1));
/// assert_eq!(q.pop(), Some(2));
/// assert_eq!(q.pop(), None);
/// ```
pub struct TwoLockQueue<T> {
    head: CachePadded<Mutex<*mut Node<T>>>,
    tail: CachePadded<Mutex<*mut Node<T>>>,
}

unsafe impl<T: Send> Send for TwoLockQueue<T> {}
unsafe impl<T: Send> Sync for TwoLockQueue<T> {}

impl<T> Default for TwoLockQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

// Nothing user-supplied runs under either lock, so a poisoned lock still
// guards consistent state.
fn lock<P>(m: &Mutex<P>) -> MutexGuard<'_, P> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T> TwoLockQueue<T> {
    /// Creates an empty queue.
    pub fn new() -> TwoLockQueue<T> {
        let dummy = Node::dummy();
        TwoLockQueue {
            head: CachePadded::new(Mutex::new(dummy)),
            tail: CachePadded::new(Mutex::new(dummy)),
        }
    }

    /// Appends an element to the back of the queue.
    pub fn push(&self, value: T) {
        let new_dummy = Node::dummy();
        let mut tail = lock(&self.tail);
        // SAFETY: the tail node is only written under the tail lock, and no
        // consumer reads it until `tail` has moved past it.
        unsafe {
            (**tail).data = Some(value);
            (**tail).next = new_dummy;
        }
        *tail = new_dummy;
    }

    /// Removes the element at the front of the queue.
    pub fn pop(&self) -> Option<T> {
        let mut head = lock(&self.head);
        if *head == *lock(&self.tail) {
            return None;
        }

        // SAFETY: head differs from tail, so the producer that filled this
        // node released the tail lock we just took. We hold the head lock,
        // making us the node's only owner.
        let node = unsafe { Box::from_raw(*head) };
        *head = node.next;
        drop(head);
        node.data
    }

    /// Returns `true` if the queue was empty at the instant it was checked.
    pub fn is_empty(&self) -> bool {
        let head = lock(&self.head);
        *head == *lock(&self.tail)
    }
}

impl<T> Drop for TwoLockQueue<T> {
    fn drop(&mut self) {
        let mut current = *self.head.get_mut().unwrap_or_else(PoisonError::into_inner);
        while !current.is_null() {
            // SAFETY: exclusive access; every node in the chain is boxed.
            let node = unsafe { Box::from_raw(current) };
            current = node.next;
        }
    }
}

impl<T> fmt::Debug for TwoLockQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("TwoLockQueue { .. }")
    }
}
