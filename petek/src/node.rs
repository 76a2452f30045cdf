//! Queue nodes.

use crate::counted::AtomicCountedPtr;
use crate::refcount::NodeCount;
use crate::trace::trace;
use core::ptr;
use core::sync::atomic::AtomicPtr;

/// Payload value left behind by the consumer that took ownership.
///
/// Non-null, so a producer still holding a stale claim on an already popped
/// node cannot install into it. Never dereferenced; a static's address can
/// never collide with a `Box` allocation or a zero-sized dangling pointer.
static TAKEN_MARKER: u8 = 0;

#[inline]
pub(crate) fn taken<T>() -> *mut T {
    ptr::addr_of!(TAKEN_MARKER).cast_mut().cast::<T>()
}

/// A link in the queue chain.
///
/// Dropping a node never touches its payload; the payload is owned by
/// whoever took it out of `data`.
pub(crate) struct Node<T> {
    /// Null while the node is the insertion point, the boxed element once a
    /// producer wins it, [`taken`] once a consumer pops it.
    pub(crate) data: AtomicPtr<T>,
    pub(crate) count: NodeCount,
    pub(crate) next: AtomicCountedPtr<Node<T>>,
}

impl<T> Node<T> {
    pub(crate) fn new() -> Self {
        Self {
            data: AtomicPtr::new(ptr::null_mut()),
            count: NodeCount::new(),
            next: AtomicCountedPtr::null(),
        }
    }

    /// Deallocate a node whose reference count has reached zero.
    ///
    /// # Safety
    ///
    /// `node` must come from `Box::into_raw` and no thread may touch it
    /// afterwards.
    pub(crate) unsafe fn free(node: *mut Node<T>) {
        trace!(node = ?node, "reclaiming node");
        // SAFETY: caller guarantees unique ownership of a boxed node.
        unsafe { drop(Box::from_raw(node)) };
    }
}
