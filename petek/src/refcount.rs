//! Split reference counting.
//!
//! Every node carries two kinds of counts:
//!
//! - **external** counts live in the counted pointers (`head`, `tail`,
//!   `next`) that address the node. A thread bumps one with
//!   [`increase_ref`] before dereferencing the node.
//! - **internal** counts live in the node itself, packed together with the
//!   number of roles (`head`-reachable, `tail`-reachable) that still hold the
//!   node.
//!
//! The thread that moves `head` or `tail` off a node folds the external count
//! it swapped out into the internal count ([`Claim::reconcile`]). Every other
//! thread that bumped the external count gives its reference back by
//! decrementing the internal count ([`Claim`]'s drop). When both halves reach
//! zero the node is unreachable and the CAS that observed it frees the node.

use crate::counted::{AtomicCountedPtr, CountedPtr};
use crate::node::Node;
use core::marker::PhantomData;
use core::mem;
use core::sync::atomic::{AtomicU64, Ordering};

const EXTERNAL_BITS: u32 = 2;
const EXTERNAL_MASK: u64 = (1 << EXTERNAL_BITS) - 1;

/// A fresh node is pre-owned by both the head role and the tail role.
const INITIAL_EXTERNAL_COUNTERS: u64 = 2;

/// Decoded contents of a [`NodeCount`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Counts {
    /// May go negative while losers release before the winner reconciles.
    pub(crate) internal: i64,
    pub(crate) external_counters: u64,
}

impl Counts {
    #[inline]
    fn pack(self) -> u64 {
        debug_assert!(self.external_counters <= EXTERNAL_MASK);
        ((self.internal as u64) << EXTERNAL_BITS) | self.external_counters
    }

    #[inline]
    fn unpack(word: u64) -> Self {
        Self {
            internal: (word as i64) >> EXTERNAL_BITS,
            external_counters: word & EXTERNAL_MASK,
        }
    }

    #[inline]
    pub(crate) fn is_zero(self) -> bool {
        self.internal == 0 && self.external_counters == 0
    }
}

/// `(internal: i62, external_counters: u2)` in one `AtomicU64`.
///
/// The low two bits hold the external counters, the upper 62 bits hold the
/// two's-complement internal count.
pub(crate) struct NodeCount {
    word: AtomicU64,
}

impl NodeCount {
    pub(crate) const fn new() -> Self {
        Self {
            word: AtomicU64::new(INITIAL_EXTERNAL_COUNTERS),
        }
    }

    #[cfg(test)]
    pub(crate) fn load(&self) -> Counts {
        Counts::unpack(self.word.load(Ordering::Acquire))
    }

    /// Drop one internal reference. Returns the counts after the update.
    pub(crate) fn release_one(&self) -> Counts {
        self.update(|c| Counts {
            internal: c.internal - 1,
            ..c
        })
    }

    /// Retire one role, crediting the `external_count - 2` references the
    /// other claimants still have to give back.
    pub(crate) fn retire_role(&self, external_count: u64) -> Counts {
        let credit = external_count as i64 - 2;
        self.update(|c| {
            debug_assert!(c.external_counters > 0, "role retired twice");
            Counts {
                internal: c.internal + credit,
                external_counters: c.external_counters - 1,
            }
        })
    }

    fn update(&self, f: impl Fn(Counts) -> Counts) -> Counts {
        let mut current = self.word.load(Ordering::Relaxed);
        loop {
            let next = f(Counts::unpack(current));
            match self.word.compare_exchange_weak(
                current,
                next.pack(),
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }
}

/// Register interest in the node `field` currently addresses.
///
/// `current` is the caller's latest view of `field`; it is refreshed on every
/// failed CAS until the increment lands.
pub(crate) fn increase_ref<T>(
    field: &AtomicCountedPtr<Node<T>>,
    mut current: CountedPtr<Node<T>>,
) -> Claim<'_, T> {
    loop {
        let bumped = current.incremented();
        match field.compare_exchange(current, bumped, Ordering::SeqCst, Ordering::SeqCst) {
            Ok(_) => {
                debug_assert!(!bumped.is_null());
                return Claim {
                    ptr: bumped,
                    _field: PhantomData,
                };
            }
            Err(actual) => current = actual,
        }
    }
}

/// One thread's external reference to a node.
///
/// Keeps the node alive. Dropping the claim gives the reference back;
/// [`Claim::reconcile`] instead retires the role the claimant just moved off
/// the node.
pub(crate) struct Claim<'a, T> {
    ptr: CountedPtr<Node<T>>,
    _field: PhantomData<&'a AtomicCountedPtr<Node<T>>>,
}

impl<T> Claim<'_, T> {
    /// The counted pointer as published after our increment.
    #[inline]
    pub(crate) fn counted(&self) -> CountedPtr<Node<T>> {
        self.ptr
    }

    #[inline]
    pub(crate) fn node_ptr(&self) -> *mut Node<T> {
        self.ptr.node
    }

    #[inline]
    pub(crate) fn node(&self) -> &Node<T> {
        // SAFETY: our external reference keeps the node allocated.
        unsafe { &*self.ptr.node }
    }

    /// Retire the role using the counted pointer this claimant swapped out of
    /// `head` or `tail`.
    pub(crate) fn reconcile(self) {
        let ptr = self.ptr;
        self.reconcile_as(ptr);
    }

    /// Like [`Claim::reconcile`], for callers whose successful CAS replaced a
    /// newer publication of the same node than the one they claimed.
    pub(crate) fn reconcile_as(self, observed: CountedPtr<Node<T>>) {
        debug_assert_eq!(observed.node, self.ptr.node);
        mem::forget(self);

        let node = observed.node;
        // SAFETY: the role being retired still pins the node.
        let counts = unsafe { &(*node).count }.retire_role(observed.external_count);
        if counts.is_zero() {
            // SAFETY: the count reached zero exactly here; nobody else holds it.
            unsafe { Node::free(node) };
        }
    }
}

impl<T> Drop for Claim<'_, T> {
    fn drop(&mut self) {
        let node = self.ptr.node;
        // SAFETY: our own reference keeps the node alive until this update.
        let counts = unsafe { &(*node).count }.release_one();
        if counts.is_zero() {
            // SAFETY: the count reached zero exactly here; nobody else holds it.
            unsafe { Node::free(node) };
        }
    }
}
