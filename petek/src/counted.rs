//! Counted pointers.
//!
//! A counted pointer pairs a node address with the number of external
//! references taken through the field it lives in. Both halves travel
//! through one 128-bit atomic so a CAS can never observe the address of one
//! publication together with the count of another.

use core::fmt;
use core::marker::PhantomData;
use core::ptr;
use core::sync::atomic::Ordering;
use portable_atomic::AtomicU128;

/// A node address and its external reference count, as a plain value.
///
/// Low 64 bits of the packed form hold the address, high 64 bits hold the
/// count.
pub(crate) struct CountedPtr<N> {
    pub(crate) node: *mut N,
    pub(crate) external_count: u64,
}

impl<N> CountedPtr<N> {
    #[inline]
    pub(crate) const fn new(node: *mut N, external_count: u64) -> Self {
        Self {
            node,
            external_count,
        }
    }

    #[inline]
    pub(crate) const fn null() -> Self {
        Self::new(ptr::null_mut(), 0)
    }

    #[inline]
    pub(crate) fn is_null(&self) -> bool {
        self.node.is_null()
    }

    /// Same node, one more external reference.
    #[inline]
    pub(crate) fn incremented(self) -> Self {
        Self::new(self.node, self.external_count + 1)
    }

    #[inline]
    fn pack(self) -> u128 {
        (self.node as usize as u64 as u128) | ((self.external_count as u128) << 64)
    }

    #[inline]
    fn unpack(raw: u128) -> Self {
        Self::new(raw as u64 as usize as *mut N, (raw >> 64) as u64)
    }
}

impl<N> Clone for CountedPtr<N> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<N> Copy for CountedPtr<N> {}

impl<N> PartialEq for CountedPtr<N> {
    fn eq(&self, other: &Self) -> bool {
        self.node == other.node && self.external_count == other.external_count
    }
}

impl<N> Eq for CountedPtr<N> {}

impl<N> fmt::Debug for CountedPtr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CountedPtr")
            .field("node", &self.node)
            .field("external_count", &self.external_count)
            .finish()
    }
}

/// An atomic cell holding a [`CountedPtr`].
#[repr(align(16))]
pub(crate) struct AtomicCountedPtr<N> {
    data: AtomicU128,
    _marker: PhantomData<*mut N>,
}

impl<N> AtomicCountedPtr<N> {
    pub(crate) fn new(value: CountedPtr<N>) -> Self {
        Self {
            data: AtomicU128::new(value.pack()),
            _marker: PhantomData,
        }
    }

    pub(crate) fn null() -> Self {
        Self::new(CountedPtr::null())
    }

    #[inline]
    pub(crate) fn load(&self, order: Ordering) -> CountedPtr<N> {
        CountedPtr::unpack(self.data.load(order))
    }

    #[inline]
    pub(crate) fn compare_exchange(
        &self,
        current: CountedPtr<N>,
        new: CountedPtr<N>,
        success: Ordering,
        failure: Ordering,
    ) -> Result<CountedPtr<N>, CountedPtr<N>> {
        self.data
            .compare_exchange(current.pack(), new.pack(), success, failure)
            .map(CountedPtr::unpack)
            .map_err(CountedPtr::unpack)
    }

    #[inline]
    pub(crate) fn compare_exchange_weak(
        &self,
        current: CountedPtr<N>,
        new: CountedPtr<N>,
        success: Ordering,
        failure: Ordering,
    ) -> Result<CountedPtr<N>, CountedPtr<N>> {
        self.data
            .compare_exchange_weak(current.pack(), new.pack(), success, failure)
            .map(CountedPtr::unpack)
            .map_err(CountedPtr::unpack)
    }

    /// Whether the 128-bit CAS is a native instruction here rather than a
    /// lock-based fallback.
    pub(crate) fn is_lock_free() -> bool {
        AtomicU128::is_lock_free()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_survives_high_bits() {
        let mut slot = 0u64;
        let node = &mut slot as *mut u64;
        let atomic = AtomicCountedPtr::new(CountedPtr::new(node, u64::MAX - 1));

        let loaded = atomic.load(Ordering::Relaxed);
        assert_eq!(loaded.node, node);
        assert_eq!(loaded.external_count, u64::MAX - 1);
        assert_eq!(loaded.incremented().external_count, u64::MAX);
    }

    #[test]
    fn test_cas_fails_on_stale_count() {
        let mut slot = 0u64;
        let node = &mut slot as *mut u64;
        let atomic = AtomicCountedPtr::new(CountedPtr::new(node, 1));

        // Same address, different count: must not be mistaken for the
        // current publication.
        let stale = CountedPtr::new(node, 2);
        let result = atomic.compare_exchange(
            stale,
            CountedPtr::null(),
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        assert_eq!(result, Err(CountedPtr::new(node, 1)));

        let current = atomic.load(Ordering::SeqCst);
        assert!(
            atomic
                .compare_exchange(
                    current,
                    current.incremented(),
                    Ordering::SeqCst,
                    Ordering::SeqCst
                )
                .is_ok()
        );
        assert_eq!(atomic.load(Ordering::SeqCst).external_count, 2);
    }

    #[test]
    fn test_null() {
        let atomic: AtomicCountedPtr<u64> = AtomicCountedPtr::null();
        let loaded = atomic.load(Ordering::Relaxed);
        assert!(loaded.is_null());
        assert_eq!(loaded.external_count, 0);
    }
}
