//! # Allocator Context
//!
//! The shared allocator instance, handed explicitly to every subsystem that
//! allocates. Installing a context is the registration step; tearing it down
//! hands the allocator back once no one else holds it.

#![allow(unsafe_code)]

use std::cell::{Ref, RefCell, RefMut};
use std::ptr::NonNull;
use std::rc::Rc;

use crate::config::AllocatorConfig;
use crate::error::{AllocResult, ConfigResult};
use crate::memory::size_class::{AllocatorStats, SizeClassAllocator};

/// Shared handle to a [`SizeClassAllocator`].
///
/// Clones refer to the same allocator. Pools keep a clone, so the arena
/// backing their slots outlives every pool built on it.
///
/// # Thread Safety
///
/// Single-threaded: the context is neither `Send` nor `Sync`.
///
/// # Example
///
/// ```rust,ignore
/// use tessera_memory::{AllocatorContext, SizeClassAllocator};
///
/// let context = AllocatorContext::install(SizeClassAllocator::new(64 * 1024));
/// let ptr = context.allocate(48);
/// unsafe { context.free(ptr.as_ptr(), 48) };
/// assert_eq!(context.allocator().stats().classes[0].free, 1);
///
/// let allocator = context.teardown().unwrap();
/// assert_eq!(allocator.arena().used(), 64);
/// ```
#[derive(Clone)]
pub struct AllocatorContext {
    inner: Rc<RefCell<SizeClassAllocator>>,
}

impl AllocatorContext {
    /// Registers `allocator` as the shared instance.
    #[must_use]
    pub fn install(allocator: SizeClassAllocator) -> Self {
        Self {
            inner: Rc::new(RefCell::new(allocator)),
        }
    }

    /// Creates and registers an allocator with the given arena capacity.
    #[must_use]
    pub fn with_capacity(arena_capacity: usize) -> Self {
        Self::install(SizeClassAllocator::new(arena_capacity))
    }

    /// Creates and registers an allocator from configuration.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure of `config`.
    pub fn from_config(config: &AllocatorConfig) -> ConfigResult<Self> {
        SizeClassAllocator::with_config(config).map(Self::install)
    }

    /// Shared access to the registered allocator.
    ///
    /// # Panics
    ///
    /// Panics if the allocator is mutably borrowed.
    #[must_use]
    pub fn allocator(&self) -> Ref<'_, SizeClassAllocator> {
        self.inner.borrow()
    }

    /// Exclusive access to the registered allocator.
    ///
    /// # Panics
    ///
    /// Panics if the allocator is already borrowed.
    #[must_use]
    pub fn allocator_mut(&self) -> RefMut<'_, SizeClassAllocator> {
        self.inner.borrow_mut()
    }

    /// Allocates `size` bytes from the shared allocator.
    ///
    /// # Panics
    ///
    /// Terminates through [`fatal`](crate::fatal) on exhaustion, as
    /// [`SizeClassAllocator::allocate`].
    #[inline]
    pub fn allocate(&self, size: usize) -> NonNull<u8> {
        self.inner.borrow_mut().allocate(size)
    }

    /// Allocates `size` bytes, returning failure as a value.
    ///
    /// # Errors
    ///
    /// As [`SizeClassAllocator::try_allocate`].
    #[inline]
    pub fn try_allocate(&self, size: usize) -> AllocResult<NonNull<u8>> {
        self.inner.borrow_mut().try_allocate(size)
    }

    /// Returns a block to the shared allocator.
    ///
    /// # Safety
    ///
    /// As [`SizeClassAllocator::free`]: `ptr` must come from this context's
    /// allocator with the same `size`, and must not be used afterwards.
    #[inline]
    pub unsafe fn free(&self, ptr: *mut u8, size: usize) {
        // SAFETY: forwarded caller contract.
        unsafe { self.inner.borrow_mut().free(ptr, size) };
    }

    /// Snapshot of the shared allocator's usage.
    #[must_use]
    pub fn stats(&self) -> AllocatorStats {
        self.inner.borrow().stats()
    }

    /// Number of live clones of this context, pools included.
    #[must_use]
    pub fn holders(&self) -> usize {
        Rc::strong_count(&self.inner)
    }

    /// Returns true if both contexts share one allocator.
    #[must_use]
    pub fn same_allocator(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Ends the context's life and hands the allocator back.
    ///
    /// # Errors
    ///
    /// Returns the context unchanged while any other clone (for example a
    /// pool) is still alive.
    pub fn teardown(self) -> Result<SizeClassAllocator, Self> {
        Rc::try_unwrap(self.inner)
            .map(RefCell::into_inner)
            .map_err(|inner| Self { inner })
    }
}

impl std::fmt::Debug for AllocatorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AllocatorContext")
            .field("holders", &self.holders())
            .finish_non_exhaustive()
    }
}
