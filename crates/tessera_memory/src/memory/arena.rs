//! # Arena Allocator
//!
//! A bump allocator for blocks that are only ever freed all at once.

#![allow(unsafe_code)]

use std::alloc::{self, Layout};
use std::ptr::NonNull;

use crate::error::{fatal, AllocError, AllocResult};

/// Alignment of every block carved from an arena.
pub const ARENA_ALIGN: usize = 32;

/// A fixed-capacity bump-pointer arena.
///
/// Allocation aligns the cursor to [`ARENA_ALIGN`] and advances it. Memory is
/// reclaimed only by [`Arena::reset`] or by dropping the arena.
///
/// # Thread Safety
///
/// This arena is NOT thread-safe. Use one arena per thread.
///
/// # Example
///
/// ```rust,ignore
/// use tessera_memory::Arena;
///
/// let mut arena = Arena::new(1024);
/// let a = arena.try_allocate(10).unwrap();
/// let b = arena.try_allocate(10).unwrap();
/// assert_eq!(b.as_ptr() as usize - a.as_ptr() as usize, 32);
/// assert_eq!(arena.used(), 42);
/// ```
pub struct Arena {
    /// Start of the backing buffer.
    buffer: NonNull<u8>,
    /// Layout the buffer was allocated with.
    layout: Layout,
    /// Current allocation offset.
    cursor: usize,
    /// Total capacity in bytes.
    capacity: usize,
}

impl Arena {
    /// Creates a new arena with the specified capacity in bytes.
    ///
    /// The buffer is allocated once, zeroed and aligned to [`ARENA_ALIGN`].
    ///
    /// # Arguments
    ///
    /// * `capacity` - Total size in bytes
    ///
    /// # Panics
    ///
    /// Terminates through [`fatal`] if the heap cannot provide the buffer.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        // A zero-sized layout cannot be allocated; reserve one aligned block.
        let layout = Layout::from_size_align(capacity.max(ARENA_ALIGN), ARENA_ALIGN)
            .unwrap_or_else(|_| fatal(AllocError::HeapExhausted { requested: capacity }));

        // SAFETY: `layout` has a non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let Some(buffer) = NonNull::new(raw) else {
            fatal(AllocError::HeapExhausted { requested: capacity });
        };

        Self {
            buffer,
            layout,
            cursor: 0,
            capacity,
        }
    }

    /// Returns the total capacity in bytes.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the current used space in bytes, alignment padding included.
    #[inline]
    #[must_use]
    pub const fn used(&self) -> usize {
        self.cursor
    }

    /// Returns the remaining free space in bytes.
    #[inline]
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.capacity - self.cursor
    }

    /// Returns true if `ptr` points into the arena's buffer.
    #[must_use]
    pub fn contains(&self, ptr: *const u8) -> bool {
        let start = self.buffer.as_ptr() as usize;
        let addr = ptr as usize;
        addr >= start && addr < start + self.capacity
    }

    /// Carves `size` bytes at the next 32-byte boundary.
    ///
    /// This is a **O(1)** operation. On failure nothing changes, so the
    /// caller may recover.
    ///
    /// # Arguments
    ///
    /// * `size` - Number of bytes
    ///
    /// # Returns
    ///
    /// A pointer to the block, or None if the arena is out of space.
    pub fn try_allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        let aligned = self.cursor.checked_add(ARENA_ALIGN - 1)? & !(ARENA_ALIGN - 1);
        let end = aligned.checked_add(size)?;
        if end > self.capacity {
            return None;
        }

        self.cursor = end;
        // SAFETY: `aligned <= end <= capacity`, so the offset stays within
        // (or one past) the buffer allocation.
        Some(unsafe { NonNull::new_unchecked(self.buffer.as_ptr().add(aligned)) })
    }

    /// Carves `size` bytes, escalating failure to a fatal error.
    ///
    /// # Panics
    ///
    /// Terminates through [`fatal`] with [`AllocError::ArenaExhausted`].
    pub fn allocate_or_fatal(&mut self, size: usize) -> NonNull<u8> {
        match self.allocate_checked(size) {
            Ok(ptr) => ptr,
            Err(error) => fatal(error),
        }
    }

    /// Carves `size` bytes, describing a failure as [`AllocError`].
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::ArenaExhausted`] if the block does not fit.
    pub fn allocate_checked(&mut self, size: usize) -> AllocResult<NonNull<u8>> {
        self.try_allocate(size).ok_or(AllocError::ArenaExhausted {
            requested: size,
            used: self.cursor,
            capacity: self.capacity,
        })
    }

    /// Resets the arena, invalidating all previous allocations.
    ///
    /// No memory is freed or reallocated. Previously returned pointers must
    /// not be used; nothing here detects it.
    #[inline]
    pub fn reset(&mut self) {
        self.cursor = 0;
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        // SAFETY: `buffer` was allocated in `new` with exactly `layout`.
        unsafe { alloc::dealloc(self.buffer.as_ptr(), self.layout) };
    }
}

impl std::fmt::Debug for Arena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arena")
            .field("used", &self.cursor)
            .field("capacity", &self.capacity)
            .finish()
    }
}
