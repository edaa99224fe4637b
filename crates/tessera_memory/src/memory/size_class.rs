//! # Segregated Size-Class Allocator
//!
//! One [`Arena`] feeds a fixed set of size classes, each recycling its
//! blocks through its own [`FreeList`]. Requests larger than the largest
//! class bypass both and go to the general heap.
//!
//! ```text
//!   allocate(size)
//!        │
//!        ├── classify: smallest block_size > size
//!        │
//!        ├── class found ──► free list? ──yes──► pop ──┐
//!        │                       │                     ├──► zero-fill ──► ptr
//!        │                       └──no───► carve arena ┘
//!        │
//!        └── oversized ───► heap (not zeroed)
//! ```

#![allow(unsafe_code)]

use std::alloc::{self, Layout};
use std::mem::MaybeUninit;
use std::ptr::{self, NonNull};

use crate::config::{AllocatorConfig, DEFAULT_ARENA_CAPACITY, DEFAULT_SIZE_CLASSES};
use crate::error::{fatal, AllocError, AllocResult, ConfigResult};
use crate::memory::arena::{Arena, ARENA_ALIGN};
use crate::memory::free_list::FreeList;

/// Pointer-sized view of the start of a free block.
///
/// Blocks are larger than this; only the link prefix is ever touched while
/// the block sits on a free list.
type RawBlock = MaybeUninit<*mut u8>;

/// One size class: its block size and its recycled blocks.
#[derive(Debug)]
struct SizeClass {
    /// Exact size of every block in the class.
    block_size: usize,
    /// Blocks returned by callers, ready for reuse.
    free: FreeList<RawBlock>,
    /// Blocks carved from the arena so far.
    carved: usize,
}

impl SizeClass {
    const fn new(block_size: usize) -> Self {
        Self {
            block_size,
            free: FreeList::new(),
            carved: 0,
        }
    }
}

/// Usage of a single size class.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SizeClassStats {
    /// Block size of the class.
    pub block_size: usize,
    /// Blocks carved from the arena.
    pub carved: usize,
    /// Blocks currently waiting on the free list.
    pub free: usize,
}

impl SizeClassStats {
    /// Blocks currently held by callers.
    #[inline]
    #[must_use]
    pub const fn in_use(&self) -> usize {
        self.carved - self.free
    }
}

/// Point-in-time usage of a [`SizeClassAllocator`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AllocatorStats {
    /// Arena bytes consumed, alignment padding included.
    pub arena_used: usize,
    /// Arena capacity.
    pub arena_capacity: usize,
    /// Bytes currently held by oversized heap allocations.
    pub oversized_bytes: usize,
    /// Oversized allocations currently outstanding.
    pub oversized_count: usize,
    /// Per-class usage, in ascending block size.
    pub classes: Vec<SizeClassStats>,
}

/// Segregated size-class allocator.
///
/// Every in-class allocation is O(number of classes) to classify and O(1) to
/// serve. Blocks never return to the arena individually; freed blocks go to
/// the free list of their class and are handed out again, most recent first.
///
/// Any failure to serve a request is fatal. Use
/// [`SizeClassAllocator::try_allocate`] to receive the failure as a value
/// instead.
///
/// # Thread Safety
///
/// NOT thread-safe, and not `Send`. Synchronize externally.
///
/// # Example
///
/// ```rust,ignore
/// use tessera_memory::SizeClassAllocator;
///
/// let mut allocator = SizeClassAllocator::new(1024 * 1024);
/// let ptr = allocator.allocate(100);
/// assert_eq!(allocator.size_class_for(100), Some(128));
/// unsafe { allocator.free(ptr.as_ptr(), 100) };
/// assert_eq!(allocator.allocate(100), ptr);
/// ```
pub struct SizeClassAllocator {
    /// Backing storage for every in-class block.
    arena: Arena,
    /// Classes in ascending block size.
    classes: Vec<SizeClass>,
    /// Bytes outstanding on the oversized path. Diagnostic only.
    oversized_bytes: usize,
    /// Oversized allocations outstanding. Diagnostic only.
    oversized_count: usize,
}

impl SizeClassAllocator {
    /// Creates an allocator with the reference size classes.
    ///
    /// # Arguments
    ///
    /// * `arena_capacity` - Total arena size in bytes
    #[must_use]
    pub fn new(arena_capacity: usize) -> Self {
        Self::from_parts(arena_capacity, &DEFAULT_SIZE_CLASSES)
    }

    /// Creates an allocator from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure of `config`.
    pub fn with_config(config: &AllocatorConfig) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self::from_parts(config.arena_capacity, &config.size_classes))
    }

    fn from_parts(arena_capacity: usize, thresholds: &[usize]) -> Self {
        tracing::info!(
            arena_capacity,
            classes = thresholds.len(),
            largest_class = thresholds.last().copied().unwrap_or(0),
            "creating size-class allocator"
        );
        Self {
            arena: Arena::new(arena_capacity),
            classes: thresholds.iter().copied().map(SizeClass::new).collect(),
            oversized_bytes: 0,
            oversized_count: 0,
        }
    }

    /// Returns the index of the class serving `size`.
    ///
    /// A request equal to a threshold is promoted to the next class.
    #[inline]
    fn classify(&self, size: usize) -> Option<usize> {
        self.classes.iter().position(|class| class.block_size > size)
    }

    /// Returns the block size that serves `size`, or None if oversized.
    #[inline]
    #[must_use]
    pub fn size_class_for(&self, size: usize) -> Option<usize> {
        self.classify(size).map(|index| self.classes[index].block_size)
    }

    /// Returns true if `size` bypasses the size classes.
    #[inline]
    #[must_use]
    pub fn is_oversized(&self, size: usize) -> bool {
        self.classify(size).is_none()
    }

    /// Allocates `size` bytes.
    ///
    /// In-class blocks are zero-filled over their whole block size, whether
    /// fresh or recycled. Oversized blocks come from the heap unfilled.
    ///
    /// # Panics
    ///
    /// Terminates through [`fatal`] when the arena cannot grow the class or
    /// the heap refuses an oversized request.
    #[inline]
    pub fn allocate(&mut self, size: usize) -> NonNull<u8> {
        match self.try_allocate(size) {
            Ok(ptr) => ptr,
            Err(error) => fatal(error),
        }
    }

    /// Allocates `size` bytes, returning the unrecoverable failure instead of
    /// terminating.
    ///
    /// # Errors
    ///
    /// [`AllocError::ClassExhausted`] if the arena cannot grow the class,
    /// [`AllocError::HeapExhausted`] if the heap refuses an oversized request.
    pub fn try_allocate(&mut self, size: usize) -> AllocResult<NonNull<u8>> {
        let Some(index) = self.classify(size) else {
            return self.allocate_oversized(size);
        };

        let class = &mut self.classes[index];
        let block = match class.free.try_borrow() {
            Some(block) => block.cast::<u8>(),
            None => {
                let Some(block) = self.arena.try_allocate(class.block_size) else {
                    return Err(AllocError::ClassExhausted {
                        requested: size,
                        class_size: class.block_size,
                        used: self.arena.used(),
                        capacity: self.arena.capacity(),
                    });
                };
                class.carved += 1;
                tracing::trace!(
                    block_size = class.block_size,
                    carved = class.carved,
                    arena_used = self.arena.used(),
                    "size class grew"
                );
                block
            }
        };

        // SAFETY: `block` is exclusively ours and spans `block_size` bytes.
        unsafe { ptr::write_bytes(block.as_ptr(), 0, class.block_size) };
        Ok(block)
    }

    fn allocate_oversized(&mut self, size: usize) -> AllocResult<NonNull<u8>> {
        let layout = Self::oversized_layout(size)?;
        // SAFETY: oversized requests exceed the largest class, so `size > 0`.
        let raw = unsafe { alloc::alloc(layout) };
        let ptr = NonNull::new(raw).ok_or(AllocError::HeapExhausted { requested: size })?;

        self.oversized_bytes += size;
        self.oversized_count += 1;
        Ok(ptr)
    }

    fn oversized_layout(size: usize) -> AllocResult<Layout> {
        Layout::from_size_align(size, ARENA_ALIGN)
            .map_err(|_| AllocError::HeapExhausted { requested: size })
    }

    /// Returns a block to the allocator.
    ///
    /// In-class blocks are pushed onto their class's free list and are the
    /// next block handed out for that class. Oversized blocks are released
    /// to the heap.
    ///
    /// # Safety
    ///
    /// `ptr` must have come from this allocator's `allocate` with exactly the
    /// same `size`, must not have been freed since, and must not be used
    /// afterwards.
    ///
    /// # Panics
    ///
    /// Terminates through [`fatal`] with [`AllocError::NullPointer`] if `ptr`
    /// is null.
    pub unsafe fn free(&mut self, ptr: *mut u8, size: usize) {
        if ptr.is_null() {
            fatal(AllocError::NullPointer { size });
        }

        match self.classify(size) {
            Some(index) => {
                // SAFETY: the caller returns a block of this class that no one
                // else is using, so it may carry our free-list link.
                unsafe { self.classes[index].free.recycle(ptr.cast::<RawBlock>()) };
            }
            None => {
                // The layout was valid when the block was allocated.
                let Ok(layout) = Self::oversized_layout(size) else {
                    fatal(AllocError::HeapExhausted { requested: size });
                };
                // SAFETY: the caller guarantees `ptr` came from
                // `allocate_oversized` with this size, hence this layout.
                unsafe { alloc::dealloc(ptr, layout) };
                self.oversized_bytes = self.oversized_bytes.saturating_sub(size);
                self.oversized_count = self.oversized_count.saturating_sub(1);
            }
        }
    }

    /// Bytes currently held by oversized heap allocations.
    #[inline]
    #[must_use]
    pub const fn oversized_bytes(&self) -> usize {
        self.oversized_bytes
    }

    /// The arena backing every in-class block.
    #[inline]
    #[must_use]
    pub const fn arena(&self) -> &Arena {
        &self.arena
    }

    /// Configured thresholds in ascending order.
    pub fn size_classes(&self) -> impl Iterator<Item = usize> + '_ {
        self.classes.iter().map(|class| class.block_size)
    }

    /// Snapshot of arena, class and oversized usage.
    #[must_use]
    pub fn stats(&self) -> AllocatorStats {
        AllocatorStats {
            arena_used: self.arena.used(),
            arena_capacity: self.arena.capacity(),
            oversized_bytes: self.oversized_bytes,
            oversized_count: self.oversized_count,
            classes: self
                .classes
                .iter()
                .map(|class| SizeClassStats {
                    block_size: class.block_size,
                    carved: class.carved,
                    free: class.free.len(),
                })
                .collect(),
        }
    }

    /// Rewinds the arena and empties every free list.
    ///
    /// Oversized allocations are unaffected.
    ///
    /// # Safety
    ///
    /// Every in-class block handed out so far becomes invalid, including
    /// blocks held by pools built on this allocator. None of them may be used
    /// or freed afterwards.
    pub unsafe fn reset(&mut self) {
        tracing::info!(arena_used = self.arena.used(), "resetting size-class allocator");
        self.arena.reset();
        for class in &mut self.classes {
            class.free.clear();
            class.carved = 0;
        }
    }
}

impl Default for SizeClassAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_ARENA_CAPACITY)
    }
}

impl Drop for SizeClassAllocator {
    fn drop(&mut self) {
        if self.oversized_count > 0 {
            tracing::warn!(
                bytes = self.oversized_bytes,
                count = self.oversized_count,
                "oversized allocations leaked at allocator teardown"
            );
        }
    }
}

impl std::fmt::Debug for SizeClassAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SizeClassAllocator")
            .field("arena", &self.arena)
            .field("classes", &self.classes)
            .field("oversized_bytes", &self.oversized_bytes)
            .finish()
    }
}
