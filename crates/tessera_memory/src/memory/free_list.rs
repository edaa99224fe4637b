//! # Intrusive Free List
//!
//! A LIFO stack of reclaimed same-size blocks. The link to the next free
//! block is stored inside the free block itself, so recycling costs no extra
//! memory.

#![allow(unsafe_code)]

use std::marker::PhantomData;
use std::mem;
use std::ptr::NonNull;

use crate::error::{fatal, AllocError};

/// Link overlaid on the first bytes of every free item.
type Link<T> = Option<NonNull<T>>;

/// An intrusive singly-linked stack of free items of type `T`.
///
/// The list never allocates. It only hands back items that were previously
/// recycled into it, and never owns or frees the underlying memory.
///
/// `T` must be at least as large as a pointer. This is checked when the list
/// type is instantiated, so the following does not build:
///
/// ```compile_fail
/// use tessera_memory::FreeList;
///
/// let list: FreeList<u8> = FreeList::new();
/// # drop(list);
/// ```
pub struct FreeList<T> {
    /// Most recently recycled item.
    head: Link<T>,
    /// Number of items on the list.
    len: usize,
    /// Holds raw item pointers; not `Send`.
    _marker: PhantomData<*mut T>,
}

impl<T> FreeList<T> {
    /// Evaluated per `T`; fails the build if a link does not fit in `T`.
    const LINK_FITS: () = assert!(
        mem::size_of::<T>() >= mem::size_of::<Link<T>>(),
        "free list items must be at least pointer-sized"
    );

    /// Creates an empty free list.
    #[must_use]
    pub const fn new() -> Self {
        let () = Self::LINK_FITS;
        Self {
            head: None,
            len: 0,
            _marker: PhantomData,
        }
    }

    /// Seeds a free list from a contiguous run of `count` items.
    ///
    /// Items are recycled in index order, so the last item is borrowed first.
    ///
    /// # Safety
    ///
    /// `base` must be valid for writes of `count` consecutive `T`s, and that
    /// memory must stay valid and otherwise unused while the items are on
    /// the list or borrowed from it.
    ///
    /// # Panics
    ///
    /// Terminates through [`fatal`] if `base` is null and `count > 0`.
    pub unsafe fn from_raw_parts(base: *mut T, count: usize) -> Self {
        let mut list = Self::new();
        for index in 0..count {
            // SAFETY: the caller guarantees `count` items starting at `base`.
            unsafe { list.recycle(base.add(index)) };
        }
        list
    }

    /// Returns true if an item can be borrowed without failing.
    #[inline]
    #[must_use]
    pub const fn has_free_item(&self) -> bool {
        self.head.is_some()
    }

    /// Number of items on the list.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the list holds no items.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Pops the most recently recycled item.
    ///
    /// The returned memory still holds the stale link in its first bytes.
    ///
    /// # Panics
    ///
    /// Terminates through [`fatal`] with [`AllocError::FreeListEmpty`] if the
    /// list is empty. Check [`FreeList::has_free_item`] first to avoid that.
    #[inline]
    pub fn borrow(&mut self) -> NonNull<T> {
        match self.try_borrow() {
            Some(item) => item,
            None => fatal(AllocError::FreeListEmpty),
        }
    }

    /// Pops the most recently recycled item, or None if the list is empty.
    #[inline]
    pub fn try_borrow(&mut self) -> Option<NonNull<T>> {
        let item = self.head?;
        // SAFETY: `item` was pushed by `recycle`, whose contract keeps it
        // valid and untouched while listed; its first bytes hold our link.
        self.head = unsafe { item.as_ptr().cast::<Link<T>>().read_unaligned() };
        self.len -= 1;
        Some(item)
    }

    /// Pushes `item` onto the head of the list.
    ///
    /// # Safety
    ///
    /// `item` must be valid for writes of `size_of::<T>()` bytes, must not
    /// already be on any free list, and must not be used by anyone else
    /// until it is borrowed back.
    ///
    /// # Panics
    ///
    /// Terminates through [`fatal`] with [`AllocError::NullPointer`] if
    /// `item` is null.
    #[inline]
    pub unsafe fn recycle(&mut self, item: *mut T) {
        let Some(item) = NonNull::new(item) else {
            fatal(AllocError::NullPointer {
                size: mem::size_of::<T>(),
            });
        };
        // SAFETY: the caller hands us exclusive use of `item`, which is at
        // least as large as a link (checked by `LINK_FITS`).
        unsafe { item.as_ptr().cast::<Link<T>>().write_unaligned(self.head) };
        self.head = Some(item);
        self.len += 1;
    }

    /// Forgets every item on the list without touching their memory.
    pub fn clear(&mut self) {
        self.head = None;
        self.len = 0;
    }
}

impl<T> Default for FreeList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for FreeList<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FreeList").field("len", &self.len).finish()
    }
}
