//! # Object Pool
//!
//! Typed pools for objects that are frequently borrowed and released.
//! Storage comes from the shared [`AllocatorContext`]; released slots are kept
//! on the pool's own free list and reused first.
//!
//! Each slot carries a generation that is bumped on release. A handle copy
//! that outlived its object is rejected with [`PoolError::StaleHandle`]
//! rather than aliasing whatever took the slot. A slot whose generation
//! reaches `u32::MAX` is retired instead of recycled, so generations never
//! wrap.

#![allow(unsafe_code)]

use std::cell::{Cell, RefCell, UnsafeCell};
use std::marker::PhantomData;
use std::mem::{self, ManuallyDrop};
use std::ptr::{self, NonNull};

use crate::error::{PoolError, PoolResult};
use crate::memory::arena::ARENA_ALIGN;
use crate::memory::context::AllocatorContext;
use crate::memory::free_list::FreeList;

/// Access state of an idle slot.
const IDLE: isize = 0;
/// Access state while a `with_mut` closure runs.
const EXCLUSIVE: isize = -1;
/// Generation of a slot that has used up its counter. No handle is ever
/// issued with it, and the slot is never reused.
const RETIRED: u32 = u32::MAX;

/// A slot holds either the free-list link or the live value.
///
/// `repr(C)` keeps both at offset zero, so the link overlaid by
/// [`FreeList`] never touches the generation or access fields.
#[repr(C)]
union SlotBody<T> {
    _link: *mut u8,
    value: ManuallyDrop<T>,
}

#[repr(C)]
struct Slot<T> {
    body: UnsafeCell<SlotBody<T>>,
    generation: Cell<u32>,
    access: Cell<isize>,
}

impl<T> Slot<T> {
    fn occupied(value: T, generation: u32) -> Self {
        Self {
            body: UnsafeCell::new(SlotBody {
                value: ManuallyDrop::new(value),
            }),
            generation: Cell::new(generation),
            access: Cell::new(IDLE),
        }
    }
}

/// Restores a slot's access state when a `with` / `with_mut` closure ends,
/// even by unwinding.
struct AccessGuard<'a> {
    access: &'a Cell<isize>,
}

impl Drop for AccessGuard<'_> {
    fn drop(&mut self) {
        let state = self.access.get();
        self.access
            .set(if state == EXCLUSIVE { IDLE } else { state - 1 });
    }
}

/// A pool of `T` objects backed by the shared allocator.
///
/// Borrowing and releasing are **O(1)**. Slots are never returned to the
/// allocator while the pool lives; dropping the pool hands its free slots
/// back.
///
/// # Thread Safety
///
/// This pool is NOT thread-safe. Use one pool per thread.
///
/// # Example
///
/// ```rust,ignore
/// use tessera_memory::{AllocatorContext, Pool};
///
/// #[derive(Default)]
/// struct Particle { x: f32, y: f32, life: f32 }
///
/// let context = AllocatorContext::with_capacity(64 * 1024);
/// let pool: Pool<Particle> = Pool::new(&context);
///
/// let mut handle = pool.borrow();
/// handle.with_mut(|p| p.life = 1.0).unwrap();
/// assert_eq!(handle.with(|p| p.life), Ok(1.0));
///
/// handle.release().unwrap();
/// assert!(handle.is_null());
/// ```
pub struct Pool<T> {
    /// Allocator that supplies fresh slots.
    context: AllocatorContext,
    /// Released slots, most recent first.
    free: RefCell<FreeList<Slot<T>>>,
    /// Slots at [`RETIRED`], held until the pool drops.
    retired: RefCell<FreeList<Slot<T>>>,
    /// Objects currently borrowed.
    live: Cell<usize>,
    /// Slots obtained from the allocator.
    slots: Cell<usize>,
    /// The pool drops `T`s.
    _owns: PhantomData<T>,
}

impl<T> Pool<T> {
    /// Bytes requested from the allocator per slot.
    pub const SLOT_SIZE: usize = mem::size_of::<Slot<T>>();

    /// Fails the build for types the allocator cannot align.
    const SLOT_ALIGN_FITS: () = assert!(
        mem::align_of::<Slot<T>>() <= ARENA_ALIGN,
        "pooled types must not require more than 32-byte alignment"
    );

    /// Creates an empty pool drawing from `context`.
    #[must_use]
    pub fn new(context: &AllocatorContext) -> Self {
        let () = Self::SLOT_ALIGN_FITS;
        Self {
            context: context.clone(),
            free: RefCell::new(FreeList::new()),
            retired: RefCell::new(FreeList::new()),
            live: Cell::new(0),
            slots: Cell::new(0),
            _owns: PhantomData,
        }
    }

    /// Creates a pool with `count` slots already on its free list.
    #[must_use]
    pub fn with_reserved(context: &AllocatorContext, count: usize) -> Self {
        let pool = Self::new(context);
        pool.reserve(count);
        pool
    }

    /// Pulls `count` fresh slots from the allocator onto the free list, so
    /// the next `count` borrows do not touch the allocator.
    ///
    /// # Panics
    ///
    /// Terminates through [`fatal`](crate::fatal) if the allocator is
    /// exhausted.
    pub fn reserve(&self, count: usize) {
        for _ in 0..count {
            let slot = self.fresh_slot();
            // SAFETY: `slot` is a fresh, exclusively owned block of
            // `SLOT_SIZE` bytes.
            unsafe { self.free.borrow_mut().recycle(slot.as_ptr()) };
        }
    }

    /// Borrows a default-constructed object.
    ///
    /// # Panics
    ///
    /// Terminates through [`fatal`](crate::fatal) if a fresh slot is needed
    /// and the allocator is exhausted.
    pub fn borrow(&self) -> Handle<'_, T>
    where
        T: Default,
    {
        self.borrow_with(T::default())
    }

    /// Borrows a slot initialised with `value`.
    ///
    /// # Panics
    ///
    /// As [`Pool::borrow`].
    pub fn borrow_with(&self, value: T) -> Handle<'_, T> {
        let recycled = self.free.borrow_mut().try_borrow();
        let (slot, generation) = match recycled {
            // SAFETY: released slots keep their generation outside the body,
            // which is the only part the free-list link overwrites.
            Some(slot) => (slot, unsafe { (*slot.as_ptr()).generation.get() }),
            None => (self.fresh_slot(), 0),
        };

        // SAFETY: the slot is exclusively ours and holds no live value.
        unsafe { slot.as_ptr().write(Slot::occupied(value, generation)) };
        self.live.set(self.live.get() + 1);

        Handle {
            pool: self,
            slot: Some(slot),
            generation,
        }
    }

    /// Number of objects currently borrowed.
    #[inline]
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.live.get()
    }

    /// Number of released slots ready for reuse.
    #[inline]
    #[must_use]
    pub fn free_count(&self) -> usize {
        self.free.borrow().len()
    }

    /// Number of slots taken out of service after exhausting their
    /// generations.
    #[inline]
    #[must_use]
    pub fn retired_count(&self) -> usize {
        self.retired.borrow().len()
    }

    /// Number of slots this pool has obtained from the allocator.
    #[inline]
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.slots.get()
    }

    /// The allocator context this pool draws from.
    #[must_use]
    pub const fn context(&self) -> &AllocatorContext {
        &self.context
    }

    fn fresh_slot(&self) -> NonNull<Slot<T>> {
        let slot = self.context.allocate(Self::SLOT_SIZE).cast::<Slot<T>>();
        // SAFETY: fresh, exclusive block of `SLOT_SIZE` bytes, aligned to at
        // least `ARENA_ALIGN`.
        unsafe {
            ptr::addr_of_mut!((*slot.as_ptr()).generation).write(Cell::new(0));
            ptr::addr_of_mut!((*slot.as_ptr()).access).write(Cell::new(IDLE));
        }
        self.slots.set(self.slots.get() + 1);
        slot
    }

    /// Puts a slot whose value has been moved out back on the free list,
    /// or on the retired list once `generation` is [`RETIRED`].
    ///
    /// # Safety
    ///
    /// `slot` belongs to this pool, holds no live value and is referenced by
    /// no live handle generation.
    unsafe fn recycle_slot(&self, slot: NonNull<Slot<T>>, generation: u32) {
        let list = if generation == RETIRED {
            tracing::debug!(slot_size = Self::SLOT_SIZE, "pool slot retired");
            &self.retired
        } else {
            &self.free
        };
        // SAFETY: forwarded caller contract.
        unsafe { list.borrow_mut().recycle(slot.as_ptr()) };
        self.live.set(self.live.get() - 1);
    }
}

impl<T> Drop for Pool<T> {
    fn drop(&mut self) {
        let live = self.live.get();
        if live > 0 {
            tracing::warn!(
                live,
                slot_size = Self::SLOT_SIZE,
                "pool dropped with unreleased objects; leaking them"
            );
        }

        for list in [self.free.get_mut(), self.retired.get_mut()] {
            while let Some(slot) = list.try_borrow() {
                // SAFETY: every listed slot came from `context` with
                // `SLOT_SIZE` and no handle can outlive the pool.
                unsafe { self.context.free(slot.as_ptr().cast::<u8>(), Self::SLOT_SIZE) };
            }
        }
    }
}

impl<T> std::fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("slot_size", &Self::SLOT_SIZE)
            .field("live", &self.live.get())
            .field("slots", &self.slots.get())
            .field("retired", &self.retired.borrow().len())
            .finish_non_exhaustive()
    }
}

/// Handle to an object borrowed from a [`Pool`].
///
/// Copies alias the same object. Exactly one copy should call
/// [`Handle::release`]; after that the other copies are stale and every
/// access through them fails with [`PoolError::StaleHandle`].
#[must_use = "an unreleased handle leaks its object until the pool is dropped"]
pub struct Handle<'p, T> {
    /// Owning pool.
    pool: &'p Pool<T>,
    /// None once released through this handle.
    slot: Option<NonNull<Slot<T>>>,
    /// Slot generation at borrow time.
    generation: u32,
}

impl<'p, T> Handle<'p, T> {
    /// Returns true if the handle does not reference an object.
    #[inline]
    #[must_use]
    pub const fn is_null(&self) -> bool {
        self.slot.is_none()
    }

    /// Returns true if the object is still alive for this handle.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live_slot().is_ok()
    }

    /// Generation of the slot when this handle was issued.
    #[inline]
    #[must_use]
    pub const fn generation(&self) -> u32 {
        self.generation
    }

    /// Address of the object's storage, or None for a null handle.
    #[inline]
    #[must_use]
    pub fn address(&self) -> Option<NonNull<T>> {
        // The value sits at offset zero of its slot.
        self.slot.map(NonNull::cast)
    }

    /// The pool that issued this handle.
    #[must_use]
    pub const fn pool(&self) -> &'p Pool<T> {
        self.pool
    }

    fn live_slot(&self) -> PoolResult<&'p Slot<T>> {
        let slot = self.slot.ok_or(PoolError::NullHandle)?;
        // SAFETY: slots stay allocated for the pool's lifetime `'p`, and
        // the generation and access fields are never overlaid.
        let slot = unsafe { &*slot.as_ptr() };
        let current = slot.generation.get();
        if current == self.generation {
            Ok(slot)
        } else {
            Err(PoolError::StaleHandle {
                handle: self.generation,
                slot: current,
            })
        }
    }

    /// Runs `f` with shared access to the object.
    ///
    /// # Errors
    ///
    /// [`PoolError::NullHandle`], [`PoolError::StaleHandle`], or
    /// [`PoolError::SlotBusy`] if a `with_mut` on this object is running.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> PoolResult<R> {
        let slot = self.live_slot()?;
        let state = slot.access.get();
        if state == EXCLUSIVE {
            return Err(PoolError::SlotBusy);
        }
        slot.access.set(state + 1);
        let _guard = AccessGuard {
            access: &slot.access,
        };

        // SAFETY: the generation matches, so the body holds a live value,
        // and the access state rules out a concurrent `&mut`.
        let value: &T = unsafe { &(*slot.body.get()).value };
        Ok(f(value))
    }

    /// Runs `f` with exclusive access to the object.
    ///
    /// # Errors
    ///
    /// [`PoolError::NullHandle`], [`PoolError::StaleHandle`], or
    /// [`PoolError::SlotBusy`] if any other access to this object is running.
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> PoolResult<R> {
        let slot = self.live_slot()?;
        if slot.access.get() != IDLE {
            return Err(PoolError::SlotBusy);
        }
        slot.access.set(EXCLUSIVE);
        let _guard = AccessGuard {
            access: &slot.access,
        };

        // SAFETY: the generation matches and no other access is running.
        let value: &mut T = unsafe { &mut (*slot.body.get()).value };
        Ok(f(value))
    }

    /// Destroys the object and returns its slot to the pool.
    ///
    /// Releasing a null handle is a no-op. After a successful release this
    /// handle is null and every copy of it is stale.
    ///
    /// # Errors
    ///
    /// [`PoolError::StaleHandle`] if another copy already released the
    /// object, [`PoolError::SlotBusy`] if a `with` / `with_mut` on it is
    /// running.
    pub fn release(&mut self) -> PoolResult<()> {
        let Some(ptr) = self.slot else {
            return Ok(());
        };
        let slot = self.live_slot()?;
        if slot.access.get() != IDLE {
            return Err(PoolError::SlotBusy);
        }

        // Issued generations are below `RETIRED`, so this cannot overflow.
        let next = self.generation + 1;
        slot.generation.set(next);
        // SAFETY: the generation matched, so the value is live; bumping the
        // generation above makes every copy stale before the value moves.
        let value = unsafe { ManuallyDrop::take(&mut (*slot.body.get()).value) };
        self.slot = None;

        // SAFETY: the slot's value was moved out and its generation bumped.
        unsafe { self.pool.recycle_slot(ptr, next) };
        // Dropped last: a destructor that borrows from this pool sees a
        // consistent free list.
        drop(value);
        Ok(())
    }
}

impl<T> Clone for Handle<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<'_, T> {}

impl<T> PartialEq for Handle<'_, T> {
    fn eq(&self, other: &Self) -> bool {
        ptr::eq(self.pool, other.pool)
            && self.slot == other.slot
            && self.generation == other.generation
    }
}

impl<T> Eq for Handle<'_, T> {}

impl<T> std::fmt::Debug for Handle<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("slot", &self.slot)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, PartialEq)]
    struct Entity {
        id: u64,
        health: i32,
        name: String,
    }

    fn context() -> AllocatorContext {
        AllocatorContext::with_capacity(64 * 1024)
    }

    #[test]
    fn test_pool_borrow_release() {
        let context = context();
        let pool: Pool<u32> = Pool::new(&context);

        let mut handle = pool.borrow_with(42);
        assert_eq!(handle.with(|v| *v), Ok(42));
        assert_eq!(pool.live_count(), 1);

        handle.release().unwrap();
        assert!(handle.is_null());
        assert_eq!(pool.live_count(), 0);
        assert_eq!(pool.free_count(), 1);
    }

    #[test]
    fn test_borrow_is_default_constructed() {
        let context = context();
        let pool: Pool<Entity> = Pool::new(&context);

        let mut handle = pool.borrow();
        assert_eq!(handle.with(|e| e == &Entity::default()), Ok(true));
        handle
            .with_mut(|e| {
                e.id = 7;
                e.health = 100;
                e.name.push_str("dragon");
            })
            .unwrap();
        assert_eq!(
            handle.with(|e| (e.id, e.health, e.name.clone())),
            Ok((7, 100, String::from("dragon")))
        );
        let address = handle.address();
        handle.release().unwrap();

        let mut again = pool.borrow();
        assert_eq!(again.address(), address);
        assert_eq!(again.with(|e| e == &Entity::default()), Ok(true));
        again.release().unwrap();
    }

    #[test]
    fn test_pool_reuse() {
        let context = context();
        let pool: Pool<u64> = Pool::new(&context);

        let mut h1 = pool.borrow_with(1);
        h1.release().unwrap();

        let mut h2 = pool.borrow_with(2);
        assert_eq!(pool.slot_count(), 1);
        assert_eq!(h2.with(|v| *v), Ok(2));
        h2.release().unwrap();
    }

    #[test]
    fn test_double_release_is_noop() {
        let context = context();
        let pool: Pool<u32> = Pool::new(&context);

        let mut handle = pool.borrow();
        handle.release().unwrap();
        assert_eq!(handle.release(), Ok(()));
        assert_eq!(pool.free_count(), 1);
        assert_eq!(pool.live_count(), 0);
    }

    #[test]
    fn test_stale_copy_is_rejected() {
        let context = context();
        let pool: Pool<u32> = Pool::new(&context);

        let mut owner = pool.borrow_with(5);
        let mut alias = owner;
        assert_eq!(alias.with(|v| *v), Ok(5));

        owner.release().unwrap();
        let mut reborrowed = pool.borrow_with(9);
        assert_eq!(reborrowed.address(), alias.address());

        assert_eq!(
            alias.with(|v| *v),
            Err(PoolError::StaleHandle { handle: 0, slot: 1 })
        );
        assert!(matches!(alias.release(), Err(PoolError::StaleHandle { .. })));
        assert!(!alias.is_live());
        assert_eq!(reborrowed.with(|v| *v), Ok(9));
        reborrowed.release().unwrap();
    }

    #[test]
    fn test_release_during_access_is_busy() {
        let context = context();
        let pool: Pool<u32> = Pool::new(&context);

        let handle = pool.borrow();
        let mut alias = handle;
        let result = handle.with(|_| alias.release());
        assert_eq!(result, Ok(Err(PoolError::SlotBusy)));
        assert!(alias.is_live());
        alias.release().unwrap();
    }

    #[test]
    fn test_nested_access_rules() {
        let context = context();
        let pool: Pool<u32> = Pool::new(&context);

        let mut handle = pool.borrow_with(3);
        let nested_read = handle.with(|a| handle.with(|b| a + b));
        assert_eq!(nested_read, Ok(Ok(6)));

        let write_in_read = handle.with(|_| handle.with_mut(|v| *v = 0));
        assert_eq!(write_in_read, Ok(Err(PoolError::SlotBusy)));

        let read_in_write = handle.with_mut(|_| handle.with(|v| *v));
        assert_eq!(read_in_write, Ok(Err(PoolError::SlotBusy)));

        // Access state is restored after each closure.
        assert_eq!(handle.with_mut(|v| *v += 1), Ok(()));
        handle.release().unwrap();
    }

    #[test]
    fn test_null_handle_access() {
        let context = context();
        let pool: Pool<u32> = Pool::new(&context);
        let mut handle = pool.borrow();
        handle.release().unwrap();
        assert_eq!(handle.with(|v| *v), Err(PoolError::NullHandle));
        assert_eq!(handle.address(), None);
    }

    #[test]
    fn test_release_drops_value() {
        use std::rc::Rc;

        let context = context();
        let pool: Pool<Rc<()>> = Pool::new(&context);
        let tracker = Rc::new(());

        let mut handle = pool.borrow_with(Rc::clone(&tracker));
        assert_eq!(Rc::strong_count(&tracker), 2);
        handle.release().unwrap();
        assert_eq!(Rc::strong_count(&tracker), 1);
    }

    #[test]
    fn test_reserve_prewarms_free_list() {
        let context = context();
        let pool: Pool<u32> = Pool::with_reserved(&context, 4);
        assert_eq!(pool.free_count(), 4);
        assert_eq!(pool.slot_count(), 4);

        let carved = context.stats().arena_used;
        let mut handles: Vec<_> = (0..4).map(|i| pool.borrow_with(i)).collect();
        assert_eq!(context.stats().arena_used, carved);
        for handle in &mut handles {
            handle.release().unwrap();
        }
    }

    #[test]
    fn test_drop_returns_free_slots_to_allocator() {
        let context = context();
        {
            let pool: Pool<u32> = Pool::with_reserved(&context, 3);
            assert_eq!(context.holders(), 2);
            drop(pool);
        }
        assert_eq!(context.holders(), 1);
        let class = context
            .allocator()
            .size_class_for(Pool::<u32>::SLOT_SIZE)
            .unwrap();
        let stats = context.stats();
        let freed = stats
            .classes
            .iter()
            .find(|c| c.block_size == class)
            .unwrap();
        assert_eq!(freed.free, 3);
    }

    #[test]
    fn test_exhausted_generation_retires_slot() {
        let context = context();
        let pool: Pool<String> = Pool::new(&context);

        let mut handle = pool.borrow_with(String::from("first"));
        let slot = handle.slot.unwrap();
        handle.release().unwrap();
        // Fast-forward the recycled slot to its last usable generation.
        unsafe { (*slot.as_ptr()).generation.set(RETIRED - 1) };

        let mut owner = pool.borrow_with(String::from("last"));
        assert_eq!(owner.slot, Some(slot));
        assert_eq!(owner.generation(), RETIRED - 1);
        let stale = owner;
        owner.release().unwrap();

        assert!(!stale.is_live());
        assert_eq!(
            stale.with(String::len),
            Err(PoolError::StaleHandle {
                handle: RETIRED - 1,
                slot: RETIRED,
            })
        );
        assert_eq!(pool.free_count(), 0);
        assert_eq!(pool.retired_count(), 1);

        // The retired slot is never handed out again.
        let mut fresh = pool.borrow_with(String::from("next"));
        assert_ne!(fresh.slot, Some(slot));
        assert_eq!(fresh.generation(), 0);
        assert!(matches!(
            stale.with(String::len),
            Err(PoolError::StaleHandle { slot: RETIRED, .. })
        ));
        fresh.release().unwrap();
        assert_eq!(pool.slot_count(), 2);
    }

    #[test]
    fn test_drop_returns_retired_slots_to_allocator() {
        let context = context();
        let pool: Pool<u64> = Pool::new(&context);
        let mut handle = pool.borrow_with(1);
        let slot = handle.slot.unwrap();
        unsafe { (*slot.as_ptr()).generation.set(RETIRED - 1) };
        handle.generation = RETIRED - 1;
        handle.release().unwrap();
        assert_eq!(pool.retired_count(), 1);

        drop(pool);
        let class = context
            .allocator()
            .size_class_for(Pool::<u64>::SLOT_SIZE)
            .unwrap();
        let stats = context.stats();
        let freed = stats
            .classes
            .iter()
            .find(|c| c.block_size == class)
            .unwrap();
        assert_eq!(freed.free, 1);
    }

    #[test]
    fn test_released_slot_stays_with_pool() {
        let context = context();
        let pool: Pool<[u8; 16]> = Pool::new(&context);
        let mut handle = pool.borrow_with([0xFF; 16]);
        assert_eq!(handle.with(|bytes| bytes.iter().all(|&b| b == 0xFF)), Ok(true));
        handle.release().unwrap();

        // The slot went to the pool's list, not back to the allocator.
        assert!(context.stats().classes.iter().all(|c| c.free == 0));
    }
}
