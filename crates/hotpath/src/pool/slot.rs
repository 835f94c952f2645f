//! Pool slot storage and the handles that point into it.
//!
//! Two handle flavours exist side by side:
//! - [`Pooled`] borrows the pool and frees its slot on drop.
//! - [`SlotKey`] is a detached `Copy` handle, validated on every use, for
//!   storing references to pooled values in other structures (queues, maps).

use std::cell::{Cell, UnsafeCell};
use std::fmt;
use std::mem::{self, MaybeUninit};
use std::ops::{Deref, DerefMut};

use super::ObjectPool;

/// One unit of pool storage.
///
/// `in_use` is true exactly when `value` holds a live, initialised `T`.
/// `generation` is bumped every time the slot is freed so detached keys from an
/// earlier occupancy are recognised as stale.
pub(crate) struct Slot<T> {
    value: UnsafeCell<MaybeUninit<T>>,
    in_use: Cell<bool>,
    generation: Cell<u32>,
}

impl<T> Slot<T> {
    pub(crate) fn vacant() -> Self {
        Self {
            value: UnsafeCell::new(MaybeUninit::uninit()),
            in_use: Cell::new(false),
            generation: Cell::new(0),
        }
    }

    pub(crate) fn is_in_use(&self) -> bool {
        self.in_use.get()
    }

    pub(crate) fn generation(&self) -> u32 {
        self.generation.get()
    }

    /// Store `value` and mark the slot live.
    ///
    /// # Safety
    /// The slot must be vacant and no reference into it may exist.
    pub(crate) unsafe fn fill(&self, value: T) {
        debug_assert!(!self.in_use.get(), "filling a slot that is in use");
        unsafe { (*self.value.get()).write(value) };
        self.in_use.set(true);
    }

    /// # Safety
    /// The slot must be in use and the caller must hold the only handle to it.
    pub(crate) unsafe fn value_ref(&self) -> &T {
        unsafe { (*self.value.get()).assume_init_ref() }
    }

    /// # Safety
    /// The slot must be in use and the caller must hold the only handle to it.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn value_mut(&self) -> &mut T {
        unsafe { (*self.value.get()).assume_init_mut() }
    }

    /// Move the value out and mark the slot vacant.
    ///
    /// # Safety
    /// The slot must be in use and no reference into it may outlive this call.
    pub(crate) unsafe fn vacate(&self) -> T {
        debug_assert!(self.in_use.get(), "vacating a free slot");
        let value = unsafe { (*self.value.get()).assume_init_read() };
        self.in_use.set(false);
        self.generation.set(self.generation.get().wrapping_add(1));
        value
    }

    /// Drop the value in place and mark the slot vacant.
    ///
    /// # Safety
    /// Same contract as [`Slot::vacate`].
    pub(crate) unsafe fn clear(&self) {
        debug_assert!(self.in_use.get(), "clearing a free slot");
        // Flag first: if T::drop panics the slot must not be dropped again.
        self.in_use.set(false);
        self.generation.set(self.generation.get().wrapping_add(1));
        unsafe { (*self.value.get()).assume_init_drop() };
    }
}

/// Detached handle to a live pooled value.
///
/// Obtained from [`Pooled::into_key`]; resolved with [`ObjectPool::get`],
/// [`ObjectPool::get_mut`], and released with [`ObjectPool::deallocate`] or
/// [`ObjectPool::take`]. Keys from another pool, freed slots, or earlier
/// occupancies of the same slot are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotKey {
    pub(crate) pool: u64,
    pub(crate) index: usize,
    pub(crate) generation: u32,
}

impl SlotKey {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}@{}", self.pool, self.index, self.generation)
    }
}

/// A live value in an [`ObjectPool`]. Dereferences to the value; dropping it
/// destroys the value and frees the slot.
#[must_use = "dropping a Pooled handle immediately frees its slot"]
pub struct Pooled<'p, T> {
    pool: &'p ObjectPool<T>,
    index: usize,
}

impl<'p, T> Pooled<'p, T> {
    pub(crate) fn new(pool: &'p ObjectPool<T>, index: usize) -> Self {
        Self { pool, index }
    }

    /// Slot index occupied by this value.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Move the value out of the pool, freeing the slot.
    pub fn into_inner(self) -> T {
        let pool = self.pool;
        let index = self.index;
        mem::forget(self);
        // Safety: this handle was the only reference to an in-use slot.
        let value = unsafe { pool.slot(index).vacate() };
        pool.note_released(index);
        value
    }

    /// Detach the handle into a [`SlotKey`]. The value stays live until the key
    /// is passed to [`ObjectPool::deallocate`] or [`ObjectPool::take`], or the
    /// pool is dropped.
    pub fn into_key(self) -> SlotKey {
        let key = self.pool.key_for(self.index);
        mem::forget(self);
        key
    }
}

impl<T> Deref for Pooled<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: the slot stays in use for as long as this handle exists and
        // no other handle to it can be created.
        unsafe { self.pool.slot(self.index).value_ref() }
    }
}

impl<T> DerefMut for Pooled<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // Safety: as for `deref`, and `&mut self` makes the borrow unique.
        unsafe { self.pool.slot(self.index).value_mut() }
    }
}

impl<T> Drop for Pooled<'_, T> {
    fn drop(&mut self) {
        self.pool.note_released(self.index);
        // Safety: this handle was the only reference to an in-use slot.
        unsafe { self.pool.slot(self.index).clear() };
    }
}

impl<T: fmt::Debug> fmt::Debug for Pooled<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pooled")
            .field("index", &self.index)
            .field("value", &**self)
            .finish()
    }
}
