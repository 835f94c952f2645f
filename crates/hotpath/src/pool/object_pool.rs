//! Fixed-capacity typed object pool.
//!
//! Slots are allocated once at construction. Allocation scans forward from the
//! slot after the last one handed out, wrapping at most once, so steady-state
//! allocate/free cycles touch neighbouring slots and stay O(1) amortised.

use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};

use super::slot::{Pooled, Slot, SlotKey};
use crate::policy::FailurePolicy;

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Why a [`SlotKey`] was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleFault {
    /// Key was issued by a different pool.
    ForeignPool,
    /// Index is past the end of the pool.
    OutOfRange,
    /// Slot is free (double free, or never detached).
    NotInUse,
    /// Slot was freed and reallocated since the key was issued.
    Stale,
}

impl std::fmt::Display for HandleFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HandleFault::ForeignPool => "key belongs to another pool",
            HandleFault::OutOfRange => "index out of range",
            HandleFault::NotInUse => "slot is not in use",
            HandleFault::Stale => "slot was reused since the key was issued",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("object pool capacity must be greater than zero")]
    ZeroCapacity,
    #[error("object pool out of space: all {capacity} slots in use")]
    Exhausted { capacity: usize },
    #[error("invalid slot handle {key}: {fault}")]
    InvalidHandle { key: SlotKey, fault: HandleFault },
}

/// Pre-allocated storage for up to `capacity` values of `T`.
///
/// Not `Sync`: allocation and release mutate shared bookkeeping through `&self`
/// so several [`Pooled`] handles can be live at once. Share across threads only
/// behind an external lock.
pub struct ObjectPool<T> {
    id: u64,
    slots: Box<[Slot<T>]>,
    /// Index of the most recently allocated slot; scanning starts one past it.
    cursor: Cell<usize>,
    live: Cell<usize>,
    policy: FailurePolicy,
}

impl<T> ObjectPool<T> {
    /// Create a pool with the default (panicking) failure policy.
    pub fn new(capacity: usize) -> Result<Self, PoolError> {
        Self::with_policy(capacity, FailurePolicy::default())
    }

    pub fn with_policy(capacity: usize, policy: FailurePolicy) -> Result<Self, PoolError> {
        if capacity == 0 {
            return Err(policy.escalate(PoolError::ZeroCapacity));
        }

        let slots: Box<[Slot<T>]> = (0..capacity).map(|_| Slot::vacant()).collect();
        let id = NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(pool = id, capacity, ?policy, "Created object pool");

        Ok(Self {
            id,
            slots,
            // First scan starts at slot 0.
            cursor: Cell::new(capacity - 1),
            live: Cell::new(0),
            policy,
        })
    }

    /// Place `value` in the next free slot.
    ///
    /// On exhaustion the failure policy applies; under [`FailurePolicy::Error`]
    /// the value is dropped and [`PoolError::Exhausted`] returned.
    pub fn allocate(&self, value: T) -> Result<Pooled<'_, T>, PoolError> {
        self.allocate_with(|| value)
    }

    /// Like [`allocate`](Self::allocate), but only builds the value once a free
    /// slot has been found.
    pub fn allocate_with<F>(&self, init: F) -> Result<Pooled<'_, T>, PoolError>
    where
        F: FnOnce() -> T,
    {
        let Some(index) = self.find_free_slot() else {
            tracing::warn!(pool = self.id, capacity = self.capacity(), "Object pool exhausted");
            return Err(self.policy.escalate(PoolError::Exhausted {
                capacity: self.capacity(),
            }));
        };

        let value = init();
        // Safety: `find_free_slot` only returns vacant slots, and vacant slots
        // have no outstanding handles.
        unsafe { self.slots[index].fill(value) };
        self.cursor.set(index);
        self.live.set(self.live.get() + 1);

        tracing::trace!(pool = self.id, slot = index, live = self.live.get(), "Allocated slot");
        Ok(Pooled::new(self, index))
    }

    fn find_free_slot(&self) -> Option<usize> {
        let capacity = self.slots.len();
        let start = self.cursor.get();
        (1..=capacity)
            .map(|step| (start + step) % capacity)
            .find(|&index| !self.slots[index].is_in_use())
    }

    /// Shared access to the value behind a detached key.
    pub fn get(&self, key: SlotKey) -> Option<&T> {
        self.check(key).ok()?;
        // Safety: the key is current, so no `Pooled` handle for this slot
        // exists, and mutable access through a key requires `&mut self`.
        Some(unsafe { self.slots[key.index].value_ref() })
    }

    pub fn get_mut(&mut self, key: SlotKey) -> Option<&mut T> {
        self.check(key).ok()?;
        // Safety: as for `get`, with exclusivity from `&mut self`.
        Some(unsafe { self.slots[key.index].value_mut() })
    }

    /// Destroy the value behind `key` and free its slot.
    ///
    /// Foreign, stale, or already-freed keys go through the failure policy.
    pub fn deallocate(&mut self, key: SlotKey) -> Result<(), PoolError> {
        self.check(key).map_err(|e| self.policy.escalate(e))?;
        self.note_released(key.index);
        // Safety: key validated; `&mut self` rules out other references.
        unsafe { self.slots[key.index].clear() };
        Ok(())
    }

    /// Move the value behind `key` out of the pool and free its slot.
    pub fn take(&mut self, key: SlotKey) -> Result<T, PoolError> {
        self.check(key).map_err(|e| self.policy.escalate(e))?;
        // Safety: key validated; `&mut self` rules out other references.
        let value = unsafe { self.slots[key.index].vacate() };
        self.note_released(key.index);
        Ok(value)
    }

    fn check(&self, key: SlotKey) -> Result<(), PoolError> {
        let fault = if key.pool != self.id {
            Some(HandleFault::ForeignPool)
        } else if let Some(slot) = self.slots.get(key.index) {
            if !slot.is_in_use() {
                Some(HandleFault::NotInUse)
            } else if slot.generation() != key.generation {
                Some(HandleFault::Stale)
            } else {
                None
            }
        } else {
            Some(HandleFault::OutOfRange)
        };

        match fault {
            None => Ok(()),
            Some(fault) => Err(PoolError::InvalidHandle { key, fault }),
        }
    }

    pub(crate) fn slot(&self, index: usize) -> &Slot<T> {
        &self.slots[index]
    }

    pub(crate) fn key_for(&self, index: usize) -> SlotKey {
        SlotKey {
            pool: self.id,
            index,
            generation: self.slots[index].generation(),
        }
    }

    pub(crate) fn note_released(&self, index: usize) {
        self.live.set(self.live.get() - 1);
        tracing::trace!(pool = self.id, slot = index, live = self.live.get(), "Released slot");
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of live values.
    pub fn len(&self) -> usize {
        self.live.get()
    }

    pub fn is_empty(&self) -> bool {
        self.live.get() == 0
    }

    pub fn available(&self) -> usize {
        self.capacity() - self.live.get()
    }

    pub fn is_full(&self) -> bool {
        self.available() == 0
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }
}

impl<T> Drop for ObjectPool<T> {
    fn drop(&mut self) {
        let mut dropped = 0usize;
        for slot in self.slots.iter().filter(|s| s.is_in_use()) {
            // Safety: `&mut self` means no `Pooled` handles remain; detached
            // keys become unusable once the pool is gone.
            unsafe { slot.clear() };
            dropped += 1;
        }
        if dropped > 0 {
            tracing::debug!(pool = self.id, dropped, "Dropped object pool with live values");
        }
    }
}

impl<T> std::fmt::Debug for ObjectPool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectPool")
            .field("id", &self.id)
            .field("capacity", &self.capacity())
            .field("live", &self.len())
            .field("policy", &self.policy)
            .finish()
    }
}
