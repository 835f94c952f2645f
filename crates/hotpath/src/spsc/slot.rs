//! Borrowed slot guards for in-place queue access.
//!
//! A guard mutably borrows its half of the queue, so at most one slot per side
//! is outstanding and each peek is matched by at most one index advance.
//!
//! Writes are published only by an explicit [`WriteSlot::commit`]; a write
//! guard that goes out of scope any other way (early return, panic) leaves
//! the slot unpublished. Reads are released on commit or scope exit, except
//! while unwinding, so a panicking consumer sees the same slot again.

use std::fmt;
use std::mem;
use std::ops::{Deref, DerefMut};
use std::thread;

use super::queue::{Consumer, Producer};

/// The producer's next free slot. Published only by [`commit`](Self::commit).
#[must_use = "a WriteSlot is only published by commit()"]
pub struct WriteSlot<'a, T> {
    producer: &'a mut Producer<T>,
}

impl<'a, T> WriteSlot<'a, T> {
    pub(crate) fn new(producer: &'a mut Producer<T>) -> Self {
        Self { producer }
    }

    /// Publish the slot to the consumer.
    pub fn commit(self) {
        self.producer.commit_write();
    }

    /// Give the slot back without publishing it. Any in-place changes stay in
    /// the slot and are seen by the next `write_slot` call. Same as dropping.
    pub fn abandon(self) {}
}

impl<T> Deref for WriteSlot<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: the write index is past every slot the consumer may touch
        // and only the producer (borrowed here) advances it.
        unsafe { &*self.producer.current_slot() }
    }
}

impl<T> DerefMut for WriteSlot<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // Safety: as for `deref`.
        unsafe { &mut *self.producer.current_slot() }
    }
}

impl<T: fmt::Debug> fmt::Debug for WriteSlot<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("WriteSlot").field(&**self).finish()
    }
}

/// The consumer's oldest published slot. Releases on [`commit`](Self::commit)
/// or drop, but not when dropped during a panic.
#[must_use = "dropping a ReadSlot consumes it immediately"]
pub struct ReadSlot<'a, T> {
    consumer: &'a mut Consumer<T>,
}

impl<'a, T> ReadSlot<'a, T> {
    pub(crate) fn new(consumer: &'a mut Consumer<T>) -> Self {
        Self { consumer }
    }

    /// Release the slot back to the producer.
    pub fn commit(self) {
        self.consumer.commit_read();
        mem::forget(self);
    }

    /// Leave the slot published; the next `read_slot` call returns it again.
    pub fn retain(self) {
        mem::forget(self);
    }
}

impl<T> Deref for ReadSlot<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: the slot was published (acquired write index) and the
        // producer cannot reuse it until the read index moves past it.
        unsafe { &*self.consumer.current_slot() }
    }
}

impl<T> DerefMut for ReadSlot<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // Safety: as for `deref`.
        unsafe { &mut *self.consumer.current_slot() }
    }
}

impl<T> Drop for ReadSlot<'_, T> {
    fn drop(&mut self) {
        if thread::panicking() {
            return;
        }
        self.consumer.commit_read();
    }
}

impl<T: fmt::Debug> fmt::Debug for ReadSlot<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ReadSlot").field(&**self).finish()
    }
}
