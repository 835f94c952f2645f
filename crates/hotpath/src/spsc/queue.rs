//! Bounded single-producer/single-consumer ring queue.
//!
//! Both indices are free-running counters; a slot is selected with
//! `index % capacity`, so any capacity works (not just powers of two).
//! Occupancy is `write - read` and always lies in `0..=capacity`.
//!
//! Ordering: the producer publishes with a release store of the write index
//! after filling a slot; the consumer acquires the write index before touching
//! the slot. The read index mirrors this in the other direction so the
//! producer never overwrites a slot the consumer is still reading.

use std::cell::UnsafeCell;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;

use super::slot::{ReadSlot, WriteSlot};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("queue capacity must be greater than zero")]
    ZeroCapacity,
}

/// Returned by [`Producer::try_push`] when the queue is full; carries the
/// rejected value back to the caller.
pub struct Full<T>(pub T);

impl<T> Full<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for Full<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Full(..)")
    }
}

impl<T> fmt::Display for Full<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("queue is full")
    }
}

impl<T> std::error::Error for Full<T> {}

pub(crate) struct Shared<T> {
    slots: Box<[UnsafeCell<T>]>,
    /// Advanced only by the producer.
    write: CachePadded<AtomicUsize>,
    /// Advanced only by the consumer.
    read: CachePadded<AtomicUsize>,
}

// Slots are handed between exactly two threads; the index protocol guarantees
// a slot is never accessed by both at once.
unsafe impl<T: Send> Sync for Shared<T> {}

impl<T> Shared<T> {
    fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn slot(&self, index: usize) -> *mut T {
        self.slots[index % self.slots.len()].get()
    }
}

/// Create a queue of `capacity` slots, each pre-filled with `T::default()`.
pub fn channel<T: Default>(capacity: usize) -> Result<(Producer<T>, Consumer<T>), QueueError> {
    channel_with(capacity, T::default)
}

/// Create a queue whose slots are pre-filled by `fill`.
///
/// Slots always hold a valid `T`: a writer reuses whatever the slot held on
/// the previous lap and overwrites it in place.
pub fn channel_with<T, F>(
    capacity: usize,
    fill: F,
) -> Result<(Producer<T>, Consumer<T>), QueueError>
where
    F: FnMut() -> T,
{
    if capacity == 0 {
        return Err(QueueError::ZeroCapacity);
    }

    let mut fill = fill;
    let slots: Box<[UnsafeCell<T>]> = (0..capacity).map(|_| UnsafeCell::new(fill())).collect();
    let shared = Arc::new(Shared {
        slots,
        write: CachePadded::new(AtomicUsize::new(0)),
        read: CachePadded::new(AtomicUsize::new(0)),
    });

    tracing::debug!(capacity, "Created SPSC queue");

    Ok((
        Producer {
            shared: Arc::clone(&shared),
            write: 0,
            cached_read: 0,
        },
        Consumer {
            shared,
            read: 0,
            cached_write: 0,
        },
    ))
}

/// Writing half of the queue. Not `Clone`: there is exactly one producer.
pub struct Producer<T> {
    shared: Arc<Shared<T>>,
    /// Local copy of the write index (this side is its only writer).
    write: usize,
    /// Last observed read index; refreshed only when the queue looks full.
    cached_read: usize,
}

impl<T> Producer<T> {
    /// Borrow the next free slot for in-place writing.
    ///
    /// Returns `None` when the queue is full. The slot is published only when
    /// the returned guard is committed; dropping it leaves the slot free.
    pub fn write_slot(&mut self) -> Option<WriteSlot<'_, T>> {
        let capacity = self.shared.capacity();
        if self.write.wrapping_sub(self.cached_read) == capacity {
            self.cached_read = self.shared.read.load(Ordering::Acquire);
            if self.write.wrapping_sub(self.cached_read) == capacity {
                return None;
            }
        }
        Some(WriteSlot::new(self))
    }

    /// Move `value` into the next free slot and publish it.
    pub fn try_push(&mut self, value: T) -> Result<(), Full<T>> {
        match self.write_slot() {
            Some(mut slot) => {
                *slot = value;
                slot.commit();
                Ok(())
            }
            None => Err(Full(value)),
        }
    }

    pub(crate) fn current_slot(&self) -> *mut T {
        self.shared.slot(self.write)
    }

    pub(crate) fn commit_write(&mut self) {
        self.write = self.write.wrapping_add(1);
        self.shared.write.store(self.write, Ordering::Release);
    }

    /// Advisory snapshot of published-but-unconsumed values. The consumer may
    /// have moved on by the time the caller looks at it.
    pub fn occupancy(&self) -> usize {
        self.write
            .wrapping_sub(self.shared.read.load(Ordering::Acquire))
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity()
    }

    pub fn is_full(&self) -> bool {
        self.occupancy() == self.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.occupancy() == 0
    }
}

impl<T> fmt::Debug for Producer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("capacity", &self.capacity())
            .field("write", &self.write)
            .field("occupancy", &self.occupancy())
            .finish()
    }
}

/// Reading half of the queue. Not `Clone`: there is exactly one consumer.
pub struct Consumer<T> {
    shared: Arc<Shared<T>>,
    read: usize,
    /// Last observed write index; refreshed only when the queue looks empty.
    cached_write: usize,
}

impl<T> Consumer<T> {
    /// Borrow the oldest published slot, or `None` if nothing is published.
    ///
    /// The slot is released back to the producer when the returned guard is
    /// committed or dropped.
    pub fn read_slot(&mut self) -> Option<ReadSlot<'_, T>> {
        if self.read == self.cached_write {
            self.cached_write = self.shared.write.load(Ordering::Acquire);
            if self.read == self.cached_write {
                return None;
            }
        }
        Some(ReadSlot::new(self))
    }

    /// Move the oldest value out, leaving `T::default()` in the slot.
    pub fn try_pop(&mut self) -> Option<T>
    where
        T: Default,
    {
        let mut slot = self.read_slot()?;
        let value = std::mem::take(&mut *slot);
        slot.commit();
        Some(value)
    }

    pub(crate) fn current_slot(&self) -> *mut T {
        self.shared.slot(self.read)
    }

    pub(crate) fn commit_read(&mut self) {
        self.read = self.read.wrapping_add(1);
        self.shared.read.store(self.read, Ordering::Release);
    }

    /// Advisory snapshot of published-but-unconsumed values. The producer may
    /// have moved on by the time the caller looks at it.
    pub fn occupancy(&self) -> usize {
        self.shared
            .write
            .load(Ordering::Acquire)
            .wrapping_sub(self.read)
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.occupancy() == 0
    }

    pub fn is_full(&self) -> bool {
        self.occupancy() == self.capacity()
    }
}

impl<T> fmt::Debug for Consumer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("capacity", &self.capacity())
            .field("read", &self.read)
            .field("occupancy", &self.occupancy())
            .finish()
    }
}
