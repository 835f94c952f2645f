//! Fixed-capacity object pool.
//!
//! Handles come in two forms:
//! - [`Pooled`]: borrowed guard, frees the slot when dropped (or moves the
//!   value out via `into_inner`)
//! - [`SlotKey`]: detached `Copy` key, released explicitly with
//!   `ObjectPool::deallocate` / `ObjectPool::take`

mod object_pool;
mod slot;

pub use object_pool::{HandleFault, ObjectPool, PoolError};
pub use slot::{Pooled, SlotKey};
