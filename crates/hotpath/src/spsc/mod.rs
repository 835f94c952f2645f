//! Lock-free bounded SPSC ring queue.
//!
//! Slot access uses guards so the peek/commit protocol can't be misused:
//! - `Producer::write_slot` → [`WriteSlot`] → `commit()` publishes, drop abandons
//! - `Consumer::read_slot` → [`ReadSlot`] → `commit()` / drop releases (not on panic)
//! - The consumer has no way to touch the write index, and vice versa

mod queue;
mod slot;

pub use queue::{Consumer, Full, Producer, QueueError, channel, channel_with};
pub use slot::{ReadSlot, WriteSlot};
