//! hotpath: building blocks for latency-sensitive code.
//!
//! - [`pool::ObjectPool`]: fixed-capacity typed storage without allocator calls
//! - [`spsc`]: bounded lock-free single-producer/single-consumer ring queue
//! - [`thread`]: named threads pinned to a core
//! - [`socket`]: TCP/UDP socket bootstrap with the usual low-latency options

mod version;

pub mod policy;
pub mod pool;
pub mod socket;
pub mod spsc;
pub mod thread;

pub use policy::FailurePolicy;
pub use pool::{ObjectPool, PoolError, Pooled, SlotKey};
pub use socket::{SocketConfig, SocketError, Transport, create_socket};
pub use spsc::{Consumer, Producer, ReadSlot, WriteSlot, channel, channel_with};
pub use thread::{ThreadError, ThreadHandle, create_and_start_thread};
pub use version::{HOTPATH_VERSION, VersionInfo};
