//! Adapters behind the domain ports: stores, clocks, timers, senders.

pub mod clock;
pub mod in_memory;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
pub mod senders;
pub mod templates;
pub mod timer;
