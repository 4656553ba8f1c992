//! Adapters for the domain ports.

pub mod in_memory;
pub mod locks;
pub mod provider;
pub mod redis;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
pub mod webhook;
