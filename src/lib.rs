//! Cache Coordinator - read-through caching over pluggable stores
//!
//! Serves values from a [`Store`] when present and otherwise loads them
//! through caller-supplied fallbacks, caching the results with a TTL.
//! Concurrent misses on one key share a single fallback call.

pub mod config;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod store;
pub mod tasks;

pub use config::Config;
pub use context::Context;
pub use coordinator::{
    batch_fallback_fn, fallback_fn, BatchFallback, CacheOptions, Coordinator, Fallback,
};
pub use error::{CacheError, Result};
pub use store::{MemoryStore, Store, StoreExt};
pub use tasks::spawn_cleanup_task;
