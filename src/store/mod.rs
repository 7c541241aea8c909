//! Store Module
//!
//! The key-value contract the coordinator reads from and writes back to,
//! plus the in-process [`MemoryStore`] backend.
//!
//! Stores move serialized JSON payloads so the trait stays object safe;
//! [`StoreExt`] decodes them into caller-chosen types at the boundary.

mod entry;
mod lru;
mod memory;
mod stats;

#[cfg(test)]
mod property_tests;

use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use crate::context::Context;
use crate::error::{CacheError, Result};

// Re-export public types
pub use entry::CacheEntry;
pub use lru::LruTracker;
pub use memory::MemoryStore;
pub use stats::CacheStats;

// == Public Constants ==
/// Maximum allowed key length in bytes
pub const MAX_KEY_LENGTH: usize = 256;

/// Maximum allowed value size in bytes
pub const MAX_VALUE_SIZE: usize = 1024 * 1024; // 1 MB

// == Store Trait ==
/// Key-value backend consumed by the coordinator.
///
/// Implementations must report absent or expired keys as `Ok(None)` or by
/// omitting them from batch results, never as an error. A `ttl` of zero
/// means the entry never expires.
#[async_trait]
pub trait Store: Send + Sync + Debug {
    /// Backend name used in logs and error messages, e.g. "memory".
    fn name(&self) -> &'static str;

    /// Reads one raw payload.
    async fn get_raw(&self, ctx: &Context, key: &str) -> Result<Option<String>>;

    /// Reads many raw payloads. Only present, unexpired keys are returned.
    async fn mget_raw(&self, ctx: &Context, keys: &[String]) -> Result<HashMap<String, String>>;

    /// One flag per requested key, true iff present and unexpired.
    async fn exists(&self, ctx: &Context, keys: &[String]) -> Result<HashMap<String, bool>>;

    /// Writes every item with the same TTL.
    ///
    /// Either all items are written or an error is returned; a partial write
    /// must not be reported as success. A bounded backend must not evict one
    /// item of the batch to make room for another.
    async fn mset_raw(
        &self,
        ctx: &Context,
        items: HashMap<String, String>,
        ttl: Duration,
    ) -> Result<()>;

    /// Deletes the keys that exist and returns how many were removed.
    async fn del(&self, ctx: &Context, keys: &[String]) -> Result<i64>;
}

// == Typed Access ==
/// Typed get/set operations over any [`Store`].
pub trait StoreExt: Store {
    /// Gets a typed value from the store
    fn get<'a, V>(
        &'a self,
        ctx: &'a Context,
        key: &'a str,
    ) -> impl Future<Output = Result<Option<V>>> + Send
    where
        V: DeserializeOwned + Send,
    {
        async move {
            match self.get_raw(ctx, key).await? {
                Some(raw) => decode(key, &raw).map(Some),
                None => Ok(None),
            }
        }
    }

    /// Populates `dst` with every requested key present in the store
    ///
    /// Keys that are absent stay absent from `dst`. Existing entries in
    /// `dst` for other keys are left alone.
    fn mget<'a, V>(
        &'a self,
        ctx: &'a Context,
        keys: &'a [String],
        dst: &'a mut HashMap<String, V>,
    ) -> impl Future<Output = Result<()>> + Send
    where
        V: DeserializeOwned + Send,
    {
        async move {
            let found = self.mget_raw(ctx, keys).await?;
            for (key, raw) in found {
                let value = decode(&key, &raw)?;
                dst.insert(key, value);
            }
            Ok(())
        }
    }

    /// Sets typed values with a shared TTL
    fn mset<'a, V>(
        &'a self,
        ctx: &'a Context,
        items: &'a HashMap<String, V>,
        ttl: Duration,
    ) -> impl Future<Output = Result<()>> + Send
    where
        V: Serialize + Sync,
    {
        async move {
            let mut encoded = HashMap::with_capacity(items.len());
            for (key, value) in items {
                encoded.insert(key.clone(), encode(value)?);
            }
            self.mset_raw(ctx, encoded, ttl).await
        }
    }
}

// Blanket implementation for all types implementing Store
impl<T: Store + ?Sized> StoreExt for T {}

// == Codec ==
/// Encodes a value into the payload format stores hold.
pub fn encode<V: Serialize + ?Sized>(value: &V) -> Result<String> {
    serde_json::to_string(value).map_err(|e| CacheError::Serialize(e.to_string()))
}

/// Decodes a stored payload, naming the key when the type does not match.
pub fn decode<V: DeserializeOwned>(key: &str, raw: &str) -> Result<V> {
    serde_json::from_str(raw).map_err(|e| CacheError::Deserialize {
        key: key.to_string(),
        message: e.to_string(),
    })
}
