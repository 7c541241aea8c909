//! Memory Store Module
//!
//! In-process [`Store`] backed by a HashMap with TTL expiry and an optional
//! LRU capacity bound.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::Config;
use crate::context::Context;
use crate::error::{CacheError, Result};
use crate::store::{CacheEntry, CacheStats, LruTracker, Store, MAX_KEY_LENGTH, MAX_VALUE_SIZE};

const BACKEND: &str = "memory";

// == Memory State ==
/// Entries plus their bookkeeping, guarded as one unit.
#[derive(Debug)]
struct MemoryState {
    entries: HashMap<String, CacheEntry>,
    lru: LruTracker,
    stats: CacheStats,
    /// 0 = unbounded
    max_entries: usize,
}

impl MemoryState {
    fn new(max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            lru: LruTracker::new(),
            stats: CacheStats::new(),
            max_entries,
        }
    }

    fn validate(key: &str, value: &str) -> Result<()> {
        if key.len() > MAX_KEY_LENGTH {
            return Err(CacheError::InvalidRequest(format!(
                "Key exceeds maximum length of {} bytes",
                MAX_KEY_LENGTH
            )));
        }
        if value.len() > MAX_VALUE_SIZE {
            return Err(CacheError::InvalidRequest(format!(
                "Value exceeds maximum size of {} bytes",
                MAX_VALUE_SIZE
            )));
        }
        Ok(())
    }

    // == Insert ==
    /// Stores a whole batch, evicting least recently used entries when a
    /// bounded store lacks room. Keys in the batch are never evicted to make
    /// room for each other; a batch larger than the capacity is rejected
    /// before any entry changes. Overwrites reset the TTL.
    fn insert_batch(&mut self, items: HashMap<String, String>, ttl: Duration) -> Result<()> {
        if self.max_entries > 0 {
            if items.len() > self.max_entries {
                return Err(CacheError::CacheFull(format!(
                    "Batch of {} entries exceeds capacity of {}",
                    items.len(),
                    self.max_entries
                )));
            }

            // Overwritten keys become most recent so eviction only reaches keys outside the batch
            let mut incoming = 0;
            for key in items.keys() {
                if self.entries.contains_key(key) {
                    self.lru.touch(key);
                } else {
                    incoming += 1;
                }
            }

            let overflow = (self.entries.len() + incoming).saturating_sub(self.max_entries);
            for _ in 0..overflow {
                self.evict_oldest()?;
            }
        }

        for (key, value) in items {
            self.lru.touch(&key);
            self.entries.insert(key, CacheEntry::new(value, ttl));
        }
        self.stats.set_total_entries(self.entries.len());
        Ok(())
    }

    fn evict_oldest(&mut self) -> Result<()> {
        let Some(evicted) = self.lru.evict_oldest() else {
            return Err(CacheError::CacheFull(
                "Cache is full and eviction failed".to_string(),
            ));
        };
        self.entries.remove(&evicted);
        self.stats.record_eviction();
        debug!(key = %evicted, "evicted least recently used entry");
        Ok(())
    }

    // == Lookup ==
    /// Returns the payload if present and unexpired. Expired entries are
    /// dropped on the spot and counted as misses.
    fn lookup(&mut self, key: &str) -> Option<String> {
        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired() => {
                let value = entry.value.clone();
                self.stats.record_hit();
                self.lru.touch(key);
                return Some(value);
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            self.entries.remove(key);
            self.lru.remove(key);
            self.stats.record_expirations(1);
            self.stats.set_total_entries(self.entries.len());
        }
        self.stats.record_miss();
        None
    }

    fn is_live(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired())
    }

    fn remove(&mut self, key: &str) -> bool {
        let Some(entry) = self.entries.remove(key) else {
            return false;
        };
        self.lru.remove(key);
        self.stats.set_total_entries(self.entries.len());
        // An expired entry is already gone as far as callers can tell
        !entry.is_expired()
    }

    fn cleanup_expired(&mut self) -> usize {
        let expired_keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired())
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired_keys {
            self.entries.remove(key);
            self.lru.remove(key);
        }

        self.stats.record_expirations(expired_keys.len());
        self.stats.set_total_entries(self.entries.len());
        expired_keys.len()
    }
}

// == Memory Store ==
/// Thread-safe in-memory store.
///
/// Unbounded by default; [`MemoryStore::with_capacity`] adds LRU eviction.
/// Expired entries are hidden on read and purged lazily, or eagerly by
/// [`crate::tasks::spawn_cleanup_task`].
#[derive(Debug)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    // == Constructors ==
    /// Creates an unbounded store.
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Creates a store holding at most `max_entries` entries, 0 = unbounded.
    pub fn with_capacity(max_entries: usize) -> Self {
        Self {
            state: RwLock::new(MemoryState::new(max_entries)),
        }
    }

    /// Creates a store sized from configuration.
    pub fn from_config(config: &Config) -> Self {
        Self::with_capacity(config.max_entries)
    }

    /// Returns current statistics.
    pub async fn stats(&self) -> CacheStats {
        let state = self.state.read().await;
        let mut stats = state.stats.clone();
        stats.set_total_entries(state.entries.len());
        stats
    }

    /// Removes all expired entries and returns how many were removed.
    pub async fn cleanup_expired(&self) -> usize {
        self.state.write().await.cleanup_expired()
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.entries.is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn name(&self) -> &'static str {
        BACKEND
    }

    async fn get_raw(&self, ctx: &Context, key: &str) -> Result<Option<String>> {
        ctx.check()?;
        Ok(self.state.write().await.lookup(key))
    }

    async fn mget_raw(&self, ctx: &Context, keys: &[String]) -> Result<HashMap<String, String>> {
        ctx.check()?;
        let mut state = self.state.write().await;
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            if found.contains_key(key) {
                continue;
            }
            if let Some(value) = state.lookup(key) {
                found.insert(key.clone(), value);
            }
        }
        Ok(found)
    }

    async fn exists(&self, ctx: &Context, keys: &[String]) -> Result<HashMap<String, bool>> {
        ctx.check()?;
        let state = self.state.read().await;
        Ok(keys
            .iter()
            .map(|key| (key.clone(), state.is_live(key)))
            .collect())
    }

    async fn mset_raw(
        &self,
        ctx: &Context,
        items: HashMap<String, String>,
        ttl: Duration,
    ) -> Result<()> {
        ctx.check()?;
        // Reject the whole batch before touching any entry
        for (key, value) in &items {
            MemoryState::validate(key, value)?;
        }

        self.state.write().await.insert_batch(items, ttl)
    }

    async fn del(&self, ctx: &Context, keys: &[String]) -> Result<i64> {
        ctx.check()?;
        let mut state = self.state.write().await;
        let removed = keys.iter().filter(|key| state.remove(key)).count();
        Ok(removed as i64)
    }
}
