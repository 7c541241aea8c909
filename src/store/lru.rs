//! LRU Tracker Module
//!
//! Least Recently Used bookkeeping for the capacity-bounded memory store.

use std::collections::{BTreeMap, HashMap};

// == LRU Tracker ==
/// Tracks access order for LRU eviction.
///
/// Every touch stamps the key with a monotonically increasing tick. The
/// ordered map from tick to key makes the least recently used key the
/// first entry, so touch, remove and evict are all logarithmic.
#[derive(Debug, Default)]
pub struct LruTracker {
    /// Next access stamp
    tick: u64,
    /// Last access stamp per key
    stamps: HashMap<String, u64>,
    /// Keys ordered by last access, oldest first
    order: BTreeMap<u64, String>,
}

impl LruTracker {
    // == Constructor ==
    /// Creates a new empty LRU tracker.
    pub fn new() -> Self {
        Self::default()
    }

    // == Touch ==
    /// Marks a key as most recently used.
    pub fn touch(&mut self, key: &str) {
        let stamp = self.tick;
        self.tick += 1;

        if let Some(previous) = self.stamps.insert(key.to_string(), stamp) {
            self.order.remove(&previous);
        }
        self.order.insert(stamp, key.to_string());
    }

    // == Remove ==
    /// Stops tracking a key. Unknown keys are ignored.
    pub fn remove(&mut self, key: &str) {
        if let Some(stamp) = self.stamps.remove(key) {
            self.order.remove(&stamp);
        }
    }

    // == Evict Oldest ==
    /// Returns and forgets the least recently used key.
    pub fn evict_oldest(&mut self) -> Option<String> {
        let (_, key) = self.order.pop_first()?;
        self.stamps.remove(&key);
        Some(key)
    }

    /// The least recently used key, without removing it.
    #[cfg(test)]
    fn peek_oldest(&self) -> Option<&str> {
        self.order.first_key_value().map(|(_, key)| key.as_str())
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.stamps.len()
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.stamps.is_empty()
    }

    #[cfg(test)]
    fn contains(&self, key: &str) -> bool {
        self.stamps.contains_key(key)
    }
}
