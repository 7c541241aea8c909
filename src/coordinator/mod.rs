//! Cache Coordinator
//!
//! Read-through orchestration over a [`Store`]: single and batch reads with
//! fallback loading, forced refresh and deletion.
//!
//! Concurrent misses on the same key share one fallback invocation. A
//! successful return means every value handed back was written to the
//! store; when the write-back fails the store error is returned and the
//! freshly loaded values are withheld.

mod fallback;
mod flight;
mod options;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::context::Context;
use crate::error::{CacheError, Result};
use crate::store::{decode, encode, Store, StoreExt};

pub use fallback::{
    batch_fallback_fn, fallback_fn, BatchFallback, Fallback, FnBatchFallback, FnFallback,
};
pub use options::CacheOptions;

use flight::{Claim, FlightGuard, FlightRegistry, Outcome};

// == Coordinator ==
/// Stateless orchestrator over a shared store.
///
/// Cloning is cheap; clones share the store and the in-flight registry, so
/// single-flight holds across them.
#[derive(Debug, Clone)]
pub struct Coordinator {
    store: Arc<dyn Store>,
    flights: Arc<FlightRegistry>,
}

impl Coordinator {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            flights: Arc::new(FlightRegistry::default()),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Number of keys whose fallback is currently running.
    pub fn in_flight(&self) -> usize {
        self.flights.len()
    }

    // == Get ==
    /// Returns the cached value for `key`, loading and caching it through
    /// `fallback` on a miss.
    ///
    /// `Ok(None)` when the key is neither cached nor produced by the
    /// fallback; negative results are not cached. A cached value that does
    /// not decode into `V` is a [`CacheError::Deserialize`]. A fallback value
    /// whose encoding would not read back as `V` is refused with
    /// [`CacheError::Serialize`] and nothing is cached.
    pub async fn get<V>(
        &self,
        ctx: &Context,
        key: &str,
        fallback: Option<&dyn Fallback<V>>,
        opts: CacheOptions,
    ) -> Result<Option<V>>
    where
        V: Serialize + DeserializeOwned + Send + 'static,
    {
        ctx.run(self.get_inner(ctx, key, fallback, opts)).await
    }

    async fn get_inner<V>(
        &self,
        ctx: &Context,
        key: &str,
        fallback: Option<&dyn Fallback<V>>,
        opts: CacheOptions,
    ) -> Result<Option<V>>
    where
        V: Serialize + DeserializeOwned + Send + 'static,
    {
        let cached: Option<V> = self.store.get(ctx, key).await?;
        if cached.is_some() {
            debug!(key, "cache hit");
            return Ok(cached);
        }

        let Some(fallback) = fallback else {
            debug!(key, "cache miss, no fallback");
            return Ok(None);
        };

        loop {
            match self.flights.claim(key) {
                Claim::Leader(flight) => {
                    let outcome = self.load_one(ctx, key, fallback, opts).await;
                    publish(flight, &outcome);
                    return decode_outcome(key, outcome);
                }
                Claim::Follower(waiter) => {
                    debug!(key, "joining in-flight fallback");
                    match waiter.wait().await {
                        Some(outcome) => return decode_outcome(key, outcome),
                        None => debug!(key, "in-flight fallback abandoned, retrying"),
                    }
                }
            }
        }
    }

    async fn load_one<V>(
        &self,
        ctx: &Context,
        key: &str,
        fallback: &dyn Fallback<V>,
        opts: CacheOptions,
    ) -> Outcome
    where
        V: Serialize + DeserializeOwned + Send + 'static,
    {
        // A flight that finished between our miss and the claim already filled the key
        if let Some(raw) = self.store.get_raw(ctx, key).await? {
            return Ok(Some(raw));
        }

        debug!(key, "cache miss, invoking fallback");
        let Some(value) = fallback.fetch(ctx, key).await? else {
            debug!(key, "fallback reported no value");
            return Ok(None);
        };

        let raw = encode_value(key, &value)?;
        let items = HashMap::from([(key.to_string(), raw.clone())]);
        self.write_back(ctx, items, opts).await?;
        Ok(Some(raw))
    }

    // == MGet ==
    /// Populates `dst` with every requested key, reading the store first
    /// and loading the keys still missing through `fallback` in one batch.
    ///
    /// Without a fallback this is a plain batch read. Keys the fallback does
    /// not return stay absent. If the fallback or the write-back fails, the
    /// cache hits already placed in `dst` remain and no freshly loaded value
    /// is added.
    pub async fn mget<V>(
        &self,
        ctx: &Context,
        keys: &[String],
        dst: &mut HashMap<String, V>,
        fallback: Option<&dyn BatchFallback<V>>,
        opts: CacheOptions,
    ) -> Result<()>
    where
        V: Serialize + DeserializeOwned + Send + 'static,
    {
        ctx.run(self.mget_inner(ctx, keys, dst, fallback, opts))
            .await
    }

    async fn mget_inner<V>(
        &self,
        ctx: &Context,
        keys: &[String],
        dst: &mut HashMap<String, V>,
        fallback: Option<&dyn BatchFallback<V>>,
        opts: CacheOptions,
    ) -> Result<()>
    where
        V: Serialize + DeserializeOwned + Send + 'static,
    {
        if keys.is_empty() {
            return Ok(());
        }

        self.store.mget(ctx, keys, dst).await?;

        let Some(fallback) = fallback else {
            return Ok(());
        };

        let mut seen = HashSet::new();
        let missing: Vec<String> = keys
            .iter()
            .filter(|key| !dst.contains_key(key.as_str()) && seen.insert(key.as_str()))
            .cloned()
            .collect();

        if missing.is_empty() {
            debug!(count = keys.len(), "all keys served from cache");
            return Ok(());
        }
        debug!(
            requested = keys.len(),
            missing = missing.len(),
            "loading missing keys"
        );

        let loaded = self.load_many(ctx, missing, fallback, opts).await?;

        let mut values = Vec::with_capacity(loaded.len());
        for (key, raw) in loaded {
            let value = decode(&key, &raw)?;
            values.push((key, value));
        }
        dst.extend(values);
        Ok(())
    }

    /// Resolves `pending` keys, leading flights for keys nobody is loading
    /// and following the rest. Returns the serialized values that exist.
    async fn load_many<V>(
        &self,
        ctx: &Context,
        mut pending: Vec<String>,
        fallback: &dyn BatchFallback<V>,
        opts: CacheOptions,
    ) -> Result<HashMap<String, String>>
    where
        V: Serialize + DeserializeOwned + Send + 'static,
    {
        let mut resolved = HashMap::new();

        while !pending.is_empty() {
            let mut leading = Vec::new();
            let mut following = Vec::new();
            for key in pending.drain(..) {
                match self.flights.claim(&key) {
                    Claim::Leader(flight) => leading.push(flight),
                    Claim::Follower(waiter) => following.push((key, waiter)),
                }
            }

            // Lead before following so two overlapping batches cannot wait on each other
            if !leading.is_empty() {
                let led: Vec<String> = leading.iter().map(|f| f.key().to_string()).collect();
                match self.load_batch(ctx, &led, fallback, opts).await {
                    Ok(loaded) => {
                        for flight in leading {
                            let raw = loaded.get(flight.key()).cloned();
                            flight.complete(Ok(raw));
                        }
                        resolved.extend(loaded);
                    }
                    Err(err) => {
                        for flight in leading {
                            publish(flight, &Err(err.clone()));
                        }
                        return Err(err);
                    }
                }
            }

            for (key, waiter) in following {
                debug!(key = %key, "joining in-flight fallback");
                match waiter.wait().await {
                    Some(Ok(Some(raw))) => {
                        resolved.insert(key, raw);
                    }
                    Some(Ok(None)) => {}
                    Some(Err(err)) => return Err(err),
                    None => {
                        debug!(key = %key, "in-flight fallback abandoned, retrying");
                        pending.push(key);
                    }
                }
            }
        }

        Ok(resolved)
    }

    async fn load_batch<V>(
        &self,
        ctx: &Context,
        keys: &[String],
        fallback: &dyn BatchFallback<V>,
        opts: CacheOptions,
    ) -> Result<HashMap<String, String>>
    where
        V: Serialize + DeserializeOwned + Send + 'static,
    {
        // Re-read: flights that completed since the first read may cover some keys
        let mut loaded = self.store.mget_raw(ctx, keys).await?;
        let missing: Vec<String> = keys
            .iter()
            .filter(|key| !loaded.contains_key(key.as_str()))
            .cloned()
            .collect();
        if missing.is_empty() {
            return Ok(loaded);
        }

        debug!(count = missing.len(), "invoking batch fallback");
        let fetched = retain_requested(&missing, fallback.fetch_many(ctx, &missing).await?);
        if fetched.is_empty() {
            return Ok(loaded);
        }

        let items = encode_all(&fetched)?;
        self.write_back(ctx, items.clone(), opts).await?;
        loaded.extend(items);
        Ok(loaded)
    }

    // == MDelete ==
    /// Deletes `keys` from the store, returning how many existed.
    pub async fn mdelete(&self, ctx: &Context, keys: &[String]) -> Result<i64> {
        ctx.run(self.store.del(ctx, keys)).await
    }

    // == MRefresh ==
    /// Reloads `keys` through `fallback` without consulting the store, then
    /// caches and returns whatever it produced.
    ///
    /// Requested keys the fallback does not return are left untouched in
    /// both the store and `dst`; nothing is deleted. Without a fallback this
    /// is a no-op.
    pub async fn mrefresh<V>(
        &self,
        ctx: &Context,
        keys: &[String],
        dst: &mut HashMap<String, V>,
        fallback: Option<&dyn BatchFallback<V>>,
        opts: CacheOptions,
    ) -> Result<()>
    where
        V: Serialize + DeserializeOwned + Send + 'static,
    {
        ctx.run(self.mrefresh_inner(ctx, keys, dst, fallback, opts))
            .await
    }

    async fn mrefresh_inner<V>(
        &self,
        ctx: &Context,
        keys: &[String],
        dst: &mut HashMap<String, V>,
        fallback: Option<&dyn BatchFallback<V>>,
        opts: CacheOptions,
    ) -> Result<()>
    where
        V: Serialize + DeserializeOwned + Send + 'static,
    {
        let Some(fallback) = fallback else {
            return Ok(());
        };
        if keys.is_empty() {
            return Ok(());
        }

        debug!(count = keys.len(), "refreshing keys from fallback");
        let fetched = retain_requested(keys, fallback.fetch_many(ctx, keys).await?);
        if fetched.is_empty() {
            return Ok(());
        }

        let items = encode_all(&fetched)?;
        self.write_back(ctx, items, opts).await?;
        dst.extend(fetched);
        Ok(())
    }

    // == Pass-through ==
    /// Reports, per key, whether the store holds a live entry.
    pub async fn exists(&self, ctx: &Context, keys: &[String]) -> Result<HashMap<String, bool>> {
        ctx.run(self.store.exists(ctx, keys)).await
    }

    /// Writes `items` directly, e.g. to prime the cache.
    pub async fn mset<V>(
        &self,
        ctx: &Context,
        items: &HashMap<String, V>,
        opts: CacheOptions,
    ) -> Result<()>
    where
        V: Serialize + Sync,
    {
        ctx.run(self.store.mset(ctx, items, opts.ttl)).await
    }

    async fn write_back(
        &self,
        ctx: &Context,
        items: HashMap<String, String>,
        opts: CacheOptions,
    ) -> Result<()> {
        let count = items.len();
        match self.store.mset_raw(ctx, items, opts.ttl).await {
            Ok(()) => {
                debug!(count, ttl = ?opts.ttl, "cached fallback results");
                Ok(())
            }
            Err(err) => {
                warn!(
                    count,
                    backend = self.store.name(),
                    error = %err,
                    "failed to cache fallback results"
                );
                Err(err)
            }
        }
    }
}

/// Completes the flight, except on cancellation: a cancelled leader
/// abandons instead so followers with live contexts retry.
fn publish(flight: FlightGuard, outcome: &Outcome) {
    match outcome {
        Err(err) if err.is_cancellation() => drop(flight),
        _ => flight.complete(outcome.clone()),
    }
}

fn decode_outcome<V: DeserializeOwned>(key: &str, outcome: Outcome) -> Result<Option<V>> {
    outcome?.map(|raw| decode(key, &raw)).transpose()
}

fn retain_requested<V>(requested: &[String], mut fetched: HashMap<String, V>) -> HashMap<String, V> {
    if fetched.is_empty() {
        return fetched;
    }
    let wanted: HashSet<&str> = requested.iter().map(String::as_str).collect();
    fetched.retain(|key, _| {
        let keep = wanted.contains(key.as_str());
        if !keep {
            debug!(key = %key, "ignoring fallback result for unrequested key");
        }
        keep
    });
    fetched
}

/// Encodes a fallback value for write-back, refusing payloads that would
/// not read back as `V`; caching them would poison the key until it expires.
fn encode_value<V: Serialize + DeserializeOwned>(key: &str, value: &V) -> Result<String> {
    let raw = encode(value)?;
    if let Err(err) = decode::<V>(key, &raw) {
        return Err(CacheError::Serialize(format!(
            "value for key '{key}' does not read back: {err}"
        )));
    }
    Ok(raw)
}

fn encode_all<V: Serialize + DeserializeOwned>(
    values: &HashMap<String, V>,
) -> Result<HashMap<String, String>> {
    values
        .iter()
        .map(|(key, value)| Ok((key.clone(), encode_value(key, value)?)))
        .collect()
}
