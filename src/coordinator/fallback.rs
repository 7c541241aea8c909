//! Fallback contracts
//!
//! Caller-supplied producers of authoritative values, invoked by the
//! coordinator on a cache miss.

use std::collections::HashMap;
use std::future::Future;

use async_trait::async_trait;

use crate::context::Context;
use crate::error::Result;

/// Loads a single key from the data source.
///
/// `Ok(None)` means the key does not exist; it is not cached.
#[async_trait]
pub trait Fallback<V>: Send + Sync {
    async fn fetch(&self, ctx: &Context, key: &str) -> Result<Option<V>>;
}

/// Loads many keys from the data source in one call.
///
/// Keys missing from the returned map do not exist; they are neither
/// cached nor returned to the caller. Entries for keys that were not
/// requested are ignored.
#[async_trait]
pub trait BatchFallback<V>: Send + Sync {
    async fn fetch_many(&self, ctx: &Context, keys: &[String]) -> Result<HashMap<String, V>>;
}

// == Closure Adapters ==
/// [`Fallback`] backed by an async closure, see [`fallback_fn`].
#[derive(Clone)]
pub struct FnFallback<F>(F);

/// Wraps `Fn(Context, String) -> impl Future<Output = Result<Option<V>>>`.
///
/// ```ignore
/// let users = fallback_fn(move |_ctx, key| {
///     let db = db.clone();
///     async move { db.load_user(&key).await }
/// });
/// ```
pub fn fallback_fn<V, F, Fut>(f: F) -> FnFallback<F>
where
    F: Fn(Context, String) -> Fut,
    Fut: Future<Output = Result<Option<V>>>,
{
    FnFallback(f)
}

#[async_trait]
impl<V, F, Fut> Fallback<V> for FnFallback<F>
where
    V: Send + 'static,
    F: Fn(Context, String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<V>>> + Send + 'static,
{
    async fn fetch(&self, ctx: &Context, key: &str) -> Result<Option<V>> {
        (self.0)(ctx.clone(), key.to_string()).await
    }
}

/// [`BatchFallback`] backed by an async closure, see [`batch_fallback_fn`].
#[derive(Clone)]
pub struct FnBatchFallback<F>(F);

/// Wraps `Fn(Context, Vec<String>) -> impl Future<Output = Result<HashMap<String, V>>>`.
pub fn batch_fallback_fn<V, F, Fut>(f: F) -> FnBatchFallback<F>
where
    F: Fn(Context, Vec<String>) -> Fut,
    Fut: Future<Output = Result<HashMap<String, V>>>,
{
    FnBatchFallback(f)
}

#[async_trait]
impl<V, F, Fut> BatchFallback<V> for FnBatchFallback<F>
where
    V: Send + 'static,
    F: Fn(Context, Vec<String>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<HashMap<String, V>>> + Send + 'static,
{
    async fn fetch_many(&self, ctx: &Context, keys: &[String]) -> Result<HashMap<String, V>> {
        (self.0)(ctx.clone(), keys.to_vec()).await
    }
}
