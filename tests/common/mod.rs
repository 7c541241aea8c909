//! Shared helpers for integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use async_trait::async_trait;
use cache_coordinator::{CacheError, Context, Coordinator, MemoryStore, Result, Store};

static TRACING: Once = Once::new();

/// Routes coordinator logs to the test output, filtered by `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "cache_coordinator=debug".into()),
            )
            .with_test_writer()
            .try_init();
    });
}

pub fn keys(names: &[&str]) -> Vec<String> {
    names.iter().map(|k| k.to_string()).collect()
}

pub fn coordinator() -> (Coordinator, Arc<MemoryStore>) {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    (Coordinator::new(store.clone()), store)
}

// == Flaky Store ==
/// Memory store whose reads or writes can be switched to fail.
#[derive(Debug, Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of mset calls attempted.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn check_reads(&self) -> Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(CacheError::store("flaky", "read refused"));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for FlakyStore {
    fn name(&self) -> &'static str {
        "flaky"
    }

    async fn get_raw(&self, ctx: &Context, key: &str) -> Result<Option<String>> {
        self.check_reads()?;
        self.inner.get_raw(ctx, key).await
    }

    async fn mget_raw(&self, ctx: &Context, keys: &[String]) -> Result<HashMap<String, String>> {
        self.check_reads()?;
        self.inner.mget_raw(ctx, keys).await
    }

    async fn exists(&self, ctx: &Context, keys: &[String]) -> Result<HashMap<String, bool>> {
        self.check_reads()?;
        self.inner.exists(ctx, keys).await
    }

    async fn mset_raw(
        &self,
        ctx: &Context,
        items: HashMap<String, String>,
        ttl: Duration,
    ) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CacheError::store("flaky", "write refused"));
        }
        self.inner.mset_raw(ctx, items, ttl).await
    }

    async fn del(&self, ctx: &Context, keys: &[String]) -> Result<i64> {
        self.inner.del(ctx, keys).await
    }
}
