//! Per-call cache options.

use std::time::Duration;

use crate::config::Config;

// == Cache Options ==
/// Options applied to entries written during one coordinator call.
///
/// The default has a zero TTL, which means written entries never expire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheOptions {
    /// Lifetime of entries written by this call, zero = no expiry
    pub ttl: Duration,
}

impl CacheOptions {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self { ttl }
    }

    /// Options carrying the configured default TTL.
    pub fn from_config(config: &Config) -> Self {
        Self::with_ttl(config.default_ttl())
    }
}
