//! Error types for the cache coordinator
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for store, fallback and coordinator failures.
///
/// A missing or expired key is never an error; it is reported as `None`
/// or as an absent map entry.
///
/// The type is `Clone` so a single fallback outcome can be handed to every
/// caller waiting on the same in-flight key.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// Backend read or write failure
    #[error("Store error ({backend}): {message}")]
    Store { backend: String, message: String },

    /// The data source behind a fallback failed
    #[error("Fallback error: {0}")]
    Fallback(String),

    /// A value could not be encoded for the store
    #[error("Serialization error: {0}")]
    Serialize(String),

    /// A stored or fetched payload does not decode into the requested type
    #[error("Deserialization error for key '{key}': {message}")]
    Deserialize { key: String, message: String },

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Cache is full and eviction failed
    #[error("Cache full: {0}")]
    CacheFull(String),

    /// The operation's context was cancelled
    #[error("Operation cancelled")]
    Cancelled,

    /// The operation's context deadline passed
    #[error("Deadline exceeded")]
    DeadlineExceeded,
}

impl CacheError {
    /// Builds a [`CacheError::Store`] for the named backend.
    pub fn store(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Store {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Builds a [`CacheError::Fallback`].
    pub fn fallback(message: impl Into<String>) -> Self {
        Self::Fallback(message.into())
    }

    /// True for `Cancelled` and `DeadlineExceeded`.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache coordinator.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display() {
        let err = CacheError::store("memory", "disk on fire");
        assert_eq!(err.to_string(), "Store error (memory): disk on fire");
    }

    #[test]
    fn test_deserialize_error_names_key() {
        let err = CacheError::Deserialize {
            key: "user:1".to_string(),
            message: "invalid type".to_string(),
        };
        assert!(err.to_string().contains("user:1"));
    }

    #[test]
    fn test_is_cancellation() {
        assert!(CacheError::Cancelled.is_cancellation());
        assert!(CacheError::DeadlineExceeded.is_cancellation());
        assert!(!CacheError::fallback("boom").is_cancellation());
    }
}
