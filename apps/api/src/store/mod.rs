//! Key-value store adapter: the only durable state the AI layer touches.
//!
//! Cache entries, usage counters and anything else that must survive a
//! request live behind `KvStore`. Every method maps to exactly one store
//! command, so there is nothing to roll back when a call fails halfway.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub mod memory;
pub mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("Stored value for '{key}' is not numeric: {value}")]
    NotNumeric { key: String, value: String },

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Minimal TTL-capable string/hash store.
///
/// Increments must be atomic at the store level: concurrent writers on the
/// same hash field never lose an update.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration)
        -> Result<(), StoreError>;

    /// Adds `by` to an integer hash field, returning the new value.
    async fn increment_int(&self, key: &str, field: &str, by: i64) -> Result<i64, StoreError>;

    /// Adds `by` to a float hash field, returning the new value.
    async fn increment_float(&self, key: &str, field: &str, by: f64) -> Result<f64, StoreError>;

    /// Returns every field of a hash; an absent key yields an empty map.
    async fn get_all_fields(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;
}

/// Whole seconds for a TTL, never zero (a zero expiry deletes the key in Redis).
pub(crate) fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}
