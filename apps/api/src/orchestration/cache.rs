//! Response Cache: content-addressed results with a fixed TTL.
//!
//! Caching is an optimization only: every store failure reads as a miss and
//! every write failure is reported to the caller's detached task, never to
//! the request path. Expiry is left entirely to the store's TTL.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::orchestration::Operation;
use crate::store::{KvStore, StoreError};

const KEY_PREFIX: &str = "ai:cache:";
/// Separates the hashed components so ("ab", "c") and ("a", "bc") differ.
const FIELD_SEPARATOR: u8 = 0x1f;

/// Deterministic SHA-256 key for (operation, input, options).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Options are canonicalized first: object keys sorted at every depth,
    /// and `null` treated the same as `{}`.
    pub fn compute(operation: Operation, input: &str, options: &Value) -> Self {
        let options = canonical_json(options);

        let mut hasher = Sha256::new();
        hasher.update(operation.as_str().as_bytes());
        hasher.update([FIELD_SEPARATOR]);
        hasher.update(input.as_bytes());
        hasher.update([FIELD_SEPARATOR]);
        hasher.update(options.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn store_key(&self) -> String {
        format!("{KEY_PREFIX}{}", self.as_str())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable serialization of an options value.
fn canonical_json(options: &Value) -> String {
    match options {
        Value::Null => "{}".to_string(),
        other => sort_keys(other).to_string(),
    }
}

fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut sorted = Map::new();
            for (k, v) in entries {
                sorted.insert(k.clone(), sort_keys(v));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

#[derive(Clone)]
pub struct ResponseCache {
    store: Arc<dyn KvStore>,
    ttl: Duration,
    enabled: bool,
}

impl ResponseCache {
    pub fn new(store: Arc<dyn KvStore>, ttl: Duration, enabled: bool) -> Self {
        Self {
            store,
            ttl,
            enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Never-computed, expired, unreadable and undecodable all return `None`.
    pub async fn get<T: DeserializeOwned>(&self, key: &Fingerprint) -> Option<T> {
        if !self.enabled {
            return None;
        }
        let raw = match self.store.get(&key.store_key()).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(fingerprint = %key, "Cache read failed, bypassing cache: {e}");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => {
                debug!(fingerprint = %key, "Cache hit");
                Some(value)
            }
            Err(e) => {
                warn!(fingerprint = %key, "Cached payload undecodable, treating as miss: {e}");
                None
            }
        }
    }

    /// Stores an already-serialized result, overwriting any previous entry.
    pub async fn put(&self, key: &Fingerprint, payload: &str) -> Result<(), StoreError> {
        if !self.enabled {
            return Ok(());
        }
        self.store
            .set_with_expiry(&key.store_key(), payload, self.ttl)
            .await
    }
}
