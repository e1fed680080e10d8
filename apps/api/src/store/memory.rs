//! In-process `KvStore` used when Redis is not configured, and in tests.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use super::{KvStore, StoreError};

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Hash(HashMap<String, String>),
}

#[derive(Debug, Clone)]
struct Slot {
    value: Value,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// Minimum time between sweeps of expired keys.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Expiry is checked on access, and writes also sweep every expired key at
/// most once per `SWEEP_INTERVAL`. Each command holds the lock for its
/// whole read-modify-write.
pub struct MemoryStore {
    slots: Mutex<HashMap<String, Slot>>,
    last_sweep: Mutex<Instant>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            last_sweep: Mutex::new(Instant::now()),
        }
    }

    fn sweep_if_due(&self, slots: &mut HashMap<String, Slot>, now: Instant) {
        {
            let mut last = self.last_sweep.lock();
            if now.duration_since(*last) < SWEEP_INTERVAL {
                return;
            }
            *last = now;
        }

        let before = slots.len();
        slots.retain(|_, slot| slot.is_live(now));
        let removed = before - slots.len();
        if removed > 0 {
            debug!(removed, "Swept expired keys from memory store");
        }
    }

    #[cfg(test)]
    fn key_count(&self) -> usize {
        self.slots.lock().len()
    }

    /// Applies `f` to the hash at `key`, creating it (without expiry) when
    /// absent or expired.
    fn with_hash<T>(
        &self,
        key: &str,
        f: impl FnOnce(&mut HashMap<String, String>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let now = Instant::now();
        let mut slots = self.slots.lock();
        self.sweep_if_due(&mut slots, now);
        let slot = slots
            .entry(key.to_string())
            .and_modify(|slot| {
                if !slot.is_live(now) {
                    *slot = Slot {
                        value: Value::Hash(HashMap::new()),
                        expires_at: None,
                    };
                }
            })
            .or_insert_with(|| Slot {
                value: Value::Hash(HashMap::new()),
                expires_at: None,
            });

        match &mut slot.value {
            Value::Hash(fields) => f(fields),
            Value::Str(_) => Err(StoreError::Unavailable(format!(
                "WRONGTYPE key '{key}' holds a string"
            ))),
        }
    }
}

fn parse_field<T: std::str::FromStr + Default>(
    key: &str,
    raw: Option<&String>,
) -> Result<T, StoreError> {
    match raw {
        None => Ok(T::default()),
        Some(v) => v.parse::<T>().map_err(|_| StoreError::NotNumeric {
            key: key.to_string(),
            value: v.clone(),
        }),
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = Instant::now();
        let mut slots = self.slots.lock();
        match slots.get(key) {
            Some(slot) if !slot.is_live(now) => {
                slots.remove(key);
                Ok(None)
            }
            Some(Slot {
                value: Value::Str(s),
                ..
            }) => Ok(Some(s.clone())),
            Some(_) => Err(StoreError::Unavailable(format!(
                "WRONGTYPE key '{key}' holds a hash"
            ))),
            None => Ok(None),
        }
    }

    async fn set_with_expiry(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let now = Instant::now();
        let slot = Slot {
            value: Value::Str(value.to_string()),
            expires_at: Some(now + ttl),
        };
        let mut slots = self.slots.lock();
        self.sweep_if_due(&mut slots, now);
        slots.insert(key.to_string(), slot);
        Ok(())
    }

    async fn increment_int(&self, key: &str, field: &str, by: i64) -> Result<i64, StoreError> {
        self.with_hash(key, |fields| {
            let next = parse_field::<i64>(key, fields.get(field))? + by;
            fields.insert(field.to_string(), next.to_string());
            Ok(next)
        })
    }

    async fn increment_float(&self, key: &str, field: &str, by: f64) -> Result<f64, StoreError> {
        self.with_hash(key, |fields| {
            let next = parse_field::<f64>(key, fields.get(field))? + by;
            fields.insert(field.to_string(), next.to_string());
            Ok(next)
        })
    }

    async fn get_all_fields(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let now = Instant::now();
        let slots = self.slots.lock();
        match slots.get(key) {
            Some(slot) if slot.is_live(now) => match &slot.value {
                Value::Hash(fields) => Ok(fields.clone()),
                Value::Str(_) => Err(StoreError::Unavailable(format!(
                    "WRONGTYPE key '{key}' holds a string"
                ))),
            },
            _ => Ok(HashMap::new()),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let now = Instant::now();
        if let Some(slot) = self.slots.lock().get_mut(key) {
            if slot.is_live(now) {
                slot.expires_at = Some(now + ttl);
            }
        }
        Ok(())
    }
}
