//! Key/value repository backing the cache, tag registry, and statistics.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use time::{Duration, OffsetDateTime};

use crate::clock::{Clock, SystemClock};

/// Backend I/O failure. Callers in the cache path treat these as misses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreError {
    message: String,
}

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for StoreError {}

/// Durable key/value contract required from the hosting environment.
///
/// Atomic per-key get/set/delete with TTL support and prefix deletion; no
/// cross-key transactions are expected.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;
    fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), StoreError>;
    fn delete(&self, key: &str) -> Result<bool, StoreError>;
    fn delete_prefix(&self, prefix: &str) -> Result<usize, StoreError>;
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}

#[derive(Debug, Clone)]
struct StoredValue {
    value: Value,
    expires_at: Option<OffsetDateTime>,
}

/// In-process store used as the default backend and in tests.
pub struct MemoryKvStore {
    entries: Mutex<HashMap<String, StoredValue>>,
    clock: Arc<dyn Clock>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .expect("kv store lock is not poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let mut entries = self.entries.lock().expect("kv store lock is not poisoned");
        let now = self.clock.now();

        match entries.get(key) {
            Some(stored) => {
                if stored.expires_at.is_some_and(|at| at <= now) {
                    entries.remove(key);
                    Ok(None)
                } else {
                    Ok(Some(stored.value.clone()))
                }
            }
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), StoreError> {
        let expires_at = ttl.map(|ttl| self.clock.now() + ttl);
        let mut entries = self.entries.lock().expect("kv store lock is not poisoned");
        entries.insert(key.to_owned(), StoredValue { value, expires_at });
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().expect("kv store lock is not poisoned");
        Ok(entries.remove(key).is_some())
    }

    fn delete_prefix(&self, prefix: &str) -> Result<usize, StoreError> {
        let mut entries = self.entries.lock().expect("kv store lock is not poisoned");
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        Ok(before - entries.len())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let entries = self.entries.lock().expect("kv store lock is not poisoned");
        let now = self.clock.now();
        Ok(entries
            .iter()
            .filter(|(key, stored)| {
                key.starts_with(prefix) && !stored.expires_at.is_some_and(|at| at <= now)
            })
            .map(|(key, _)| key.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use serde_json::json;

    #[test]
    fn ttl_expiry_is_lazy() {
        let clock = Arc::new(ManualClock::starting_now());
        let store = MemoryKvStore::with_clock(clock.clone());

        store
            .set("k", json!({"v": 1}), Some(Duration::seconds(5)))
            .expect("set succeeds");
        assert!(store.get("k").expect("get succeeds").is_some());

        clock.advance(Duration::seconds(6));
        assert!(store.get("k").expect("get succeeds").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn delete_prefix_leaves_other_keys() {
        let store = MemoryKvStore::new();
        store.set("cache:a", json!(1), None).expect("set succeeds");
        store.set("cache:b", json!(2), None).expect("set succeeds");
        store.set("stats", json!(3), None).expect("set succeeds");

        assert_eq!(store.delete_prefix("cache:").expect("delete succeeds"), 2);
        assert!(store.get("stats").expect("get succeeds").is_some());
    }
}
