//! Response cache: request-scoped memory tier over a durable KV backend,
//! with per-type TTLs, tag-based group invalidation, and statistics.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use time::Duration;

use crate::clock::Clock;
use crate::provider::ProviderId;
use crate::store::KvStore;

const BACKEND_PREFIX: &str = "merchx_cache:";
const TAGS_KEY: &str = "merchx_cache_tags";

/// TTL policy per cache type, with a global default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    pub enabled: bool,
    pub default_ttl_secs: u64,
    pub ttl_by_type: BTreeMap<String, u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let mut ttl_by_type = BTreeMap::new();
        ttl_by_type.insert(String::from("product"), 3_600);
        ttl_by_type.insert(String::from("search"), 1_800);
        ttl_by_type.insert(String::from("variations"), 7_200);
        ttl_by_type.insert(String::from("categories"), 86_400);
        ttl_by_type.insert(String::from("bestsellers"), 3_600);
        ttl_by_type.insert(String::from("offers"), 900);
        ttl_by_type.insert(String::from("reviews"), 21_600);

        Self {
            enabled: true,
            default_ttl_secs: 3_600,
            ttl_by_type,
        }
    }
}

impl CacheConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Resolves the TTL by prefix-matching the key against configured type
    /// names, falling back to the global default.
    pub fn ttl_for_key(&self, key: &str) -> u64 {
        self.ttl_by_type
            .iter()
            .find(|(cache_type, _)| key.starts_with(cache_type.as_str()))
            .map(|(_, ttl)| *ttl)
            .unwrap_or(self.default_ttl_secs)
    }

    fn detect_type(&self, key: &str) -> String {
        self.ttl_by_type
            .keys()
            .find(|cache_type| key.starts_with(cache_type.as_str()))
            .cloned()
            .unwrap_or_else(|| String::from("unknown"))
    }
}

/// One cached value with its validity window and invalidation tags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub data: Value,
    pub created: i64,
    pub expires: i64,
    pub ttl_secs: u64,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub metadata: CacheEntryMeta,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheEntryMeta {
    pub size: usize,
    pub entry_type: String,
    /// Caller-supplied metadata carried alongside the entry.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl CacheEntry {
    fn is_valid_at(&self, now_unix: i64) -> bool {
        now_unix < self.expires
    }
}

/// Hit/miss/write counters, flushed to snapshots on demand.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub deletes: u64,
}

impl CacheStats {
    pub fn total_requests(&self) -> u64 {
        self.hits + self.misses
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.total_requests();
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// Aggregate size summary produced by [`CacheLayer::size_info`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheSizeInfo {
    pub total_entries: usize,
    pub total_size: usize,
    pub by_type: BTreeMap<String, TypeSize>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TypeSize {
    pub entries: usize,
    pub size: usize,
}

/// Entry handed to [`CacheLayer::warm`].
#[derive(Debug, Clone, Deserialize)]
pub struct WarmEntry {
    pub key: String,
    pub data: Value,
    #[serde(default)]
    pub ttl_secs: Option<u64>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

/// Two-tier cache with fail-open backend semantics: backend I/O errors are
/// indistinguishable from misses and never surface to the caller.
pub struct CacheLayer {
    config: CacheConfig,
    backend: Arc<dyn KvStore>,
    memory: Mutex<HashMap<String, CacheEntry>>,
    tags: Mutex<BTreeMap<String, Vec<String>>>,
    stats: Mutex<CacheStats>,
    clock: Arc<dyn Clock>,
}

impl CacheLayer {
    pub fn new(config: CacheConfig, backend: Arc<dyn KvStore>, clock: Arc<dyn Clock>) -> Self {
        let tags = Self::load_tags(backend.as_ref());
        Self {
            config,
            backend,
            memory: Mutex::new(HashMap::new()),
            tags: Mutex::new(tags),
            stats: Mutex::new(CacheStats::default()),
            clock,
        }
    }

    fn load_tags(backend: &dyn KvStore) -> BTreeMap<String, Vec<String>> {
        backend
            .get(TAGS_KEY)
            .ok()
            .flatten()
            .and_then(|value| serde_json::from_value(value).ok())
            .unwrap_or_default()
    }

    fn save_tags(&self, tags: &BTreeMap<String, Vec<String>>) {
        let value = serde_json::to_value(tags).unwrap_or(Value::Null);
        if let Err(error) = self.backend.set(TAGS_KEY, value, None) {
            tracing::debug!(error = %error, "cache tag registry write failed");
        }
    }

    fn now_unix(&self) -> i64 {
        self.clock.now().unix_timestamp()
    }

    fn backend_key(key: &str) -> String {
        format!("{BACKEND_PREFIX}{key}")
    }

    /// Reads a value, checking the memory tier first and promoting backend
    /// hits into it. Expired entries are deleted and counted as misses.
    pub fn get(&self, key: &str) -> Option<Value> {
        if !self.config.enabled {
            self.stats.lock().expect("cache stats lock is not poisoned").misses += 1;
            return None;
        }

        let now = self.now_unix();

        {
            let mut memory = self.memory.lock().expect("cache memory lock is not poisoned");
            match memory.get(key) {
                Some(entry) if entry.is_valid_at(now) => {
                    let data = entry.data.clone();
                    self.stats.lock().expect("cache stats lock is not poisoned").hits += 1;
                    return Some(data);
                }
                Some(_) => {
                    memory.remove(key);
                }
                None => {}
            }
        }

        match self.backend.get(&Self::backend_key(key)) {
            Ok(Some(raw)) => {
                if let Ok(entry) = serde_json::from_value::<CacheEntry>(raw) {
                    if entry.is_valid_at(now) {
                        let data = entry.data.clone();
                        self.memory
                            .lock()
                            .expect("cache memory lock is not poisoned")
                            .insert(key.to_owned(), entry);
                        self.stats.lock().expect("cache stats lock is not poisoned").hits += 1;
                        return Some(data);
                    }
                }
                // Expired or unparsable: remove and report a miss.
                self.delete(key);
            }
            Ok(None) => {}
            Err(error) => {
                tracing::debug!(key, error = %error, "cache backend read failed, treating as miss");
            }
        }

        self.stats.lock().expect("cache stats lock is not poisoned").misses += 1;
        None
    }

    pub fn get_or(&self, key: &str, default: Value) -> Value {
        self.get(key).unwrap_or(default)
    }

    /// Writes through both tiers. TTL falls back to the type-detection rule
    /// when not supplied.
    pub fn set(
        &self,
        key: &str,
        data: Value,
        ttl_secs: Option<u64>,
        tags: BTreeSet<String>,
    ) -> bool {
        self.set_with_metadata(key, data, ttl_secs, tags, Map::new())
    }

    /// Like [`Self::set`], carrying caller metadata on the entry.
    pub fn set_with_metadata(
        &self,
        key: &str,
        data: Value,
        ttl_secs: Option<u64>,
        tags: BTreeSet<String>,
        extra: Map<String, Value>,
    ) -> bool {
        if !self.config.enabled {
            return false;
        }

        let ttl = ttl_secs.unwrap_or_else(|| self.config.ttl_for_key(key));
        let now = self.now_unix();
        let size = data.to_string().len();
        let entry = CacheEntry {
            data,
            created: now,
            expires: now + ttl as i64,
            ttl_secs: ttl,
            tags: tags.clone(),
            metadata: CacheEntryMeta {
                size,
                entry_type: self.config.detect_type(key),
                extra,
            },
        };

        let raw = match serde_json::to_value(&entry) {
            Ok(raw) => raw,
            Err(_) => return false,
        };

        self.memory
            .lock()
            .expect("cache memory lock is not poisoned")
            .insert(key.to_owned(), entry);

        match self
            .backend
            .set(&Self::backend_key(key), raw, Some(Duration::seconds(ttl as i64)))
        {
            Ok(()) => {
                self.stats.lock().expect("cache stats lock is not poisoned").writes += 1;
                if !tags.is_empty() {
                    self.register_tags(key, &tags);
                }
                true
            }
            Err(error) => {
                tracing::debug!(key, error = %error, "cache backend write failed");
                false
            }
        }
    }

    fn register_tags(&self, key: &str, tags: &BTreeSet<String>) {
        let mut registry = self.tags.lock().expect("cache tags lock is not poisoned");
        for tag in tags {
            let keys = registry.entry(tag.clone()).or_default();
            if !keys.iter().any(|existing| existing == key) {
                keys.push(key.to_owned());
            }
        }
        self.save_tags(&registry);
    }

    pub fn delete(&self, key: &str) -> bool {
        self.memory
            .lock()
            .expect("cache memory lock is not poisoned")
            .remove(key);

        let removed = self
            .backend
            .delete(&Self::backend_key(key))
            .unwrap_or(false);

        if removed {
            self.stats.lock().expect("cache stats lock is not poisoned").deletes += 1;

            let mut registry = self.tags.lock().expect("cache tags lock is not poisoned");
            let mut changed = false;
            registry.retain(|_, keys| {
                let before = keys.len();
                keys.retain(|existing| existing != key);
                changed |= keys.len() != before;
                !keys.is_empty()
            });
            if changed {
                self.save_tags(&registry);
            }
        }

        removed
    }

    /// Removes every entry carrying `tag`; returns the number deleted.
    pub fn delete_by_tag(&self, tag: &str) -> usize {
        let keys = {
            let registry = self.tags.lock().expect("cache tags lock is not poisoned");
            registry.get(tag).cloned().unwrap_or_default()
        };

        keys.iter().filter(|key| self.delete(key)).count()
    }

    /// Wipes both tiers, the tag registry, and the statistics.
    pub fn clear_all(&self) {
        self.memory
            .lock()
            .expect("cache memory lock is not poisoned")
            .clear();
        if let Err(error) = self.backend.delete_prefix(BACKEND_PREFIX) {
            tracing::debug!(error = %error, "cache backend clear failed");
        }

        let mut registry = self.tags.lock().expect("cache tags lock is not poisoned");
        registry.clear();
        self.save_tags(&registry);
        drop(registry);

        *self.stats.lock().expect("cache stats lock is not poisoned") = CacheStats::default();
    }

    pub fn exists(&self, key: &str) -> bool {
        if !self.config.enabled {
            return false;
        }

        let now = self.now_unix();
        if let Some(entry) = self
            .memory
            .lock()
            .expect("cache memory lock is not poisoned")
            .get(key)
        {
            return entry.is_valid_at(now);
        }

        self.raw_entry(key)
            .map(|entry| entry.is_valid_at(now))
            .unwrap_or(false)
    }

    /// Remaining seconds of validity, or `None` when absent.
    pub fn get_ttl(&self, key: &str) -> Option<u64> {
        let entry = self.raw_entry(key)?;
        let remaining = entry.expires - self.now_unix();
        Some(remaining.max(0) as u64)
    }

    /// Extends an entry's validity, preserving data and tags. `extra_ttl`
    /// replaces the window; without it the original TTL restarts from now.
    pub fn touch(&self, key: &str, extra_ttl_secs: Option<u64>) -> bool {
        let Some(entry) = self.raw_entry(key) else {
            return false;
        };

        let ttl = extra_ttl_secs.unwrap_or(entry.ttl_secs);
        self.set_with_metadata(key, entry.data, Some(ttl), entry.tags, entry.metadata.extra)
    }

    fn raw_entry(&self, key: &str) -> Option<CacheEntry> {
        if let Some(entry) = self
            .memory
            .lock()
            .expect("cache memory lock is not poisoned")
            .get(key)
        {
            return Some(entry.clone());
        }

        self.backend
            .get(&Self::backend_key(key))
            .ok()
            .flatten()
            .and_then(|raw| serde_json::from_value(raw).ok())
    }

    /// Bulk preload; returns the number of entries written.
    pub fn warm(&self, entries: Vec<WarmEntry>) -> usize {
        entries
            .into_iter()
            .filter(|entry| self.set(&entry.key, entry.data.clone(), entry.ttl_secs, entry.tags.clone()))
            .count()
    }

    pub fn statistics(&self) -> CacheStats {
        *self.stats.lock().expect("cache stats lock is not poisoned")
    }

    /// Entry count and byte totals per cache type, scanned via backend
    /// prefix lookup. Backend failures report an empty summary.
    pub fn size_info(&self) -> CacheSizeInfo {
        let mut info = CacheSizeInfo::default();
        let keys = match self.backend.keys_with_prefix(BACKEND_PREFIX) {
            Ok(keys) => keys,
            Err(error) => {
                tracing::debug!(error = %error, "cache size scan failed");
                return info;
            }
        };

        for key in keys {
            let Ok(Some(raw)) = self.backend.get(&key) else {
                continue;
            };
            let Ok(entry) = serde_json::from_value::<CacheEntry>(raw) else {
                continue;
            };
            info.total_entries += 1;
            info.total_size += entry.metadata.size;
            let per_type = info.by_type.entry(entry.metadata.entry_type).or_default();
            per_type.entries += 1;
            per_type.size += entry.metadata.size;
        }

        info
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Deterministic cache key: sorted parameters, null/empty values
    /// dropped, type/provider/marketplace/primary-identifier path segments,
    /// and a hash over whatever parameters remain.
    ///
    /// Any change here breaks cross-process cache compatibility.
    pub fn generate_key(
        &self,
        cache_type: &str,
        params: &BTreeMap<String, String>,
        provider: Option<ProviderId>,
    ) -> String {
        let mut params: BTreeMap<&str, &str> = params
            .iter()
            .filter(|(_, value)| !value.is_empty())
            .map(|(key, value)| (key.as_str(), value.as_str()))
            .collect();

        let mut components: Vec<String> = vec![cache_type.to_owned()];

        if let Some(provider) = provider {
            components.push(provider.as_str().to_owned());
        }

        if let Some(marketplace) = params.remove("marketplace") {
            components.push(marketplace.to_owned());
        }

        match cache_type {
            "product" => {
                if let Some(asin) = params.remove("asin") {
                    components.push(asin.to_owned());
                }
            }
            "search" => {
                if let Some(keyword) = params.remove("keyword") {
                    components.push(slugify(keyword));
                }
            }
            _ => {}
        }

        if !params.is_empty() {
            components.push(hash_params(&params));
        }

        components.join("_")
    }
}

fn slugify(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    let mut previous_dash = true;

    for ch in value.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            previous_dash = false;
        } else if !previous_dash {
            slug.push('-');
            previous_dash = true;
        }
    }

    while slug.ends_with('-') {
        slug.pop();
    }

    slug
}

fn hash_params(params: &BTreeMap<&str, &str>) -> String {
    let joined = params
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&");

    let digest = Sha256::digest(joined.as_bytes());
    hex::encode(digest)[..32].to_owned()
}
