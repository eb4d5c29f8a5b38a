//! Per-provider usage statistics with cadenced persistence.
//!
//! Statistics are advisory (least-used selection and reporting), so writes
//! to the durable store happen every `FLUSH_EVERY` updates rather than per
//! call; the small durability window is an accepted trade.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::clock::Clock;
use crate::provider::ProviderId;
use crate::store::KvStore;

const STATS_KEY: &str = "merchx_provider_stats";
const FLUSH_EVERY: u64 = 10;

/// Append-only counters for one provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderStats {
    pub total_requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub total_response_time_ms: u64,
    #[serde(with = "time::serde::rfc3339::option")]
    #[serde(default)]
    pub last_used: Option<OffsetDateTime>,
}

impl ProviderStats {
    pub fn average_response_time_ms(&self) -> f64 {
        if self.successes == 0 {
            0.0
        } else {
            self.total_response_time_ms as f64 / self.successes as f64
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            (self.successes as f64 / self.total_requests as f64) * 100.0
        }
    }
}

/// Registry of per-provider statistics, loaded at startup and flushed on a
/// cadence or explicitly at shutdown.
pub struct StatsRegistry {
    stats: Mutex<HashMap<ProviderId, ProviderStats>>,
    updates_since_flush: Mutex<u64>,
    repository: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
}

impl StatsRegistry {
    pub fn new(repository: Arc<dyn KvStore>, clock: Arc<dyn Clock>) -> Self {
        let stats = Self::load(repository.as_ref());
        Self {
            stats: Mutex::new(stats),
            updates_since_flush: Mutex::new(0),
            repository,
            clock,
        }
    }

    fn load(repository: &dyn KvStore) -> HashMap<ProviderId, ProviderStats> {
        repository
            .get(STATS_KEY)
            .ok()
            .flatten()
            .and_then(|value| serde_json::from_value(value).ok())
            .unwrap_or_default()
    }

    /// Success: counts the request, accumulates latency, stamps last_used.
    pub fn record_success(&self, provider: ProviderId, elapsed_ms: u64) {
        {
            let mut stats = self.stats.lock().expect("stats lock is not poisoned");
            let entry = stats.entry(provider).or_default();
            entry.total_requests += 1;
            entry.successes += 1;
            entry.total_response_time_ms += elapsed_ms;
            entry.last_used = Some(self.clock.now());
        }
        self.maybe_flush();
    }

    /// Failure: counted without latency, per the orchestration contract.
    pub fn record_failure(&self, provider: ProviderId) {
        {
            let mut stats = self.stats.lock().expect("stats lock is not poisoned");
            let entry = stats.entry(provider).or_default();
            entry.total_requests += 1;
            entry.failures += 1;
            entry.last_used = Some(self.clock.now());
        }
        self.maybe_flush();
    }

    fn maybe_flush(&self) {
        let should_flush = {
            let mut counter = self
                .updates_since_flush
                .lock()
                .expect("stats flush counter lock is not poisoned");
            *counter += 1;
            if *counter >= FLUSH_EVERY {
                *counter = 0;
                true
            } else {
                false
            }
        };

        if should_flush {
            self.flush();
        }
    }

    /// Persists the current counters to the repository.
    pub fn flush(&self) {
        let snapshot = self.snapshot();
        let value = serde_json::to_value(&snapshot).unwrap_or(Value::Null);
        if let Err(error) = self.repository.set(STATS_KEY, value, None) {
            tracing::debug!(error = %error, "provider statistics flush failed");
        }
    }

    pub fn get(&self, provider: ProviderId) -> ProviderStats {
        self.stats
            .lock()
            .expect("stats lock is not poisoned")
            .get(&provider)
            .copied()
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> HashMap<ProviderId, ProviderStats> {
        self.stats
            .lock()
            .expect("stats lock is not poisoned")
            .clone()
    }

    pub fn total_requests(&self, provider: ProviderId) -> u64 {
        self.get(provider).total_requests
    }
}
