//! Per-scope fixed-window request budgeting.
//!
//! Scopes are `provider:endpoint` strings so one endpoint's exhaustion
//! never blocks another. Windows are created lazily on first use and reset
//! automatically once `window_secs` has elapsed since the window origin.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::clock::Clock;

/// Budget for one scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeLimit {
    pub limit: u32,
    pub window_secs: u64,
}

impl ScopeLimit {
    pub const fn new(limit: u32, window_secs: u64) -> Self {
        Self { limit, window_secs }
    }
}

/// Per-scope limits with a global default of 10 requests / 60 seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub default: ScopeLimit,
    #[serde(default)]
    pub scopes: BTreeMap<String, ScopeLimit>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            default: ScopeLimit::new(10, 60),
            scopes: BTreeMap::new(),
        }
    }
}

impl RateLimitConfig {
    pub fn with_scope(mut self, scope: impl Into<String>, limit: ScopeLimit) -> Self {
        self.scopes.insert(scope.into(), limit);
        self
    }

    pub fn limit_for(&self, scope: &str) -> ScopeLimit {
        self.scopes.get(scope).copied().unwrap_or(self.default)
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: OffsetDateTime,
    count: u32,
}

/// Sliding-origin fixed-window limiter shared by all providers.
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: Mutex<HashMap<String, Window>>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
            clock,
        }
    }

    fn window_expired(&self, window: &Window, limit: ScopeLimit, now: OffsetDateTime) -> bool {
        (now - window.started).whole_seconds() >= limit.window_secs as i64
    }

    /// Whether a new request is currently permitted for `scope`. Scopes
    /// with no prior record are always permitted. Never records anything.
    pub fn can_make_request(&self, scope: &str) -> bool {
        let limit = self.config.limit_for(scope);
        let now = self.clock.now();
        let mut windows = self.windows.lock().expect("rate window lock is not poisoned");

        match windows.get(scope) {
            Some(window) => {
                if self.window_expired(window, limit, now) {
                    windows.remove(scope);
                    true
                } else {
                    window.count < limit.limit
                }
            }
            None => true,
        }
    }

    /// Counts one accepted request against `scope`, starting a window at
    /// the current time when none exists.
    pub fn record_request(&self, scope: &str) {
        let limit = self.config.limit_for(scope);
        let now = self.clock.now();
        let mut windows = self.windows.lock().expect("rate window lock is not poisoned");

        match windows.get_mut(scope) {
            Some(window) if !self.window_expired(window, limit, now) => {
                window.count = window.count.saturating_add(1);
            }
            _ => {
                windows.insert(scope.to_owned(), Window { started: now, count: 1 });
            }
        }
    }

    /// Requests still available in the current window.
    pub fn remaining(&self, scope: &str) -> u32 {
        let limit = self.config.limit_for(scope);
        let now = self.clock.now();
        let windows = self.windows.lock().expect("rate window lock is not poisoned");

        match windows.get(scope) {
            Some(window) if !self.window_expired(window, limit, now) => {
                limit.limit.saturating_sub(window.count)
            }
            _ => limit.limit,
        }
    }

    /// When the current window opens again. `None` when no window is
    /// active, i.e. a request would be admitted immediately.
    pub fn reset_at(&self, scope: &str) -> Option<OffsetDateTime> {
        let limit = self.config.limit_for(scope);
        let now = self.clock.now();
        let windows = self.windows.lock().expect("rate window lock is not poisoned");

        windows.get(scope).and_then(|window| {
            if self.window_expired(window, limit, now) {
                None
            } else {
                Some(window.started + time::Duration::seconds(limit.window_secs as i64))
            }
        })
    }

    pub fn limit_for(&self, scope: &str) -> ScopeLimit {
        self.config.limit_for(scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use time::Duration;

    fn limiter(limit: u32, window_secs: u64) -> (RateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let config = RateLimitConfig {
            default: ScopeLimit::new(limit, window_secs),
            scopes: BTreeMap::new(),
        };
        (RateLimiter::new(config, clock.clone()), clock)
    }

    #[test]
    fn unknown_scope_is_always_permitted() {
        let (limiter, _clock) = limiter(10, 60);
        assert!(limiter.can_make_request("paapi:product"));
        assert_eq!(limiter.remaining("paapi:product"), 10);
    }

    #[test]
    fn exhausts_after_limit_and_resets_after_window() {
        let (limiter, clock) = limiter(3, 60);

        for _ in 0..3 {
            assert!(limiter.can_make_request("paapi:search"));
            limiter.record_request("paapi:search");
        }

        assert!(!limiter.can_make_request("paapi:search"));
        assert_eq!(limiter.remaining("paapi:search"), 0);
        assert!(limiter.reset_at("paapi:search").is_some());

        clock.advance(Duration::seconds(61));
        assert!(limiter.can_make_request("paapi:search"));
        assert_eq!(limiter.remaining("paapi:search"), 3);
        assert!(limiter.reset_at("paapi:search").is_none());
    }

    #[test]
    fn scopes_are_isolated() {
        let (limiter, _clock) = limiter(1, 60);

        limiter.record_request("paapi:search");
        assert!(!limiter.can_make_request("paapi:search"));
        assert!(limiter.can_make_request("paapi:product"));
        assert!(limiter.can_make_request("rainforest:search"));
    }

    #[test]
    fn per_scope_overrides_beat_the_default() {
        let clock = Arc::new(ManualClock::starting_now());
        let config = RateLimitConfig::default()
            .with_scope("paapi:search", ScopeLimit::new(1, 60));
        let limiter = RateLimiter::new(config, clock);

        limiter.record_request("paapi:search");
        limiter.record_request("paapi:product");

        assert!(!limiter.can_make_request("paapi:search"));
        assert!(limiter.can_make_request("paapi:product"));
    }

    #[test]
    fn recording_into_expired_window_starts_fresh() {
        let (limiter, clock) = limiter(2, 60);

        limiter.record_request("scope");
        limiter.record_request("scope");
        clock.advance(Duration::seconds(61));

        limiter.record_request("scope");
        assert!(limiter.can_make_request("scope"));
        assert_eq!(limiter.remaining("scope"), 1);
    }
}
