//! Engine assembly: wires configuration into a manager and its
//! collaborators. One engine per process (or per test); no hidden global
//! instances.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::adapters::{PaapiAdapter, RainforestAdapter};
use crate::cache::CacheLayer;
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::executor::RequestExecutor;
use crate::http::{HttpClient, ReqwestHttpClient};
use crate::manager::Manager;
use crate::provider::{Credentials, Provider, ProviderId};
use crate::rate_limit::RateLimiter;
use crate::request_log::RequestLog;
use crate::retry::RetryPolicy;
use crate::signing::HmacSigner;
use crate::stats::StatsRegistry;
use crate::store::{KvStore, MemoryKvStore};

/// A fully wired orchestration engine.
pub struct Engine {
    pub manager: Arc<Manager>,
    pub executor: Arc<RequestExecutor>,
    pub cache: Arc<CacheLayer>,
    pub limiter: Arc<RateLimiter>,
    pub request_log: Arc<RequestLog>,
    pub stats: Arc<StatsRegistry>,
}

impl Engine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder {
            config,
            http: None,
            store: None,
            clock: None,
            credentials: BTreeMap::new(),
            extra_providers: Vec::new(),
        }
    }
}

/// Builder with injectable collaborators; defaults are production-ready.
pub struct EngineBuilder {
    config: EngineConfig,
    http: Option<Arc<dyn HttpClient>>,
    store: Option<Arc<dyn KvStore>>,
    clock: Option<Arc<dyn Clock>>,
    credentials: BTreeMap<ProviderId, Credentials>,
    extra_providers: Vec<Arc<dyn Provider>>,
}

impl EngineBuilder {
    pub fn http(mut self, http: Arc<dyn HttpClient>) -> Self {
        self.http = Some(http);
        self
    }

    pub fn store(mut self, store: Arc<dyn KvStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn credentials(mut self, provider: ProviderId, credentials: Credentials) -> Self {
        self.credentials.insert(provider, credentials);
        self
    }

    /// Registers an additional provider implementation (appended after the
    /// built-in adapters, in call order).
    pub fn provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.extra_providers.push(provider);
        self
    }

    pub fn build(self) -> Engine {
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let http = self
            .http
            .unwrap_or_else(|| Arc::new(ReqwestHttpClient::new()));
        let store = self.store.unwrap_or_else(|| Arc::new(MemoryKvStore::new()));

        let cache = Arc::new(CacheLayer::new(
            self.config.cache.clone(),
            store.clone(),
            clock.clone(),
        ));
        let limiter = Arc::new(RateLimiter::new(
            self.config.rate_limits.clone(),
            clock.clone(),
        ));
        let request_log = Arc::new(RequestLog::new(self.config.request_logging, clock.clone()));
        let stats = Arc::new(StatsRegistry::new(store, clock.clone()));

        let retry = RetryPolicy {
            max_retries: self.config.retry.max_retries.max(1),
            retry_on_status: self.config.retry.retry_on_status.clone(),
            ..RetryPolicy::default()
        };
        let executor = Arc::new(
            RequestExecutor::new(
                http,
                cache.clone(),
                limiter.clone(),
                request_log.clone(),
                retry,
                clock,
            )
            .with_timeout_ms(self.config.request_timeout_ms),
        );

        let mut providers: Vec<Arc<dyn Provider>> = Vec::new();

        let paapi = PaapiAdapter::new(executor.clone(), Arc::new(HmacSigner));
        if let Some(credentials) = self.credentials.get(&ProviderId::Paapi) {
            match paapi.set_credentials(credentials.clone()) {
                Ok(()) => providers.push(Arc::new(paapi)),
                Err(error) => {
                    tracing::warn!(error = %error, "paapi credentials rejected, provider skipped")
                }
            }
        }

        let rainforest = RainforestAdapter::new(executor.clone());
        if let Some(credentials) = self.credentials.get(&ProviderId::Rainforest) {
            match rainforest.set_credentials(credentials.clone()) {
                Ok(()) => providers.push(Arc::new(rainforest)),
                Err(error) => {
                    tracing::warn!(error = %error, "rainforest credentials rejected, provider skipped")
                }
            }
        }

        providers.extend(self.extra_providers);

        let manager = Arc::new(Manager::new(
            providers,
            self.config.selection_policy,
            self.config.primary_provider,
            self.config.fallback_provider,
            stats.clone(),
        ));

        Engine {
            manager,
            executor,
            cache,
            limiter,
            request_log,
            stats,
        }
    }
}
