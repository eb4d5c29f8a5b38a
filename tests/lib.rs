//! Shared helpers for the merchx integration tests.

use std::sync::Arc;
use std::time::Duration;

use merchx_core::clock::ManualClock;
use merchx_core::{
    Backoff, CacheConfig, CacheLayer, HttpClient, Manager, MemoryKvStore, Provider, ProviderId,
    RateLimitConfig, RateLimiter, RequestExecutor, RequestLog, RetryPolicy, SelectionPolicy,
    StatsRegistry,
};
use merchx_queue::{JobExecutor, MemoryJobStore, QueueEngine};

/// Executor wired for offline tests: manual clock, in-memory stores, and a
/// millisecond fixed backoff so retry loops finish instantly.
pub fn offline_executor(
    http: Arc<dyn HttpClient>,
    clock: Arc<ManualClock>,
    max_retries: u32,
) -> Arc<RequestExecutor> {
    let backend = Arc::new(MemoryKvStore::with_clock(clock.clone()));
    Arc::new(RequestExecutor::new(
        http,
        Arc::new(CacheLayer::new(
            CacheConfig::default(),
            backend,
            clock.clone(),
        )),
        Arc::new(RateLimiter::new(RateLimitConfig::default(), clock.clone())),
        Arc::new(RequestLog::new(true, clock.clone())),
        RetryPolicy {
            max_retries,
            backoff: Backoff::Fixed {
                delay: Duration::from_millis(1),
            },
            ..RetryPolicy::default()
        },
        clock,
    ))
}

pub fn stats_registry(clock: Arc<ManualClock>) -> Arc<StatsRegistry> {
    Arc::new(StatsRegistry::new(
        Arc::new(MemoryKvStore::with_clock(clock.clone())),
        clock,
    ))
}

/// Priority-policy manager over the given providers.
pub fn manager_over(
    providers: Vec<Arc<dyn Provider>>,
    primary: ProviderId,
    fallback: Option<ProviderId>,
    clock: Arc<ManualClock>,
) -> Arc<Manager> {
    Arc::new(Manager::new(
        providers,
        SelectionPolicy::Priority,
        primary,
        fallback,
        stats_registry(clock),
    ))
}

/// Queue engine over an in-memory store and the given job executor.
pub fn queue_over(
    executor: Arc<dyn JobExecutor>,
    clock: Arc<ManualClock>,
) -> (QueueEngine, Arc<MemoryJobStore>) {
    let store = Arc::new(MemoryJobStore::new());
    let engine = QueueEngine::new(
        store.clone(),
        executor,
        merchx_core::QueueConfig::default(),
        clock,
    );
    (engine, store)
}
