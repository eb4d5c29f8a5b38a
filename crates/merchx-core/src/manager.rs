//! Orchestration manager: provider selection, fallback, and statistics.
//!
//! Selection runs per call under the configured policy, the chosen
//! provider is tried first, and on failure the designated fallback and
//! then every remaining capable provider are attempted in registration
//! order. A fully exhausted call returns an empty result, never an error,
//! so batch callers keep going.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::config::SelectionPolicy;
use crate::provider::{
    Category, ConnectionTest, MultiProductResult, OffersResult, Operation, ProductRecord,
    Provider, ProviderFuture, ProviderId, QuotaInfo, RequestOptions, ReviewsSummary,
    SearchRequest, SearchResults, VariationsResult,
};
use crate::stats::{ProviderStats, StatsRegistry};

/// Provider registry and per-request orchestrator.
pub struct Manager {
    providers: Vec<Arc<dyn Provider>>,
    policy: SelectionPolicy,
    primary: ProviderId,
    fallback: Option<ProviderId>,
    stats: Arc<StatsRegistry>,
    round_robin: Mutex<usize>,
}

impl Manager {
    pub fn new(
        providers: Vec<Arc<dyn Provider>>,
        policy: SelectionPolicy,
        primary: ProviderId,
        fallback: Option<ProviderId>,
        stats: Arc<StatsRegistry>,
    ) -> Self {
        Self {
            providers,
            policy,
            primary,
            fallback,
            stats,
            round_robin: Mutex::new(0),
        }
    }

    pub fn provider(&self, id: ProviderId) -> Option<Arc<dyn Provider>> {
        self.providers
            .iter()
            .find(|provider| provider.id() == id)
            .cloned()
    }

    pub fn providers(&self) -> &[Arc<dyn Provider>] {
        &self.providers
    }

    pub fn statistics(&self) -> HashMap<ProviderId, ProviderStats> {
        self.stats.snapshot()
    }

    fn capable(&self, operation: Operation) -> Vec<Arc<dyn Provider>> {
        self.providers
            .iter()
            .filter(|provider| provider.capabilities().supports(operation))
            .cloned()
            .collect()
    }

    /// Ordered attempt chain for one call: the policy-selected provider,
    /// then the designated fallback, then the rest in registration order.
    /// Re-evaluated per call, never cached.
    fn plan(&self, operation: Operation) -> Vec<Arc<dyn Provider>> {
        let capable = self.capable(operation);
        if capable.is_empty() {
            return capable;
        }

        let selected = match self.policy {
            SelectionPolicy::Priority => capable
                .iter()
                .position(|provider| provider.id() == self.primary)
                .unwrap_or(0),
            SelectionPolicy::RoundRobin => {
                let mut cursor = self
                    .round_robin
                    .lock()
                    .expect("round robin cursor lock is not poisoned");
                let index = *cursor % capable.len();
                *cursor = cursor.wrapping_add(1);
                index
            }
            SelectionPolicy::LeastUsed => capable
                .iter()
                .enumerate()
                .min_by_key(|(index, provider)| {
                    (self.stats.total_requests(provider.id()), *index)
                })
                .map(|(index, _)| index)
                .unwrap_or(0),
            SelectionPolicy::Random => fastrand::usize(..capable.len()),
        };

        let mut chain = Vec::with_capacity(capable.len());
        chain.push(capable[selected].clone());

        if let Some(fallback) = self.fallback {
            if fallback != chain[0].id() {
                if let Some(provider) = capable.iter().find(|p| p.id() == fallback) {
                    chain.push(provider.clone());
                }
            }
        }

        for provider in &capable {
            if !chain.iter().any(|chosen| chosen.id() == provider.id()) {
                chain.push(provider.clone());
            }
        }

        chain
    }

    /// Runs `invoke` down the attempt chain, updating statistics per
    /// attempt. `None` means every capable provider failed.
    async fn run_with_fallback<T, F>(&self, operation: Operation, invoke: F) -> Option<T>
    where
        F: for<'a> Fn(&'a dyn Provider) -> ProviderFuture<'a, T>,
    {
        let chain = self.plan(operation);
        if chain.is_empty() {
            tracing::warn!(%operation, "no capable providers registered");
            return None;
        }

        let mut attempted = 0_usize;
        for provider in &chain {
            attempted += 1;
            let started = Instant::now();

            match invoke(provider.as_ref()).await {
                Ok(value) => {
                    let elapsed_ms = started.elapsed().as_millis() as u64;
                    self.stats.record_success(provider.id(), elapsed_ms);
                    if attempted > 1 {
                        tracing::debug!(
                            %operation,
                            provider = %provider.id(),
                            failed_attempts = attempted - 1,
                            "fallback provider succeeded"
                        );
                    }
                    return Some(value);
                }
                Err(error) => {
                    self.stats.record_failure(provider.id());
                    tracing::warn!(
                        %operation,
                        provider = %provider.id(),
                        code = error.code(),
                        error = %error,
                        "provider attempt failed"
                    );
                }
            }
        }

        tracing::warn!(%operation, attempted, "all providers exhausted");
        None
    }

    /// Search across providers; empty results when everything fails.
    pub async fn search_products(&self, request: SearchRequest) -> SearchResults {
        self.run_with_fallback(Operation::Search, |provider| {
            provider.search_products(request.clone())
        })
        .await
        .unwrap_or_default()
    }

    /// Single product lookup. `None` covers both "does not exist" and
    /// "every provider failed": absence is structural, not an error.
    pub async fn get_product(&self, asin: &str, options: RequestOptions) -> Option<ProductRecord> {
        if asin.trim().is_empty() {
            return None;
        }

        self.run_with_fallback(Operation::GetProduct, |provider| {
            provider.get_product(asin.to_owned(), options.clone())
        })
        .await
        .flatten()
    }

    /// Bulk retrieval: the identifier list is partitioned into chunks sized
    /// by the selected provider's declared limit, each chunk runs the full
    /// single-chunk fallback path, and failures accumulate per identifier.
    pub async fn get_multiple_products(
        &self,
        asins: Vec<String>,
        options: RequestOptions,
    ) -> MultiProductResult {
        let mut result = MultiProductResult::default();
        if asins.is_empty() {
            return result;
        }

        let chunk_size = self
            .plan(Operation::GetMany)
            .first()
            .map(|provider| provider.chunk_limit().max(1))
            .unwrap_or(50);

        for chunk in asins.chunks(chunk_size) {
            let chunk_vec = chunk.to_vec();
            let outcome = self
                .run_with_fallback(Operation::GetMany, |provider| {
                    provider.get_multiple_products(chunk_vec.clone(), options.clone())
                })
                .await;

            match outcome {
                Some(chunk_result) => result.absorb(chunk_result),
                None => result.failed.extend(chunk_vec),
            }
        }

        result
    }

    pub async fn get_variations(
        &self,
        asin: &str,
        options: RequestOptions,
    ) -> Option<VariationsResult> {
        self.run_with_fallback(Operation::Variations, |provider| {
            provider.get_variations(asin.to_owned(), options.clone())
        })
        .await
    }

    pub async fn get_offers(&self, asin: &str, options: RequestOptions) -> Option<OffersResult> {
        self.run_with_fallback(Operation::Offers, |provider| {
            provider.get_offers(asin.to_owned(), options.clone())
        })
        .await
    }

    pub async fn get_reviews_summary(
        &self,
        asin: &str,
        options: RequestOptions,
    ) -> Option<ReviewsSummary> {
        self.run_with_fallback(Operation::Reviews, |provider| {
            provider.get_reviews_summary(asin.to_owned(), options.clone())
        })
        .await
    }

    pub async fn get_bestsellers(&self, category: &str, options: RequestOptions) -> SearchResults {
        self.run_with_fallback(Operation::Bestsellers, |provider| {
            provider.get_bestsellers(category.to_owned(), options.clone())
        })
        .await
        .unwrap_or_default()
    }

    pub async fn get_new_releases(&self, category: &str, options: RequestOptions) -> SearchResults {
        self.run_with_fallback(Operation::NewReleases, |provider| {
            provider.get_new_releases(category.to_owned(), options.clone())
        })
        .await
        .unwrap_or_default()
    }

    pub async fn get_categories(&self, options: RequestOptions) -> Vec<Category> {
        self.run_with_fallback(Operation::Categories, |provider| {
            provider.get_categories(options.clone())
        })
        .await
        .unwrap_or_default()
    }

    /// Runs each configured provider's own connection test (or just the
    /// named one); failures become failed entries instead of propagating.
    pub async fn test_connection(
        &self,
        provider: Option<ProviderId>,
    ) -> BTreeMap<ProviderId, ConnectionTest> {
        let mut results = BTreeMap::new();

        for candidate in &self.providers {
            if provider.is_some_and(|wanted| wanted != candidate.id()) {
                continue;
            }
            results.insert(candidate.id(), candidate.test_connection().await);
        }

        if let Some(wanted) = provider {
            results.entry(wanted).or_insert_with(|| {
                ConnectionTest::failed(format!("provider '{wanted}' is not configured"))
            });
        }

        results
    }

    pub fn quota_info(&self) -> BTreeMap<ProviderId, QuotaInfo> {
        self.providers
            .iter()
            .map(|provider| (provider.id(), provider.quota_info()))
            .collect()
    }

    /// Flushes pending statistics to the durable repository.
    pub fn flush_statistics(&self) {
        self.stats.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::ErrorKind;
    use crate::provider::CapabilitySet;
    use crate::store::MemoryKvStore;
    use crate::testing::StubProvider;

    fn stats() -> Arc<StatsRegistry> {
        let clock = Arc::new(ManualClock::starting_now());
        Arc::new(StatsRegistry::new(
            Arc::new(MemoryKvStore::with_clock(clock.clone())),
            clock,
        ))
    }

    fn manager_with(providers: Vec<Arc<dyn Provider>>, policy: SelectionPolicy) -> Manager {
        Manager::new(
            providers,
            policy,
            ProviderId::Paapi,
            Some(ProviderId::Rainforest),
            stats(),
        )
    }

    #[tokio::test]
    async fn priority_policy_uses_primary_first() {
        let paapi = Arc::new(StubProvider::new(ProviderId::Paapi));
        let rainforest = Arc::new(StubProvider::new(ProviderId::Rainforest));
        let manager = manager_with(
            vec![rainforest.clone(), paapi.clone()],
            SelectionPolicy::Priority,
        );

        let record = manager
            .get_product("B0TEST", RequestOptions::default())
            .await
            .expect("primary succeeds");
        assert_eq!(record.asin, "B0TEST");
        assert_eq!(paapi.call_count(), 1);
        assert_eq!(rainforest.call_count(), 0);
    }

    #[tokio::test]
    async fn primary_failure_falls_back_once() {
        let paapi = Arc::new(StubProvider::new(ProviderId::Paapi).failing(5, ErrorKind::Transient));
        let rainforest = Arc::new(StubProvider::new(ProviderId::Rainforest));
        let manager = manager_with(
            vec![paapi.clone(), rainforest.clone()],
            SelectionPolicy::Priority,
        );

        let record = manager
            .get_product("B0TEST", RequestOptions::default())
            .await
            .expect("fallback succeeds");
        assert_eq!(record.asin, "B0TEST");
        assert_eq!(paapi.call_count(), 1);
        assert_eq!(rainforest.call_count(), 1);

        let stats = manager.statistics();
        assert_eq!(stats[&ProviderId::Paapi].failures, 1);
        assert_eq!(stats[&ProviderId::Rainforest].successes, 1);
    }

    #[tokio::test]
    async fn full_exhaustion_returns_none_and_counts_failures() {
        let providers: Vec<Arc<dyn Provider>> = vec![
            Arc::new(StubProvider::new(ProviderId::Paapi).failing(5, ErrorKind::Transient)),
            Arc::new(StubProvider::new(ProviderId::Rainforest).failing(5, ErrorKind::Transient)),
            Arc::new(StubProvider::new(ProviderId::Serpapi).failing(5, ErrorKind::Transient)),
        ];
        let manager = manager_with(providers, SelectionPolicy::Priority);

        let result = manager.get_product("B0TEST", RequestOptions::default()).await;
        assert!(result.is_none());

        let stats = manager.statistics();
        for id in [ProviderId::Paapi, ProviderId::Rainforest, ProviderId::Serpapi] {
            assert_eq!(stats[&id].failures, 1, "provider {id}");
            assert_eq!(stats[&id].successes, 0, "provider {id}");
        }
    }

    #[tokio::test]
    async fn capability_filter_skips_unsupporting_providers() {
        let no_search = Arc::new(
            StubProvider::new(ProviderId::Paapi)
                .with_capabilities(CapabilitySet::new(&[Operation::GetProduct])),
        );
        let full = Arc::new(StubProvider::new(ProviderId::Rainforest));
        let manager = manager_with(vec![no_search.clone(), full.clone()], SelectionPolicy::Priority);

        let request = SearchRequest::new("cable", RequestOptions::default()).expect("valid");
        let results = manager.search_products(request).await;

        assert!(!results.products.is_empty());
        assert_eq!(no_search.call_count(), 0);
        assert_eq!(full.call_count(), 1);
    }

    #[tokio::test]
    async fn round_robin_cycles_capable_providers() {
        let a = Arc::new(StubProvider::new(ProviderId::Paapi));
        let b = Arc::new(StubProvider::new(ProviderId::Rainforest));
        let manager = Manager::new(
            vec![a.clone(), b.clone()],
            SelectionPolicy::RoundRobin,
            ProviderId::Paapi,
            None,
            stats(),
        );

        for _ in 0..4 {
            manager.get_product("B0TEST", RequestOptions::default()).await;
        }

        assert_eq!(a.call_count(), 2);
        assert_eq!(b.call_count(), 2);
    }

    #[tokio::test]
    async fn least_used_prefers_the_quiet_provider() {
        let a = Arc::new(StubProvider::new(ProviderId::Paapi));
        let b = Arc::new(StubProvider::new(ProviderId::Rainforest));
        let registry = stats();
        registry.record_success(ProviderId::Paapi, 10);
        registry.record_success(ProviderId::Paapi, 10);

        let manager = Manager::new(
            vec![a.clone(), b.clone()],
            SelectionPolicy::LeastUsed,
            ProviderId::Paapi,
            None,
            registry,
        );

        manager.get_product("B0TEST", RequestOptions::default()).await;
        assert_eq!(a.call_count(), 0);
        assert_eq!(b.call_count(), 1);
    }

    #[tokio::test]
    async fn bulk_partial_failure_keeps_successes_and_failed_ids() {
        // 60 ids, chunk limit 50: the first chunk succeeds, the second
        // fails on the only provider, leaving exactly those 10 ids failed.
        let primary = Arc::new(
            StubProvider::new(ProviderId::Paapi)
                .with_chunk_limit(50)
                .failing_from(1, ErrorKind::Transient),
        );
        let manager = Manager::new(
            vec![primary.clone()],
            SelectionPolicy::Priority,
            ProviderId::Paapi,
            None,
            stats(),
        );

        let asins: Vec<String> = (0..60).map(|i| format!("B{i:04}")).collect();
        let result = manager
            .get_multiple_products(asins.clone(), RequestOptions::default())
            .await;

        assert_eq!(result.products.len(), 50);
        assert_eq!(result.failed, asins[50..].to_vec());
        assert_eq!(primary.call_count(), 2);
    }

    #[tokio::test]
    async fn connection_test_reports_unconfigured_provider() {
        let manager = manager_with(
            vec![Arc::new(StubProvider::new(ProviderId::Paapi))],
            SelectionPolicy::Priority,
        );

        let results = manager.test_connection(Some(ProviderId::Serpapi)).await;
        let entry = results.get(&ProviderId::Serpapi).expect("entry present");
        assert!(!entry.success);

        let all = manager.test_connection(None).await;
        assert!(all[&ProviderId::Paapi].success);
    }
}
