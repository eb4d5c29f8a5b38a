//! Deterministic in-memory provider for tests and offline runs.
//!
//! Behaves like a real adapter with a seeded catalog, and can be scripted
//! to fail its first N calls with a chosen error kind.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use time::OffsetDateTime;

use crate::error::{ErrorKind, ProviderError};
use crate::provider::{
    CapabilitySet, Category, ConnectionTest, Credentials, MultiProductResult, Offer, OffersResult,
    Operation, ProductRecord, Provider, ProviderFuture, ProviderId, QuotaInfo, RequestOptions,
    ReviewsSummary, SearchRequest, SearchResults, VariationsResult,
};

/// Scriptable offline provider.
pub struct StubProvider {
    id: ProviderId,
    capabilities: CapabilitySet,
    chunk_limit: usize,
    fail_first: u32,
    fail_from: Option<usize>,
    failure_kind: ErrorKind,
    calls: Mutex<Vec<Operation>>,
    last_error: Mutex<Option<ProviderError>>,
}

impl StubProvider {
    pub fn new(id: ProviderId) -> Self {
        Self {
            id,
            capabilities: CapabilitySet::full(),
            chunk_limit: 50,
            fail_first: 0,
            fail_from: None,
            failure_kind: ErrorKind::Transient,
            calls: Mutex::new(Vec::new()),
            last_error: Mutex::new(None),
        }
    }

    pub fn with_capabilities(mut self, capabilities: CapabilitySet) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_chunk_limit(mut self, chunk_limit: usize) -> Self {
        self.chunk_limit = chunk_limit;
        self
    }

    /// Fails the first `count` operation calls with `kind`.
    pub fn failing(mut self, count: u32, kind: ErrorKind) -> Self {
        self.fail_first = count;
        self.failure_kind = kind;
        self
    }

    /// Fails every call from the zero-based `index` onwards with `kind`.
    pub fn failing_from(mut self, index: usize, kind: ErrorKind) -> Self {
        self.fail_from = Some(index);
        self.failure_kind = kind;
        self
    }

    /// Operations invoked so far, in order.
    pub fn calls(&self) -> Vec<Operation> {
        self.calls
            .lock()
            .expect("stub call lock is not poisoned")
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls
            .lock()
            .expect("stub call lock is not poisoned")
            .len()
    }

    fn admit(&self, operation: Operation) -> Result<(), ProviderError> {
        let call_index = {
            let mut calls = self.calls.lock().expect("stub call lock is not poisoned");
            calls.push(operation);
            calls.len() - 1
        };

        let should_fail = (call_index as u32) < self.fail_first
            || self.fail_from.is_some_and(|from| call_index >= from);

        if should_fail {
            let error = match self.failure_kind {
                ErrorKind::Quota => ProviderError::quota("stubbed quota failure", None),
                ErrorKind::Auth => ProviderError::auth("stubbed auth failure"),
                ErrorKind::Transient => ProviderError::transient("stubbed transient failure"),
                ErrorKind::NotFound => ProviderError::not_found("stubbed missing item"),
                ErrorKind::Malformed => ProviderError::malformed("stubbed malformed payload"),
                ErrorKind::Unsupported => ProviderError::unsupported("stubbed"),
            }
            .with_provider(self.id);
            *self
                .last_error
                .lock()
                .expect("stub error lock is not poisoned") = Some(error.clone());
            return Err(error);
        }
        Ok(())
    }

    /// Seeded record so assertions can predict field values.
    pub fn product_for(&self, asin: &str) -> ProductRecord {
        let seed = asin
            .bytes()
            .fold(0_u64, |acc, byte| acc.wrapping_mul(33).wrapping_add(byte as u64));

        ProductRecord {
            asin: asin.to_owned(),
            title: format!("Item {asin}"),
            description: format!("Stub catalog entry for {asin}"),
            price: 10.0 + (seed % 900) as f64 / 10.0,
            currency: String::from("USD"),
            list_price: None,
            savings_amount: None,
            savings_percent: None,
            availability: String::from("In Stock"),
            url: format!("https://example.test/dp/{asin}"),
            image_url: format!("https://example.test/img/{asin}.jpg"),
            rating: 3.5 + (seed % 15) as f64 / 10.0,
            reviews_count: (seed % 5_000) as u32,
            is_prime: seed % 2 == 0,
            updated_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    fn ready<'a, T: Send + 'a>(value: Result<T, ProviderError>) -> ProviderFuture<'a, T> {
        Box::pin(async move { value })
    }
}

impl Provider for StubProvider {
    fn id(&self) -> ProviderId {
        self.id
    }

    fn capabilities(&self) -> CapabilitySet {
        self.capabilities.clone()
    }

    fn chunk_limit(&self) -> usize {
        self.chunk_limit
    }

    fn search_products<'a>(&'a self, request: SearchRequest) -> ProviderFuture<'a, SearchResults> {
        let outcome = self.admit(Operation::Search).map(|()| {
            let products = (0..3)
                .map(|index| self.product_for(&format!("B0{}{index}", request.keyword.to_ascii_uppercase())))
                .collect::<Vec<_>>();
            SearchResults {
                total_results: products.len() as u64,
                current_page: request.options.page.unwrap_or(1),
                total_pages: 1,
                credits_used: 1,
                products,
            }
        });
        Self::ready(outcome)
    }

    fn get_product<'a>(
        &'a self,
        asin: String,
        _options: RequestOptions,
    ) -> ProviderFuture<'a, Option<ProductRecord>> {
        let outcome = self
            .admit(Operation::GetProduct)
            .map(|()| Some(self.product_for(&asin)));
        Self::ready(outcome)
    }

    fn get_multiple_products<'a>(
        &'a self,
        asins: Vec<String>,
        _options: RequestOptions,
    ) -> ProviderFuture<'a, MultiProductResult> {
        let outcome = self.admit(Operation::GetMany).map(|()| {
            let products = asins
                .iter()
                .map(|asin| (asin.clone(), self.product_for(asin)))
                .collect::<BTreeMap<_, _>>();
            MultiProductResult {
                products,
                failed: Vec::new(),
            }
        });
        Self::ready(outcome)
    }

    fn get_variations<'a>(
        &'a self,
        asin: String,
        _options: RequestOptions,
    ) -> ProviderFuture<'a, VariationsResult> {
        let outcome = self.admit(Operation::Variations).map(|()| VariationsResult {
            parent_asin: asin.clone(),
            dimensions: vec![String::from("color")],
            variations: vec![self.product_for(&format!("{asin}V1"))],
            total_variations: 1,
        });
        Self::ready(outcome)
    }

    fn get_offers<'a>(
        &'a self,
        asin: String,
        _options: RequestOptions,
    ) -> ProviderFuture<'a, OffersResult> {
        let record = self.product_for(&asin);
        let outcome = self.admit(Operation::Offers).map(|()| OffersResult {
            asin: asin.clone(),
            lowest_price: record.price,
            total_offers: 1,
            offers: vec![Offer {
                price: record.price,
                currency: record.currency.clone(),
                condition: String::from("new"),
                seller: String::from("Stub Seller"),
                is_prime: record.is_prime,
            }],
        });
        Self::ready(outcome)
    }

    fn get_reviews_summary<'a>(
        &'a self,
        asin: String,
        _options: RequestOptions,
    ) -> ProviderFuture<'a, ReviewsSummary> {
        let record = self.product_for(&asin);
        let outcome = self.admit(Operation::Reviews).map(|()| ReviewsSummary {
            asin: asin.clone(),
            rating: record.rating,
            total_reviews: record.reviews_count,
            stars_breakdown: BTreeMap::new(),
            top_positive: String::new(),
            top_critical: String::new(),
        });
        Self::ready(outcome)
    }

    fn get_bestsellers<'a>(
        &'a self,
        category: String,
        _options: RequestOptions,
    ) -> ProviderFuture<'a, SearchResults> {
        let outcome = self.admit(Operation::Bestsellers).map(|()| {
            let products = (0..2)
                .map(|index| self.product_for(&format!("B0BEST{category}{index}")))
                .collect::<Vec<_>>();
            SearchResults {
                total_results: products.len() as u64,
                current_page: 1,
                total_pages: 1,
                credits_used: 1,
                products,
            }
        });
        Self::ready(outcome)
    }

    fn get_new_releases<'a>(
        &'a self,
        category: String,
        _options: RequestOptions,
    ) -> ProviderFuture<'a, SearchResults> {
        let outcome = self.admit(Operation::NewReleases).map(|()| {
            let products = vec![self.product_for(&format!("B0NEW{category}"))];
            SearchResults {
                total_results: 1,
                current_page: 1,
                total_pages: 1,
                credits_used: 1,
                products,
            }
        });
        Self::ready(outcome)
    }

    fn get_categories<'a>(&'a self, _options: RequestOptions) -> ProviderFuture<'a, Vec<Category>> {
        let outcome = self.admit(Operation::Categories).map(|()| {
            vec![
                Category {
                    id: String::from("1"),
                    name: String::from("Electronics"),
                    parent_id: None,
                },
                Category {
                    id: String::from("2"),
                    name: String::from("Cables"),
                    parent_id: Some(String::from("1")),
                },
            ]
        });
        Self::ready(outcome)
    }

    fn test_connection<'a>(&'a self) -> Pin<Box<dyn Future<Output = ConnectionTest> + Send + 'a>> {
        Box::pin(async move {
            ConnectionTest {
                success: true,
                message: format!("{} stub reachable", self.id),
                latency_ms: 1,
                credits_remaining: Some(1_000),
            }
        })
    }

    fn quota_info(&self) -> QuotaInfo {
        QuotaInfo {
            used: 0,
            remaining: 1_000,
            limit: 1_000,
            reset_at: None,
        }
    }

    fn supported_marketplaces(&self) -> Vec<(&'static str, &'static str)> {
        vec![("US", "United States"), ("DE", "Germany")]
    }

    fn set_credentials(&self, credentials: Credentials) -> Result<(), ProviderError> {
        if credentials.is_empty() {
            return Err(ProviderError::auth("stub requires at least one credential field"));
        }
        Ok(())
    }

    fn last_error(&self) -> Option<ProviderError> {
        self.last_error
            .lock()
            .expect("stub error lock is not poisoned")
            .clone()
    }

    fn clear_cache(&self, _key: Option<&str>) -> usize {
        0
    }
}
