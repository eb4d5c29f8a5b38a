//! Rainforest API adapter.
//!
//! Plain API-key GET requests against the `/request` endpoint; the `type`
//! parameter selects the operation. No native batch endpoint exists, so
//! bulk lookups fan out one product request per identifier.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde_json::Value;

use crate::error::ProviderError;
use crate::executor::RequestExecutor;
use crate::http::{append_query, HttpRequest};
use crate::provider::{
    CapabilitySet, Category, ConnectionTest, Credentials, MultiProductResult, Offer, OffersResult,
    Operation, ProductRecord, Provider, ProviderFuture, ProviderId, QuotaInfo, RequestOptions,
    ReviewsSummary, SearchRequest, SearchResults, VariationsResult,
};

const BASE_URL: &str = "https://api.rainforestapi.com/request";
const ACCOUNT_URL: &str = "https://api.rainforestapi.com/account";
const CHUNK_LIMIT: usize = 50;

const DOMAINS: &[(&str, &str, &str)] = &[
    ("US", "United States", "amazon.com"),
    ("UK", "United Kingdom", "amazon.co.uk"),
    ("DE", "Germany", "amazon.de"),
    ("FR", "France", "amazon.fr"),
    ("JP", "Japan", "amazon.co.jp"),
    ("CA", "Canada", "amazon.ca"),
    ("IT", "Italy", "amazon.it"),
    ("ES", "Spain", "amazon.es"),
    ("IN", "India", "amazon.in"),
    ("MX", "Mexico", "amazon.com.mx"),
    ("BR", "Brazil", "amazon.com.br"),
    ("AU", "Australia", "amazon.com.au"),
];

fn domain_for(code: &str) -> &'static str {
    DOMAINS
        .iter()
        .find(|(market, _, _)| market.eq_ignore_ascii_case(code))
        .map(|(_, _, domain)| *domain)
        .unwrap_or("amazon.com")
}

/// Rainforest provider.
pub struct RainforestAdapter {
    executor: Arc<RequestExecutor>,
    credentials: Mutex<Credentials>,
    last_error: Mutex<Option<ProviderError>>,
}

impl RainforestAdapter {
    pub fn new(executor: Arc<RequestExecutor>) -> Self {
        Self {
            executor,
            credentials: Mutex::new(Credentials::new()),
            last_error: Mutex::new(None),
        }
    }

    pub fn with_credentials(
        executor: Arc<RequestExecutor>,
        credentials: Credentials,
    ) -> Result<Self, ProviderError> {
        let adapter = Self::new(executor);
        adapter.set_credentials(credentials)?;
        Ok(adapter)
    }

    fn remember<T>(&self, outcome: Result<T, ProviderError>) -> Result<T, ProviderError> {
        if let Err(error) = &outcome {
            *self
                .last_error
                .lock()
                .expect("rainforest error lock is not poisoned") = Some(error.clone());
        }
        outcome
    }

    fn api_key(&self) -> Result<String, ProviderError> {
        let credentials = self
            .credentials
            .lock()
            .expect("rainforest credential lock is not poisoned")
            .clone();
        Ok(credentials.require("api_key")?.to_owned())
    }

    fn domain(&self, options: &RequestOptions) -> &'static str {
        match options.marketplace.as_deref() {
            Some(code) if !code.is_empty() => domain_for(code),
            _ => {
                let configured = self
                    .credentials
                    .lock()
                    .expect("rainforest credential lock is not poisoned")
                    .get("marketplace")
                    .unwrap_or("US")
                    .to_owned();
                domain_for(&configured)
            }
        }
    }

    /// Issues one `/request` call with the given type and parameters.
    async fn call(
        &self,
        request_type: &str,
        mut query: BTreeMap<String, String>,
    ) -> Result<Value, ProviderError> {
        query.insert(String::from("api_key"), self.api_key()?);
        query.insert(String::from("type"), request_type.to_owned());

        let url = append_query(BASE_URL, &query);
        let value = self
            .executor
            .execute(ProviderId::Rainforest, request_type, HttpRequest::get(url))
            .await?;

        // Rainforest reports request-level problems inside a 200 body.
        if value.pointer("/request_info/success") == Some(&Value::Bool(false)) {
            let message = value
                .pointer("/request_info/message")
                .and_then(Value::as_str)
                .unwrap_or("request rejected")
                .to_owned();
            return Err(if message.to_ascii_lowercase().contains("credit") {
                ProviderError::quota(message, None)
            } else if message.to_ascii_lowercase().contains("api_key") {
                ProviderError::auth(message)
            } else {
                ProviderError::malformed(message)
            });
        }

        Ok(value)
    }

    fn cache_params(
        &self,
        options: &RequestOptions,
        primary: Option<(&str, &str)>,
    ) -> BTreeMap<String, String> {
        let mut params = options.as_params();
        if let Some((key, value)) = primary {
            params.insert(key.to_owned(), value.to_owned());
        }
        params
    }

    fn normalize_product(&self, raw: &Value) -> ProductRecord {
        let now = self.executor.clock().now();
        let buybox = raw.pointer("/buybox_winner");

        let flat = serde_json::json!({
            "asin": raw.get("asin").and_then(Value::as_str).unwrap_or_default(),
            "title": raw.get("title").and_then(Value::as_str).unwrap_or_default(),
            "description": raw.get("description").and_then(Value::as_str).unwrap_or_default(),
            "price": buybox.and_then(|b| b.pointer("/price/value")).and_then(Value::as_f64)
                .or_else(|| raw.pointer("/price/value").and_then(Value::as_f64))
                .unwrap_or(0.0),
            "currency": buybox.and_then(|b| b.pointer("/price/currency")).and_then(Value::as_str)
                .or_else(|| raw.pointer("/price/currency").and_then(Value::as_str))
                .unwrap_or("USD"),
            "list_price": raw.pointer("/list_price/value").and_then(Value::as_f64),
            "availability": buybox.and_then(|b| b.pointer("/availability/raw")).and_then(Value::as_str)
                .unwrap_or("Unknown"),
            "url": raw.get("link").and_then(Value::as_str).unwrap_or_default(),
            "image_url": raw.pointer("/main_image/link").and_then(Value::as_str)
                .or_else(|| raw.get("image").and_then(Value::as_str))
                .unwrap_or_default(),
            "rating": raw.get("rating").and_then(Value::as_f64).unwrap_or(0.0),
            "reviews_count": raw.get("ratings_total").and_then(Value::as_u64).unwrap_or(0),
            "is_prime": buybox.and_then(|b| b.pointer("/is_prime")).and_then(Value::as_bool)
                .or_else(|| raw.get("is_prime").and_then(Value::as_bool))
                .unwrap_or(false),
        });

        ProductRecord::from_value(&flat, now)
    }

    fn normalize_listing(&self, value: &Value, list_key: &str, page: u32) -> SearchResults {
        let items = value
            .get(list_key)
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let products: Vec<ProductRecord> =
            items.iter().map(|item| self.normalize_product(item)).collect();

        SearchResults {
            total_results: value
                .pointer("/pagination/total_results")
                .and_then(Value::as_u64)
                .unwrap_or(products.len() as u64),
            current_page: value
                .pointer("/pagination/current_page")
                .and_then(Value::as_u64)
                .unwrap_or(page as u64) as u32,
            total_pages: value
                .pointer("/pagination/total_pages")
                .and_then(Value::as_u64)
                .unwrap_or(1) as u32,
            credits_used: 1,
            products,
        }
    }
}

impl Provider for RainforestAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Rainforest
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::full()
    }

    fn chunk_limit(&self) -> usize {
        CHUNK_LIMIT
    }

    fn search_products<'a>(&'a self, request: SearchRequest) -> ProviderFuture<'a, SearchResults> {
        Box::pin(async move {
            let page = request.options.page.unwrap_or(1);
            let mut params = self.cache_params(&request.options, Some(("keyword", request.keyword.as_str())));
            params.insert(String::from("page"), page.to_string());
            let key = self
                .executor
                .cache_key(Operation::Search, &params, ProviderId::Rainforest);

            if let Some(cached) = self.executor.cache_lookup(&key) {
                if let Ok(results) = serde_json::from_value::<SearchResults>(cached) {
                    return Ok(results);
                }
            }

            let mut query = BTreeMap::new();
            query.insert(String::from("amazon_domain"), self.domain(&request.options).to_owned());
            query.insert(String::from("search_term"), request.keyword.clone());
            query.insert(String::from("page"), page.to_string());

            let outcome = self
                .call("search", query)
                .await
                .map(|value| self.normalize_listing(&value, "search_results", page));
            let outcome = self.remember(outcome);

            if let Ok(results) = &outcome {
                if let Ok(value) = serde_json::to_value(results) {
                    self.executor
                        .cache_store(&key, value, ProviderId::Rainforest, Operation::Search);
                }
            }
            outcome
        })
    }

    fn get_product<'a>(
        &'a self,
        asin: String,
        options: RequestOptions,
    ) -> ProviderFuture<'a, Option<ProductRecord>> {
        Box::pin(async move {
            let params = self.cache_params(&options, Some(("asin", asin.as_str())));
            let key = self
                .executor
                .cache_key(Operation::GetProduct, &params, ProviderId::Rainforest);

            if let Some(cached) = self.executor.cache_lookup(&key) {
                if let Ok(record) = serde_json::from_value::<ProductRecord>(cached) {
                    return Ok(Some(record));
                }
            }

            let mut query = BTreeMap::new();
            query.insert(String::from("amazon_domain"), self.domain(&options).to_owned());
            query.insert(String::from("asin"), asin.clone());

            let outcome = match self.call("product", query).await {
                Ok(value) => Ok(value
                    .get("product")
                    .filter(|product| !product.is_null())
                    .map(|product| self.normalize_product(product))),
                Err(error) if error.kind() == crate::ErrorKind::NotFound => Ok(None),
                Err(error) => Err(error),
            };
            let outcome = self.remember(outcome);

            if let Ok(Some(record)) = &outcome {
                if let Ok(value) = serde_json::to_value(record) {
                    self.executor
                        .cache_store(&key, value, ProviderId::Rainforest, Operation::GetProduct);
                }
            }
            outcome
        })
    }

    fn get_multiple_products<'a>(
        &'a self,
        asins: Vec<String>,
        options: RequestOptions,
    ) -> ProviderFuture<'a, MultiProductResult> {
        Box::pin(async move {
            let mut result = MultiProductResult::default();

            for asin in asins {
                match self.get_product(asin.clone(), options.clone()).await {
                    Ok(Some(record)) => {
                        result.products.insert(asin, record);
                    }
                    Ok(None) => result.failed.push(asin),
                    Err(error) => {
                        tracing::warn!(asin = %asin, error = %error, "rainforest item fetch failed");
                        result.failed.push(asin);
                    }
                }
            }

            Ok(result)
        })
    }

    fn get_variations<'a>(
        &'a self,
        asin: String,
        options: RequestOptions,
    ) -> ProviderFuture<'a, VariationsResult> {
        Box::pin(async move {
            let params = self.cache_params(&options, Some(("asin", asin.as_str())));
            let key = self
                .executor
                .cache_key(Operation::Variations, &params, ProviderId::Rainforest);

            if let Some(cached) = self.executor.cache_lookup(&key) {
                if let Ok(result) = serde_json::from_value::<VariationsResult>(cached) {
                    return Ok(result);
                }
            }

            let mut query = BTreeMap::new();
            query.insert(String::from("amazon_domain"), self.domain(&options).to_owned());
            query.insert(String::from("asin"), asin.clone());

            let outcome = self.call("product", query).await.map(|value| {
                let variants = value
                    .pointer("/product/variants")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                let variations: Vec<ProductRecord> = variants
                    .iter()
                    .map(|variant| self.normalize_product(variant))
                    .collect();
                let mut dimensions: Vec<String> = variants
                    .iter()
                    .flat_map(|variant| {
                        variant
                            .get("dimensions")
                            .and_then(Value::as_array)
                            .cloned()
                            .unwrap_or_default()
                            .into_iter()
                            .filter_map(|d| d.get("name").and_then(Value::as_str).map(str::to_owned))
                    })
                    .collect();
                dimensions.sort();
                dimensions.dedup();

                VariationsResult {
                    parent_asin: asin.clone(),
                    dimensions,
                    total_variations: variations.len() as u32,
                    variations,
                }
            });
            let outcome = self.remember(outcome);

            if let Ok(result) = &outcome {
                if let Ok(value) = serde_json::to_value(result) {
                    self.executor
                        .cache_store(&key, value, ProviderId::Rainforest, Operation::Variations);
                }
            }
            outcome
        })
    }

    fn get_offers<'a>(
        &'a self,
        asin: String,
        options: RequestOptions,
    ) -> ProviderFuture<'a, OffersResult> {
        Box::pin(async move {
            let params = self.cache_params(&options, Some(("asin", asin.as_str())));
            let key = self
                .executor
                .cache_key(Operation::Offers, &params, ProviderId::Rainforest);

            if let Some(cached) = self.executor.cache_lookup(&key) {
                if let Ok(result) = serde_json::from_value::<OffersResult>(cached) {
                    return Ok(result);
                }
            }

            let mut query = BTreeMap::new();
            query.insert(String::from("amazon_domain"), self.domain(&options).to_owned());
            query.insert(String::from("asin"), asin.clone());
            if let Some(condition) = &options.condition {
                query.insert(String::from("offers_condition"), condition.clone());
            }

            let outcome = self.call("offers", query).await.map(|value| {
                let listings = value
                    .get("offers")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                let offers: Vec<Offer> = listings
                    .iter()
                    .map(|listing| Offer {
                        price: listing.pointer("/price/value").and_then(Value::as_f64).unwrap_or(0.0),
                        currency: listing
                            .pointer("/price/currency")
                            .and_then(Value::as_str)
                            .unwrap_or("USD")
                            .to_owned(),
                        condition: listing
                            .pointer("/condition/title")
                            .and_then(Value::as_str)
                            .unwrap_or("New")
                            .to_owned(),
                        seller: listing
                            .pointer("/seller/name")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_owned(),
                        is_prime: listing
                            .pointer("/delivery/is_prime")
                            .and_then(Value::as_bool)
                            .unwrap_or(false),
                    })
                    .collect();

                let lowest = offers
                    .iter()
                    .map(|offer| offer.price)
                    .fold(f64::INFINITY, f64::min);

                OffersResult {
                    asin: asin.clone(),
                    lowest_price: if lowest.is_finite() { lowest } else { 0.0 },
                    total_offers: offers.len() as u32,
                    offers,
                }
            });
            let outcome = self.remember(outcome);

            if let Ok(result) = &outcome {
                if let Ok(value) = serde_json::to_value(result) {
                    self.executor
                        .cache_store(&key, value, ProviderId::Rainforest, Operation::Offers);
                }
            }
            outcome
        })
    }

    fn get_reviews_summary<'a>(
        &'a self,
        asin: String,
        options: RequestOptions,
    ) -> ProviderFuture<'a, ReviewsSummary> {
        Box::pin(async move {
            let params = self.cache_params(&options, Some(("asin", asin.as_str())));
            let key = self
                .executor
                .cache_key(Operation::Reviews, &params, ProviderId::Rainforest);

            if let Some(cached) = self.executor.cache_lookup(&key) {
                if let Ok(result) = serde_json::from_value::<ReviewsSummary>(cached) {
                    return Ok(result);
                }
            }

            let mut query = BTreeMap::new();
            query.insert(String::from("amazon_domain"), self.domain(&options).to_owned());
            query.insert(String::from("asin"), asin.clone());

            let outcome = self.call("reviews", query).await.map(|value| {
                let summary = value.get("summary").cloned().unwrap_or(Value::Null);
                let mut breakdown = BTreeMap::new();
                for (stars, field) in [
                    ("5", "five_star"),
                    ("4", "four_star"),
                    ("3", "three_star"),
                    ("2", "two_star"),
                    ("1", "one_star"),
                ] {
                    if let Some(count) = summary
                        .pointer(&format!("/rating_breakdown/{field}/count"))
                        .and_then(Value::as_u64)
                    {
                        breakdown.insert(stars.to_owned(), count as u32);
                    }
                }

                ReviewsSummary {
                    asin: asin.clone(),
                    rating: summary.get("rating").and_then(Value::as_f64).unwrap_or(0.0),
                    total_reviews: summary
                        .get("ratings_total")
                        .and_then(Value::as_u64)
                        .unwrap_or(0) as u32,
                    stars_breakdown: breakdown,
                    top_positive: value
                        .pointer("/top_positive/body")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_owned(),
                    top_critical: value
                        .pointer("/top_critical/body")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_owned(),
                }
            });
            let outcome = self.remember(outcome);

            if let Ok(result) = &outcome {
                if let Ok(value) = serde_json::to_value(result) {
                    self.executor
                        .cache_store(&key, value, ProviderId::Rainforest, Operation::Reviews);
                }
            }
            outcome
        })
    }

    fn get_bestsellers<'a>(
        &'a self,
        category: String,
        options: RequestOptions,
    ) -> ProviderFuture<'a, SearchResults> {
        Box::pin(async move {
            let page = options.page.unwrap_or(1);
            let mut params = self.cache_params(&options, None);
            params.insert(String::from("category"), category.clone());
            let key = self
                .executor
                .cache_key(Operation::Bestsellers, &params, ProviderId::Rainforest);

            if let Some(cached) = self.executor.cache_lookup(&key) {
                if let Ok(results) = serde_json::from_value::<SearchResults>(cached) {
                    return Ok(results);
                }
            }

            let mut query = BTreeMap::new();
            query.insert(String::from("amazon_domain"), self.domain(&options).to_owned());
            if !category.is_empty() {
                query.insert(String::from("category_id"), category.clone());
            }

            let outcome = self
                .call("bestsellers", query)
                .await
                .map(|value| self.normalize_listing(&value, "bestsellers", page));
            let outcome = self.remember(outcome);

            if let Ok(results) = &outcome {
                if let Ok(value) = serde_json::to_value(results) {
                    self.executor
                        .cache_store(&key, value, ProviderId::Rainforest, Operation::Bestsellers);
                }
            }
            outcome
        })
    }

    fn get_new_releases<'a>(
        &'a self,
        category: String,
        options: RequestOptions,
    ) -> ProviderFuture<'a, SearchResults> {
        Box::pin(async move {
            let page = options.page.unwrap_or(1);
            let mut query = BTreeMap::new();
            query.insert(String::from("amazon_domain"), self.domain(&options).to_owned());
            if !category.is_empty() {
                query.insert(String::from("category_id"), category.clone());
            }

            let outcome = self
                .call("new_releases", query)
                .await
                .map(|value| self.normalize_listing(&value, "new_releases", page));
            self.remember(outcome)
        })
    }

    fn get_categories<'a>(&'a self, options: RequestOptions) -> ProviderFuture<'a, Vec<Category>> {
        Box::pin(async move {
            let mut query = BTreeMap::new();
            query.insert(String::from("amazon_domain"), self.domain(&options).to_owned());
            if let Some(parent) = options.extra.get("parent_id").and_then(Value::as_str) {
                query.insert(String::from("parent_id"), parent.to_owned());
            }

            let outcome = self.call("categories", query).await.map(|value| {
                value
                    .get("categories")
                    .and_then(Value::as_array)
                    .map(|categories| {
                        categories
                            .iter()
                            .filter_map(|category| {
                                Some(Category {
                                    id: category
                                        .get("id")
                                        .map(|id| match id {
                                            Value::String(s) => s.clone(),
                                            other => other.to_string(),
                                        })?,
                                    name: category.get("name").and_then(Value::as_str)?.to_owned(),
                                    parent_id: category
                                        .get("parent_id")
                                        .and_then(Value::as_str)
                                        .map(str::to_owned),
                                })
                            })
                            .collect()
                    })
                    .unwrap_or_default()
            });
            self.remember(outcome)
        })
    }

    fn test_connection<'a>(&'a self) -> Pin<Box<dyn Future<Output = ConnectionTest> + Send + 'a>> {
        Box::pin(async move {
            let started = Instant::now();
            let api_key = match self.api_key() {
                Ok(api_key) => api_key,
                Err(error) => return ConnectionTest::failed(error.to_string()),
            };

            let mut query = BTreeMap::new();
            query.insert(String::from("api_key"), api_key);
            let url = append_query(ACCOUNT_URL, &query);

            match self
                .executor
                .execute(ProviderId::Rainforest, "account", HttpRequest::get(url))
                .await
            {
                Ok(value) => ConnectionTest {
                    success: true,
                    message: String::from("Rainforest connection successful"),
                    latency_ms: started.elapsed().as_millis() as u64,
                    credits_remaining: value
                        .pointer("/account_info/credits_remaining")
                        .and_then(Value::as_u64)
                        .map(|credits| credits as u32),
                },
                Err(error) => ConnectionTest {
                    success: false,
                    message: error.to_string(),
                    latency_ms: started.elapsed().as_millis() as u64,
                    credits_remaining: None,
                },
            }
        })
    }

    fn quota_info(&self) -> QuotaInfo {
        let limiter = self.executor.limiter();
        let scope = format!("{}:product", ProviderId::Rainforest);
        let limit = limiter.limit_for(&scope);
        let remaining = limiter.remaining(&scope);

        QuotaInfo {
            used: limit.limit.saturating_sub(remaining),
            remaining,
            limit: limit.limit,
            reset_at: limiter.reset_at(&scope),
        }
    }

    fn supported_marketplaces(&self) -> Vec<(&'static str, &'static str)> {
        DOMAINS.iter().map(|(code, name, _)| (*code, *name)).collect()
    }

    fn set_credentials(&self, credentials: Credentials) -> Result<(), ProviderError> {
        credentials.require("api_key")?;

        *self
            .credentials
            .lock()
            .expect("rainforest credential lock is not poisoned") = credentials;
        Ok(())
    }

    fn last_error(&self) -> Option<ProviderError> {
        self.last_error
            .lock()
            .expect("rainforest error lock is not poisoned")
            .clone()
    }

    fn clear_cache(&self, key: Option<&str>) -> usize {
        match key {
            Some(key) => usize::from(self.executor.cache().delete(key)),
            None => self
                .executor
                .cache()
                .delete_by_tag(ProviderId::Rainforest.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheConfig, CacheLayer};
    use crate::clock::ManualClock;
    use crate::error::ErrorKind;
    use crate::http::{HttpResponse, ScriptedHttpClient};
    use crate::rate_limit::{RateLimitConfig, RateLimiter};
    use crate::request_log::RequestLog;
    use crate::retry::{Backoff, RetryPolicy};
    use crate::store::MemoryKvStore;
    use serde_json::json;
    use std::time::Duration;

    fn adapter() -> (RainforestAdapter, Arc<ScriptedHttpClient>) {
        let clock = Arc::new(ManualClock::starting_now());
        let http = Arc::new(ScriptedHttpClient::new());
        let backend = Arc::new(MemoryKvStore::with_clock(clock.clone()));
        let executor = Arc::new(RequestExecutor::new(
            http.clone(),
            Arc::new(CacheLayer::new(CacheConfig::default(), backend, clock.clone())),
            Arc::new(RateLimiter::new(RateLimitConfig::default(), clock.clone())),
            Arc::new(RequestLog::new(true, clock.clone())),
            RetryPolicy {
                max_retries: 1,
                backoff: Backoff::Fixed { delay: Duration::from_millis(1) },
                ..RetryPolicy::default()
            },
            clock,
        ));

        let adapter = RainforestAdapter::new(executor);
        adapter
            .set_credentials(Credentials::new().with("api_key", "demo-key"))
            .expect("valid credentials");
        (adapter, http)
    }

    fn product_body(asin: &str) -> String {
        json!({
            "request_info": {"success": true},
            "product": {
                "asin": asin,
                "title": format!("Item {asin}"),
                "link": format!("https://amazon.com/dp/{asin}"),
                "main_image": {"link": format!("https://img/{asin}.jpg")},
                "rating": 4.6,
                "ratings_total": 1234,
                "buybox_winner": {
                    "price": {"value": 24.5, "currency": "USD"},
                    "availability": {"raw": "In Stock"},
                    "is_prime": true,
                },
            },
        })
        .to_string()
    }

    #[tokio::test]
    async fn product_request_carries_key_and_domain() {
        let (adapter, http) = adapter();
        http.push_response(HttpResponse::ok_json(product_body("B0TEST")));

        let record = adapter
            .get_product(String::from("B0TEST"), RequestOptions::for_marketplace("DE"))
            .await
            .expect("call succeeds")
            .expect("product present");

        assert_eq!(record.rating, 4.6);
        assert_eq!(record.reviews_count, 1234);

        let calls = http.calls();
        assert!(calls[0].url.contains("api_key=demo-key"));
        assert!(calls[0].url.contains("amazon_domain=amazon.de"));
        assert!(calls[0].url.contains("type=product"));
    }

    #[tokio::test]
    async fn search_parses_pagination() {
        let (adapter, http) = adapter();
        http.push_response(HttpResponse::ok_json(
            json!({
                "request_info": {"success": true},
                "search_results": [
                    {"asin": "B0A", "title": "A", "price": {"value": 9.99, "currency": "USD"}},
                    {"asin": "B0B", "title": "B", "price": {"value": 19.99, "currency": "USD"}},
                ],
                "pagination": {"total_results": 240, "current_page": 2, "total_pages": 12},
            })
            .to_string(),
        ));

        let mut options = RequestOptions::default();
        options.page = Some(2);
        let results = adapter
            .search_products(SearchRequest::new("usb cable", options).expect("valid"))
            .await
            .expect("search succeeds");

        assert_eq!(results.products.len(), 2);
        assert_eq!(results.total_results, 240);
        assert_eq!(results.current_page, 2);
        assert_eq!(results.total_pages, 12);
        assert_eq!(results.products[0].price, 9.99);
    }

    #[tokio::test]
    async fn in_body_failure_is_classified() {
        let (adapter, http) = adapter();
        http.push_response(HttpResponse::ok_json(
            json!({"request_info": {"success": false, "message": "invalid api_key supplied"}})
                .to_string(),
        ));

        let error = adapter
            .get_product(String::from("B0TEST"), RequestOptions::default())
            .await
            .expect_err("auth failure");
        assert_eq!(error.kind(), ErrorKind::Auth);
    }

    #[tokio::test]
    async fn bulk_fanout_buckets_per_asin_failures() {
        let (adapter, http) = adapter();
        http.push_response(HttpResponse::ok_json(product_body("B0A")));
        http.push_response(HttpResponse::with_status(404, "no such item"));
        http.push_response(HttpResponse::ok_json(product_body("B0C")));

        let result = adapter
            .get_multiple_products(
                vec![String::from("B0A"), String::from("B0B"), String::from("B0C")],
                RequestOptions::default(),
            )
            .await
            .expect("bulk succeeds");

        assert_eq!(result.products.len(), 2);
        assert_eq!(result.failed, vec![String::from("B0B")]);
    }

    #[tokio::test]
    async fn search_results_are_cached_by_keyword_slug() {
        let (adapter, http) = adapter();
        http.push_response(HttpResponse::ok_json(
            json!({
                "request_info": {"success": true},
                "search_results": [{"asin": "B0A", "title": "A"}],
            })
            .to_string(),
        ));

        let request = || SearchRequest::new("USB C Cable", RequestOptions::default()).expect("valid");
        adapter.search_products(request()).await.expect("first call");
        adapter.search_products(request()).await.expect("cached call");

        assert_eq!(http.call_count(), 1);

        let mut params = BTreeMap::new();
        params.insert(String::from("keyword"), String::from("USB C Cable"));
        params.insert(String::from("page"), String::from("1"));
        let key = adapter
            .executor
            .cache()
            .generate_key("search", &params, Some(ProviderId::Rainforest));
        assert!(key.starts_with("search_rainforest_usb-c-cable_"));
        assert!(adapter.executor.cache().exists(&key));
    }

    #[tokio::test]
    async fn missing_api_key_is_an_auth_error() {
        let clock = Arc::new(ManualClock::starting_now());
        let http = Arc::new(ScriptedHttpClient::new());
        let backend = Arc::new(MemoryKvStore::with_clock(clock.clone()));
        let executor = Arc::new(RequestExecutor::new(
            http,
            Arc::new(CacheLayer::new(CacheConfig::default(), backend, clock.clone())),
            Arc::new(RateLimiter::new(RateLimitConfig::default(), clock.clone())),
            Arc::new(RequestLog::new(false, clock.clone())),
            RetryPolicy::default(),
            clock,
        ));
        let adapter = RainforestAdapter::new(executor);

        let error = adapter
            .get_product(String::from("B0TEST"), RequestOptions::default())
            .await
            .expect_err("no credentials configured");
        assert_eq!(error.kind(), ErrorKind::Auth);
    }
}
