//! Amazon Product Advertising API (PA-API 5) adapter.
//!
//! Signed JSON-RPC style POST calls through the injected [`RequestSigner`];
//! marketplace selects the host and signing region. Bulk item lookups are
//! limited to 10 identifiers per upstream call.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde_json::{json, Value};

use crate::error::ProviderError;
use crate::executor::RequestExecutor;
use crate::http::HttpRequest;
use crate::provider::{
    CapabilitySet, Category, ConnectionTest, Credentials, MultiProductResult, Offer, OffersResult,
    Operation, ProductRecord, Provider, ProviderFuture, ProviderId, QuotaInfo, RequestOptions,
    ReviewsSummary, SearchRequest, SearchResults, VariationsResult,
};
use crate::signing::{RequestSigner, SigningCredentials, SigningRequest};

const SERVICE: &str = "ProductAdvertisingAPI";
const PARTNER_TYPE: &str = "Associates";
const CHUNK_LIMIT: usize = 10;

const ITEM_RESOURCES: &[&str] = &[
    "ItemInfo.Title",
    "ItemInfo.Features",
    "ItemInfo.ByLineInfo",
    "Offers.Listings.Price",
    "Offers.Listings.Availability.Message",
    "Offers.Listings.DeliveryInfo.IsPrimeEligible",
    "Images.Primary.Large",
];

struct Marketplace {
    code: &'static str,
    name: &'static str,
    host: &'static str,
    region: &'static str,
    site: &'static str,
}

const MARKETPLACES: &[Marketplace] = &[
    Marketplace { code: "US", name: "United States", host: "webservices.amazon.com", region: "us-east-1", site: "www.amazon.com" },
    Marketplace { code: "UK", name: "United Kingdom", host: "webservices.amazon.co.uk", region: "eu-west-1", site: "www.amazon.co.uk" },
    Marketplace { code: "DE", name: "Germany", host: "webservices.amazon.de", region: "eu-west-1", site: "www.amazon.de" },
    Marketplace { code: "FR", name: "France", host: "webservices.amazon.fr", region: "eu-west-1", site: "www.amazon.fr" },
    Marketplace { code: "JP", name: "Japan", host: "webservices.amazon.co.jp", region: "us-west-2", site: "www.amazon.co.jp" },
    Marketplace { code: "CA", name: "Canada", host: "webservices.amazon.ca", region: "us-east-1", site: "www.amazon.ca" },
    Marketplace { code: "IT", name: "Italy", host: "webservices.amazon.it", region: "eu-west-1", site: "www.amazon.it" },
    Marketplace { code: "ES", name: "Spain", host: "webservices.amazon.es", region: "eu-west-1", site: "www.amazon.es" },
    Marketplace { code: "IN", name: "India", host: "webservices.amazon.in", region: "eu-west-1", site: "www.amazon.in" },
    Marketplace { code: "MX", name: "Mexico", host: "webservices.amazon.com.mx", region: "us-east-1", site: "www.amazon.com.mx" },
    Marketplace { code: "BR", name: "Brazil", host: "webservices.amazon.com.br", region: "us-east-1", site: "www.amazon.com.br" },
    Marketplace { code: "AU", name: "Australia", host: "webservices.amazon.com.au", region: "us-west-2", site: "www.amazon.com.au" },
];

fn marketplace(code: &str) -> &'static Marketplace {
    MARKETPLACES
        .iter()
        .find(|m| m.code.eq_ignore_ascii_case(code))
        .unwrap_or(&MARKETPLACES[0])
}

/// PA-API 5 provider.
pub struct PaapiAdapter {
    executor: Arc<RequestExecutor>,
    signer: Arc<dyn RequestSigner>,
    credentials: Mutex<Credentials>,
    last_error: Mutex<Option<ProviderError>>,
}

impl PaapiAdapter {
    pub fn new(executor: Arc<RequestExecutor>, signer: Arc<dyn RequestSigner>) -> Self {
        Self {
            executor,
            signer,
            credentials: Mutex::new(Credentials::new()),
            last_error: Mutex::new(None),
        }
    }

    pub fn with_credentials(
        executor: Arc<RequestExecutor>,
        signer: Arc<dyn RequestSigner>,
        credentials: Credentials,
    ) -> Result<Self, ProviderError> {
        let adapter = Self::new(executor, signer);
        adapter.set_credentials(credentials)?;
        Ok(adapter)
    }

    fn remember<T>(&self, outcome: Result<T, ProviderError>) -> Result<T, ProviderError> {
        if let Err(error) = &outcome {
            *self
                .last_error
                .lock()
                .expect("paapi error lock is not poisoned") = Some(error.clone());
        }
        outcome
    }

    fn signing_credentials(&self, region: &str) -> Result<SigningCredentials, ProviderError> {
        let credentials = self
            .credentials
            .lock()
            .expect("paapi credential lock is not poisoned")
            .clone();

        Ok(SigningCredentials {
            access_key: credentials.require("access_key")?.to_owned(),
            secret_key: credentials.require("secret_key")?.to_owned(),
            region: region.to_owned(),
            service: SERVICE.to_owned(),
        })
    }

    fn partner_tag(&self) -> Result<String, ProviderError> {
        let credentials = self
            .credentials
            .lock()
            .expect("paapi credential lock is not poisoned")
            .clone();
        Ok(credentials.require("partner_tag")?.to_owned())
    }

    fn default_marketplace(&self) -> String {
        self.credentials
            .lock()
            .expect("paapi credential lock is not poisoned")
            .get("marketplace")
            .unwrap_or("US")
            .to_owned()
    }

    fn resolve_marketplace(&self, options: &RequestOptions) -> &'static Marketplace {
        let code = options
            .marketplace
            .clone()
            .unwrap_or_else(|| self.default_marketplace());
        marketplace(&code)
    }

    /// Builds, signs, and executes one PA-API operation call.
    async fn call(
        &self,
        operation_name: &str,
        market: &'static Marketplace,
        mut payload: Value,
    ) -> Result<Value, ProviderError> {
        let signing = self.signing_credentials(market.region)?;
        let partner_tag = self.partner_tag()?;

        payload["PartnerTag"] = json!(partner_tag);
        payload["PartnerType"] = json!(PARTNER_TYPE);
        payload["Marketplace"] = json!(market.site);
        let body = payload.to_string();

        let url = format!("https://{}/paapi5/{}", market.host, operation_name.to_ascii_lowercase());
        let target = format!("com.amazon.paapi5.v1.ProductAdvertisingAPIv1.{operation_name}");

        let headers = self.signer.signed_headers(
            &SigningRequest {
                method: crate::http::HttpMethod::Post,
                url: &url,
                body: &body,
                host: market.host,
                target: &target,
                timestamp: self.executor.clock().now(),
            },
            &signing,
        );

        let request = HttpRequest::post(url).with_headers(headers).with_body(body);
        let value = self
            .executor
            .execute(ProviderId::Paapi, operation_name, request)
            .await?;

        if let Some(error) = upstream_error(&value) {
            return Err(error);
        }
        Ok(value)
    }

    fn cache_params(&self, options: &RequestOptions, primary: Option<(&str, &str)>) -> BTreeMap<String, String> {
        let mut params = options.as_params();
        params
            .entry(String::from("marketplace"))
            .or_insert_with(|| self.default_marketplace());
        if let Some((key, value)) = primary {
            params.insert(key.to_owned(), value.to_owned());
        }
        params
    }

    async fn fetch_items(
        &self,
        asins: &[String],
        market: &'static Marketplace,
    ) -> Result<Vec<ProductRecord>, ProviderError> {
        let payload = json!({
            "ItemIds": asins,
            "Resources": ITEM_RESOURCES,
        });
        let value = self.call("GetItems", market, payload).await?;

        let items = value
            .pointer("/ItemsResult/Items")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let now = self.executor.clock().now();
        Ok(items.iter().map(|item| normalize_item(item, now)).collect())
    }
}

/// Maps PA-API error payloads onto the failure taxonomy.
fn upstream_error(value: &Value) -> Option<ProviderError> {
    let errors = value.get("Errors").and_then(Value::as_array)?;
    let first = errors.first()?;
    let code = first.get("Code").and_then(Value::as_str).unwrap_or("");
    let message = first
        .get("Message")
        .and_then(Value::as_str)
        .unwrap_or("upstream error")
        .to_owned();

    // Item-level "not found" codes are handled by the callers as missing
    // items, not failures.
    if code == "ItemNotAccessible" || code == "InvalidParameterValue" {
        return None;
    }

    Some(match code {
        "TooManyRequests" => ProviderError::quota(message, None),
        "AccessDenied" | "UnrecognizedClient" | "InvalidSignature" => ProviderError::auth(message),
        "InternalFailure" | "RequestThrottled" => ProviderError::transient(message),
        _ => ProviderError::malformed(format!("{code}: {message}")),
    })
}

fn normalize_item(item: &Value, updated_at: time::OffsetDateTime) -> ProductRecord {
    let listing = item.pointer("/Offers/Listings/0");

    let features = item
        .pointer("/ItemInfo/Features/DisplayValues")
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default();

    let flat = json!({
        "asin": item.get("ASIN").and_then(Value::as_str).unwrap_or_default(),
        "title": item.pointer("/ItemInfo/Title/DisplayValue").and_then(Value::as_str).unwrap_or_default(),
        "description": features,
        "price": listing.and_then(|l| l.pointer("/Price/Amount")).and_then(Value::as_f64).unwrap_or(0.0),
        "currency": listing.and_then(|l| l.pointer("/Price/Currency")).and_then(Value::as_str).unwrap_or("USD"),
        "availability": listing.and_then(|l| l.pointer("/Availability/Message")).and_then(Value::as_str).unwrap_or("Unknown"),
        "url": item.get("DetailPageURL").and_then(Value::as_str).unwrap_or_default(),
        "image_url": item.pointer("/Images/Primary/Large/URL").and_then(Value::as_str).unwrap_or_default(),
        "is_prime": listing.and_then(|l| l.pointer("/DeliveryInfo/IsPrimeEligible")).and_then(Value::as_bool).unwrap_or(false),
    });

    ProductRecord::from_value(&flat, updated_at)
}

fn normalize_search(value: &Value, page: u32, updated_at: time::OffsetDateTime) -> SearchResults {
    let items = value
        .pointer("/SearchResult/Items")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let total_results = value
        .pointer("/SearchResult/TotalResultCount")
        .and_then(Value::as_u64)
        .unwrap_or(items.len() as u64);

    let products: Vec<ProductRecord> = items
        .iter()
        .map(|item| normalize_item(item, updated_at))
        .collect();

    SearchResults {
        total_pages: total_results.div_ceil(10).max(1) as u32,
        total_results,
        current_page: page,
        credits_used: 1,
        products,
    }
}

impl Provider for PaapiAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Paapi
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::new(&[
            Operation::Search,
            Operation::GetProduct,
            Operation::GetMany,
            Operation::Variations,
            Operation::Offers,
            Operation::Categories,
        ])
    }

    fn chunk_limit(&self) -> usize {
        CHUNK_LIMIT
    }

    fn search_products<'a>(&'a self, request: SearchRequest) -> ProviderFuture<'a, SearchResults> {
        Box::pin(async move {
            let market = self.resolve_marketplace(&request.options);
            let page = request.options.page.unwrap_or(1);

            let mut params = self.cache_params(&request.options, Some(("keyword", request.keyword.as_str())));
            params.insert(String::from("page"), page.to_string());
            let key = self.executor.cache_key(Operation::Search, &params, ProviderId::Paapi);

            if let Some(cached) = self.executor.cache_lookup(&key) {
                if let Ok(results) = serde_json::from_value::<SearchResults>(cached) {
                    return Ok(results);
                }
            }

            let payload = json!({
                "Keywords": request.keyword,
                "ItemPage": page,
                "Resources": ITEM_RESOURCES,
            });
            let outcome = self.call("SearchItems", market, payload).await.map(|value| {
                normalize_search(&value, page, self.executor.clock().now())
            });
            let outcome = self.remember(outcome);

            if let Ok(results) = &outcome {
                if let Ok(value) = serde_json::to_value(results) {
                    self.executor
                        .cache_store(&key, value, ProviderId::Paapi, Operation::Search);
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
            let market = self.resolve_marketplace(&options);
            let params = self.cache_params(&options, Some(("asin", asin.as_str())));
            let key = self.executor.cache_key(Operation::GetProduct, &params, ProviderId::Paapi);

            if let Some(cached) = self.executor.cache_lookup(&key) {
                if let Ok(record) = serde_json::from_value::<ProductRecord>(cached) {
                    return Ok(Some(record));
                }
            }

            let outcome = self
                .fetch_items(std::slice::from_ref(&asin), market)
                .await
                .map(|mut records| {
                    if records.is_empty() {
                        None
                    } else {
                        Some(records.remove(0))
                    }
                });
            let outcome = self.remember(outcome);

            if let Ok(Some(record)) = &outcome {
                if let Ok(value) = serde_json::to_value(record) {
                    self.executor
                        .cache_store(&key, value, ProviderId::Paapi, Operation::GetProduct);
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
            let market = self.resolve_marketplace(&options);
            let mut result = MultiProductResult::default();

            for chunk in asins.chunks(CHUNK_LIMIT) {
                match self.fetch_items(chunk, market).await {
                    Ok(records) => {
                        for record in records {
                            result.products.insert(record.asin.clone(), record);
                        }
                        for asin in chunk {
                            if !result.products.contains_key(asin) {
                                result.failed.push(asin.clone());
                            }
                        }
                    }
                    Err(error) => {
                        // A fully failed chunk is partial data, not a
                        // failure of the whole call.
                        tracing::warn!(error = %error, size = chunk.len(), "paapi item chunk failed");
                        self.remember::<()>(Err(error)).ok();
                        result.failed.extend(chunk.iter().cloned());
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
            let market = self.resolve_marketplace(&options);
            let params = self.cache_params(&options, Some(("asin", asin.as_str())));
            let key = self.executor.cache_key(Operation::Variations, &params, ProviderId::Paapi);

            if let Some(cached) = self.executor.cache_lookup(&key) {
                if let Ok(result) = serde_json::from_value::<VariationsResult>(cached) {
                    return Ok(result);
                }
            }

            let payload = json!({
                "ASIN": asin.clone(),
                "Resources": ITEM_RESOURCES,
            });
            let outcome = self.call("GetVariations", market, payload).await.map(|value| {
                let now = self.executor.clock().now();
                let variations: Vec<ProductRecord> = value
                    .pointer("/VariationsResult/Items")
                    .and_then(Value::as_array)
                    .map(|items| items.iter().map(|item| normalize_item(item, now)).collect())
                    .unwrap_or_default();
                let dimensions = value
                    .pointer("/VariationsResult/VariationSummary/VariationDimensions")
                    .and_then(Value::as_array)
                    .map(|dims| {
                        dims.iter()
                            .filter_map(|d| d.get("Name").and_then(Value::as_str))
                            .map(str::to_owned)
                            .collect()
                    })
                    .unwrap_or_default();

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
                        .cache_store(&key, value, ProviderId::Paapi, Operation::Variations);
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
            let market = self.resolve_marketplace(&options);
            let params = self.cache_params(&options, Some(("asin", asin.as_str())));
            let key = self.executor.cache_key(Operation::Offers, &params, ProviderId::Paapi);

            if let Some(cached) = self.executor.cache_lookup(&key) {
                if let Ok(result) = serde_json::from_value::<OffersResult>(cached) {
                    return Ok(result);
                }
            }

            let payload = json!({
                "ItemIds": [asin.clone()],
                "Resources": [
                    "Offers.Listings.Price",
                    "Offers.Listings.Condition",
                    "Offers.Listings.MerchantInfo",
                    "Offers.Listings.DeliveryInfo.IsPrimeEligible",
                    "Offers.Summaries.LowestPrice",
                    "Offers.Summaries.OfferCount",
                ],
            });
            let outcome = self.call("GetItems", market, payload).await.map(|value| {
                let item = value.pointer("/ItemsResult/Items/0").cloned().unwrap_or(Value::Null);
                let offers: Vec<Offer> = item
                    .pointer("/Offers/Listings")
                    .and_then(Value::as_array)
                    .map(|listings| {
                        listings
                            .iter()
                            .map(|listing| Offer {
                                price: listing.pointer("/Price/Amount").and_then(Value::as_f64).unwrap_or(0.0),
                                currency: listing
                                    .pointer("/Price/Currency")
                                    .and_then(Value::as_str)
                                    .unwrap_or("USD")
                                    .to_owned(),
                                condition: listing
                                    .pointer("/Condition/Value")
                                    .and_then(Value::as_str)
                                    .unwrap_or("New")
                                    .to_owned(),
                                seller: listing
                                    .pointer("/MerchantInfo/Name")
                                    .and_then(Value::as_str)
                                    .unwrap_or_default()
                                    .to_owned(),
                                is_prime: listing
                                    .pointer("/DeliveryInfo/IsPrimeEligible")
                                    .and_then(Value::as_bool)
                                    .unwrap_or(false),
                            })
                            .collect()
                    })
                    .unwrap_or_default();

                let fallback_lowest = offers
                    .iter()
                    .map(|offer| offer.price)
                    .fold(f64::INFINITY, f64::min);

                OffersResult {
                    asin: asin.clone(),
                    lowest_price: item
                        .pointer("/Offers/Summaries/0/LowestPrice/Amount")
                        .and_then(Value::as_f64)
                        .unwrap_or(if fallback_lowest.is_finite() { fallback_lowest } else { 0.0 }),
                    total_offers: item
                        .pointer("/Offers/Summaries/0/OfferCount")
                        .and_then(Value::as_u64)
                        .unwrap_or(offers.len() as u64) as u32,
                    offers,
                }
            });
            let outcome = self.remember(outcome);

            if let Ok(result) = &outcome {
                if let Ok(value) = serde_json::to_value(result) {
                    self.executor
                        .cache_store(&key, value, ProviderId::Paapi, Operation::Offers);
                }
            }
            outcome
        })
    }

    fn get_reviews_summary<'a>(
        &'a self,
        _asin: String,
        _options: RequestOptions,
    ) -> ProviderFuture<'a, ReviewsSummary> {
        Box::pin(async move {
            self.remember(Err(ProviderError::unsupported("reviews").with_provider(ProviderId::Paapi)))
        })
    }

    fn get_bestsellers<'a>(
        &'a self,
        _category: String,
        _options: RequestOptions,
    ) -> ProviderFuture<'a, SearchResults> {
        Box::pin(async move {
            self.remember(Err(ProviderError::unsupported("bestsellers").with_provider(ProviderId::Paapi)))
        })
    }

    fn get_new_releases<'a>(
        &'a self,
        _category: String,
        _options: RequestOptions,
    ) -> ProviderFuture<'a, SearchResults> {
        Box::pin(async move {
            self.remember(Err(ProviderError::unsupported("new_releases").with_provider(ProviderId::Paapi)))
        })
    }

    fn get_categories<'a>(&'a self, options: RequestOptions) -> ProviderFuture<'a, Vec<Category>> {
        Box::pin(async move {
            let market = self.resolve_marketplace(&options);
            let root = options
                .extra
                .get("parent_id")
                .and_then(Value::as_str)
                .unwrap_or("0")
                .to_owned();

            let payload = json!({
                "BrowseNodeIds": [root],
                "Resources": ["BrowseNodes.Children"],
            });
            let outcome = self.call("GetBrowseNodes", market, payload).await.map(|value| {
                value
                    .pointer("/BrowseNodesResult/BrowseNodes")
                    .and_then(Value::as_array)
                    .map(|nodes| {
                        nodes
                            .iter()
                            .flat_map(|node| {
                                let parent = node.get("Id").and_then(Value::as_str).map(str::to_owned);
                                node.pointer("/Children")
                                    .and_then(Value::as_array)
                                    .cloned()
                                    .unwrap_or_default()
                                    .into_iter()
                                    .filter_map(move |child| {
                                        Some(Category {
                                            id: child.get("Id").and_then(Value::as_str)?.to_owned(),
                                            name: child
                                                .get("DisplayName")
                                                .and_then(Value::as_str)?
                                                .to_owned(),
                                            parent_id: parent.clone(),
                                        })
                                    })
                                    .collect::<Vec<_>>()
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
            let market = marketplace(&self.default_marketplace());
            let payload = json!({
                "Keywords": "test",
                "ItemCount": 1,
                "Resources": ["ItemInfo.Title"],
            });

            match self.call("SearchItems", market, payload).await {
                Ok(_) => ConnectionTest {
                    success: true,
                    message: String::from("PA-API connection successful"),
                    latency_ms: started.elapsed().as_millis() as u64,
                    credits_remaining: None,
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
        let scope = format!("{}:GetItems", ProviderId::Paapi);
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
        MARKETPLACES.iter().map(|m| (m.code, m.name)).collect()
    }

    fn set_credentials(&self, credentials: Credentials) -> Result<(), ProviderError> {
        // Validate before commit: the stored credentials stay untouched on
        // any failure.
        credentials.require("access_key")?;
        credentials.require("secret_key")?;
        credentials.require("partner_tag")?;
        if let Some(code) = credentials.get("marketplace") {
            if !MARKETPLACES.iter().any(|m| m.code.eq_ignore_ascii_case(code)) {
                return Err(ProviderError::auth(format!("unknown marketplace '{code}'")));
            }
        }

        *self
            .credentials
            .lock()
            .expect("paapi credential lock is not poisoned") = credentials;
        Ok(())
    }

    fn last_error(&self) -> Option<ProviderError> {
        self.last_error
            .lock()
            .expect("paapi error lock is not poisoned")
            .clone()
    }

    fn clear_cache(&self, key: Option<&str>) -> usize {
        match key {
            Some(key) => usize::from(self.executor.cache().delete(key)),
            None => self.executor.cache().delete_by_tag(ProviderId::Paapi.as_str()),
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
    use crate::signing::HmacSigner;
    use crate::store::MemoryKvStore;
    use std::time::Duration;

    fn adapter() -> (PaapiAdapter, Arc<ScriptedHttpClient>) {
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

        let adapter = PaapiAdapter::new(executor, Arc::new(HmacSigner));
        adapter
            .set_credentials(
                Credentials::new()
                    .with("access_key", "AKID")
                    .with("secret_key", "SECRET")
                    .with("partner_tag", "tag-20")
                    .with("marketplace", "US"),
            )
            .expect("valid credentials");
        (adapter, http)
    }

    fn items_body(asins: &[&str]) -> String {
        let items: Vec<Value> = asins
            .iter()
            .map(|asin| {
                json!({
                    "ASIN": asin.clone(),
                    "DetailPageURL": format!("https://www.amazon.com/dp/{asin}"),
                    "ItemInfo": {"Title": {"DisplayValue": format!("Item {asin}")}},
                    "Offers": {"Listings": [{
                        "Price": {"Amount": 19.99, "Currency": "USD"},
                        "Availability": {"Message": "In Stock"},
                        "DeliveryInfo": {"IsPrimeEligible": true},
                    }]},
                    "Images": {"Primary": {"Large": {"URL": format!("https://img/{asin}.jpg")}}},
                })
            })
            .collect();
        json!({"ItemsResult": {"Items": items}}).to_string()
    }

    #[tokio::test]
    async fn get_product_normalizes_and_caches() {
        let (adapter, http) = adapter();
        http.push_response(HttpResponse::ok_json(items_body(&["B0TESTASIN"])));

        let record = adapter
            .get_product(String::from("B0TESTASIN"), RequestOptions::default())
            .await
            .expect("call succeeds")
            .expect("item found");

        assert_eq!(record.title, "Item B0TESTASIN");
        assert_eq!(record.price, 19.99);
        assert!(record.is_prime);

        // Second call is served from cache: no queued response needed.
        let cached = adapter
            .get_product(String::from("B0TESTASIN"), RequestOptions::default())
            .await
            .expect("cache hit")
            .expect("item present");
        assert_eq!(cached.asin, "B0TESTASIN");
        assert_eq!(http.call_count(), 1);
    }

    #[tokio::test]
    async fn requests_are_signed() {
        let (adapter, http) = adapter();
        http.push_response(HttpResponse::ok_json(items_body(&["B0TESTASIN"])));

        adapter
            .get_product(String::from("B0TESTASIN"), RequestOptions::default())
            .await
            .expect("call succeeds");

        let calls = http.calls();
        assert_eq!(calls.len(), 1);
        let auth = calls[0].headers.get("authorization").expect("signed");
        assert!(auth.starts_with("AWS4-HMAC-SHA256"));
        assert!(calls[0].headers.contains_key("x-amz-target"));
        assert_eq!(calls[0].url, "https://webservices.amazon.com/paapi5/getitems");
    }

    #[tokio::test]
    async fn missing_item_returns_none() {
        let (adapter, http) = adapter();
        http.push_response(HttpResponse::ok_json(
            json!({"Errors": [{"Code": "ItemNotAccessible", "Message": "gone"}]}).to_string(),
        ));

        let record = adapter
            .get_product(String::from("B0MISSING"), RequestOptions::default())
            .await
            .expect("not-found is not an error");
        assert!(record.is_none());
    }

    #[tokio::test]
    async fn throttle_error_maps_to_quota() {
        let (adapter, http) = adapter();
        http.push_response(HttpResponse::ok_json(
            json!({"Errors": [{"Code": "TooManyRequests", "Message": "slow down"}]}).to_string(),
        ));

        let error = adapter
            .search_products(
                SearchRequest::new("cable", RequestOptions::default()).expect("valid"),
            )
            .await
            .expect_err("quota error");
        assert_eq!(error.kind(), ErrorKind::Quota);
        assert_eq!(adapter.last_error().expect("recorded").kind(), ErrorKind::Quota);
    }

    #[tokio::test]
    async fn bulk_fetch_chunks_by_ten_and_buckets_missing_ids() {
        let (adapter, http) = adapter();
        // 12 asins → two GetItems calls; the second returns only one of
        // two requested items.
        let first: Vec<String> = (0..10).map(|i| format!("B{i:03}")).collect();
        let first_refs: Vec<&str> = first.iter().map(String::as_str).collect();
        http.push_response(HttpResponse::ok_json(items_body(&first_refs)));
        http.push_response(HttpResponse::ok_json(items_body(&["B010"])));

        let mut asins = first.clone();
        asins.push(String::from("B010"));
        asins.push(String::from("B011"));

        let result = adapter
            .get_multiple_products(asins, RequestOptions::default())
            .await
            .expect("bulk call succeeds");

        assert_eq!(result.products.len(), 11);
        assert_eq!(result.failed, vec![String::from("B011")]);
        assert_eq!(http.call_count(), 2);
    }

    #[tokio::test]
    async fn credential_validation_precedes_commit() {
        let (adapter, _http) = adapter();

        let error = adapter
            .set_credentials(Credentials::new().with("access_key", "only"))
            .expect_err("incomplete credentials");
        assert_eq!(error.kind(), ErrorKind::Auth);

        // The previously valid credentials still work.
        assert_eq!(adapter.default_marketplace(), "US");
    }

    #[test]
    fn reviews_are_not_in_capabilities() {
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
        let adapter = PaapiAdapter::new(executor, Arc::new(HmacSigner));

        assert!(!adapter.capabilities().supports(Operation::Reviews));
        assert!(adapter.capabilities().supports(Operation::GetMany));
        assert_eq!(adapter.chunk_limit(), 10);
    }
}
