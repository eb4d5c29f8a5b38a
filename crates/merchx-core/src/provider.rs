//! Provider contract: capability matrix, request/response types, and the
//! adapter trait every upstream integration implements.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::error::{ProviderError, ValidationError};

/// Canonical provider identifiers used in metadata, cache keys, and stats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    Paapi,
    Rainforest,
    Serpapi,
    Dataforseo,
}

impl ProviderId {
    pub const ALL: [Self; 4] = [Self::Paapi, Self::Rainforest, Self::Serpapi, Self::Dataforseo];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Paapi => "paapi",
            Self::Rainforest => "rainforest",
            Self::Serpapi => "serpapi",
            Self::Dataforseo => "dataforseo",
        }
    }
}

impl Display for ProviderId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "paapi" => Ok(Self::Paapi),
            "rainforest" => Ok(Self::Rainforest),
            "serpapi" => Ok(Self::Serpapi),
            "dataforseo" => Ok(Self::Dataforseo),
            other => Err(ValidationError::InvalidProvider {
                value: other.to_owned(),
            }),
        }
    }
}

/// Operation type used for routing, capability checks, and cache keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Search,
    GetProduct,
    GetMany,
    Variations,
    Offers,
    Reviews,
    Bestsellers,
    NewReleases,
    Categories,
}

impl Operation {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::GetProduct => "product",
            Self::GetMany => "get_many",
            Self::Variations => "variations",
            Self::Offers => "offers",
            Self::Reviews => "reviews",
            Self::Bestsellers => "bestsellers",
            Self::NewReleases => "new_releases",
            Self::Categories => "categories",
        }
    }

    /// Cache type prefix used for TTL resolution and tagging.
    pub const fn cache_type(self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::GetProduct | Self::GetMany => "product",
            Self::Variations => "variations",
            Self::Offers => "offers",
            Self::Reviews => "reviews",
            Self::Bestsellers | Self::NewReleases => "bestsellers",
            Self::Categories => "categories",
        }
    }
}

impl Display for Operation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Supported operation matrix for a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet {
    operations: Vec<Operation>,
}

impl CapabilitySet {
    pub fn new(operations: &[Operation]) -> Self {
        Self {
            operations: operations.to_vec(),
        }
    }

    pub fn full() -> Self {
        Self::new(&[
            Operation::Search,
            Operation::GetProduct,
            Operation::GetMany,
            Operation::Variations,
            Operation::Offers,
            Operation::Reviews,
            Operation::Bestsellers,
            Operation::NewReleases,
            Operation::Categories,
        ])
    }

    pub fn supports(&self, operation: Operation) -> bool {
        self.operations.contains(&operation)
    }

    pub fn supported_operations(&self) -> Vec<&'static str> {
        self.operations.iter().map(|op| op.as_str()).collect()
    }
}

/// Common per-request options shared by every operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub marketplace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub per_page: Option<u32>,
    /// Provider-specific extras folded into the cache key's parameter hash.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

impl RequestOptions {
    pub fn for_marketplace(marketplace: impl Into<String>) -> Self {
        Self {
            marketplace: Some(marketplace.into()),
            ..Self::default()
        }
    }

    /// Flattens options into string parameters for cache key generation.
    pub fn as_params(&self) -> BTreeMap<String, String> {
        let mut params = BTreeMap::new();
        if let Some(marketplace) = &self.marketplace {
            params.insert(String::from("marketplace"), marketplace.clone());
        }
        if let Some(condition) = &self.condition {
            params.insert(String::from("condition"), condition.clone());
        }
        if let Some(page) = self.page {
            params.insert(String::from("page"), page.to_string());
        }
        if let Some(per_page) = self.per_page {
            params.insert(String::from("per_page"), per_page.to_string());
        }
        for (key, value) in &self.extra {
            let rendered = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            params.insert(key.clone(), rendered);
        }
        params
    }
}

/// Validated search request.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub keyword: String,
    pub options: RequestOptions,
}

impl SearchRequest {
    pub fn new(keyword: impl Into<String>, options: RequestOptions) -> Result<Self, ValidationError> {
        let keyword = keyword.into();
        if keyword.trim().is_empty() {
            return Err(ValidationError::EmptyKeyword);
        }
        if options.page == Some(0) {
            return Err(ValidationError::ZeroPage);
        }
        if options.per_page == Some(0) {
            return Err(ValidationError::ZeroPerPage);
        }
        Ok(Self { keyword, options })
    }
}

/// Normalized product schema. Every field has an explicit default so
/// callers never branch on missing keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub asin: String,
    pub title: String,
    pub description: String,
    pub price: f64,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub savings_amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub savings_percent: Option<u32>,
    pub availability: String,
    pub url: String,
    pub image_url: String,
    pub rating: f64,
    pub reviews_count: u32,
    pub is_prime: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl ProductRecord {
    /// Builds a record from an arbitrary upstream shape, defaulting every
    /// missing field.
    pub fn from_value(raw: &Value, updated_at: OffsetDateTime) -> Self {
        let text = |key: &str| -> String {
            raw.get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned()
        };
        let number = |key: &str| -> f64 { raw.get(key).and_then(Value::as_f64).unwrap_or(0.0) };

        Self {
            asin: text("asin"),
            title: text("title"),
            description: text("description"),
            price: number("price"),
            currency: {
                let currency = text("currency");
                if currency.is_empty() {
                    String::from("USD")
                } else {
                    currency
                }
            },
            list_price: raw.get("list_price").and_then(Value::as_f64),
            savings_amount: raw.get("savings_amount").and_then(Value::as_f64),
            savings_percent: raw
                .get("savings_percent")
                .and_then(Value::as_u64)
                .map(|v| v as u32),
            availability: {
                let availability = text("availability");
                if availability.is_empty() {
                    String::from("Unknown")
                } else {
                    availability
                }
            },
            url: text("url"),
            image_url: text("image_url"),
            rating: number("rating"),
            reviews_count: raw.get("reviews_count").and_then(Value::as_u64).unwrap_or(0) as u32,
            is_prime: raw.get("is_prime").and_then(Value::as_bool).unwrap_or(false),
            updated_at,
        }
    }
}

/// Normalized search result batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
    pub products: Vec<ProductRecord>,
    pub total_results: u64,
    pub current_page: u32,
    pub total_pages: u32,
    pub credits_used: u32,
}

/// Bulk retrieval outcome: successes keyed by identifier plus the
/// identifiers that could not be fetched. Never all-or-nothing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MultiProductResult {
    pub products: BTreeMap<String, ProductRecord>,
    pub failed: Vec<String>,
}

impl MultiProductResult {
    pub fn absorb(&mut self, other: MultiProductResult) {
        self.products.extend(other.products);
        self.failed.extend(other.failed);
    }
}

/// Variation listing for a parent product.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariationsResult {
    pub parent_asin: String,
    pub dimensions: Vec<String>,
    pub variations: Vec<ProductRecord>,
    pub total_variations: u32,
}

/// One marketplace offer for a product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub price: f64,
    pub currency: String,
    pub condition: String,
    pub seller: String,
    pub is_prime: bool,
}

/// Offer listing summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OffersResult {
    pub asin: String,
    pub lowest_price: f64,
    pub total_offers: u32,
    pub offers: Vec<Offer>,
}

/// Aggregated review summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewsSummary {
    pub asin: String,
    pub rating: f64,
    pub total_reviews: u32,
    pub stars_breakdown: BTreeMap<String, u32>,
    pub top_positive: String,
    pub top_critical: String,
}

/// A category / browse node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

/// Result of a provider connection test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionTest {
    pub success: bool,
    pub message: String,
    pub latency_ms: u64,
    pub credits_remaining: Option<u32>,
}

impl ConnectionTest {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            latency_ms: 0,
            credits_remaining: None,
        }
    }
}

/// Quota snapshot reported by a provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuotaInfo {
    pub used: u32,
    pub remaining: u32,
    pub limit: u32,
    #[serde(with = "time::serde::rfc3339::option")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_at: Option<OffsetDateTime>,
}

/// Opaque credential map, validated by each adapter before commit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials(BTreeMap<String, String>);

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the field value or an `Auth` failure naming the field.
    pub fn require(&self, field: &'static str) -> Result<&str, ProviderError> {
        self.0
            .get(field)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| ProviderError::auth(format!("credential field '{field}' is required")))
    }
}

pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ProviderError>> + Send + 'a>>;

/// Upstream integration contract.
///
/// Implementations are `Send + Sync` and shared behind `Arc` by the
/// orchestration manager. Cross-cutting retry/cache/log behavior comes from
/// the injected [`crate::executor::RequestExecutor`], not from this trait.
pub trait Provider: Send + Sync {
    fn id(&self) -> ProviderId;

    fn capabilities(&self) -> CapabilitySet;

    /// Largest identifier batch a single upstream call accepts.
    fn chunk_limit(&self) -> usize;

    fn search_products<'a>(&'a self, request: SearchRequest) -> ProviderFuture<'a, SearchResults>;

    /// `Ok(None)` means the identifier does not exist upstream.
    fn get_product<'a>(
        &'a self,
        asin: String,
        options: RequestOptions,
    ) -> ProviderFuture<'a, Option<ProductRecord>>;

    fn get_multiple_products<'a>(
        &'a self,
        asins: Vec<String>,
        options: RequestOptions,
    ) -> ProviderFuture<'a, MultiProductResult>;

    fn get_variations<'a>(
        &'a self,
        asin: String,
        options: RequestOptions,
    ) -> ProviderFuture<'a, VariationsResult>;

    fn get_offers<'a>(
        &'a self,
        asin: String,
        options: RequestOptions,
    ) -> ProviderFuture<'a, OffersResult>;

    fn get_reviews_summary<'a>(
        &'a self,
        asin: String,
        options: RequestOptions,
    ) -> ProviderFuture<'a, ReviewsSummary>;

    fn get_bestsellers<'a>(
        &'a self,
        category: String,
        options: RequestOptions,
    ) -> ProviderFuture<'a, SearchResults>;

    fn get_new_releases<'a>(
        &'a self,
        category: String,
        options: RequestOptions,
    ) -> ProviderFuture<'a, SearchResults>;

    fn get_categories<'a>(&'a self, options: RequestOptions) -> ProviderFuture<'a, Vec<Category>>;

    fn test_connection<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = ConnectionTest> + Send + 'a>>;

    fn quota_info(&self) -> QuotaInfo;

    fn supported_marketplaces(&self) -> Vec<(&'static str, &'static str)>;

    /// Validates before committing; on failure the stored credentials are
    /// left untouched.
    fn set_credentials(&self, credentials: Credentials) -> Result<(), ProviderError>;

    fn last_error(&self) -> Option<ProviderError>;

    /// Clears this provider's cache entries; returns the number removed.
    fn clear_cache(&self, key: Option<&str>) -> usize;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn provider_id_round_trips() {
        for id in ProviderId::ALL {
            assert_eq!(id.as_str().parse::<ProviderId>().expect("valid id"), id);
        }
        assert!("ebay".parse::<ProviderId>().is_err());
    }

    #[test]
    fn search_request_rejects_blank_keyword() {
        let err = SearchRequest::new("   ", RequestOptions::default()).expect_err("must fail");
        assert_eq!(err, ValidationError::EmptyKeyword);
    }

    #[test]
    fn product_record_defaults_every_field() {
        let record = ProductRecord::from_value(&json!({}), OffsetDateTime::UNIX_EPOCH);

        assert_eq!(record.asin, "");
        assert_eq!(record.price, 0.0);
        assert_eq!(record.currency, "USD");
        assert_eq!(record.availability, "Unknown");
        assert_eq!(record.reviews_count, 0);
        assert!(!record.is_prime);
    }

    #[test]
    fn product_record_reads_known_fields() {
        let raw = json!({
            "asin": "B0TESTASIN",
            "title": "USB-C Cable",
            "price": 12.99,
            "currency": "EUR",
            "rating": 4.4,
            "reviews_count": 321,
            "is_prime": true,
        });
        let record = ProductRecord::from_value(&raw, OffsetDateTime::UNIX_EPOCH);

        assert_eq!(record.asin, "B0TESTASIN");
        assert_eq!(record.currency, "EUR");
        assert_eq!(record.reviews_count, 321);
        assert!(record.is_prime);
    }

    #[test]
    fn options_flatten_to_sorted_params() {
        let mut options = RequestOptions::for_marketplace("DE");
        options.page = Some(2);
        options
            .extra
            .insert(String::from("brand"), json!("anker"));

        let params = options.as_params();
        let keys = params.keys().cloned().collect::<Vec<_>>();
        assert_eq!(keys, vec!["brand", "marketplace", "page"]);
        assert_eq!(params.get("brand").map(String::as_str), Some("anker"));
    }

    #[test]
    fn credentials_require_rejects_blank() {
        let creds = Credentials::new().with("api_key", "  ");
        let err = creds.require("api_key").expect_err("blank must fail");
        assert_eq!(err.kind(), crate::ErrorKind::Auth);
    }
}
