//! Uniform response envelope wrapping provider results.
//!
//! Every caller-visible payload goes through [`ApiResponse`]: a typed
//! success/error wrapper with always-present metadata, search transforms,
//! and full-state cache round-tripping.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::cache::CacheLayer;
use crate::provider::ProviderId;

/// Envelope payload type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
    Product,
    Search,
    Error,
    Unknown,
}

/// Metadata attached to every envelope, defaults always filled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMeta {
    pub timestamp: i64,
    pub execution_time_ms: u64,
    pub credits_used: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderId>,
    pub cache_hit: bool,
    pub api_version: String,
}

impl Default for ResponseMeta {
    fn default() -> Self {
        Self {
            timestamp: 0,
            execution_time_ms: 0,
            credits_used: 0,
            provider: None,
            cache_hit: false,
            api_version: String::new(),
        }
    }
}

impl ResponseMeta {
    pub fn at(timestamp: OffsetDateTime) -> Self {
        Self {
            timestamp: timestamp.unix_timestamp(),
            ..Self::default()
        }
    }

    pub fn for_provider(provider: ProviderId, timestamp: OffsetDateTime) -> Self {
        Self {
            provider: Some(provider),
            ..Self::at(timestamp)
        }
    }

    pub fn with_execution_time(mut self, elapsed_ms: u64) -> Self {
        self.execution_time_ms = elapsed_ms;
        self
    }

    pub fn with_credits(mut self, credits: u32) -> Self {
        self.credits_used = credits;
        self
    }
}

/// Structured error carried by failed envelopes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    pub message: String,
    pub code: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    pub kind: String,
}

/// Derived pagination view over a search envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub current_page: u64,
    pub total_pages: u64,
    pub total_results: u64,
    pub per_page: u64,
    pub has_next: bool,
    pub has_previous: bool,
}

/// Hook for provider-specific raw payload parsing in [`ApiResponse::from_raw`].
pub trait ResponseParser: Send + Sync {
    fn apply(&self, response: &mut ApiResponse, raw: &Value);
}

/// The uniform provider result wrapper.
///
/// Invariant: `error.is_some()` exactly when `success` is false.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub kind: ResponseKind,
    pub data: Map<String, Value>,
    pub meta: ResponseMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<Value>,
}

impl ApiResponse {
    /// Single-product envelope.
    pub fn product(data: Map<String, Value>, meta: ResponseMeta) -> Self {
        Self {
            success: true,
            kind: ResponseKind::Product,
            data,
            meta,
            error: None,
            raw_response: None,
        }
    }

    /// Search envelope; counts default from the product list.
    pub fn search(products: Vec<Value>, meta: ResponseMeta) -> Self {
        let mut data = Map::new();
        data.insert(String::from("total_results"), Value::from(products.len() as u64));
        data.insert(String::from("current_page"), Value::from(1_u64));
        data.insert(String::from("total_pages"), Value::from(1_u64));
        data.insert(String::from("products"), Value::Array(products));

        Self {
            success: true,
            kind: ResponseKind::Search,
            data,
            meta,
            error: None,
            raw_response: None,
        }
    }

    /// Failed envelope.
    pub fn error(message: impl Into<String>, code: i64, details: Option<Value>) -> Self {
        Self {
            success: false,
            kind: ResponseKind::Error,
            data: Map::new(),
            meta: ResponseMeta::default(),
            error: Some(ResponseError {
                message: message.into(),
                code,
                details,
                kind: String::from("api_error"),
            }),
            raw_response: None,
        }
    }

    /// Builds an envelope from an arbitrary upstream payload, applying the
    /// provider's parser when given one.
    pub fn from_raw(
        raw: Value,
        provider: ProviderId,
        kind: ResponseKind,
        parser: Option<&dyn ResponseParser>,
    ) -> Self {
        let mut response = Self {
            success: true,
            kind,
            data: Map::new(),
            meta: ResponseMeta {
                provider: Some(provider),
                ..ResponseMeta::default()
            },
            error: None,
            raw_response: Some(raw.clone()),
        };

        match &raw {
            Value::Object(object) => {
                response.data = object.clone();
                if has_error_markers(object) {
                    response.mark_failed_from_data();
                }
            }
            Value::String(text) => match serde_json::from_str::<Value>(text) {
                Ok(Value::Object(object)) => {
                    response.data = object.clone();
                    if has_error_markers(&object) {
                        response.mark_failed_from_data();
                    }
                }
                _ => {
                    response.success = false;
                    response.error = Some(ResponseError {
                        message: text.clone(),
                        code: 0,
                        details: None,
                        kind: String::from("api_error"),
                    });
                }
            },
            _ => {}
        }

        if let Some(parser) = parser {
            parser.apply(&mut response, &raw);
        }

        response
    }

    fn mark_failed_from_data(&mut self) {
        let message = self
            .data
            .get("message")
            .and_then(Value::as_str)
            .or_else(|| self.data.get("error").and_then(Value::as_str))
            .unwrap_or("Unknown error")
            .to_owned();
        let code = self
            .data
            .get("code")
            .and_then(Value::as_i64)
            .or_else(|| self.data.get("error_code").and_then(Value::as_i64))
            .unwrap_or(0);

        self.success = false;
        self.error = Some(ResponseError {
            message,
            code,
            details: self.data.get("details").cloned(),
            kind: self
                .data
                .get("error_type")
                .and_then(Value::as_str)
                .unwrap_or("api_error")
                .to_owned(),
        });
    }

    pub const fn is_success(&self) -> bool {
        self.success
    }

    pub const fn is_error(&self) -> bool {
        !self.success
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a Value) -> &'a Value {
        self.data.get(key).unwrap_or(default)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) -> &mut Self {
        self.data.insert(key.into(), value);
        self
    }

    pub fn has(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Product list regardless of envelope kind: the `products` array for
    /// search envelopes, the single data map wrapped in a list for product
    /// envelopes, and empty otherwise.
    pub fn products(&self) -> Vec<Value> {
        match self.kind {
            ResponseKind::Search => self
                .data
                .get("products")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
            ResponseKind::Product => vec![Value::Object(self.data.clone())],
            _ => Vec::new(),
        }
    }

    /// Pagination derived from stored counts; missing fields default to
    /// page 1 of 1.
    pub fn pagination(&self) -> Pagination {
        let field = |key: &str, default: u64| -> u64 {
            self.data.get(key).and_then(Value::as_u64).unwrap_or(default)
        };

        let current_page = field("current_page", 1);
        let total_pages = field("total_pages", 1);

        Pagination {
            current_page,
            total_pages,
            total_results: field("total_results", 0),
            per_page: field("per_page", 10),
            has_next: current_page < total_pages,
            has_previous: current_page > 1,
        }
    }

    fn with_products<F>(&mut self, update: F) -> &mut Self
    where
        F: FnOnce(Vec<Value>) -> Vec<Value>,
    {
        if self.kind != ResponseKind::Search {
            return self;
        }

        let products = self
            .data
            .get("products")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let products = update(products);

        self.data
            .insert(String::from("total_results"), Value::from(products.len() as u64));
        self.data
            .insert(String::from("products"), Value::Array(products));
        self
    }

    /// Keeps products passing the predicate; a no-op for non-search kinds.
    pub fn filter_products<F>(&mut self, mut predicate: F) -> &mut Self
    where
        F: FnMut(&Value) -> bool,
    {
        self.with_products(|products| products.into_iter().filter(|p| predicate(p)).collect())
    }

    /// Transforms each product; a no-op for non-search kinds.
    pub fn map_products<F>(&mut self, transform: F) -> &mut Self
    where
        F: FnMut(Value) -> Value,
    {
        self.with_products(|products| products.into_iter().map(transform).collect())
    }

    /// Sorts products by a field. Equal keys keep insertion order.
    pub fn sort_products(&mut self, field: &str, descending: bool) -> &mut Self {
        self.with_products(|mut products| {
            products.sort_by(|a, b| {
                let ordering = compare_field(a.get(field), b.get(field));
                if descending {
                    ordering.reverse()
                } else {
                    ordering
                }
            });
            products
        })
    }

    /// Slices products to one page, recording pagination counts.
    pub fn paginate(&mut self, page: u64, per_page: u64) -> &mut Self {
        if self.kind != ResponseKind::Search || per_page == 0 {
            return self;
        }

        let products = self
            .data
            .get("products")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let total = products.len() as u64;
        let total_pages = total.div_ceil(per_page).max(1);
        let offset = (page.saturating_sub(1) * per_page) as usize;

        let page_products: Vec<Value> = products
            .into_iter()
            .skip(offset)
            .take(per_page as usize)
            .collect();

        self.data.insert(String::from("products"), Value::Array(page_products));
        self.data.insert(String::from("current_page"), Value::from(page));
        self.data.insert(String::from("per_page"), Value::from(per_page));
        self.data.insert(String::from("total_pages"), Value::from(total_pages));
        self.data.insert(String::from("total_results"), Value::from(total));
        self
    }

    /// Merges another envelope into this one. Two search envelopes
    /// concatenate product lists and recount; other combinations shallow-
    /// merge data with the right side winning. Execution time and credits
    /// always sum.
    pub fn merge(&mut self, other: ApiResponse) -> &mut Self {
        if self.kind == ResponseKind::Search && other.kind == ResponseKind::Search {
            let mut products = self
                .data
                .get("products")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            products.extend(
                other
                    .data
                    .get("products")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default(),
            );
            self.data
                .insert(String::from("total_results"), Value::from(products.len() as u64));
            self.data
                .insert(String::from("products"), Value::Array(products));
        } else {
            for (key, value) in other.data {
                self.data.insert(key, value);
            }
        }

        self.meta.execution_time_ms += other.meta.execution_time_ms;
        self.meta.credits_used += other.meta.credits_used;
        self
    }

    /// Persists the full envelope state through the cache layer.
    pub fn cache(&self, cache: &CacheLayer, key: &str, ttl_secs: Option<u64>) -> bool {
        match serde_json::to_value(self) {
            Ok(value) => cache.set(key, value, ttl_secs, Default::default()),
            Err(_) => false,
        }
    }

    /// Restores an envelope previously stored with [`Self::cache`],
    /// stamping `cache_hit` on the way out.
    pub fn from_cache(cache: &CacheLayer, key: &str) -> Option<Self> {
        let value = cache.get(key)?;
        let mut response: Self = serde_json::from_value(value).ok()?;
        response.meta.cache_hit = true;
        Some(response)
    }
}

fn has_error_markers(object: &Map<String, Value>) -> bool {
    if object.contains_key("error") || object.contains_key("errors") {
        return true;
    }
    object.get("success") == Some(&Value::Bool(false))
}

fn compare_field(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a.and_then(Value::as_f64), b.and_then(Value::as_f64)) {
        (Some(left), Some(right)) => left.partial_cmp(&right).unwrap_or(Ordering::Equal),
        _ => {
            let left = a.and_then(Value::as_str).unwrap_or("");
            let right = b.and_then(Value::as_str).unwrap_or("");
            left.cmp(right)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheConfig, CacheLayer};
    use crate::clock::ManualClock;
    use crate::store::MemoryKvStore;
    use serde_json::json;
    use std::sync::Arc;

    fn product_list() -> Vec<Value> {
        vec![
            json!({"asin": "A1", "price": 30.0, "rating": 4.0}),
            json!({"asin": "A2", "price": 10.0, "rating": 4.5}),
            json!({"asin": "A3", "price": 20.0, "rating": 4.5}),
        ]
    }

    #[test]
    fn error_envelope_upholds_invariant() {
        let response = ApiResponse::error("boom", 500, None);
        assert!(response.is_error());
        assert!(response.error.is_some());

        let ok = ApiResponse::product(Map::new(), ResponseMeta::default());
        assert!(ok.is_success());
        assert!(ok.error.is_none());
    }

    #[test]
    fn products_normalizes_both_kinds() {
        let mut data = Map::new();
        data.insert(String::from("asin"), json!("B0SINGLE"));
        let product = ApiResponse::product(data, ResponseMeta::default());
        assert_eq!(product.products().len(), 1);

        let search = ApiResponse::search(product_list(), ResponseMeta::default());
        assert_eq!(search.products().len(), 3);

        let error = ApiResponse::error("nope", 0, None);
        assert!(error.products().is_empty());
    }

    #[test]
    fn pagination_defaults_to_single_page() {
        let search = ApiResponse::search(product_list(), ResponseMeta::default());
        let pagination = search.pagination();

        assert_eq!(pagination.current_page, 1);
        assert_eq!(pagination.total_pages, 1);
        assert_eq!(pagination.total_results, 3);
        assert!(!pagination.has_next);
        assert!(!pagination.has_previous);
    }

    #[test]
    fn transforms_only_touch_search_envelopes() {
        let mut product = ApiResponse::product(Map::new(), ResponseMeta::default());
        product.filter_products(|_| false);
        assert_eq!(product.kind, ResponseKind::Product);
        assert!(product.data.is_empty() || !product.data.contains_key("products"));

        let mut search = ApiResponse::search(product_list(), ResponseMeta::default());
        search.filter_products(|p| p["price"].as_f64().unwrap_or(0.0) < 25.0);
        assert_eq!(search.products().len(), 2);
        assert_eq!(search.pagination().total_results, 2);
    }

    #[test]
    fn sort_is_stable_on_ties() {
        let mut search = ApiResponse::search(product_list(), ResponseMeta::default());
        search.sort_products("rating", true);

        let asins: Vec<_> = search
            .products()
            .iter()
            .map(|p| p["asin"].as_str().unwrap_or("").to_owned())
            .collect();
        // A2 and A3 tie on rating and keep insertion order.
        assert_eq!(asins, vec!["A2", "A3", "A1"]);
    }

    #[test]
    fn paginate_slices_and_counts() {
        let mut search = ApiResponse::search(product_list(), ResponseMeta::default());
        search.paginate(2, 2);

        assert_eq!(search.products().len(), 1);
        let pagination = search.pagination();
        assert_eq!(pagination.current_page, 2);
        assert_eq!(pagination.total_pages, 2);
        assert_eq!(pagination.total_results, 3);
        assert!(!pagination.has_next);
        assert!(pagination.has_previous);
    }

    #[test]
    fn merging_search_envelopes_concatenates_and_sums() {
        let mut left = ApiResponse::search(
            product_list(),
            ResponseMeta::default().with_execution_time(40).with_credits(1),
        );
        let right = ApiResponse::search(
            vec![json!({"asin": "A4"})],
            ResponseMeta::default().with_execution_time(60).with_credits(2),
        );

        left.merge(right);
        assert_eq!(left.products().len(), 4);
        assert_eq!(left.pagination().total_results, 4);
        assert_eq!(left.meta.execution_time_ms, 100);
        assert_eq!(left.meta.credits_used, 3);
    }

    #[test]
    fn merging_product_envelopes_right_wins() {
        let mut data = Map::new();
        data.insert(String::from("title"), json!("old"));
        let mut left = ApiResponse::product(data, ResponseMeta::default());

        let mut data = Map::new();
        data.insert(String::from("title"), json!("new"));
        let right = ApiResponse::product(data, ResponseMeta::default());

        left.merge(right);
        assert_eq!(left.get("title"), Some(&json!("new")));
    }

    #[test]
    fn from_raw_detects_error_markers() {
        let raw = json!({"error": "throttled", "code": 429});
        let response = ApiResponse::from_raw(raw, ProviderId::Paapi, ResponseKind::Product, None);

        assert!(response.is_error());
        let error = response.error.expect("error extracted");
        assert_eq!(error.message, "throttled");
        assert_eq!(error.code, 429);
        assert!(response.raw_response.is_some());
    }

    #[test]
    fn from_raw_applies_provider_parser() {
        struct LiftItems;
        impl ResponseParser for LiftItems {
            fn apply(&self, response: &mut ApiResponse, raw: &Value) {
                if let Some(items) = raw.get("ItemsResult") {
                    response.set("items", items.clone());
                }
            }
        }

        let raw = json!({"ItemsResult": {"Items": []}});
        let response = ApiResponse::from_raw(
            raw,
            ProviderId::Paapi,
            ResponseKind::Product,
            Some(&LiftItems),
        );
        assert!(response.has("items"));
    }

    #[test]
    fn cache_round_trip_marks_hit() {
        let clock = Arc::new(ManualClock::starting_now());
        let backend = Arc::new(MemoryKvStore::with_clock(clock.clone()));
        let cache = CacheLayer::new(CacheConfig::default(), backend, clock);

        let search = ApiResponse::search(product_list(), ResponseMeta::default());
        assert!(search.cache(&cache, "search_widgets", Some(60)));

        let restored = ApiResponse::from_cache(&cache, "search_widgets").expect("cached");
        assert!(restored.meta.cache_hit);
        assert_eq!(restored.products().len(), 3);
        assert!(ApiResponse::from_cache(&cache, "search_absent").is_none());
    }
}
