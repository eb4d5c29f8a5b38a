//! Shared request execution pipeline injected into every provider adapter.
//!
//! One composable object carries the cross-cutting behavior the adapters
//! would otherwise duplicate: the rate-limit gate, the retry/backoff loop,
//! failure classification, cache integration, and request logging.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};

use crate::cache::CacheLayer;
use crate::clock::Clock;
use crate::error::ProviderError;
use crate::http::{HttpClient, HttpRequest};
use crate::provider::{Operation, ProviderId};
use crate::rate_limit::RateLimiter;
use crate::request_log::RequestLog;
use crate::retry::RetryPolicy;

/// Execution pipeline shared by all adapters of one engine instance.
pub struct RequestExecutor {
    http: Arc<dyn HttpClient>,
    cache: Arc<CacheLayer>,
    limiter: Arc<RateLimiter>,
    log: Arc<RequestLog>,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
    timeout_override_ms: Option<u64>,
}

impl RequestExecutor {
    pub fn new(
        http: Arc<dyn HttpClient>,
        cache: Arc<CacheLayer>,
        limiter: Arc<RateLimiter>,
        log: Arc<RequestLog>,
        retry: RetryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            http,
            cache,
            limiter,
            log,
            retry,
            clock,
            timeout_override_ms: None,
        }
    }

    /// Forces every attempt's timeout to the configured value, overriding
    /// whatever the adapter set on the request.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_override_ms = Some(timeout_ms);
        self
    }

    pub fn cache(&self) -> &CacheLayer {
        &self.cache
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn log(&self) -> &RequestLog {
        &self.log
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Executes one upstream call with the full pipeline.
    ///
    /// The rate gate runs before the first attempt; a blocked scope fails
    /// immediately with a quota error carrying the window's reset hint and
    /// consumes no retry. Only transport failures and retryable statuses
    /// are retried; the backoff wait suspends just this operation and
    /// holds no locks.
    pub async fn execute(
        &self,
        provider: ProviderId,
        endpoint: &str,
        mut request: HttpRequest,
    ) -> Result<Value, ProviderError> {
        if let Some(timeout_ms) = self.timeout_override_ms {
            request.timeout_ms = timeout_ms;
        }
        let scope = format!("{provider}:{endpoint}");

        if !self.limiter.can_make_request(&scope) {
            let reset_at = self.limiter.reset_at(&scope);
            tracing::debug!(%provider, endpoint, "rate limit gate rejected request");
            return Err(ProviderError::quota(
                format!("rate limit exceeded for '{scope}'"),
                reset_at,
            )
            .with_provider(provider));
        }

        let params = json!({
            "url": request.url,
            "body": request.body,
        });

        let mut last_error =
            ProviderError::transient("request was never attempted").with_provider(provider);

        for attempt in 1..=self.retry.max_retries {
            let log_id = self.log.begin(provider, endpoint, request.method, params.clone());
            let started = Instant::now();
            self.limiter.record_request(&scope);

            let outcome = tokio::time::timeout(
                std::time::Duration::from_millis(request.timeout_ms),
                self.http.execute(request.clone()),
            )
            .await
            .unwrap_or_else(|_| {
                Err(crate::http::HttpError::timed_out(format!(
                    "attempt exceeded {}ms",
                    request.timeout_ms
                )))
            });

            let elapsed_ms = started.elapsed().as_millis() as u64;

            match outcome {
                Ok(response) if response.is_success() => {
                    return match serde_json::from_str::<Value>(&response.body) {
                        Ok(value) => {
                            self.log.complete(log_id, response.status, "OK", 1, elapsed_ms);
                            Ok(value)
                        }
                        Err(parse_error) => {
                            let message = format!("unparsable response body: {parse_error}");
                            self.log
                                .complete(log_id, response.status, message.clone(), 1, elapsed_ms);
                            Err(ProviderError::malformed(message).with_provider(provider))
                        }
                    };
                }
                Ok(response) => {
                    let message = response_snippet(&response.body);
                    self.log
                        .complete(log_id, response.status, message.clone(), 0, elapsed_ms);

                    if self.retry.should_retry_status(response.status)
                        && attempt < self.retry.max_retries
                    {
                        tracing::debug!(
                            %provider,
                            endpoint,
                            status = response.status,
                            attempt,
                            "retryable status, backing off"
                        );
                        tokio::time::sleep(self.retry.delay_for_attempt(attempt)).await;
                        last_error = classify_status(response.status, &message)
                            .with_provider(provider);
                        continue;
                    }

                    return Err(classify_status(response.status, &message).with_provider(provider));
                }
                Err(transport_error) => {
                    self.log.complete(
                        log_id,
                        0,
                        transport_error.message().to_owned(),
                        0,
                        elapsed_ms,
                    );
                    last_error = ProviderError::transient(transport_error.message().to_owned())
                        .with_provider(provider);

                    if attempt < self.retry.max_retries {
                        tracing::debug!(
                            %provider,
                            endpoint,
                            attempt,
                            error = transport_error.message(),
                            "transport failure, backing off"
                        );
                        tokio::time::sleep(self.retry.delay_for_attempt(attempt)).await;
                        continue;
                    }
                }
            }
        }

        tracing::warn!(
            %provider,
            endpoint,
            attempts = self.retry.max_retries,
            "request failed after all attempts"
        );
        Err(last_error)
    }

    /// Deterministic cache key for an operation's parameters.
    pub fn cache_key(
        &self,
        operation: Operation,
        params: &BTreeMap<String, String>,
        provider: ProviderId,
    ) -> String {
        self.cache
            .generate_key(operation.cache_type(), params, Some(provider))
    }

    /// Cache read; backend failures surface as a miss.
    pub fn cache_lookup(&self, key: &str) -> Option<Value> {
        self.cache.get(key)
    }

    /// Write-through with the operation's type TTL, tagged for group
    /// invalidation by provider and type.
    pub fn cache_store(&self, key: &str, value: Value, provider: ProviderId, operation: Operation) {
        let tags = [
            provider.as_str().to_owned(),
            operation.cache_type().to_owned(),
        ]
        .into_iter()
        .collect();
        self.cache.set(key, value, None, tags);
    }
}

fn classify_status(status: u16, message: &str) -> ProviderError {
    match status {
        401 | 403 => ProviderError::auth(format!("upstream rejected credentials: {message}"))
            .with_status(status),
        404 => ProviderError::not_found(message.to_owned()),
        429 => ProviderError::quota(format!("upstream throttled: {message}"), None),
        408 | 500..=599 => {
            ProviderError::transient(format!("upstream error {status}: {message}")).with_status(status)
        }
        other => ProviderError::malformed(format!("unexpected status {other}: {message}"))
            .with_status(other),
    }
}

fn response_snippet(body: &str) -> String {
    const MAX: usize = 200;
    if body.len() <= MAX {
        body.to_owned()
    } else {
        let mut end = MAX;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &body[..end])
    }
}
