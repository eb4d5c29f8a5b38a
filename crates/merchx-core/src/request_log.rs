//! Per-attempt API request logging.
//!
//! Every provider attempt appends an entry (provider, endpoint, method,
//! serialized parameters) and completes it afterwards with the response
//! code, message, credits, and elapsed time. The log is a bounded ring; a
//! durable sink is a hosting concern.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;

use crate::clock::Clock;
use crate::http::HttpMethod;
use crate::provider::ProviderId;

const DEFAULT_CAPACITY: usize = 1_000;

#[derive(Debug, Clone, Serialize)]
pub struct RequestLogEntry {
    pub id: u64,
    pub provider: ProviderId,
    pub endpoint: String,
    pub method: &'static str,
    pub params: Value,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub response_code: Option<u16>,
    pub response_message: Option<String>,
    pub credits_used: Option<u32>,
    pub execution_time_ms: Option<u64>,
}

struct LogInner {
    entries: VecDeque<RequestLogEntry>,
    next_id: u64,
}

/// Bounded request log shared by every provider through the executor.
pub struct RequestLog {
    enabled: bool,
    capacity: usize,
    inner: Mutex<LogInner>,
    clock: Arc<dyn Clock>,
}

impl RequestLog {
    pub fn new(enabled: bool, clock: Arc<dyn Clock>) -> Self {
        Self::with_capacity(enabled, DEFAULT_CAPACITY, clock)
    }

    pub fn with_capacity(enabled: bool, capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            enabled,
            capacity,
            inner: Mutex::new(LogInner {
                entries: VecDeque::new(),
                next_id: 1,
            }),
            clock,
        }
    }

    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Records the start of one attempt; returns the entry id, or 0 when
    /// logging is disabled.
    pub fn begin(
        &self,
        provider: ProviderId,
        endpoint: &str,
        method: HttpMethod,
        params: Value,
    ) -> u64 {
        if !self.enabled {
            return 0;
        }

        let mut inner = self.inner.lock().expect("request log lock is not poisoned");
        let id = inner.next_id;
        inner.next_id += 1;

        if inner.entries.len() >= self.capacity {
            inner.entries.pop_front();
        }

        inner.entries.push_back(RequestLogEntry {
            id,
            provider,
            endpoint: endpoint.to_owned(),
            method: method.as_str(),
            params,
            created_at: self.clock.now(),
            response_code: None,
            response_message: None,
            credits_used: None,
            execution_time_ms: None,
        });

        id
    }

    /// Fills in the outcome of a previously begun attempt.
    pub fn complete(
        &self,
        id: u64,
        response_code: u16,
        message: impl Into<String>,
        credits_used: u32,
        execution_time_ms: u64,
    ) {
        if !self.enabled || id == 0 {
            return;
        }

        let mut inner = self.inner.lock().expect("request log lock is not poisoned");
        if let Some(entry) = inner.entries.iter_mut().find(|entry| entry.id == id) {
            entry.response_code = Some(response_code);
            entry.response_message = Some(message.into());
            entry.credits_used = Some(credits_used);
            entry.execution_time_ms = Some(execution_time_ms);
        }
    }

    /// Most recent entries, newest last.
    pub fn recent(&self, count: usize) -> Vec<RequestLogEntry> {
        let inner = self.inner.lock().expect("request log lock is not poisoned");
        let skip = inner.entries.len().saturating_sub(count);
        inner.entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .expect("request log lock is not poisoned")
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.inner
            .lock()
            .expect("request log lock is not poisoned")
            .entries
            .clear();
    }
}
