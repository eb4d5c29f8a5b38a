use std::fmt::{Display, Formatter};

use thiserror::Error;
use time::OffsetDateTime;

use crate::ProviderId;

/// Validation and contract errors exposed by `merchx-core`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("search keyword cannot be empty")]
    EmptyKeyword,
    #[error("product identifier cannot be empty")]
    EmptyAsin,
    #[error("identifier list cannot be empty")]
    EmptyAsinList,
    #[error("page must be greater than zero")]
    ZeroPage,
    #[error("per_page must be greater than zero")]
    ZeroPerPage,
    #[error("invalid provider '{value}', expected one of paapi, rainforest, serpapi, dataforseo")]
    InvalidProvider { value: String },
    #[error("invalid selection policy '{value}', expected one of priority, round_robin, least_used, random")]
    InvalidPolicy { value: String },
    #[error("credential field '{field}' is required")]
    MissingCredential { field: &'static str },
    #[error("ttl must be greater than zero")]
    ZeroTtl,
}

/// Top-level error type for core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure classification used for retry-vs-fallback decisions.
///
/// The orchestration manager never sees raw transport failures, only these
/// kinds; adapters are responsible for classifying every upstream outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rejected locally before the network call, or upstream throttling.
    /// Triggers provider fallback, never same-provider retry.
    Quota,
    /// Invalid or missing credentials. Never retried.
    Auth,
    /// Network failure or retryable HTTP status. Retried with backoff.
    Transient,
    /// The identifier does not exist upstream. Not an error for bulk calls.
    NotFound,
    /// Upstream payload unparsable. Escalates to fallback without retry.
    Malformed,
    /// Operation not declared in the provider's capability set.
    Unsupported,
}

/// Structured provider failure consumed by the orchestration manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderError {
    kind: ErrorKind,
    message: String,
    provider: Option<ProviderId>,
    status: Option<u16>,
    /// When a quota window is expected to open again.
    reset_at: Option<OffsetDateTime>,
}

impl ProviderError {
    pub fn quota(message: impl Into<String>, reset_at: Option<OffsetDateTime>) -> Self {
        Self {
            kind: ErrorKind::Quota,
            message: message.into(),
            provider: None,
            status: Some(429),
            reset_at,
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Auth,
            message: message.into(),
            provider: None,
            status: None,
            reset_at: None,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Transient,
            message: message.into(),
            provider: None,
            status: None,
            reset_at: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::NotFound,
            message: message.into(),
            provider: None,
            status: Some(404),
            reset_at: None,
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Malformed,
            message: message.into(),
            provider: None,
            status: None,
            reset_at: None,
        }
    }

    pub fn unsupported(operation: &str) -> Self {
        Self {
            kind: ErrorKind::Unsupported,
            message: format!("operation '{operation}' is not supported by this provider"),
            provider: None,
            status: None,
            reset_at: None,
        }
    }

    pub fn with_provider(mut self, provider: ProviderId) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn provider(&self) -> Option<ProviderId> {
        self.provider
    }

    pub const fn status(&self) -> Option<u16> {
        self.status
    }

    pub const fn reset_at(&self) -> Option<OffsetDateTime> {
        self.reset_at
    }

    /// Whether the same provider may be retried for this failure.
    pub const fn retryable(&self) -> bool {
        matches!(self.kind, ErrorKind::Transient)
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            ErrorKind::Quota => "provider.quota",
            ErrorKind::Auth => "provider.auth",
            ErrorKind::Transient => "provider.transient",
            ErrorKind::NotFound => "provider.not_found",
            ErrorKind::Malformed => "provider.malformed",
            ErrorKind::Unsupported => "provider.unsupported",
        }
    }
}

impl Display for ProviderError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for ProviderError {}

impl From<ValidationError> for ProviderError {
    fn from(error: ValidationError) -> Self {
        Self::malformed(error.to_string())
    }
}
