//! Engine configuration: named-key lookups with defaults for TTLs, rate
//! limits, retries, selection policy, and queue parameters.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::cache::CacheConfig;
use crate::error::ValidationError;
use crate::provider::ProviderId;
use crate::rate_limit::RateLimitConfig;

/// Load-balancing policy for provider selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// Always the configured primary provider.
    #[default]
    Priority,
    /// Cycle over providers supporting the requested operation.
    RoundRobin,
    /// Provider with the lowest total request count among capable ones.
    LeastUsed,
    Random,
}

impl SelectionPolicy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Priority => "priority",
            Self::RoundRobin => "round_robin",
            Self::LeastUsed => "least_used",
            Self::Random => "random",
        }
    }
}

impl FromStr for SelectionPolicy {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "priority" => Ok(Self::Priority),
            "round_robin" | "round-robin" => Ok(Self::RoundRobin),
            "least_used" | "least-used" => Ok(Self::LeastUsed),
            "random" => Ok(Self::Random),
            other => Err(ValidationError::InvalidPolicy {
                value: other.to_owned(),
            }),
        }
    }
}

/// Retry knobs surfaced through configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub retry_on_status: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_on_status: vec![429, 500, 502, 503, 504],
        }
    }
}

/// Background queue parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Jobs picked up per processing pass.
    pub batch_size: usize,
    /// Per-job execution timeout in seconds.
    pub job_timeout_secs: u64,
    pub max_retries: u32,
    /// Days to keep terminal jobs before the retention sweep removes them.
    pub retention_days: u32,
    /// Seconds after which a processing claim or the single-flight flag is
    /// considered stale.
    pub stale_after_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            job_timeout_secs: 30,
            max_retries: 3,
            retention_days: 30,
            stale_after_secs: 300,
        }
    }
}

/// Top-level engine configuration with defaults for every key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub primary_provider: ProviderId,
    pub fallback_provider: Option<ProviderId>,
    pub selection_policy: SelectionPolicy,
    pub cache: CacheConfig,
    pub rate_limits: RateLimitConfig,
    pub retry: RetryConfig,
    pub queue: QueueConfig,
    pub request_logging: bool,
    /// Per-attempt upstream timeout in milliseconds.
    pub request_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            primary_provider: ProviderId::Paapi,
            fallback_provider: Some(ProviderId::Rainforest),
            selection_policy: SelectionPolicy::Priority,
            cache: CacheConfig::default(),
            rate_limits: RateLimitConfig::default(),
            retry: RetryConfig::default(),
            queue: QueueConfig::default(),
            request_logging: true,
            request_timeout_ms: 30_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_parses_both_spellings() {
        assert_eq!(
            "round-robin".parse::<SelectionPolicy>().expect("valid"),
            SelectionPolicy::RoundRobin
        );
        assert_eq!(
            "least_used".parse::<SelectionPolicy>().expect("valid"),
            SelectionPolicy::LeastUsed
        );
        assert!("weighted".parse::<SelectionPolicy>().is_err());
    }

    #[test]
    fn partial_config_fills_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"selection_policy": "least_used"}"#).expect("parses");

        assert_eq!(config.selection_policy, SelectionPolicy::LeastUsed);
        assert_eq!(config.primary_provider, ProviderId::Paapi);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.queue.batch_size, 10);
        assert_eq!(config.request_timeout_ms, 30_000);
    }
}
