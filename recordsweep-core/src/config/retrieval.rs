//! Retrieval engine configuration.
//!
//! This module provides configuration for page size, the per-partition safety
//! cap, worker concurrency, per-call timeouts, throttling, token caching, and
//! retry behaviour for the token endpoint.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Hard per-query row cap enforced by the upstream platform.
pub const PLATFORM_ROW_CAP: u32 = 1000;

/// Longest token lifetime honoured, whatever the token endpoint reports (one week).
pub const MAX_TOKEN_TTL_SECS: u64 = 7 * 24 * 60 * 60;

/// Exponential backoff policy for transient token-endpoint failures.
///
/// Delay before retry `n` (0-based) is `min(base * 2^n, max)` plus up to
/// `base` of random jitter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Base delay in milliseconds
    pub base_delay_ms: u64,
    /// Upper bound on the exponential part of the delay
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 250,
            max_delay_ms: 5_000,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Exponential part of the delay before retry `attempt` (0-based), without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1_u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let delay = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(delay)
    }

    /// Delay before retry `attempt` including random jitter in `[0, base]`.
    pub fn delay_with_jitter(&self, attempt: u32) -> Duration {
        use rand::Rng;

        let jitter = if self.base_delay_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..=self.base_delay_ms)
        };
        self.backoff(attempt)
            .saturating_add(Duration::from_millis(jitter))
    }
}

/// Configuration for complete-dataset retrieval.
///
/// # Security
/// This struct intentionally does NOT store credentials. They are passed
/// separately as [`crate::security::Credentials`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Rows requested per page (the platform returns at most 1000)
    pub page_size: u32,
    /// Maximum page requests per partition before stopping with a safety-cap flag
    pub max_pages_per_partition: u32,
    /// Number of partitions drained concurrently
    pub max_concurrency: usize,
    /// Timeout applied to every upstream call
    pub request_timeout: Duration,
    /// Optional delay before every page request after the first (milliseconds)
    pub throttle_ms: Option<u64>,
    /// Whether to issue a diagnostic COUNT(*) query per retrieval
    pub estimate_count: bool,
    /// Retry policy for the token endpoint
    pub retry: RetryPolicy,
    /// A cached token is refreshed this many seconds before it expires
    pub token_refresh_skew_secs: u64,
    /// Token lifetime assumed when the token response omits `expires_in`
    pub default_token_ttl_secs: u64,
    /// Field aliases probed, in order, for the dedup key
    pub id_aliases: Vec<String>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            page_size: PLATFORM_ROW_CAP,
            max_pages_per_partition: 10,
            max_concurrency: 4,
            request_timeout: Duration::from_secs(30),
            throttle_ms: None,
            estimate_count: true,
            retry: RetryPolicy::default(),
            token_refresh_skew_secs: 60,
            default_token_ttl_secs: 3_600,
            id_aliases: vec![
                "id".to_string(),
                "Id".to_string(),
                "ID".to_string(),
                "record_id".to_string(),
                "RecordID".to_string(),
                "Record_ID".to_string(),
                "Client_ID2".to_string(),
                "client_id".to_string(),
            ],
        }
    }
}

impl RetrievalConfig {
    /// Creates a new retrieval config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates configuration parameters.
    ///
    /// # Errors
    /// Returns error if configuration values are invalid or unsafe
    pub fn validate(&self) -> crate::Result<()> {
        if self.page_size == 0 {
            return Err(crate::error::SweepError::configuration(
                "page_size must be greater than 0",
            ));
        }

        if self.page_size > PLATFORM_ROW_CAP {
            return Err(crate::error::SweepError::configuration(format!(
                "page_size must not exceed the platform cap of {}",
                PLATFORM_ROW_CAP
            )));
        }

        if self.max_pages_per_partition == 0 {
            return Err(crate::error::SweepError::configuration(
                "max_pages_per_partition must be greater than 0",
            ));
        }

        if self.max_concurrency == 0 {
            return Err(crate::error::SweepError::configuration(
                "max_concurrency must be greater than 0",
            ));
        }

        if self.request_timeout.is_zero() {
            return Err(crate::error::SweepError::configuration(
                "request_timeout must be greater than 0",
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(crate::error::SweepError::configuration(
                "retry.max_attempts must be at least 1",
            ));
        }

        if self.default_token_ttl_secs == 0 || self.default_token_ttl_secs > MAX_TOKEN_TTL_SECS {
            return Err(crate::error::SweepError::configuration(format!(
                "default_token_ttl_secs must be between 1 and {}",
                MAX_TOKEN_TTL_SECS
            )));
        }

        if self.token_refresh_skew_secs > MAX_TOKEN_TTL_SECS {
            return Err(crate::error::SweepError::configuration(format!(
                "token_refresh_skew_secs must not exceed {}",
                MAX_TOKEN_TTL_SECS
            )));
        }

        if self.id_aliases.iter().all(|alias| alias.trim().is_empty()) {
            return Err(crate::error::SweepError::configuration(
                "id_aliases must name at least one field",
            ));
        }

        Ok(())
    }

    /// Builder method to set page size.
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Builder method to set the per-partition page cap.
    pub fn with_max_pages_per_partition(mut self, pages: u32) -> Self {
        self.max_pages_per_partition = pages;
        self
    }

    /// Sets the maximum number of partitions drained concurrently.
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1); // Ensure at least 1
        self
    }

    /// Builder method to set the per-call timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Builder method to set throttle delay.
    pub fn with_throttle_ms(mut self, ms: u64) -> Self {
        self.throttle_ms = Some(ms);
        self
    }

    /// Builder method to enable/disable the diagnostic count query.
    pub fn with_estimate_count(mut self, enabled: bool) -> Self {
        self.estimate_count = enabled;
        self
    }

    /// Builder method to set the token retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Replaces the dedup key aliases.
    pub fn with_id_aliases(mut self, aliases: Vec<String>) -> Self {
        self.id_aliases = aliases;
        self
    }

    /// Rows a single partition can yield before the safety cap stops it.
    pub fn partition_row_ceiling(&self) -> u64 {
        u64::from(self.page_size).saturating_mul(u64::from(self.max_pages_per_partition))
    }
}
