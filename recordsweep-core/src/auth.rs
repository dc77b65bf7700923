//! Bearer-token acquisition and process-wide caching.
//!
//! Tokens come from the platform's OAuth2 client-credentials endpoint and are
//! cached per credential identity `(base_url, client_id, secret fingerprint)`. Refresh is
//! single-flight: each identity has its own async mutex, held across the
//! cache lookup and the upstream request, so concurrent retrievals with the
//! same credentials trigger one token request.
//!
//! # Invalidation
//! A cached token is stale once `now + refresh_skew >= expires_at`. A token
//! is also dropped when a page request answered it with HTTP 401. Lifetimes
//! are clamped to [`MAX_TOKEN_TTL_SECS`], whatever the endpoint reports.
//!
//! # Security
//! Token values live in `Zeroizing` buffers and are redacted from `Debug`.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::Result;
use crate::client::{PlatformClient, TokenResponse};
use crate::config::{MAX_TOKEN_TTL_SECS, RetrievalConfig, RetryPolicy};
use crate::error::SweepError;
use crate::security::Credentials;

/// Short-lived bearer credential.
#[derive(Clone)]
pub struct AccessToken {
    value: Zeroizing<String>,
    expires_at: Instant,
}

impl AccessToken {
    /// Creates a token valid for `ttl` from now.
    pub fn new(value: impl Into<String>, ttl: Duration) -> Self {
        Self {
            value: Zeroizing::new(value.into()),
            expires_at: expiry_after(ttl),
        }
    }

    /// Builds a token from an endpoint response, using `default_ttl` when the
    /// response carries no `expires_in`.
    pub fn from_response(response: TokenResponse, default_ttl: Duration) -> Self {
        let ttl = response
            .expires_in
            .map_or(default_ttl, Duration::from_secs);
        Self {
            value: response.access_token,
            expires_at: expiry_after(ttl),
        }
    }

    /// Raw token for the `Authorization: Bearer` header. Never log this.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Instant after which the platform no longer accepts the token.
    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// Whether the token should be refreshed before use.
    ///
    /// A skew too large to add to the current instant makes every token stale.
    pub fn is_stale(&self, refresh_skew: Duration) -> bool {
        Instant::now()
            .checked_add(refresh_skew)
            .is_none_or(|deadline| deadline >= self.expires_at)
    }
}

/// Expiry `ttl` from now, clamped to the maximum token lifetime.
fn expiry_after(ttl: Duration) -> Instant {
    let now = Instant::now();
    let ttl = ttl.min(Duration::from_secs(MAX_TOKEN_TTL_SECS));
    now.checked_add(ttl).unwrap_or(now)
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"****")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

type CacheKey = (String, String, String);
type CacheSlot = Arc<Mutex<Option<AccessToken>>>;

/// Token cache keyed by credential identity.
#[derive(Default)]
pub struct TokenCache {
    slots: Mutex<HashMap<CacheKey, CacheSlot>>,
}

impl TokenCache {
    /// Creates an empty cache, independent of the process-wide one.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide cache shared by every [`TokenProvider`] that was not
    /// given its own.
    pub fn global() -> Arc<TokenCache> {
        static GLOBAL: OnceLock<Arc<TokenCache>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(TokenCache::new())).clone()
    }

    async fn slot(&self, credentials: &Credentials) -> CacheSlot {
        let mut slots = self.slots.lock().await;
        slots
            .entry(credentials.cache_key())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    /// Returns the cached token for `credentials` if it is still fresh.
    pub async fn cached(
        &self,
        credentials: &Credentials,
        refresh_skew: Duration,
    ) -> Option<AccessToken> {
        let slot = self.slot(credentials).await;
        let guard = slot.lock().await;
        guard
            .as_ref()
            .filter(|token| !token.is_stale(refresh_skew))
            .cloned()
    }

    /// Drops the cached token for `credentials` if it is still `rejected`.
    ///
    /// A token refreshed by another caller in the meantime is kept.
    pub async fn invalidate(&self, credentials: &Credentials, rejected: &AccessToken) {
        let slot = self.slot(credentials).await;
        let mut guard = slot.lock().await;
        if guard
            .as_ref()
            .is_some_and(|current| current.value() == rejected.value())
        {
            *guard = None;
        }
    }

    /// Drops every cached token.
    pub async fn clear(&self) {
        self.slots.lock().await.clear();
    }
}

/// Obtains bearer tokens, consulting the cache first.
pub struct TokenProvider {
    client: Arc<dyn PlatformClient>,
    cache: Arc<TokenCache>,
    retry: RetryPolicy,
    request_timeout: Duration,
    refresh_skew: Duration,
    default_ttl: Duration,
}

impl TokenProvider {
    /// Creates a provider backed by the process-wide cache.
    pub fn new(client: Arc<dyn PlatformClient>, config: &RetrievalConfig) -> Self {
        Self {
            client,
            cache: TokenCache::global(),
            retry: config.retry.clone(),
            request_timeout: config.request_timeout,
            refresh_skew: Duration::from_secs(config.token_refresh_skew_secs),
            default_ttl: Duration::from_secs(config.default_token_ttl_secs),
        }
    }

    /// Uses `cache` instead of the process-wide one.
    pub fn with_cache(mut self, cache: Arc<TokenCache>) -> Self {
        self.cache = cache;
        self
    }

    /// The cache this provider reads and fills.
    pub fn cache(&self) -> &Arc<TokenCache> {
        &self.cache
    }

    /// Returns a fresh token for `credentials`, requesting one if needed.
    ///
    /// # Errors
    /// Returns `SweepError::Auth` when the endpoint rejects the credentials,
    /// or the last transient error once the retry policy is exhausted.
    pub async fn get_token(&self, credentials: &Credentials) -> Result<AccessToken> {
        let slot = self.cache.slot(credentials).await;
        let mut guard = slot.lock().await;

        if let Some(token) = guard.as_ref().filter(|t| !t.is_stale(self.refresh_skew)) {
            debug!(client_id = %credentials.client_id(), "Using cached access token");
            return Ok(token.clone());
        }

        let token = self.request_with_retry(credentials).await?;
        *guard = Some(token.clone());
        Ok(token)
    }

    /// Drops `rejected` from the cache so the next call re-authenticates.
    pub async fn invalidate(&self, credentials: &Credentials, rejected: &AccessToken) {
        info!(client_id = %credentials.client_id(), "Invalidating rejected access token");
        self.cache.invalidate(credentials, rejected).await;
    }

    async fn request_with_retry(&self, credentials: &Credentials) -> Result<AccessToken> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            let outcome =
                tokio::time::timeout(self.request_timeout, self.client.request_token(credentials))
                    .await
                    .unwrap_or_else(|_| {
                        Err(SweepError::timeout("Token request", self.request_timeout))
                    });

            match outcome {
                Ok(response) => {
                    info!(client_id = %credentials.client_id(), "Acquired access token");
                    return Ok(AccessToken::from_response(response, self.default_ttl));
                }
                Err(e) if e.is_transient() && attempt + 1 < max_attempts => {
                    let delay = self.retry.delay_with_jitter(attempt);
                    warn!(
                        client_id = %credentials.client_id(),
                        attempt = attempt + 1,
                        max_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Token request failed, retrying: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::InMemoryPlatform;

    fn creds() -> Credentials {
        Credentials::new("https://mem.local", "client", "secret")
    }

    fn provider(platform: Arc<InMemoryPlatform>, config: &RetrievalConfig) -> TokenProvider {
        TokenProvider::new(platform, config).with_cache(Arc::new(TokenCache::new()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_staleness() {
        let token = AccessToken::new("abc", Duration::from_secs(120));
        assert!(!token.is_stale(Duration::from_secs(60)));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(token.is_stale(Duration::from_secs(60)));
        assert!(!token.is_stale(Duration::ZERO));
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_lifetimes_are_clamped() {
        let token = AccessToken::new("abc", Duration::MAX);
        assert!(!token.is_stale(Duration::from_secs(60)));
        assert!(token.is_stale(Duration::MAX));

        let response = TokenResponse {
            access_token: Zeroizing::new("abc".to_string()),
            expires_in: Some(u64::MAX),
            token_type: None,
        };
        let token = AccessToken::from_response(response, Duration::from_secs(60));
        let ceiling = Instant::now() + Duration::from_secs(MAX_TOKEN_TTL_SECS);
        assert!(token.expires_at() <= ceiling);

        tokio::time::advance(Duration::from_secs(MAX_TOKEN_TTL_SECS)).await;
        assert!(token.is_stale(Duration::ZERO));
    }

    #[tokio::test]
    async fn test_unbounded_endpoint_ttl_does_not_panic() {
        let platform = Arc::new(InMemoryPlatform::new().with_token_ttl(u64::MAX));
        let provider = provider(platform.clone(), &RetrievalConfig::default());

        let first = provider.get_token(&creds()).await.unwrap();
        let second = provider.get_token(&creds()).await.unwrap();
        assert_eq!(first.value(), second.value());
        assert_eq!(platform.token_requests().await, 1);
    }

    #[tokio::test]
    async fn test_tokens_are_cached_per_secret() {
        let good = Credentials::new("https://mem.local", "client", "secret");
        let bad = Credentials::new("https://mem.local", "client", "wrong");
        let platform = Arc::new(InMemoryPlatform::new().with_credentials(&good));
        let provider = provider(platform.clone(), &RetrievalConfig::default());

        provider.get_token(&good).await.unwrap();
        let err = provider.get_token(&bad).await.unwrap_err();

        assert!(matches!(err, SweepError::Auth { status: Some(401), .. }));
        assert_eq!(platform.token_requests().await, 2);
    }

    #[test]
    fn test_token_debug_is_redacted() {
        let token = AccessToken::new("super-secret-token", Duration::from_secs(60));
        let debug = format!("{token:?}");
        assert!(!debug.contains("super-secret-token"));
        assert!(debug.contains("****"));
    }

    #[tokio::test]
    async fn test_token_is_cached() {
        let platform = Arc::new(InMemoryPlatform::new());
        let provider = provider(platform.clone(), &RetrievalConfig::default());

        let first = provider.get_token(&creds()).await.unwrap();
        let second = provider.get_token(&creds()).await.unwrap();

        assert_eq!(first.value(), second.value());
        assert_eq!(platform.token_requests().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_token_is_refreshed() {
        let platform = Arc::new(InMemoryPlatform::new().with_token_ttl(120));
        let provider = provider(platform.clone(), &RetrievalConfig::default());

        provider.get_token(&creds()).await.unwrap();
        tokio::time::advance(Duration::from_secs(90)).await;
        provider.get_token(&creds()).await.unwrap();

        assert_eq!(platform.token_requests().await, 2);
    }

    #[tokio::test]
    async fn test_invalidate_only_drops_rejected_token() {
        let platform = Arc::new(InMemoryPlatform::new());
        let provider = provider(platform.clone(), &RetrievalConfig::default());

        let token = provider.get_token(&creds()).await.unwrap();
        let unrelated = AccessToken::new("other", Duration::from_secs(60));
        provider.invalidate(&creds(), &unrelated).await;
        assert!(
            provider
                .cache()
                .cached(&creds(), Duration::ZERO)
                .await
                .is_some()
        );

        provider.invalidate(&creds(), &token).await;
        assert!(
            provider
                .cache()
                .cached(&creds(), Duration::ZERO)
                .await
                .is_none()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let platform = Arc::new(InMemoryPlatform::new().with_token_failures([503, 502]));
        let provider = provider(platform.clone(), &RetrievalConfig::default());

        let token = provider.get_token(&creds()).await;
        assert!(token.is_ok());
        assert_eq!(platform.token_requests().await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_are_bounded() {
        let platform = Arc::new(InMemoryPlatform::new().with_token_failures([500, 500, 500, 500]));
        let provider = provider(platform.clone(), &RetrievalConfig::default());

        let err = provider.get_token(&creds()).await.unwrap_err();
        assert_eq!(err.status(), Some(500));
        assert_eq!(platform.token_requests().await, 3);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let platform = Arc::new(InMemoryPlatform::new().with_token_failures([400]));
        let provider = provider(platform.clone(), &RetrievalConfig::default());

        let err = provider.get_token(&creds()).await.unwrap_err();
        assert!(matches!(err, SweepError::Auth { status: Some(400), .. }));
        assert_eq!(platform.token_requests().await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_request() {
        let platform = Arc::new(InMemoryPlatform::new());
        let provider = Arc::new(provider(platform.clone(), &RetrievalConfig::default()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let provider = provider.clone();
                tokio::spawn(async move { provider.get_token(&creds()).await })
            })
            .collect();

        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(platform.token_requests().await, 1);
    }
}
