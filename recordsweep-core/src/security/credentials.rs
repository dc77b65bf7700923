//! Secure credential container with automatic memory zeroing.
//!
//! This module provides the `Credentials` struct which holds the upstream
//! platform's client-credentials grant with automatic memory clearing on drop
//! using the `zeroize` crate.
//!
//! # Security
//! - The client secret is stored in a `Zeroizing<String>` container
//! - Memory is automatically cleared when credentials go out of scope
//! - The secret is never exposed in debug output, display output, or logs

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Client-credentials grant for the upstream REST platform.
///
/// Values are supplied by the caller (typically from a secret store) and are
/// immutable for the duration of a retrieval.
///
/// # Example
///
/// ```rust
/// use recordsweep_core::security::Credentials;
///
/// let creds = Credentials::new("https://acme.example.com", "svc-reports", "s3cret");
/// assert_eq!(creds.client_id(), "svc-reports");
/// assert!(!format!("{creds:?}").contains("s3cret"));
/// // Secret is automatically zeroed when `creds` is dropped
/// ```
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    #[zeroize(skip)]
    base_url: String,
    #[zeroize(skip)]
    client_id: String,
    client_secret: Zeroizing<String>,
}

impl Credentials {
    /// Creates new credentials with automatic memory zeroing.
    ///
    /// A trailing slash on `base_url` is dropped so endpoint paths can be
    /// appended uniformly.
    pub fn new(
        base_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            client_id: client_id.into(),
            client_secret: Zeroizing::new(client_secret.into()),
        }
    }

    /// Platform base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// OAuth2 client id. Not secret, but still kept out of error bodies.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Checks if a secret is present without exposing it.
    pub fn has_secret(&self) -> bool {
        !self.client_secret.is_empty()
    }

    /// Builds the `Authorization: Basic ...` header value for the token endpoint.
    ///
    /// The returned buffer is zeroized on drop as well.
    pub fn basic_authorization(&self) -> Zeroizing<String> {
        let raw = Zeroizing::new(format!("{}:{}", self.client_id, *self.client_secret));
        Zeroizing::new(format!("Basic {}", STANDARD.encode(raw.as_bytes())))
    }

    /// Identity used to key cached tokens: base URL, client id, and a SHA-256
    /// fingerprint of the secret.
    ///
    /// Credentials that differ only in their secret never share a token. The
    /// fingerprint is one-way and must still be kept out of logs.
    pub fn cache_key(&self) -> (String, String, String) {
        let mut hasher = Sha256::new();
        hasher.update(self.client_secret.as_bytes());
        let fingerprint = format!("{:x}", hasher.finalize());
        (self.base_url.clone(), self.client_id.clone(), fingerprint)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("base_url", &crate::error::redact_url(&self.base_url))
            .field("client_id", &self.client_id)
            .field("client_secret", &"****")
            .finish()
    }
}

impl fmt::Display for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}",
            self.client_id,
            crate::error::redact_url(&self.base_url)
        )
        // Intentionally omit the secret
    }
}
