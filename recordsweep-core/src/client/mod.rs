//! Transport seam for the upstream REST data platform.
//!
//! The engine never talks HTTP directly; it drives a [`PlatformClient`].
//! Two implementations ship with the crate:
//! - `http`: `reqwest`-backed client for the real platform
//! - `memory`: in-process tables honoring the platform's silent row cap, for
//!   tests and dry runs
//!
//! # Security Guarantees
//! - Implementations must never log credential or token values
//! - URLs in errors pass through [`crate::error::redact_url`]
//! - All operations are read-only

use std::fmt;

use async_trait::async_trait;
use zeroize::Zeroizing;

use crate::Result;
use crate::auth::AccessToken;
use crate::models::RawRecord;
use crate::security::Credentials;

pub mod http;
pub mod memory;

pub use http::HttpPlatformClient;
pub use memory::InMemoryPlatform;

/// Successful answer from the token endpoint.
pub struct TokenResponse {
    /// Bearer token value
    pub access_token: Zeroizing<String>,
    /// Lifetime in seconds, when the platform reports one
    pub expires_in: Option<u64>,
    /// Token type, normally `Bearer`
    pub token_type: Option<String>,
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"****")
            .field("expires_in", &self.expires_in)
            .field("token_type", &self.token_type)
            .finish()
    }
}

/// One page request against a table's records endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// Upstream table name
    pub table: String,
    /// `q.where` predicate
    pub where_clause: String,
    /// `q.pageSize`
    pub page_size: u32,
    /// `q.pageNumber`, 1-based
    pub page_number: u32,
    /// `q.select`, for grouped requests
    pub select: Option<String>,
    /// `q.groupBy`, for grouped requests
    pub group_by: Option<String>,
}

impl PageRequest {
    /// Plain record page.
    pub fn new(
        table: impl Into<String>,
        where_clause: impl Into<String>,
        page_size: u32,
        page_number: u32,
    ) -> Self {
        Self {
            table: table.into(),
            where_clause: where_clause.into(),
            page_size,
            page_number,
            select: None,
            group_by: None,
        }
    }

    /// Selects and groups by `field`, yielding one row per distinct value.
    pub fn grouped_by(mut self, field: impl Into<String>) -> Self {
        let field = field.into();
        self.select = Some(field.clone());
        self.group_by = Some(field);
        self
    }

    /// Same request for another page.
    pub fn with_page_number(&self, page_number: u32) -> Self {
        Self {
            page_number,
            ..self.clone()
        }
    }
}

/// Async access to the upstream platform.
///
/// # Object Safety
/// This trait is object-safe; the engine holds it as `Arc<dyn PlatformClient>`.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Exchanges client credentials for a bearer token.
    ///
    /// # Errors
    /// Returns `SweepError::Auth` carrying the upstream status and body on any
    /// non-2xx answer, or a transport/timeout error if no answer arrived.
    async fn request_token(&self, credentials: &Credentials) -> Result<TokenResponse>;

    /// Fetches one page of raw records.
    ///
    /// The platform silently returns at most 1000 rows whatever `page_size` says.
    ///
    /// # Errors
    /// Returns error on non-2xx answers, transport failures, or malformed bodies.
    async fn fetch_page(&self, token: &AccessToken, request: &PageRequest)
    -> Result<Vec<RawRecord>>;

    /// Runs an aggregate `COUNT(*)` over `table`.
    ///
    /// # Errors
    /// Returns error on non-2xx answers, transport failures, or a body without
    /// a numeric `COUNT(*)` column.
    async fn count(
        &self,
        token: &AccessToken,
        table: &str,
        where_clause: Option<&str>,
    ) -> Result<u64>;
}
