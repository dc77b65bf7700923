//! `reqwest`-backed [`PlatformClient`].
//!
//! Endpoints:
//! - `POST {base}/oauth/token` (client-credentials grant, Basic auth)
//! - `GET {base}/rest/v2/tables/{table}/records` (Bearer auth)

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;
use zeroize::Zeroizing;

use super::{PageRequest, PlatformClient, TokenResponse};
use crate::Result;
use crate::auth::AccessToken;
use crate::error::{SweepError, redact_url};
use crate::models::RawRecord;
use crate::security::Credentials;

const COUNT_COLUMN: &str = "COUNT(*)";

#[derive(Deserialize)]
struct TokenBody {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    token_type: Option<String>,
}

#[derive(Deserialize)]
struct ResultEnvelope<T> {
    #[serde(rename = "Result")]
    result: Vec<T>,
}

#[derive(Deserialize)]
struct CountRow {
    #[serde(rename = "COUNT(*)")]
    count: u64,
}

/// HTTP client for one platform base URL.
#[derive(Debug, Clone)]
pub struct HttpPlatformClient {
    client: reqwest::Client,
    base_url: Url,
    timeout: Duration,
}

impl HttpPlatformClient {
    /// Creates a client for `base_url`; every request carries `timeout`.
    ///
    /// # Errors
    /// Returns a configuration error if `base_url` is not an absolute http(s)
    /// URL or the TLS backend cannot be initialized.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url).map_err(|e| {
            SweepError::configuration(format!(
                "Invalid base URL '{}': {}",
                redact_url(base_url),
                e
            ))
        })?;

        if !matches!(base_url.scheme(), "http" | "https") || base_url.cannot_be_a_base() {
            return Err(SweepError::configuration(format!(
                "Base URL '{}' must be an absolute http(s) URL",
                redact_url(base_url.as_str())
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("recordsweep/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                SweepError::configuration(format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url,
            timeout,
        })
    }

    /// Creates a client for the platform the credentials belong to.
    ///
    /// # Errors
    /// See [`HttpPlatformClient::new`].
    pub fn for_credentials(credentials: &Credentials, timeout: Duration) -> Result<Self> {
        Self::new(credentials.base_url(), timeout)
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| SweepError::configuration("Base URL cannot carry a path"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn records_url(&self, table: &str) -> Result<Url> {
        self.endpoint(&["rest", "v2", "tables", table, "records"])
    }

    fn send_error(&self, context: &str, error: reqwest::Error) -> SweepError {
        if error.is_timeout() {
            SweepError::timeout(context, self.timeout)
        } else {
            // reqwest errors embed the full URL; strip it before wrapping
            SweepError::transport(context, error.without_url())
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        context: &str,
        token: &AccessToken,
        url: Url,
        query: &[(&str, String)],
    ) -> Result<T> {
        debug!(url = %redact_url(url.as_str()), "{}", context);

        let response = self
            .client
            .get(url)
            .bearer_auth(token.value())
            .query(query)
            .send()
            .await
            .map_err(|e| self.send_error(context, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| self.send_error(context, e))?;

        if !status.is_success() {
            return Err(SweepError::http(context, status.as_u16(), body));
        }

        serde_json::from_str(&body).map_err(|e| SweepError::invalid_response(context, e))
    }
}

#[async_trait]
impl PlatformClient for HttpPlatformClient {
    async fn request_token(&self, credentials: &Credentials) -> Result<TokenResponse> {
        let url = self.endpoint(&["oauth", "token"])?;
        debug!(url = %redact_url(url.as_str()), client_id = %credentials.client_id(), "Requesting access token");

        let authorization = credentials.basic_authorization();
        let response = self
            .client
            .post(url)
            .header(reqwest::header::AUTHORIZATION, authorization.as_str())
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| self.send_error("Token request", e))?;

        let status = response.status();
        let body = Zeroizing::new(
            response
                .text()
                .await
                .map_err(|e| self.send_error("Token request", e))?,
        );

        if !status.is_success() {
            return Err(SweepError::auth(Some(status.as_u16()), body.as_str()));
        }

        let parsed: TokenBody = serde_json::from_str(&body)
            .map_err(|e| SweepError::invalid_response("Token response", e))?;

        Ok(TokenResponse {
            access_token: Zeroizing::new(parsed.access_token),
            expires_in: parsed.expires_in,
            token_type: parsed.token_type,
        })
    }

    async fn fetch_page(
        &self,
        token: &AccessToken,
        request: &PageRequest,
    ) -> Result<Vec<RawRecord>> {
        let url = self.records_url(&request.table)?;

        let mut query = vec![
            ("q.where", request.where_clause.clone()),
            ("q.pageSize", request.page_size.to_string()),
            ("q.pageNumber", request.page_number.to_string()),
        ];
        if let Some(select) = &request.select {
            query.push(("q.select", select.clone()));
        }
        if let Some(group_by) = &request.group_by {
            query.push(("q.groupBy", group_by.clone()));
        }

        let envelope: ResultEnvelope<RawRecord> =
            self.get_json("Page request", token, url, &query).await?;
        Ok(envelope.result)
    }

    async fn count(
        &self,
        token: &AccessToken,
        table: &str,
        where_clause: Option<&str>,
    ) -> Result<u64> {
        let url = self.records_url(table)?;

        let mut query = vec![("q.select", COUNT_COLUMN.to_string())];
        if let Some(where_clause) = where_clause {
            query.push(("q.where", where_clause.to_string()));
        }

        let envelope: ResultEnvelope<CountRow> =
            self.get_json("Count query", token, url, &query).await?;

        match envelope.result.first() {
            Some(row) => Ok(row.count),
            None => Err(SweepError::invalid_response(
                "Count query",
                <serde_json::Error as serde::de::Error>::custom("empty Result array"),
            )),
        }
    }
}
