//! In-memory [`PlatformClient`] for local development and tests.
//!
//! Semantics mirror the real platform where it matters to retrieval:
//! - every page is silently capped at 1000 rows regardless of `q.pageSize`
//! - `q.where` understands the predicates the planner renders: `1=1`,
//!   `field = 'value'`, `(field IS NULL OR field = '')`, and parenthesized
//!   conjunctions of those joined with `AND`; anything else is a 400
//! - grouped requests return one row per distinct value in first-seen order
//! - tokens are opaque strings; revoked or unknown tokens get a 401

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use zeroize::Zeroizing;

use super::{PageRequest, PlatformClient, TokenResponse};
use crate::Result;
use crate::auth::AccessToken;
use crate::config::PLATFORM_ROW_CAP;
use crate::error::SweepError;
use crate::models::RawRecord;
use crate::security::Credentials;

type RequestMatcher = Box<dyn Fn(&PageRequest) -> bool + Send + Sync>;

struct PageFailure {
    status: u16,
    matcher: RequestMatcher,
}

#[derive(Default)]
struct PlatformState {
    tables: BTreeMap<String, Vec<RawRecord>>,
    /// Expected `Authorization: Basic ...` value; any credentials pass when unset
    accepted_authorization: Option<Zeroizing<String>>,
    token_ttl_secs: Option<u64>,
    /// Statuses returned by the next token requests, in order
    token_failures: Vec<u16>,
    count_failure: Option<u16>,
    page_failures: Vec<PageFailure>,
    issued_tokens: HashSet<String>,
    token_requests: usize,
    count_requests: usize,
    page_requests: Vec<PageRequest>,
}

/// Process-local stand-in for the upstream platform.
#[derive(Default)]
pub struct InMemoryPlatform {
    state: Mutex<PlatformState>,
}

impl InMemoryPlatform {
    /// Creates an empty platform that issues tokens to any credentials.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) a table.
    pub fn with_table(mut self, name: impl Into<String>, rows: Vec<RawRecord>) -> Self {
        self.state.get_mut().tables.insert(name.into(), rows);
        self
    }

    /// Only these credentials may obtain tokens; others get a 401.
    pub fn with_credentials(mut self, credentials: &Credentials) -> Self {
        self.state.get_mut().accepted_authorization = Some(credentials.basic_authorization());
        self
    }

    /// Reports `expires_in` on issued tokens.
    pub fn with_token_ttl(mut self, secs: u64) -> Self {
        self.state.get_mut().token_ttl_secs = Some(secs);
        self
    }

    /// The next token requests fail with these statuses, one per request.
    pub fn with_token_failures(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.state.get_mut().token_failures = statuses.into_iter().collect();
        self
    }

    /// Every count query fails with `status`.
    pub fn with_count_failure(mut self, status: u16) -> Self {
        self.state.get_mut().count_failure = Some(status);
        self
    }

    /// Page requests matching `matcher` fail with `status`.
    pub fn with_page_failure<F>(mut self, status: u16, matcher: F) -> Self
    where
        F: Fn(&PageRequest) -> bool + Send + Sync + 'static,
    {
        self.state.get_mut().page_failures.push(PageFailure {
            status,
            matcher: Box::new(matcher),
        });
        self
    }

    /// Forgets every issued token, as if they all expired upstream.
    pub async fn revoke_tokens(&self) {
        self.state.lock().await.issued_tokens.clear();
    }

    /// Number of token requests received.
    pub async fn token_requests(&self) -> usize {
        self.state.lock().await.token_requests
    }

    /// Number of count queries received.
    pub async fn count_requests(&self) -> usize {
        self.state.lock().await.count_requests
    }

    /// Snapshot of every page request received, in arrival order.
    pub async fn page_requests(&self) -> Vec<PageRequest> {
        self.state.lock().await.page_requests.clone()
    }

    fn check_token(state: &PlatformState, token: &AccessToken) -> Result<()> {
        if state.issued_tokens.contains(token.value()) {
            Ok(())
        } else {
            Err(SweepError::http(
                "Page request",
                401,
                r#"{"error":"invalid_token"}"#,
            ))
        }
    }

    fn matching_rows<'a>(
        state: &'a PlatformState,
        context: &str,
        table: &str,
        where_clause: &str,
    ) -> Result<Vec<&'a RawRecord>> {
        let rows = state.tables.get(table).ok_or_else(|| {
            SweepError::http(context, 404, format!("table '{}' does not exist", table))
        })?;
        let predicate = Predicate::parse(where_clause).ok_or_else(|| {
            SweepError::http(context, 400, format!("unsupported predicate: {}", where_clause))
        })?;
        Ok(rows.iter().filter(|row| predicate.matches(row)).collect())
    }
}

#[async_trait]
impl PlatformClient for InMemoryPlatform {
    async fn request_token(&self, credentials: &Credentials) -> Result<TokenResponse> {
        let mut state = self.state.lock().await;
        state.token_requests += 1;

        if !state.token_failures.is_empty() {
            let status = state.token_failures.remove(0);
            return Err(SweepError::auth(
                Some(status),
                r#"{"error":"temporarily_unavailable"}"#,
            ));
        }

        if let Some(expected) = &state.accepted_authorization {
            if expected.as_str() != credentials.basic_authorization().as_str() {
                return Err(SweepError::auth(Some(401), r#"{"error":"invalid_client"}"#));
            }
        }

        let token = format!("mem-token-{}", state.token_requests);
        state.issued_tokens.insert(token.clone());

        Ok(TokenResponse {
            access_token: Zeroizing::new(token),
            expires_in: state.token_ttl_secs,
            token_type: Some("Bearer".to_string()),
        })
    }

    async fn fetch_page(
        &self,
        token: &AccessToken,
        request: &PageRequest,
    ) -> Result<Vec<RawRecord>> {
        let mut state = self.state.lock().await;
        state.page_requests.push(request.clone());
        Self::check_token(&state, token)?;

        if let Some(failure) = state
            .page_failures
            .iter()
            .find(|failure| (failure.matcher)(request))
        {
            return Err(SweepError::http(
                "Page request",
                failure.status,
                "injected failure",
            ));
        }

        if request.page_size == 0 || request.page_number == 0 {
            return Err(SweepError::http(
                "Page request",
                400,
                "q.pageSize and q.pageNumber must be positive",
            ));
        }

        let rows = Self::matching_rows(&state, "Page request", &request.table, &request.where_clause)?;

        let rows: Vec<RawRecord> = match &request.group_by {
            Some(field) => distinct_values(&rows, field),
            None => rows.into_iter().cloned().collect(),
        };

        let effective_size = request.page_size.min(PLATFORM_ROW_CAP) as usize;
        let offset = (request.page_number as usize - 1).saturating_mul(effective_size);

        Ok(rows.into_iter().skip(offset).take(effective_size).collect())
    }

    async fn count(
        &self,
        token: &AccessToken,
        table: &str,
        where_clause: Option<&str>,
    ) -> Result<u64> {
        let mut state = self.state.lock().await;
        state.count_requests += 1;
        Self::check_token(&state, token)?;

        if let Some(status) = state.count_failure {
            return Err(SweepError::http("Count query", status, "injected failure"));
        }

        let rows = Self::matching_rows(&state, "Count query", table, where_clause.unwrap_or("1=1"))?;
        Ok(rows.len() as u64)
    }
}

fn distinct_values(rows: &[&RawRecord], field: &str) -> Vec<RawRecord> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for row in rows {
        let value = row.get(field).cloned().unwrap_or(Value::Null);
        if seen.insert(value.to_string()) {
            let mut grouped = RawRecord::new();
            grouped.insert(field.to_string(), value);
            out.push(grouped);
        }
    }
    out
}

/// The predicate subset the planner renders.
#[derive(Debug, PartialEq)]
enum Predicate {
    Always,
    Equals { field: String, value: String },
    NullOrEmpty { field: String },
    And(Vec<Predicate>),
}

impl Predicate {
    fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        let parts = split_top_level_and(input);
        if parts.len() > 1 {
            return parts
                .into_iter()
                .map(Self::parse)
                .collect::<Option<Vec<_>>>()
                .map(Self::And);
        }

        if let Some(inner) = strip_outer_parens(input) {
            return Self::parse(inner);
        }

        if input.replace(' ', "") == "1=1" {
            return Some(Self::Always);
        }

        if let Some((left, right)) = input.split_once(" IS NULL OR ") {
            let field = left.trim();
            return (is_identifier(field) && right.trim() == format!("{} = ''", field)).then(|| {
                Self::NullOrEmpty {
                    field: field.to_string(),
                }
            });
        }

        let (field, literal) = input.split_once('=')?;
        let field = field.trim();
        let literal = literal.trim();
        if !is_identifier(field) || literal.len() < 2 {
            return None;
        }
        let body = literal.strip_prefix('\'')?.strip_suffix('\'')?;
        // A lone quote inside the body means the literal was not escaped
        if body.replace("''", "").contains('\'') {
            return None;
        }
        Some(Self::Equals {
            field: field.to_string(),
            value: body.replace("''", "'"),
        })
    }

    fn matches(&self, row: &RawRecord) -> bool {
        match self {
            Self::Always => true,
            Self::Equals { field, value } => {
                scalar_text(row.get(field)).is_some_and(|text| text == *value)
            }
            Self::NullOrEmpty { field } => {
                scalar_text(row.get(field)).is_none_or(|text| text.is_empty())
            }
            Self::And(parts) => parts.iter().all(|part| part.matches(row)),
        }
    }
}

fn scalar_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn is_identifier(s: &str) -> bool {
    crate::config::validate_identifier(s).is_ok()
}

/// Splits on ` AND ` outside quotes and parentheses.
fn split_top_level_and(input: &str) -> Vec<&str> {
    let bytes = input.as_bytes();
    let mut parts = Vec::new();
    let mut depth = 0_i32;
    let mut in_quote = false;
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\'' => in_quote = !in_quote,
            b'(' if !in_quote => depth += 1,
            b')' if !in_quote => depth -= 1,
            b' ' if !in_quote && depth == 0 && input[i..].starts_with(" AND ") => {
                parts.push(&input[start..i]);
                i += " AND ".len();
                start = i;
                continue;
            }
            _ => {}
        }
        i += 1;
    }
    parts.push(&input[start..]);
    parts
}

/// Returns the inside of `( ... )` when the parentheses wrap the whole input.
fn strip_outer_parens(input: &str) -> Option<&str> {
    let inner = input.strip_prefix('(')?.strip_suffix(')')?;
    let mut depth = 0_i32;
    let mut in_quote = false;
    for byte in inner.bytes() {
        match byte {
            b'\'' => in_quote = !in_quote,
            b'(' if !in_quote => depth += 1,
            b')' if !in_quote => {
                depth -= 1;
                if depth < 0 {
                    return None;
                }
            }
            _ => {}
        }
    }
    (depth == 0).then_some(inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> RawRecord {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    async fn token(platform: &InMemoryPlatform) -> AccessToken {
        let creds = Credentials::new("https://mem.local", "client", "secret");
        let response = platform.request_token(&creds).await.unwrap();
        AccessToken::from_response(response, std::time::Duration::from_secs(3600))
    }

    #[test]
    fn test_predicate_parsing() {
        assert_eq!(Predicate::parse("1=1"), Some(Predicate::Always));
        assert_eq!(
            Predicate::parse("Health_Plan = 'Health Net'"),
            Some(Predicate::Equals {
                field: "Health_Plan".to_string(),
                value: "Health Net".to_string()
            })
        );
        assert_eq!(
            Predicate::parse("(Health_Plan IS NULL OR Health_Plan = '')"),
            Some(Predicate::NullOrEmpty {
                field: "Health_Plan".to_string()
            })
        );
        assert_eq!(
            Predicate::parse("Name = 'O''Brien'"),
            Some(Predicate::Equals {
                field: "Name".to_string(),
                value: "O'Brien".to_string()
            })
        );
        assert!(matches!(
            Predicate::parse("(Plan = 'A AND B') AND (Active = '1')"),
            Some(Predicate::And(parts)) if parts.len() == 2
        ));
        assert_eq!(Predicate::parse("Plan LIKE 'K%'"), None);
        assert_eq!(Predicate::parse("Name = 'O'Brien'"), None);
    }

    #[test]
    fn test_predicate_matching() {
        let kaiser = row(json!({"Plan": "Kaiser"}));
        let empty = row(json!({"Plan": ""}));
        let null = row(json!({"Plan": null}));
        let missing = row(json!({}));
        let numeric = row(json!({"Plan": 7}));

        let catch_all = Predicate::parse("(Plan IS NULL OR Plan = '')").unwrap();
        assert!(!catch_all.matches(&kaiser));
        assert!(catch_all.matches(&empty));
        assert!(catch_all.matches(&null));
        assert!(catch_all.matches(&missing));

        assert!(Predicate::parse("Plan = '7'").unwrap().matches(&numeric));
        assert!(Predicate::parse("Plan = 'Kaiser'").unwrap().matches(&kaiser));
    }

    #[tokio::test]
    async fn test_page_size_is_silently_capped() {
        let rows = (0..2500).map(|i| row(json!({"id": i}))).collect();
        let platform = InMemoryPlatform::new().with_table("Clients", rows);
        let token = token(&platform).await;

        let page = platform
            .fetch_page(&token, &PageRequest::new("Clients", "1=1", 5000, 1))
            .await
            .unwrap();
        assert_eq!(page.len(), 1000);

        let last = platform
            .fetch_page(&token, &PageRequest::new("Clients", "1=1", 1000, 3))
            .await
            .unwrap();
        assert_eq!(last.len(), 500);
        assert_eq!(platform.page_requests().await.len(), 2);
    }

    #[tokio::test]
    async fn test_grouped_distinct_values() {
        let rows = vec![
            row(json!({"County": "Kern"})),
            row(json!({"County": "Fresno"})),
            row(json!({"County": "Kern"})),
            row(json!({"County": null})),
        ];
        let platform = InMemoryPlatform::new().with_table("Clients", rows);
        let token = token(&platform).await;

        let page = platform
            .fetch_page(
                &token,
                &PageRequest::new("Clients", "1=1", 1000, 1).grouped_by("County"),
            )
            .await
            .unwrap();
        assert_eq!(page.len(), 3);
        assert_eq!(page[0]["County"], "Kern");
        assert_eq!(page[1]["County"], "Fresno");
        assert!(page[2]["County"].is_null());
    }

    #[tokio::test]
    async fn test_unknown_token_is_rejected() {
        let platform = InMemoryPlatform::new().with_table("Clients", Vec::new());
        let token = token(&platform).await;
        platform.revoke_tokens().await;

        let err = platform
            .fetch_page(&token, &PageRequest::new("Clients", "1=1", 1000, 1))
            .await
            .unwrap_err();
        assert!(err.is_unauthorized());
    }

    #[tokio::test]
    async fn test_credentials_are_checked() {
        let good = Credentials::new("https://mem.local", "client", "secret");
        let bad = Credentials::new("https://mem.local", "client", "wrong");
        let platform = InMemoryPlatform::new().with_credentials(&good);

        assert!(platform.request_token(&good).await.is_ok());
        let err = platform.request_token(&bad).await.unwrap_err();
        assert_eq!(err.status(), Some(401));
        assert!(!err.to_string().contains("wrong"));
    }

    #[tokio::test]
    async fn test_count_and_failures() {
        let rows = vec![
            row(json!({"Plan": "Kaiser"})),
            row(json!({"Plan": "Molina"})),
        ];
        let platform = InMemoryPlatform::new()
            .with_table("Clients", rows)
            .with_page_failure(503, |request| request.page_number == 2);
        let token = token(&platform).await;

        assert_eq!(platform.count(&token, "Clients", None).await.unwrap(), 2);
        assert_eq!(
            platform
                .count(&token, "Clients", Some("Plan = 'Kaiser'"))
                .await
                .unwrap(),
            1
        );

        let err = platform
            .fetch_page(&token, &PageRequest::new("Clients", "1=1", 1, 2))
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(503));

        let err = platform
            .fetch_page(&token, &PageRequest::new("Missing", "1=1", 1, 1))
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(404));
    }
}
