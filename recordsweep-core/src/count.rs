//! Best-effort `COUNT(*)` for diagnostics.
//!
//! The count is never used for correctness decisions; completeness comes from
//! draining every partition. Any failure is logged and reported as `0`.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::auth::AccessToken;
use crate::client::PlatformClient;
use crate::config::RetrievalConfig;
use crate::error::SweepError;

/// Issues aggregate count queries that never fail.
#[derive(Clone)]
pub struct CountEstimator {
    client: Arc<dyn PlatformClient>,
    request_timeout: Duration,
}

impl CountEstimator {
    /// Creates an estimator using the configured per-call timeout.
    pub fn new(client: Arc<dyn PlatformClient>, config: &RetrievalConfig) -> Self {
        Self {
            client,
            request_timeout: config.request_timeout,
        }
    }

    /// Row count of `table` under `where_clause`, or `0` on any failure.
    pub async fn estimate(
        &self,
        token: &AccessToken,
        table: &str,
        where_clause: Option<&str>,
    ) -> u64 {
        let result = tokio::time::timeout(
            self.request_timeout,
            self.client.count(token, table, where_clause),
        )
        .await
        .unwrap_or_else(|_| Err(SweepError::timeout("Count query", self.request_timeout)));

        match result {
            Ok(count) => {
                debug!(table, count, "Estimated row count");
                count
            }
            Err(e) => {
                warn!(table, "Count estimate failed, reporting 0: {}", e);
                0
            }
        }
    }
}
