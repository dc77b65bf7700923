//! Complete-dataset retrieval orchestration.
//!
//! This module drives one `fetch_all` call end to end:
//! - Acquires a bearer token once (cached across calls)
//! - Optionally runs a diagnostic `COUNT(*)`
//! - Plans partitions, discovering partition values first when asked
//! - Drains partitions with bounded concurrency (`buffer_unordered`)
//! - Merges in partition order, deduplicates, and normalizes
//!
//! Only invalid configuration and authentication failures are errors. Every
//! other problem ends the affected partition early and marks the result
//! partial.

use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::Result;
use crate::aggregate::RecordAggregator;
use crate::auth::{AccessToken, TokenCache, TokenProvider};
use crate::client::{PageRequest, PlatformClient};
use crate::config::{PartitionStrategy, QueryPlan, RetrievalConfig};
use crate::count::CountEstimator;
use crate::fetcher::PageFetcher;
use crate::models::{
    Diagnostics, Filter, PartitionOutcome, PartitionReport, RetrievalResult, StopReason,
};
use crate::normalize::{NormalizationSchema, Normalizer};
use crate::planner::{ALWAYS_TRUE, PartitionPlanner, extract_partition_values};
use crate::security::Credentials;

/// Filters to run plus what planning learned along the way.
struct ResolvedPlan {
    filters: Vec<Filter>,
    may_truncate: bool,
    discovery_failed: bool,
    discovery_unauthorized: bool,
    discovery_cancelled: bool,
}

/// Retrieves every row of a table from a row-capped platform.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use recordsweep_core::{Credentials, HttpPlatformClient, QueryPlan, RetrievalConfig, RetrievalEngine};
///
/// # async fn example() -> recordsweep_core::Result<()> {
/// let config = RetrievalConfig::default();
/// let credentials = Credentials::new("https://acme.example.com", "svc-reports", "from-secret-store");
/// let client = HttpPlatformClient::for_credentials(&credentials, config.request_timeout)?;
/// let engine = RetrievalEngine::new(Arc::new(client), config);
///
/// let plan = QueryPlan::discover("Clients", "Health_Plan");
/// let result = engine.fetch_all(&credentials, &plan).await?;
/// if result.partial {
///     eprintln!("incomplete: {:?}", result.diagnostics.warnings);
/// }
/// # Ok(())
/// # }
/// ```
pub struct RetrievalEngine {
    config: RetrievalConfig,
    tokens: TokenProvider,
    planner: PartitionPlanner,
    fetcher: PageFetcher,
    estimator: CountEstimator,
    aggregator: RecordAggregator,
    normalizer: Normalizer,
}

impl RetrievalEngine {
    /// Creates an engine using the process-wide token cache and the default
    /// normalization schema.
    pub fn new(client: Arc<dyn PlatformClient>, config: RetrievalConfig) -> Self {
        Self {
            tokens: TokenProvider::new(client.clone(), &config),
            planner: PartitionPlanner::new(),
            fetcher: PageFetcher::new(client.clone(), &config),
            estimator: CountEstimator::new(client, &config),
            aggregator: RecordAggregator::from_config(&config),
            normalizer: Normalizer::from_config(&config),
            config,
        }
    }

    /// Uses a private token cache instead of the process-wide one.
    pub fn with_token_cache(mut self, cache: Arc<TokenCache>) -> Self {
        self.tokens = self.tokens.with_cache(cache);
        self
    }

    /// Replaces the normalization schema.
    pub fn with_schema(mut self, schema: NormalizationSchema) -> Self {
        self.normalizer = Normalizer::new(schema, self.config.id_aliases.clone());
        self
    }

    /// The configuration every retrieval is validated against.
    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Token provider shared by every retrieval on this engine.
    pub fn token_provider(&self) -> &TokenProvider {
        &self.tokens
    }

    /// Fetches every row `plan` describes.
    ///
    /// # Errors
    /// Returns error only for invalid configuration or plans and for
    /// authentication failure. Partial data is reported through
    /// [`RetrievalResult::partial`].
    pub async fn fetch_all(
        &self,
        credentials: &Credentials,
        plan: &QueryPlan,
    ) -> Result<RetrievalResult> {
        self.fetch_all_cancellable(credentials, plan, CancellationToken::new())
            .await
    }

    /// Like [`Self::fetch_all`], stopping early once `cancel` fires.
    ///
    /// No new page request is issued after cancellation; requests already in
    /// flight complete or time out. Records gathered so far are returned with
    /// `cancelled = true`.
    ///
    /// # Errors
    /// See [`Self::fetch_all`].
    pub async fn fetch_all_cancellable(
        &self,
        credentials: &Credentials,
        plan: &QueryPlan,
        cancel: CancellationToken,
    ) -> Result<RetrievalResult> {
        self.config.validate()?;
        plan.validate()?;

        let start_time = Instant::now();
        let mut diagnostics = Diagnostics::new(&plan.table);
        let table = plan.table.as_str();
        let page_size = plan.page_size.unwrap_or(self.config.page_size);

        info!(
            table,
            page_size,
            max_concurrency = self.config.max_concurrency,
            max_pages = self.config.max_pages_per_partition,
            "Starting retrieval"
        );

        let token = self.tokens.get_token(credentials).await?;

        if self.config.estimate_count {
            diagnostics.estimated_count = Some(
                self.estimator
                    .estimate(&token, table, plan.additional_where.as_deref())
                    .await,
            );
        }

        let resolved = self.resolve_plan(&token, plan, page_size, &cancel).await?;
        diagnostics.may_truncate = resolved.may_truncate;
        if resolved.may_truncate {
            warn!(table, "Unpartitioned retrieval may be truncated at the platform row cap");
            diagnostics.add_warning(
                "plan is unpartitioned; results may be truncated at the platform row cap",
            );
        }
        if resolved.discovery_failed {
            diagnostics.discovery_failed = true;
            diagnostics.add_warning(
                "partition discovery failed; fallback values were used and unlisted values were not queried",
            );
        }

        let mut outcomes = self
            .drain_partitions(&token, table, resolved.filters, page_size, &cancel)
            .await;
        outcomes.sort_by_key(|outcome| outcome.filter.index);

        if resolved.discovery_unauthorized || outcomes.iter().any(|o| o.stop.is_unauthorized()) {
            self.tokens.invalidate(credentials, &token).await;
        }

        diagnostics.partitions = outcomes.iter().map(PartitionReport::from).collect();
        let partial = resolved.discovery_failed || outcomes.iter().any(PartitionOutcome::is_partial);

        let aggregate = self.aggregator.merge(outcomes);
        diagnostics.raw_record_count = aggregate.raw_count;
        diagnostics.duplicates_dropped = aggregate.duplicates_dropped;
        diagnostics.records_without_identifier = aggregate.without_identifier;

        let records: Vec<_> = aggregate
            .records
            .into_iter()
            .map(|(_, raw)| self.normalizer.normalize_owned(raw))
            .collect();

        if let Some(estimated) = diagnostics.estimated_count {
            if estimated != records.len() as u64 {
                diagnostics.add_warning(format!(
                    "count estimate {} differs from {} retrieved records",
                    estimated,
                    records.len()
                ));
            }
        }

        for report in diagnostics.partitions.iter().filter(|r| r.stop.is_partial()) {
            diagnostics
                .warnings
                .push(format!("partition '{}' stopped: {}", report.clause, report.stop));
        }

        // Only cancellation that cut a partition or discovery short counts
        let cancelled = resolved.discovery_cancelled
            || diagnostics
                .partitions
                .iter()
                .any(|report| report.stop == StopReason::Cancelled);
        diagnostics.duration_ms =
            u64::try_from(start_time.elapsed().as_millis()).unwrap_or(u64::MAX);

        info!(
            table,
            records = records.len(),
            raw = diagnostics.raw_record_count,
            duplicates = diagnostics.duplicates_dropped,
            pages = diagnostics.total_pages_requested(),
            partial,
            cancelled,
            "Retrieval completed in {}ms",
            diagnostics.duration_ms
        );

        Ok(RetrievalResult {
            records,
            partial,
            cancelled,
            diagnostics,
        })
    }

    async fn resolve_plan(
        &self,
        token: &AccessToken,
        plan: &QueryPlan,
        page_size: u32,
        cancel: &CancellationToken,
    ) -> Result<ResolvedPlan> {
        let PartitionStrategy::DiscoverThenPartition {
            field,
            fallback_values,
        } = &plan.strategy
        else {
            return Ok(ResolvedPlan {
                filters: self.planner.plan(plan)?,
                may_truncate: self.planner.may_truncate(plan),
                discovery_failed: false,
                discovery_unauthorized: false,
                discovery_cancelled: false,
            });
        };

        let where_clause = plan.additional_where.as_deref().unwrap_or(ALWAYS_TRUE);
        let request = PageRequest::new(&plan.table, where_clause, page_size, 1).grouped_by(field);
        let label = format!("distinct {}", field);
        let drained = self.fetcher.drain(token, request, &label, cancel).await;

        if !drained.stop.is_partial() {
            let values = extract_partition_values(field, &drained.records);
            info!(
                table = %plan.table,
                field = %field,
                values = values.len(),
                "Discovered partition values"
            );
            return Ok(ResolvedPlan {
                filters: self.planner.plan_with_values(plan, field, values)?,
                may_truncate: false,
                discovery_failed: false,
                discovery_unauthorized: false,
                discovery_cancelled: false,
            });
        }

        warn!(
            table = %plan.table,
            field = %field,
            reason = %drained.stop,
            fallback_values = fallback_values.len(),
            "Partition discovery failed, falling back to enumerated values"
        );

        let fallback = QueryPlan {
            strategy: PartitionStrategy::EnumeratedValues {
                field: field.clone(),
                values: fallback_values.clone(),
            },
            ..plan.clone()
        };

        Ok(ResolvedPlan {
            filters: self.planner.plan(&fallback)?,
            may_truncate: self.planner.may_truncate(&fallback),
            discovery_failed: true,
            discovery_unauthorized: drained.stop.is_unauthorized(),
            discovery_cancelled: matches!(drained.stop, StopReason::Cancelled),
        })
    }

    async fn drain_partitions(
        &self,
        token: &AccessToken,
        table: &str,
        filters: Vec<Filter>,
        page_size: u32,
        cancel: &CancellationToken,
    ) -> Vec<PartitionOutcome> {
        let fetches = filters.into_iter().map(|filter| {
            self.fetcher
                .fetch_partition(token, table, filter, page_size, cancel)
        });

        stream::iter(fetches)
            .buffer_unordered(self.config.max_concurrency.max(1))
            .collect()
            .await
    }
}
