//! Core data models for complete-dataset retrieval.
//!
//! This module defines the records flowing through the engine (raw upstream
//! rows, canonical records), the per-partition outcome of pagination, and the
//! result and diagnostics returned to callers. All result types are
//! serializable so callers can expose them as JSON unchanged.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A row as returned by the upstream platform.
///
/// Field names are open-ended and inconsistently cased across tables and
/// schema generations; see [`crate::normalize`] for alias resolution.
pub type RawRecord = serde_json::Map<String, serde_json::Value>;

/// What a partition filter selects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterKind {
    /// Rows whose partition field equals `value`
    Equals { field: String, value: String },
    /// Rows whose partition field is null or the empty string
    NullOrEmpty { field: String },
    /// Every row (optionally narrowed by the plan's additional predicate)
    Unpartitioned,
}

/// One bounded sub-query of a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    /// Position in the plan; merge order follows this index
    pub index: usize,
    /// What the filter selects
    pub kind: FilterKind,
    /// Rendered `q.where` predicate
    pub clause: String,
}

impl Filter {
    /// Whether this is the null/empty catch-all partition.
    pub fn is_catch_all(&self) -> bool {
        matches!(self.kind, FilterKind::NullOrEmpty { .. })
    }
}

impl std::fmt::Display for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{} {}", self.index, self.clause)
    }
}

/// Why a partition stopped paginating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StopReason {
    /// A short or empty page proved the partition drained
    Exhausted,
    /// A page request failed; pages fetched before it are kept
    HttpError {
        status: Option<u16>,
        message: String,
    },
    /// The per-partition page cap was reached; more rows may remain upstream
    SafetyCap { pages: u32 },
    /// The retrieval was cancelled before the partition drained
    Cancelled,
}

impl StopReason {
    /// Whether the partition may be missing rows.
    pub fn is_partial(&self) -> bool {
        !matches!(self, Self::Exhausted)
    }

    /// Whether the stop was caused by a rejected bearer token.
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            Self::HttpError {
                status: Some(401),
                ..
            }
        )
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::Exhausted => write!(f, "exhausted"),
            StopReason::HttpError {
                status: Some(status),
                message,
            } => write!(f, "http error {}: {}", status, message),
            StopReason::HttpError {
                status: None,
                message,
            } => write!(f, "http error: {}", message),
            StopReason::SafetyCap { pages } => write!(f, "safety cap after {} pages", pages),
            StopReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Everything one partition produced.
#[derive(Debug, Clone)]
pub struct PartitionOutcome {
    /// The partition that was drained
    pub filter: Filter,
    /// Records in page order
    pub records: Vec<RawRecord>,
    /// Page requests actually issued
    pub pages_requested: u32,
    /// Why draining stopped
    pub stop: StopReason,
}

impl PartitionOutcome {
    /// Whether the partition may be missing rows.
    pub fn is_partial(&self) -> bool {
        self.stop.is_partial()
    }
}

/// A normalized record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    /// Primary identifier, when the raw record carried one
    pub id: Option<String>,
    /// Canonical business fields, alias-resolved and defaulted
    pub fields: BTreeMap<String, String>,
    /// The original upstream row, untouched
    pub passthrough: RawRecord,
}

impl CanonicalRecord {
    /// Looks up a canonical field.
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    /// Derived full name, if one could be built.
    pub fn member_name(&self) -> Option<&str> {
        self.get(crate::normalize::MEMBER_NAME)
    }
}

/// Per-partition summary carried in [`Diagnostics`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionReport {
    /// Position in the plan
    pub index: usize,
    /// Rendered `q.where` predicate
    pub clause: String,
    /// Records fetched, before deduplication
    pub records: usize,
    /// Page requests issued
    pub pages_requested: u32,
    /// Why draining stopped
    pub stop: StopReason,
}

impl From<&PartitionOutcome> for PartitionReport {
    fn from(outcome: &PartitionOutcome) -> Self {
        Self {
            index: outcome.filter.index,
            clause: outcome.filter.clause.clone(),
            records: outcome.records.len(),
            pages_requested: outcome.pages_requested,
            stop: outcome.stop.clone(),
        }
    }
}

/// Machine-readable account of how a retrieval went.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostics {
    /// Upstream table
    pub table: String,
    /// When the retrieval started
    pub started_at: chrono::DateTime<chrono::Utc>,
    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,
    /// One entry per partition, in plan order
    pub partitions: Vec<PartitionReport>,
    /// Records fetched before deduplication
    pub raw_record_count: usize,
    /// Records dropped as duplicates of an earlier record
    pub duplicates_dropped: usize,
    /// Records that received a synthetic dedup key
    pub records_without_identifier: usize,
    /// Best-effort upstream COUNT(*); `None` when not requested
    pub estimated_count: Option<u64>,
    /// The plan was unpartitioned and may have hit the platform row cap
    pub may_truncate: bool,
    /// Partition discovery failed and fallback values were used
    pub discovery_failed: bool,
    /// Human-readable notes on anything that may have cost completeness
    pub warnings: Vec<String>,
}

impl Diagnostics {
    /// Creates empty diagnostics stamped with the current time.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            started_at: chrono::Utc::now(),
            duration_ms: 0,
            partitions: Vec::new(),
            raw_record_count: 0,
            duplicates_dropped: 0,
            records_without_identifier: 0,
            estimated_count: None,
            may_truncate: false,
            discovery_failed: false,
            warnings: Vec::new(),
        }
    }

    /// Adds a warning
    pub fn add_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    /// Page requests issued across all partitions.
    pub fn total_pages_requested(&self) -> u32 {
        self.partitions.iter().map(|p| p.pages_requested).sum()
    }

    /// Partitions stopped by the safety cap.
    pub fn safety_cap_hits(&self) -> usize {
        self.partitions
            .iter()
            .filter(|p| matches!(p.stop, StopReason::SafetyCap { .. }))
            .count()
    }
}

/// The outcome of one `fetch_all` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResult {
    /// Deduplicated, normalized records in partition then page order
    pub records: Vec<CanonicalRecord>,
    /// Some partition did not drain, or discovery fell back
    pub partial: bool,
    /// Cancellation cut a partition or discovery short; `records` holds what was gathered
    pub cancelled: bool,
    /// Per-partition reports, counts, and warnings
    pub diagnostics: Diagnostics,
}

impl RetrievalResult {
    /// Number of canonical records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no records were retrieved
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
