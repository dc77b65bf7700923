//! Complete-dataset retrieval from row-capped REST data platforms.
//!
//! The upstream platform's list endpoint silently returns at most 1000 rows
//! per query, and its page-number pagination cannot be trusted to report when
//! data ran out. A naive client therefore truncates large tables without any
//! error. This crate retrieves whole tables anyway by splitting one logical
//! query into bounded partitions, draining every partition page by page,
//! and merging the results into one deduplicated, normalized record set.
//!
//! # Guarantees
//! - Every partition stops within a configurable number of page requests
//! - Partial data is never hidden: each partition reports why it stopped
//! - First-seen record wins on duplicate identifiers, independent of
//!   completion order
//! - Client secrets and bearer tokens never reach logs, errors, or `Debug`
//! - All upstream operations are read-only
//!
//! # Architecture
//! - `client`: transport seam (`PlatformClient`) with HTTP and in-memory
//!   implementations
//! - `auth`: token acquisition with a process-wide single-flight cache
//! - `planner` / `fetcher` / `aggregate` / `normalize` / `count`: the
//!   retrieval stages
//! - `engine`: orchestration with bounded concurrency and cancellation

pub mod aggregate;
pub mod auth;
pub mod client;
pub mod config;
pub mod count;
pub mod engine;
pub mod error;
pub mod fetcher;
pub mod logging;
pub mod models;
pub mod normalize;
pub mod planner;
pub mod security;

// Re-export commonly used types
pub use aggregate::{Aggregate, DedupKey, RecordAggregator};
pub use auth::{AccessToken, TokenCache, TokenProvider};
pub use client::{HttpPlatformClient, InMemoryPlatform, PageRequest, PlatformClient};
pub use config::{
    MAX_TOKEN_TTL_SECS, PLATFORM_ROW_CAP, PartitionStrategy, QueryPlan, RetrievalConfig, RetryPolicy,
};
pub use count::CountEstimator;
pub use engine::RetrievalEngine;
pub use error::{Result, SweepError};
pub use fetcher::PageFetcher;
pub use models::{
    CanonicalRecord, Diagnostics, Filter, FilterKind, PartitionOutcome, PartitionReport,
    RawRecord, RetrievalResult, StopReason,
};
pub use normalize::{FieldRule, NormalizationSchema, Normalizer};
pub use planner::PartitionPlanner;
pub use security::Credentials;

pub use tokio_util::sync::CancellationToken;
