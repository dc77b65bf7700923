//! Configuration types for the retrieval engine.
//!
//! This module contains all configuration structures:
//! - `RetrievalConfig`: page size, safety cap, concurrency, timeouts
//! - `RetryPolicy`: token-endpoint backoff
//! - `QueryPlan` / `PartitionStrategy`: what to fetch and how to split it
//!
//! # Security
//! These configuration structs intentionally do NOT store client secrets.
//! Credentials are handled separately through the security module.

mod query;
mod retrieval;

pub use query::{PartitionStrategy, QueryPlan, validate_identifier};
pub use retrieval::{MAX_TOKEN_TTL_SECS, PLATFORM_ROW_CAP, RetrievalConfig, RetryPolicy};
