//! Query plans: what one logical "fetch everything" request looks like.

use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use super::retrieval::PLATFORM_ROW_CAP;

/// How a table is split into bounded sub-queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PartitionStrategy {
    /// One partition per caller-supplied value plus a null/empty catch-all.
    ///
    /// Values present in the table but missing from `values` are never
    /// queried.
    EnumeratedValues { field: String, values: Vec<String> },
    /// Query the distinct values of `field` first, then partition on them.
    ///
    /// `fallback_values` are used as an enumerated plan if discovery fails.
    DiscoverThenPartition {
        field: String,
        #[serde(default)]
        fallback_values: Vec<String>,
    },
    /// A single query; subject to the platform row cap.
    Unpartitioned,
}

impl PartitionStrategy {
    /// The partition field, if the strategy has one.
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::EnumeratedValues { field, .. } | Self::DiscoverThenPartition { field, .. } => {
                Some(field)
            }
            Self::Unpartitioned => None,
        }
    }
}

/// One logical "fetch all rows" request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryPlan {
    /// Upstream table name
    pub table: String,
    /// Partitioning strategy
    pub strategy: PartitionStrategy,
    /// Rows per page; falls back to the engine configuration when unset
    #[serde(default)]
    pub page_size: Option<u32>,
    /// Extra predicate ANDed into every partition clause
    #[serde(default)]
    pub additional_where: Option<String>,
}

impl QueryPlan {
    /// Plan partitioned over caller-enumerated values.
    pub fn enumerated<I, S>(table: impl Into<String>, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            table: table.into(),
            strategy: PartitionStrategy::EnumeratedValues {
                field: field.into(),
                values: values.into_iter().map(Into::into).collect(),
            },
            page_size: None,
            additional_where: None,
        }
    }

    /// Plan that discovers the partition values before fetching.
    pub fn discover(table: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            strategy: PartitionStrategy::DiscoverThenPartition {
                field: field.into(),
                fallback_values: Vec::new(),
            },
            page_size: None,
            additional_where: None,
        }
    }

    /// Single-query plan. May truncate at the platform row cap.
    pub fn unpartitioned(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            strategy: PartitionStrategy::Unpartitioned,
            page_size: None,
            additional_where: None,
        }
    }

    /// Builder method to set the page size for this plan only.
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }

    /// Builder method to add a predicate applied to every partition.
    pub fn with_additional_where(mut self, predicate: impl Into<String>) -> Self {
        self.additional_where = Some(predicate.into());
        self
    }

    /// Builder method to set discovery fallback values.
    ///
    /// Has no effect unless the strategy is `DiscoverThenPartition`.
    pub fn with_fallback_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let PartitionStrategy::DiscoverThenPartition {
            fallback_values, ..
        } = &mut self.strategy
        {
            *fallback_values = values.into_iter().map(Into::into).collect();
        }
        self
    }

    /// Validates the plan.
    ///
    /// # Errors
    /// Returns error if the table is empty, the partition field is not a plain
    /// identifier, a partition or fallback value is empty, or the page size
    /// is outside `1..=1000`.
    pub fn validate(&self) -> crate::Result<()> {
        if self.table.trim().is_empty() {
            return Err(crate::error::SweepError::configuration(
                "table cannot be empty",
            ));
        }

        if let Some(field) = self.strategy.field() {
            validate_identifier(field)?;
        }

        if let PartitionStrategy::EnumeratedValues { values, .. }
        | PartitionStrategy::DiscoverThenPartition {
            fallback_values: values,
            ..
        } = &self.strategy
        {
            if values.iter().any(|value| value.is_empty()) {
                return Err(crate::error::SweepError::configuration(
                    "partition values cannot be empty; the null/empty catch-all covers them",
                ));
            }
        }

        if let Some(page_size) = self.page_size {
            if page_size == 0 || page_size > PLATFORM_ROW_CAP {
                return Err(crate::error::SweepError::configuration(format!(
                    "page_size must be between 1 and {}",
                    PLATFORM_ROW_CAP
                )));
            }
        }

        if let Some(predicate) = &self.additional_where {
            if predicate.trim().is_empty() {
                return Err(crate::error::SweepError::configuration(
                    "additional_where cannot be blank",
                ));
            }
        }

        Ok(())
    }
}

fn identifier_pattern() -> &'static regex::Regex {
    static PATTERN: OnceLock<regex::Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        #[allow(clippy::expect_used)]
        regex::Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("Invalid identifier pattern")
    })
}

/// Ensures a field name can be interpolated into a predicate unquoted.
///
/// # Errors
/// Returns a configuration error for anything other than `[A-Za-z_][A-Za-z0-9_]*`.
pub fn validate_identifier(field: &str) -> crate::Result<()> {
    if identifier_pattern().is_match(field) {
        Ok(())
    } else {
        Err(crate::error::SweepError::configuration(format!(
            "partition field '{}' is not a plain identifier",
            field
        )))
    }
}
