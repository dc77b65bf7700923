//! Partition planning: one logical query into bounded sub-queries.
//!
//! # Coverage
//! Enumerated plans only query the listed values plus the null/empty
//! catch-all. A value present upstream but missing from the list is never
//! fetched. Discovery-based plans close that gap by reading the actual value
//! set first (see [`crate::engine`]).

use crate::Result;
use crate::config::{PartitionStrategy, QueryPlan, validate_identifier};
use crate::error::SweepError;
use crate::models::{Filter, FilterKind, RawRecord};

/// Predicate selecting every row.
pub const ALWAYS_TRUE: &str = "1=1";

/// Turns query plans into ordered filter lists.
#[derive(Debug, Clone, Copy, Default)]
pub struct PartitionPlanner;

impl PartitionPlanner {
    /// Creates a planner.
    pub fn new() -> Self {
        Self
    }

    /// Plans a query whose partition values are known up front.
    ///
    /// # Errors
    /// Returns a configuration error for an invalid plan, or for a
    /// `DiscoverThenPartition` plan, which needs [`Self::plan_with_values`].
    pub fn plan(&self, plan: &QueryPlan) -> Result<Vec<Filter>> {
        plan.validate()?;

        match &plan.strategy {
            PartitionStrategy::EnumeratedValues { field, values } if !values.is_empty() => {
                Ok(partitioned(field, values, plan.additional_where.as_deref()))
            }
            PartitionStrategy::EnumeratedValues { .. } | PartitionStrategy::Unpartitioned => {
                Ok(vec![unpartitioned(plan.additional_where.as_deref())])
            }
            PartitionStrategy::DiscoverThenPartition { field, .. } => {
                Err(SweepError::configuration(format!(
                    "partition values for '{}' must be discovered before planning",
                    field
                )))
            }
        }
    }

    /// Plans `plan` partitioned on `field` over `discovered` values.
    ///
    /// Duplicates are dropped keeping first-seen order; null and empty values
    /// are dropped since the catch-all covers them.
    ///
    /// # Errors
    /// Returns a configuration error if the plan or field is invalid.
    pub fn plan_with_values<I, S>(
        &self,
        plan: &QueryPlan,
        field: &str,
        discovered: I,
    ) -> Result<Vec<Filter>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        plan.validate()?;
        validate_identifier(field)?;

        let mut values: Vec<String> = Vec::new();
        for value in discovered.into_iter().map(Into::into) {
            if !value.is_empty() && !values.contains(&value) {
                values.push(value);
            }
        }

        Ok(partitioned(field, &values, plan.additional_where.as_deref()))
    }

    /// Whether `plan` runs as one unbounded query that may hit the row cap.
    pub fn may_truncate(&self, plan: &QueryPlan) -> bool {
        match &plan.strategy {
            PartitionStrategy::Unpartitioned => true,
            PartitionStrategy::EnumeratedValues { values, .. } => values.is_empty(),
            PartitionStrategy::DiscoverThenPartition { .. } => false,
        }
    }
}

/// Distinct partition values in a grouped discovery result, first-seen order.
///
/// Nulls are skipped; numbers and booleans are stringified.
pub fn extract_partition_values(field: &str, rows: &[RawRecord]) -> Vec<String> {
    let mut values: Vec<String> = Vec::new();
    for row in rows {
        let value = match row.get(field) {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(serde_json::Value::Null) | None => continue,
            Some(other) => other.to_string(),
        };
        if !values.contains(&value) {
            values.push(value);
        }
    }
    values
}

fn partitioned(field: &str, values: &[String], additional_where: Option<&str>) -> Vec<Filter> {
    let mut filters = Vec::with_capacity(values.len() + 1);

    for value in values {
        let predicate = format!("{} = {}", field, quote_literal(value));
        filters.push(Filter {
            index: filters.len(),
            kind: FilterKind::Equals {
                field: field.to_string(),
                value: value.clone(),
            },
            clause: conjoin(&predicate, additional_where),
        });
    }

    let catch_all = format!("({field} IS NULL OR {field} = '')");
    filters.push(Filter {
        index: filters.len(),
        kind: FilterKind::NullOrEmpty {
            field: field.to_string(),
        },
        clause: conjoin(&catch_all, additional_where),
    });

    filters
}

fn unpartitioned(additional_where: Option<&str>) -> Filter {
    Filter {
        index: 0,
        kind: FilterKind::Unpartitioned,
        clause: additional_where.unwrap_or(ALWAYS_TRUE).to_string(),
    }
}

fn conjoin(predicate: &str, additional_where: Option<&str>) -> String {
    match additional_where {
        Some(extra) => format!("({}) AND ({})", predicate, extra),
        None => predicate.to_string(),
    }
}

/// Renders `value` as a single-quoted literal, doubling embedded quotes.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
