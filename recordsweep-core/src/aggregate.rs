//! Merging partition outcomes into one deduplicated record set.
//!
//! Outcomes are ordered by partition index before anything else, so the
//! order in which concurrent workers finished never influences which
//! duplicate survives. Within a partition, page order is kept.
//!
//! # Records without an identifier
//! A record carrying none of the identifier aliases gets a random UUID key.
//! Such records are never treated as duplicates of each other, even if every
//! field matches. They are counted in [`Aggregate::without_identifier`].

use std::collections::HashSet;

use serde_json::Value;
use uuid::Uuid;

use crate::config::RetrievalConfig;
use crate::models::{PartitionOutcome, RawRecord};

/// Key used to detect the same logical record twice.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DedupKey {
    /// Value of the first non-empty identifier alias
    Identified(String),
    /// Random key for a record without an identifier
    Synthetic(Uuid),
}

/// Merged, deduplicated records in partition then page order.
#[derive(Debug, Clone, Default)]
pub struct Aggregate {
    /// Surviving records with the key each was deduplicated under
    pub records: Vec<(DedupKey, RawRecord)>,
    /// Records seen before deduplication
    pub raw_count: usize,
    /// Records dropped because an earlier record had the same key
    pub duplicates_dropped: usize,
    /// Records that received a synthetic key
    pub without_identifier: usize,
}

/// First-seen-wins deduplicating merger.
#[derive(Debug, Clone)]
pub struct RecordAggregator {
    id_aliases: Vec<String>,
}

impl RecordAggregator {
    /// Creates an aggregator probing `id_aliases` in order.
    pub fn new(id_aliases: Vec<String>) -> Self {
        Self { id_aliases }
    }

    /// Creates an aggregator using the configured identifier aliases.
    pub fn from_config(config: &RetrievalConfig) -> Self {
        Self::new(config.id_aliases.clone())
    }

    /// Dedup key for `record`; synthetic when no identifier alias is present.
    pub fn key_for(&self, record: &RawRecord) -> DedupKey {
        match primary_identifier(record, &self.id_aliases) {
            Some(id) => DedupKey::Identified(id),
            None => DedupKey::Synthetic(Uuid::new_v4()),
        }
    }

    /// Concatenates outcomes in partition order and drops later duplicates.
    pub fn merge(&self, mut outcomes: Vec<PartitionOutcome>) -> Aggregate {
        outcomes.sort_by_key(|outcome| outcome.filter.index);

        let mut aggregate = Aggregate::default();
        let mut seen = HashSet::new();

        for record in outcomes.into_iter().flat_map(|outcome| outcome.records) {
            aggregate.raw_count += 1;

            let key = self.key_for(&record);
            if matches!(key, DedupKey::Synthetic(_)) {
                aggregate.without_identifier += 1;
            }

            if seen.insert(key.clone()) {
                aggregate.records.push((key, record));
            } else {
                aggregate.duplicates_dropped += 1;
            }
        }

        aggregate
    }
}

/// First non-empty identifier among `aliases`.
///
/// Strings are trimmed; numbers are stringified. Other value kinds are not
/// identifiers.
pub fn primary_identifier(record: &RawRecord, aliases: &[String]) -> Option<String> {
    aliases.iter().find_map(|alias| match record.get(alias)? {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Filter, FilterKind, StopReason};
    use proptest::prelude::*;
    use serde_json::json;

    fn record(value: Value) -> RawRecord {
        value.as_object().cloned().unwrap_or_default()
    }

    fn outcome(index: usize, records: Vec<RawRecord>) -> PartitionOutcome {
        PartitionOutcome {
            filter: Filter {
                index,
                kind: FilterKind::Unpartitioned,
                clause: format!("p{index}"),
            },
            records,
            pages_requested: 1,
            stop: StopReason::Exhausted,
        }
    }

    fn aggregator() -> RecordAggregator {
        RecordAggregator::from_config(&RetrievalConfig::default())
    }

    #[test]
    fn test_first_seen_wins() {
        let merged = aggregator().merge(vec![
            outcome(0, vec![record(json!({"id": "A1", "name": "X"}))]),
            outcome(1, vec![record(json!({"id": "A1", "name": "Y"}))]),
        ]);

        assert_eq!(merged.records.len(), 1);
        assert_eq!(merged.records[0].1["name"], "X");
        assert_eq!(merged.raw_count, 2);
        assert_eq!(merged.duplicates_dropped, 1);
    }

    #[test]
    fn test_completion_order_does_not_matter() {
        // Partition 1 finished first but partition 0 still wins
        let merged = aggregator().merge(vec![
            outcome(1, vec![record(json!({"id": "A1", "name": "Y"}))]),
            outcome(0, vec![record(json!({"id": "A1", "name": "X"}))]),
        ]);

        assert_eq!(merged.records[0].1["name"], "X");
    }

    #[test]
    fn test_identifier_aliases() {
        let aliases = RetrievalConfig::default().id_aliases;

        assert_eq!(
            primary_identifier(&record(json!({"Record_ID": " R7 "})), &aliases),
            Some("R7".to_string())
        );
        assert_eq!(
            primary_identifier(&record(json!({"id": "", "Client_ID2": 42})), &aliases),
            Some("42".to_string())
        );
        assert_eq!(
            primary_identifier(&record(json!({"id": null, "name": "x"})), &aliases),
            None
        );
        assert_eq!(
            primary_identifier(&record(json!({"id": true})), &aliases),
            None
        );
    }

    #[test]
    fn test_records_without_identifier_are_never_coalesced() {
        let twin = record(json!({"name": "same"}));
        let merged = aggregator().merge(vec![outcome(0, vec![twin.clone(), twin])]);

        assert_eq!(merged.records.len(), 2);
        assert_eq!(merged.without_identifier, 2);
        assert_eq!(merged.duplicates_dropped, 0);
        assert!(
            merged
                .records
                .iter()
                .all(|(key, _)| matches!(key, DedupKey::Synthetic(_)))
        );
    }

    #[test]
    fn test_numeric_and_string_ids_collide() {
        let merged = aggregator().merge(vec![
            outcome(0, vec![record(json!({"id": 7, "v": 1}))]),
            outcome(1, vec![record(json!({"id": "7", "v": 2}))]),
        ]);

        assert_eq!(merged.records.len(), 1);
        assert_eq!(merged.records[0].1["v"], 1);
    }

    proptest! {
        #[test]
        fn prop_first_occurrence_survives_any_completion_order(
            partitions in prop::collection::vec(prop::collection::vec(0u8..6, 0..8), 1..6),
        ) {
            let outcomes: Vec<PartitionOutcome> = partitions
                .iter()
                .enumerate()
                .map(|(index, ids)| {
                    let records = ids
                        .iter()
                        .enumerate()
                        .map(|(position, id)| {
                            record(json!({"id": format!("A{id}"), "origin": format!("{index}-{position}")}))
                        })
                        .collect();
                    outcome(index, records)
                })
                .collect();

            let mut expected: Vec<(String, String)> = Vec::new();
            for (index, ids) in partitions.iter().enumerate() {
                for (position, id) in ids.iter().enumerate() {
                    let id = format!("A{id}");
                    if !expected.iter().any(|(seen, _)| *seen == id) {
                        expected.push((id, format!("{index}-{position}")));
                    }
                }
            }

            let mut reversed = outcomes.clone();
            reversed.reverse();

            for merged in [aggregator().merge(outcomes), aggregator().merge(reversed)] {
                let survivors: Vec<(String, String)> = merged
                    .records
                    .iter()
                    .map(|(_, r)| {
                        (
                            r["id"].as_str().unwrap_or_default().to_string(),
                            r["origin"].as_str().unwrap_or_default().to_string(),
                        )
                    })
                    .collect();
                prop_assert_eq!(&survivors, &expected);
                prop_assert_eq!(merged.raw_count, merged.records.len() + merged.duplicates_dropped);
            }
        }
    }
}
