//! Expands per-fingerprint outcomes back to correlation IDs.

use std::collections::HashMap;
use std::sync::Arc;

use batchfga_domain::cache::CacheKey;
use batchfga_domain::error::DomainError;
use dashmap::DashMap;

use super::dedup::GroupedCheck;
use super::types::{BatchCheckOutcome, CorrelationId};

/// Maps every correlation ID of each group to that group's outcome.
///
/// A group without an outcome gets an internal error for all of its IDs.
pub(crate) fn broadcast_outcomes(
    groups: &[GroupedCheck],
    outcomes: &DashMap<CacheKey, Arc<BatchCheckOutcome>>,
    total_checks: usize,
) -> HashMap<CorrelationId, Arc<BatchCheckOutcome>> {
    let mut results = HashMap::with_capacity(total_checks);

    for group in groups {
        let outcome = match outcomes.get(&group.cache_key) {
            Some(outcome) => outcome.value().clone(),
            None => Arc::new(BatchCheckOutcome::new(Err(DomainError::Internal {
                message: format!("no outcome recorded for check {}", group.check.tuple_key),
            }))),
        };

        for correlation_id in &group.correlation_ids {
            results.insert(correlation_id.clone(), outcome.clone());
        }
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use batchfga_domain::resolver::{CheckResponse, TupleKey};

    use super::super::dedup::group_checks;
    use super::super::types::BatchCheckItem;

    fn groups() -> Vec<GroupedCheck> {
        group_checks(
            "store-1",
            "model-1",
            vec![
                BatchCheckItem::new(TupleKey::new("user:alice", "viewer", "document:1"), "a"),
                BatchCheckItem::new(TupleKey::new("user:bob", "viewer", "document:1"), "b"),
                BatchCheckItem::new(TupleKey::new("user:alice", "viewer", "document:1"), "c"),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_duplicates_share_the_same_outcome() {
        let groups = groups();
        let outcomes = DashMap::new();
        for group in &groups {
            outcomes.insert(
                group.cache_key.clone(),
                Arc::new(BatchCheckOutcome::new(Ok(CheckResponse::new(true, 1)))),
            );
        }

        let results = broadcast_outcomes(&groups, &outcomes, 3);

        assert_eq!(results.len(), 3);
        assert!(Arc::ptr_eq(&results["a"], &results["c"]));
        assert!(!Arc::ptr_eq(&results["a"], &results["b"]));
    }

    #[test]
    fn test_missing_outcome_becomes_internal_error() {
        let groups = groups();
        let outcomes = DashMap::new();
        outcomes.insert(
            groups[1].cache_key.clone(),
            Arc::new(BatchCheckOutcome::new(Ok(CheckResponse::new(false, 1)))),
        );

        let results = broadcast_outcomes(&groups, &outcomes, 3);

        assert!(matches!(
            results["a"].error(),
            Some(DomainError::Internal { .. })
        ));
        assert!(matches!(
            results["c"].error(),
            Some(DomainError::Internal { .. })
        ));
        assert!(results["b"].response().is_some());
    }
}
