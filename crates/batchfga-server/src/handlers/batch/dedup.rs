//! Intra-batch deduplication by check fingerprint.

use std::collections::HashMap;
use std::sync::Arc;

use batchfga_domain::cache::{check_cache_key, CacheKey, CacheKeyError, CheckCacheKeyParams};

use super::types::{BatchCheckItem, CorrelationId};

/// One unique check and every correlation ID that requested it.
#[derive(Debug, Clone)]
pub struct GroupedCheck {
    pub cache_key: CacheKey,
    /// The first item seen with this fingerprint.
    pub check: Arc<BatchCheckItem>,
    /// Correlation IDs in submission order.
    pub correlation_ids: Vec<CorrelationId>,
}

/// Derives the fingerprint of `item` within a store and model.
pub(crate) fn item_cache_key(
    store_id: &str,
    authorization_model_id: &str,
    item: &BatchCheckItem,
) -> Result<CacheKey, CacheKeyError> {
    check_cache_key(&CheckCacheKeyParams {
        store_id,
        authorization_model_id,
        tuple_key: &item.tuple_key,
        contextual_tuples: &item.contextual_tuples,
        context: &item.context,
    })
}

/// Groups checks sharing a fingerprint, keeping groups in first-seen order.
///
/// Fails on the first check whose fingerprint cannot be derived.
pub(crate) fn group_checks(
    store_id: &str,
    authorization_model_id: &str,
    checks: Vec<BatchCheckItem>,
) -> Result<Vec<GroupedCheck>, CacheKeyError> {
    let mut groups: Vec<GroupedCheck> = Vec::new();
    let mut key_to_index: HashMap<CacheKey, usize> = HashMap::with_capacity(checks.len());

    for check in checks {
        let key = item_cache_key(store_id, authorization_model_id, &check)?;
        match key_to_index.get(&key) {
            Some(&index) => groups[index].correlation_ids.push(check.correlation_id),
            None => {
                key_to_index.insert(key.clone(), groups.len());
                groups.push(GroupedCheck {
                    cache_key: key,
                    correlation_ids: vec![check.correlation_id.clone()],
                    check: Arc::new(check),
                });
            }
        }
    }

    Ok(groups)
}
