//! Batch-level validation, run before any fingerprint is derived.

use std::collections::HashSet;

use super::types::{BatchCheckError, BatchCheckItem, BatchCheckResult};

/// Rejects empty or oversized batches and missing or repeated correlation IDs.
pub(crate) fn validate_batch(checks: &[BatchCheckItem], max_checks: usize) -> BatchCheckResult<()> {
    if checks.is_empty() {
        return Err(BatchCheckError::EmptyBatch);
    }

    if checks.len() > max_checks {
        return Err(BatchCheckError::BatchTooLarge {
            size: checks.len(),
            max: max_checks,
        });
    }

    let mut seen: HashSet<&str> = HashSet::with_capacity(checks.len());
    for check in checks {
        if check.correlation_id.is_empty() {
            return Err(BatchCheckError::EmptyCorrelationId {
                tuple: check.tuple_key.clone(),
            });
        }
        if !seen.insert(check.correlation_id.as_str()) {
            return Err(BatchCheckError::DuplicateCorrelationId {
                correlation_id: check.correlation_id.clone(),
            });
        }
    }

    Ok(())
}
