//! Bounded concurrent evaluation of grouped checks.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use batchfga_domain::cache::CacheKey;
use batchfga_domain::context::RequestContext;
use batchfga_domain::resolver::{CheckRequest, CheckResolver, ConsistencyPreference};
use dashmap::DashMap;
use tracing::warn;

use super::dedup::GroupedCheck;
use super::pool::BoundedPool;
use super::types::BatchCheckOutcome;
use crate::handlers::check::CheckCommand;

/// Outcomes of one batch, keyed by fingerprint.
#[derive(Debug)]
pub(crate) struct EvaluatedChecks {
    pub outcomes: DashMap<CacheKey, Arc<BatchCheckOutcome>>,
    /// Sum of datastore queries over successful evaluations.
    pub datastore_query_count: u32,
}

/// Store, model and consistency shared by every check of a batch.
#[derive(Debug, Clone)]
pub(crate) struct BatchScope {
    pub store_id: Arc<str>,
    pub authorization_model_id: Arc<str>,
    pub consistency: ConsistencyPreference,
}

impl BatchScope {
    fn check_request(&self, group: &GroupedCheck) -> CheckRequest {
        CheckRequest::new(
            &*self.store_id,
            &*self.authorization_model_id,
            group.check.tuple_key.clone(),
        )
        .with_contextual_tuples(group.check.contextual_tuples.clone())
        .with_context(group.check.context.clone())
        .with_consistency(self.consistency)
    }
}

/// Evaluates one representative check per group, at most `max_concurrent`
/// at a time, and waits for all of them.
///
/// A context that is already done when a task starts yields its error as
/// that group's outcome without evaluating.
pub(crate) async fn evaluate_groups<R>(
    ctx: &RequestContext,
    command: Arc<CheckCommand<R>>,
    scope: BatchScope,
    groups: &[GroupedCheck],
    max_concurrent: usize,
) -> EvaluatedChecks
where
    R: CheckResolver + 'static,
{
    let outcomes: Arc<DashMap<CacheKey, Arc<BatchCheckOutcome>>> =
        Arc::new(DashMap::with_capacity(groups.len()));
    let query_count = Arc::new(AtomicU32::new(0));

    let mut pool = BoundedPool::new(max_concurrent);
    for group in groups {
        let ctx = ctx.clone();
        let command = command.clone();
        let request = scope.check_request(group);
        let key = group.cache_key.clone();
        let outcomes = outcomes.clone();
        let query_count = query_count.clone();

        pool.go(async move {
            let result = match ctx.err() {
                Some(err) => Err(err),
                None => command.execute_with_key(&ctx, &request, &key).await,
            };

            let outcome = BatchCheckOutcome::new(result);
            query_count.fetch_add(outcome.datastore_query_count(), Ordering::Relaxed);
            outcomes.insert(key, Arc::new(outcome));
        })
        .await;
    }

    if let Err(e) = pool.wait().await {
        warn!(error = %e, "batch check evaluation task failed");
    }

    let outcomes = Arc::try_unwrap(outcomes).unwrap_or_else(|shared| (*shared).clone());
    EvaluatedChecks {
        outcomes,
        datastore_query_count: query_count.load(Ordering::Relaxed),
    }
}
