//! Batch check handler implementation.

use std::collections::HashSet;
use std::sync::Arc;

use batchfga_domain::context::RequestContext;
use batchfga_domain::resolver::CheckResolver;
use tracing::{debug, instrument};

use super::broadcast::broadcast_outcomes;
use super::dedup::{group_checks, item_cache_key};
use super::evaluator::{evaluate_groups, BatchScope};
use super::types::{
    BatchCheckConfig, BatchCheckMetadata, BatchCheckRequest, BatchCheckResponse,
    BatchCheckResult,
};
use super::validation::validate_batch;
use crate::handlers::check::{CheckCacheOptions, CheckCommand};

/// Handler for batch permission checks.
///
/// Processes a batch in four steps:
/// 1. Validation: size limits and correlation IDs
/// 2. Deduplication: checks with the same fingerprint are evaluated once
/// 3. Evaluation: unique checks run concurrently under a ceiling
/// 4. Broadcast: each outcome is handed to every correlation ID that asked for it
///
/// Decision caching and cross-request coalescing happen per check inside
/// [`CheckCommand`], configured through [`CheckCacheOptions`].
pub struct BatchCheckHandler<R> {
    command: Arc<CheckCommand<R>>,
    config: BatchCheckConfig,
}

impl<R> BatchCheckHandler<R>
where
    R: CheckResolver + 'static,
{
    /// Creates a new batch check handler without decision caching.
    pub fn new(resolver: Arc<R>, config: BatchCheckConfig) -> Self {
        Self {
            command: Arc::new(CheckCommand::new(resolver)),
            config,
        }
    }

    /// Replaces the cache wiring used for every check.
    pub fn with_cache_options(self, cache: CheckCacheOptions) -> Self {
        let command = match Arc::try_unwrap(self.command) {
            Ok(command) => command.with_cache_options(cache),
            Err(shared) => CheckCommand::new(shared.resolver()).with_cache_options(cache),
        };
        Self {
            command: Arc::new(command),
            config: self.config,
        }
    }

    pub fn config(&self) -> &BatchCheckConfig {
        &self.config
    }

    /// Validates a batch check request.
    pub fn validate(&self, request: &BatchCheckRequest) -> BatchCheckResult<()> {
        validate_batch(
            &request.checks,
            self.config.effective_max_checks_per_batch(),
        )
    }

    /// Executes a batch check request.
    ///
    /// An `Err` means the batch was rejected and nothing was evaluated.
    /// Per-check failures are reported in the individual outcomes.
    #[instrument(
        skip(self, ctx, request),
        fields(store_id = %request.store_id, checks = request.checks.len())
    )]
    pub async fn execute(
        &self,
        ctx: &RequestContext,
        request: BatchCheckRequest,
    ) -> BatchCheckResult<BatchCheckResponse> {
        self.validate(&request)?;

        let total_checks = request.checks.len();
        let scope = BatchScope {
            store_id: Arc::from(request.store_id),
            authorization_model_id: Arc::from(request.authorization_model_id),
            consistency: request.consistency,
        };

        let groups = group_checks(&scope.store_id, &scope.authorization_model_id, request.checks)?;
        let duplicate_check_count = total_checks - groups.len();
        debug!(
            unique_checks = groups.len(),
            duplicates = duplicate_check_count,
            "deduplicated batch"
        );

        let evaluated = evaluate_groups(
            ctx,
            self.command.clone(),
            scope,
            &groups,
            self.config.effective_max_concurrent_checks(),
        )
        .await;

        let results = broadcast_outcomes(&groups, &evaluated.outcomes, total_checks);

        metrics::counter!("batchfga_batch_checks_total").increment(1);
        metrics::counter!("batchfga_batch_check_items_total").increment(total_checks as u64);
        metrics::counter!("batchfga_batch_check_duplicates_total")
            .increment(duplicate_check_count as u64);

        Ok(BatchCheckResponse {
            results,
            metadata: BatchCheckMetadata {
                datastore_query_count: evaluated.datastore_query_count,
                duplicate_check_count,
            },
        })
    }

    /// Returns statistics about deduplication for a batch request.
    /// Returns (total_checks, unique_checks).
    pub fn dedup_stats(&self, request: &BatchCheckRequest) -> BatchCheckResult<(usize, usize)> {
        let mut seen = HashSet::with_capacity(request.checks.len());
        for check in &request.checks {
            seen.insert(item_cache_key(
                &request.store_id,
                &request.authorization_model_id,
                check,
            )?);
        }
        Ok((request.checks.len(), seen.len()))
    }
}

/// Registers batch check metric descriptions.
pub fn register_batch_check_metrics() {
    metrics::describe_counter!(
        "batchfga_batch_checks_total",
        "Total number of batch check requests evaluated"
    );
    metrics::describe_counter!(
        "batchfga_batch_check_items_total",
        "Total number of checks submitted in batches"
    );
    metrics::describe_counter!(
        "batchfga_batch_check_duplicates_total",
        "Total number of batch checks answered by another check's evaluation"
    );
}
