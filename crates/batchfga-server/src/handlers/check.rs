//! Single check command.
//!
//! Every check, whether it arrives alone or as the representative of a
//! deduplicated batch group, is evaluated through [`CheckCommand`]:
//!
//! 1. Tuple format validation (malformed input fails this check only)
//! 2. Decision cache lookup, unless `HIGHER_CONSISTENCY` was requested
//! 3. Singleflight coalescing with identical in-flight checks
//! 4. Resolution through the [`CheckResolver`] with the cache settings
//!    forwarded untouched

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use batchfga_domain::cache::{
    check_cache_key, CacheController, CacheKey, CheckCache, CheckCacheKeyParams,
    NoopCacheController,
};
use batchfga_domain::context::RequestContext;
use batchfga_domain::error::{DomainError, DomainResult};
use batchfga_domain::resolver::{
    CheckRequest, CheckResolver, CheckResponse, ConsistencyPreference, ResolutionMetadata,
    ResolveCheckOptions,
};
use batchfga_domain::validation::{validate_contextual_tuple, validate_tuple_key};
use tokio::time::Instant;
use tracing::debug;

use super::singleflight::{Singleflight, SingleflightGuard, SingleflightSlot};

/// Singleflight group shared by check commands, keyed by check fingerprint.
pub type CheckSingleflight = Singleflight<CacheKey, DomainResult<CheckResponse>>;

/// Cache wiring for check evaluation.
///
/// All fields are optional collaborators; the defaults evaluate every check
/// directly against the resolver.
#[derive(Clone)]
pub struct CheckCacheOptions {
    /// Decides when cached decisions of a store are stale.
    pub controller: Arc<dyn CacheController>,
    /// Decision cache consulted before resolution.
    pub check_cache: Option<Arc<CheckCache>>,
    /// Coalesces identical concurrent checks.
    pub singleflight: Option<Arc<CheckSingleflight>>,
    /// Forwarded to the resolver.
    pub cache_iterators: bool,
    /// Forwarded to the resolver.
    pub max_cache_size: u64,
    /// Forwarded to the resolver.
    pub cache_ttl: Duration,
}

impl Default for CheckCacheOptions {
    fn default() -> Self {
        let forwarded = ResolveCheckOptions::default();
        Self {
            controller: Arc::new(NoopCacheController),
            check_cache: None,
            singleflight: None,
            cache_iterators: forwarded.cache_iterators,
            max_cache_size: forwarded.max_cache_size,
            cache_ttl: forwarded.cache_ttl,
        }
    }
}

impl fmt::Debug for CheckCacheOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckCacheOptions")
            .field("check_cache", &self.check_cache)
            .field("singleflight", &self.singleflight.is_some())
            .field("cache_iterators", &self.cache_iterators)
            .field("max_cache_size", &self.max_cache_size)
            .field("cache_ttl", &self.cache_ttl)
            .finish_non_exhaustive()
    }
}

impl CheckCacheOptions {
    pub fn with_controller(mut self, controller: Arc<dyn CacheController>) -> Self {
        self.controller = controller;
        self
    }

    pub fn with_check_cache(mut self, cache: Arc<CheckCache>) -> Self {
        self.check_cache = Some(cache);
        self
    }

    pub fn with_singleflight(mut self, singleflight: Arc<CheckSingleflight>) -> Self {
        self.singleflight = Some(singleflight);
        self
    }

    pub fn with_cache_iterators(mut self, cache_iterators: bool) -> Self {
        self.cache_iterators = cache_iterators;
        self
    }

    pub fn with_max_cache_size(mut self, max_cache_size: u64) -> Self {
        self.max_cache_size = max_cache_size;
        self
    }

    pub fn with_cache_ttl(mut self, cache_ttl: Duration) -> Self {
        self.cache_ttl = cache_ttl;
        self
    }

    /// The settings handed to the resolver with each check.
    pub fn resolve_options(&self) -> ResolveCheckOptions {
        ResolveCheckOptions {
            cache_iterators: self.cache_iterators,
            max_cache_size: self.max_cache_size,
            cache_ttl: self.cache_ttl,
        }
    }

    fn enabled_check_cache(&self) -> Option<&Arc<CheckCache>> {
        self.check_cache.as_ref().filter(|cache| cache.is_enabled())
    }
}

/// Evaluates one permission check.
pub struct CheckCommand<R> {
    resolver: Arc<R>,
    cache: CheckCacheOptions,
}

impl<R> CheckCommand<R>
where
    R: CheckResolver + 'static,
{
    pub fn new(resolver: Arc<R>) -> Self {
        Self {
            resolver,
            cache: CheckCacheOptions::default(),
        }
    }

    pub fn with_cache_options(mut self, cache: CheckCacheOptions) -> Self {
        self.cache = cache;
        self
    }

    pub fn cache_options(&self) -> &CheckCacheOptions {
        &self.cache
    }

    pub fn resolver(&self) -> Arc<R> {
        self.resolver.clone()
    }

    /// Evaluates `request`, deriving its fingerprint when a cache or
    /// singleflight group needs it.
    pub async fn execute(
        &self,
        ctx: &RequestContext,
        request: &CheckRequest,
    ) -> DomainResult<CheckResponse> {
        validate_request(request)?;

        if self.cache.enabled_check_cache().is_none() && self.cache.singleflight.is_none() {
            return self.resolve(ctx, request).await;
        }

        let key = check_cache_key(&CheckCacheKeyParams {
            store_id: &request.store_id,
            authorization_model_id: &request.authorization_model_id,
            tuple_key: &request.tuple_key,
            contextual_tuples: &request.contextual_tuples,
            context: &request.context,
        })
        .map_err(|e| DomainError::InvalidContext {
            message: e.to_string(),
        })?;

        self.evaluate(ctx, request, &key).await
    }

    /// Evaluates `request` under an already derived fingerprint.
    pub async fn execute_with_key(
        &self,
        ctx: &RequestContext,
        request: &CheckRequest,
        key: &CacheKey,
    ) -> DomainResult<CheckResponse> {
        validate_request(request)?;
        self.evaluate(ctx, request, key).await
    }

    async fn evaluate(
        &self,
        ctx: &RequestContext,
        request: &CheckRequest,
        key: &CacheKey,
    ) -> DomainResult<CheckResponse> {
        let cache = match request.consistency {
            ConsistencyPreference::HigherConsistency => None,
            _ => self.cache.enabled_check_cache(),
        };

        if let Some(cache) = cache {
            if let Some(response) = self.lookup(cache, &request.store_id, key).await {
                return Ok(response);
            }
        }

        let resolved_from = Instant::now();
        let result = match &self.cache.singleflight {
            Some(singleflight) => self.resolve_coalesced(ctx, request, key, singleflight).await,
            None => self.resolve(ctx, request).await,
        };

        if let (Some(cache), Ok(response)) = (cache, &result) {
            cache
                .insert_as_of(&request.store_id, key.clone(), response.clone(), resolved_from)
                .await;
        }

        result
    }

    async fn lookup(
        &self,
        cache: &CheckCache,
        store_id: &str,
        key: &CacheKey,
    ) -> Option<CheckResponse> {
        let cached = cache.get(key).await?;

        let invalidated_at = self.cache.controller.determine_invalidation_time(store_id).await;
        if cached.is_stale(invalidated_at) {
            cache.invalidate(store_id, key).await;
            return None;
        }

        debug!(store_id = %store_id, cache_key = %key, "check served from cache");
        // A cached decision issued no datastore queries for this request.
        Some(CheckResponse {
            allowed: cached.response.allowed,
            resolution_metadata: ResolutionMetadata {
                datastore_query_count: 0,
                cycle_detected: cached.response.resolution_metadata.cycle_detected,
            },
        })
    }

    async fn resolve_coalesced(
        &self,
        ctx: &RequestContext,
        request: &CheckRequest,
        key: &CacheKey,
        singleflight: &CheckSingleflight,
    ) -> DomainResult<CheckResponse> {
        loop {
            match singleflight.acquire(key.clone()) {
                SingleflightSlot::Follower(mut receiver) => {
                    tokio::select! {
                        received = receiver.recv() => match received {
                            // The leader's context ended, not ours; take over.
                            Ok(Err(e)) if e.is_context_error() && ctx.err().is_none() => continue,
                            Ok(result) => return result,
                            // Leader went away without a result; take over.
                            Err(_) => continue,
                        },
                        err = ctx.done() => return Err(err),
                    }
                }
                SingleflightSlot::Leader(sender) => {
                    let guard = SingleflightGuard::new(singleflight, key.clone());
                    let result = self.resolve(ctx, request).await;

                    // No receivers is fine.
                    let _ = sender.send(result.clone());
                    guard.complete();

                    return result;
                }
            }
        }
    }

    async fn resolve(
        &self,
        ctx: &RequestContext,
        request: &CheckRequest,
    ) -> DomainResult<CheckResponse> {
        self.resolver
            .resolve_check(ctx, request, &self.cache.resolve_options())
            .await
    }
}

fn validate_request(request: &CheckRequest) -> DomainResult<()> {
    validate_tuple_key(&request.tuple_key)?;
    request
        .contextual_tuples
        .iter()
        .try_for_each(validate_contextual_tuple)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use batchfga_domain::cache::{CheckCacheConfig, StoreInvalidationController};
    use batchfga_domain::resolver::{ContextualTuple, TupleKey};

    /// Resolver that allows everything, counts calls and records options.
    /// A delayed resolution gives up when its context ends.
    struct RecordingResolver {
        calls: AtomicUsize,
        delay: Duration,
        options: Mutex<Vec<ResolveCheckOptions>>,
    }

    impl RecordingResolver {
        fn new() -> Self {
            Self::with_delay(Duration::ZERO)
        }

        fn with_delay(delay: Duration) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                delay,
                options: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CheckResolver for RecordingResolver {
        async fn resolve_check(
            &self,
            ctx: &RequestContext,
            _request: &CheckRequest,
            options: &ResolveCheckOptions,
        ) -> DomainResult<CheckResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.options.lock().unwrap().push(*options);
            if !self.delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(self.delay) => {}
                    err = ctx.done() => return Err(err),
                }
            }
            Ok(CheckResponse::new(true, 4))
        }
    }

    fn request() -> CheckRequest {
        CheckRequest::new(
            "store-1",
            "model-1",
            TupleKey::new("user:alice", "viewer", "document:readme"),
        )
    }

    fn cached_options() -> (CheckCacheOptions, Arc<CheckCache>) {
        let cache = Arc::new(CheckCache::new(CheckCacheConfig::default().with_enabled(true)));
        (
            CheckCacheOptions::default().with_check_cache(cache.clone()),
            cache,
        )
    }

    #[tokio::test]
    async fn test_malformed_tuple_fails_without_resolving() {
        let resolver = Arc::new(RecordingResolver::new());
        let command = CheckCommand::new(resolver.clone());

        let bad = CheckRequest::new("store-1", "model-1", TupleKey::new("alice", "viewer", "doc:1"));
        let err = command.execute(&RequestContext::new(), &bad).await.unwrap_err();

        assert!(matches!(err, DomainError::InvalidUserFormat { .. }));
        assert_eq!(resolver.calls(), 0);
    }

    #[tokio::test]
    async fn test_malformed_contextual_tuple_fails() {
        let resolver = Arc::new(RecordingResolver::new());
        let command = CheckCommand::new(resolver.clone());

        let bad = request().with_contextual_tuples(Arc::new(vec![ContextualTuple::new(
            "user:bob", "member", "group",
        )]));
        let err = command.execute(&RequestContext::new(), &bad).await.unwrap_err();

        assert!(matches!(err, DomainError::InvalidObjectFormat { .. }));
        assert_eq!(resolver.calls(), 0);
    }

    #[tokio::test]
    async fn test_cache_settings_are_forwarded_unchanged() {
        let resolver = Arc::new(RecordingResolver::new());
        let options = CheckCacheOptions::default()
            .with_cache_iterators(true)
            .with_max_cache_size(1234)
            .with_cache_ttl(Duration::from_secs(42));
        let command = CheckCommand::new(resolver.clone()).with_cache_options(options);

        command.execute(&RequestContext::new(), &request()).await.unwrap();

        let seen = resolver.options.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![ResolveCheckOptions {
                cache_iterators: true,
                max_cache_size: 1234,
                cache_ttl: Duration::from_secs(42),
            }]
        );
    }

    #[tokio::test]
    async fn test_cached_decision_served_with_zero_queries() {
        let resolver = Arc::new(RecordingResolver::new());
        let (options, cache) = cached_options();
        let command = CheckCommand::new(resolver.clone()).with_cache_options(options);
        let ctx = RequestContext::new();

        let first = command.execute(&ctx, &request()).await.unwrap();
        let second = command.execute(&ctx, &request()).await.unwrap();

        assert_eq!(resolver.calls(), 1);
        assert_eq!(first.resolution_metadata.datastore_query_count, 4);
        assert!(second.allowed);
        assert_eq!(second.resolution_metadata.datastore_query_count, 0);
        cache.run_pending_tasks().await;
        assert_eq!(cache.entry_count(), 1);
    }

    #[tokio::test]
    async fn test_higher_consistency_bypasses_cache() {
        let resolver = Arc::new(RecordingResolver::new());
        let (options, _cache) = cached_options();
        let command = CheckCommand::new(resolver.clone()).with_cache_options(options);
        let ctx = RequestContext::new();
        let strict = request().with_consistency(ConsistencyPreference::HigherConsistency);

        command.execute(&ctx, &request()).await.unwrap();
        let response = command.execute(&ctx, &strict).await.unwrap();

        assert_eq!(resolver.calls(), 2);
        assert_eq!(response.resolution_metadata.datastore_query_count, 4);
    }

    #[tokio::test]
    async fn test_disabled_cache_is_not_consulted() {
        let resolver = Arc::new(RecordingResolver::new());
        let cache = Arc::new(CheckCache::new(CheckCacheConfig::default()));
        let command = CheckCommand::new(resolver.clone())
            .with_cache_options(CheckCacheOptions::default().with_check_cache(cache));
        let ctx = RequestContext::new();

        command.execute(&ctx, &request()).await.unwrap();
        command.execute(&ctx, &request()).await.unwrap();

        assert_eq!(resolver.calls(), 2);
    }

    #[tokio::test]
    async fn test_controller_invalidation_forces_reresolution() {
        let resolver = Arc::new(RecordingResolver::new());
        let controller = Arc::new(StoreInvalidationController::new());
        let (options, _cache) = cached_options();
        let command = CheckCommand::new(resolver.clone())
            .with_cache_options(options.with_controller(controller.clone()));
        let ctx = RequestContext::new();

        command.execute(&ctx, &request()).await.unwrap();
        controller.mark_written("store-1");
        let response = command.execute(&ctx, &request()).await.unwrap();

        assert_eq!(resolver.calls(), 2);
        assert_eq!(response.resolution_metadata.datastore_query_count, 4);
    }

    #[tokio::test]
    async fn test_deep_context_is_invalid_when_fingerprint_needed() {
        let resolver = Arc::new(RecordingResolver::new());
        let (options, _cache) = cached_options();
        let command = CheckCommand::new(resolver.clone()).with_cache_options(options);

        let mut deep = serde_json::json!(0);
        for _ in 0..=batchfga_domain::validation::MAX_JSON_DEPTH {
            deep = serde_json::json!({ "n": deep });
        }
        let mut context = std::collections::HashMap::new();
        context.insert("deep".to_string(), deep);

        let err = command
            .execute(&RequestContext::new(), &request().with_context(Arc::new(context)))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidContext { .. }));
        assert_eq!(resolver.calls(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_identical_checks_share_one_resolution() {
        let resolver = Arc::new(RecordingResolver::with_delay(Duration::from_millis(50)));
        let singleflight = Arc::new(CheckSingleflight::new());
        let command = Arc::new(CheckCommand::new(resolver.clone()).with_cache_options(
            CheckCacheOptions::default().with_singleflight(singleflight.clone()),
        ));

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let command = command.clone();
                tokio::spawn(async move {
                    command.execute(&RequestContext::new(), &request()).await
                })
            })
            .collect();

        for handle in handles {
            assert!(handle.await.unwrap().unwrap().allowed);
        }
        assert_eq!(resolver.calls(), 1);
        assert_eq!(singleflight.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_follower_stops_waiting_when_cancelled() {
        let resolver = Arc::new(RecordingResolver::with_delay(Duration::from_millis(200)));
        let singleflight = Arc::new(CheckSingleflight::new());
        let command = Arc::new(CheckCommand::new(resolver.clone()).with_cache_options(
            CheckCacheOptions::default().with_singleflight(singleflight),
        ));

        let leader = {
            let command = command.clone();
            tokio::spawn(async move { command.execute(&RequestContext::new(), &request()).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let ctx = RequestContext::new();
        ctx.cancel();
        let err = command.execute(&ctx, &request()).await.unwrap_err();
        assert!(matches!(err, DomainError::Cancelled));

        assert!(leader.await.unwrap().is_ok());
        assert_eq!(resolver.calls(), 1);
    }

    #[tokio::test]
    async fn test_follower_outlives_cancelled_leader() {
        let resolver = Arc::new(RecordingResolver::with_delay(Duration::from_millis(200)));
        let singleflight = Arc::new(CheckSingleflight::new());
        let command = Arc::new(CheckCommand::new(resolver.clone()).with_cache_options(
            CheckCacheOptions::default().with_singleflight(singleflight.clone()),
        ));

        let leader_ctx = RequestContext::new();
        let leader = {
            let command = command.clone();
            let ctx = leader_ctx.clone();
            tokio::spawn(async move { command.execute(&ctx, &request()).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let follower = {
            let command = command.clone();
            tokio::spawn(async move { command.execute(&RequestContext::new(), &request()).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        leader_ctx.cancel();

        let leader_err = leader.await.unwrap().unwrap_err();
        assert!(matches!(leader_err, DomainError::Cancelled));

        let response = follower.await.unwrap().unwrap();
        assert!(response.allowed);
        assert_eq!(response.resolution_metadata.datastore_query_count, 4);
        assert_eq!(resolver.calls(), 2);
        assert_eq!(singleflight.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_write_during_resolution_leaves_decision_stale() {
        /// Records a store write while the first resolution is running.
        struct WritingResolver {
            controller: Arc<StoreInvalidationController>,
            calls: AtomicUsize,
        }

        #[async_trait]
        impl CheckResolver for WritingResolver {
            async fn resolve_check(
                &self,
                _ctx: &RequestContext,
                request: &CheckRequest,
                _options: &ResolveCheckOptions,
            ) -> DomainResult<CheckResponse> {
                if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    self.controller.mark_written(&request.store_id);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                Ok(CheckResponse::new(true, 1))
            }
        }

        let controller = Arc::new(StoreInvalidationController::new());
        let resolver = Arc::new(WritingResolver {
            controller: controller.clone(),
            calls: AtomicUsize::new(0),
        });
        let (options, _cache) = cached_options();
        let command = CheckCommand::new(resolver.clone())
            .with_cache_options(options.with_controller(controller));
        let ctx = RequestContext::new();

        command.execute(&ctx, &request()).await.unwrap();
        let second = command.execute(&ctx, &request()).await.unwrap();
        let third = command.execute(&ctx, &request()).await.unwrap();

        assert_eq!(resolver.calls.load(Ordering::SeqCst), 2);
        assert_eq!(second.resolution_metadata.datastore_query_count, 1);
        assert_eq!(third.resolution_metadata.datastore_query_count, 0);
    }
}
