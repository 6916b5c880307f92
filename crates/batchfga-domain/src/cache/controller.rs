//! Cache controllers decide when cached decisions for a store are stale.

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

/// Reports the most recent write that invalidates cached decisions of a store.
#[async_trait]
pub trait CacheController: Send + Sync {
    /// Returns the time of the latest invalidating write, or `None` if every
    /// cached decision for the store may still be served.
    async fn determine_invalidation_time(&self, store_id: &str) -> Option<Instant>;
}

/// Controller that never invalidates. Used when no controller is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCacheController;

#[async_trait]
impl CacheController for NoopCacheController {
    async fn determine_invalidation_time(&self, _store_id: &str) -> Option<Instant> {
        None
    }
}

/// Controller fed by the write path: every write marks its store.
#[derive(Debug, Default)]
pub struct StoreInvalidationController {
    last_write: DashMap<String, Instant>,
}

impl StoreInvalidationController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a write to `store_id` happening now.
    pub fn mark_written(&self, store_id: &str) {
        self.last_write.insert(store_id.to_string(), Instant::now());
    }
}

#[async_trait]
impl CacheController for StoreInvalidationController {
    async fn determine_invalidation_time(&self, store_id: &str) -> Option<Instant> {
        self.last_write.get(store_id).map(|entry| *entry.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_controller_never_invalidates() {
        assert!(NoopCacheController
            .determine_invalidation_time("store-1")
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_store_controller_reports_writes_per_store() {
        let controller = StoreInvalidationController::new();
        assert!(controller
            .determine_invalidation_time("store-1")
            .await
            .is_none());

        let before = Instant::now();
        controller.mark_written("store-1");

        let at = controller
            .determine_invalidation_time("store-1")
            .await
            .unwrap();
        assert!(at >= before);
        assert!(controller
            .determine_invalidation_time("store-2")
            .await
            .is_none());
    }
}
