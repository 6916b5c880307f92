//! Batch check handler with fingerprint deduplication.
//!
//! This handler processes many correlated permission checks in one request:
//!
//! 1. **Validation**: empty batches, oversized batches and missing or
//!    repeated correlation IDs are rejected before any work starts
//! 2. **Intra-batch deduplication**: checks with the same fingerprint
//!    (store, model, tuple, contextual tuples, context) execute only once
//! 3. **Bounded evaluation**: unique checks run on a task pool with a
//!    concurrency ceiling, each observing the request context at start
//! 4. **Broadcast**: one shared outcome per fingerprint is handed to every
//!    correlation ID that requested it
//!
//! Decision caching and singleflight coalescing across batches are applied
//! per check by [`CheckCommand`](crate::handlers::check::CheckCommand).

mod broadcast;
mod dedup;
mod evaluator;
mod handler;
mod pool;
mod types;
mod validation;

pub use dedup::GroupedCheck;
pub use handler::{register_batch_check_metrics, BatchCheckHandler};
pub use pool::{BoundedPool, PoolError};
pub use types::{
    BatchCheckConfig, BatchCheckError, BatchCheckItem, BatchCheckMetadata, BatchCheckOutcome,
    BatchCheckRequest, BatchCheckResponse, BatchCheckResult, CorrelationId,
    DEFAULT_MAX_CHECKS_PER_BATCH, DEFAULT_MAX_CONCURRENT_CHECKS,
};
