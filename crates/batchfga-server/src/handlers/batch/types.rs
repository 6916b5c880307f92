//! Data types for batch check operations.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use batchfga_domain::cache::CacheKeyError;
use batchfga_domain::error::{DomainError, DomainResult};
use batchfga_domain::resolver::{CheckResponse, ConsistencyPreference, ContextualTuple, TupleKey};

/// Default maximum number of checks accepted in one batch.
pub const DEFAULT_MAX_CHECKS_PER_BATCH: usize = 50;

/// Default maximum number of checks evaluated concurrently.
pub const DEFAULT_MAX_CONCURRENT_CHECKS: usize = 50;

/// Caller-chosen identifier of one check in a batch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for CorrelationId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for CorrelationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl Borrow<str> for CorrelationId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single check within a batch request.
#[derive(Debug, Clone)]
pub struct BatchCheckItem {
    /// The tuple to evaluate.
    pub tuple_key: TupleKey,
    /// Tuples considered only for this check.
    pub contextual_tuples: Arc<Vec<ContextualTuple>>,
    /// Condition evaluation context.
    pub context: Arc<HashMap<String, serde_json::Value>>,
    /// Identifies this check in the response.
    pub correlation_id: CorrelationId,
}

impl BatchCheckItem {
    pub fn new(tuple_key: TupleKey, correlation_id: impl Into<CorrelationId>) -> Self {
        Self {
            tuple_key,
            contextual_tuples: Arc::new(Vec::new()),
            context: Arc::new(HashMap::new()),
            correlation_id: correlation_id.into(),
        }
    }

    pub fn with_contextual_tuples(mut self, tuples: Vec<ContextualTuple>) -> Self {
        self.contextual_tuples = Arc::new(tuples);
        self
    }

    pub fn with_context(mut self, context: HashMap<String, serde_json::Value>) -> Self {
        self.context = Arc::new(context);
        self
    }
}

/// Request for batch permission checks.
#[derive(Debug, Clone)]
pub struct BatchCheckRequest {
    /// The store ID to check against.
    pub store_id: String,
    /// The authorization model every check is evaluated with.
    pub authorization_model_id: String,
    /// Consistency requested for every check.
    pub consistency: ConsistencyPreference,
    /// The list of checks to perform.
    pub checks: Vec<BatchCheckItem>,
}

impl BatchCheckRequest {
    /// Creates a new batch check request.
    pub fn new(
        store_id: impl Into<String>,
        authorization_model_id: impl Into<String>,
        checks: Vec<BatchCheckItem>,
    ) -> Self {
        Self {
            store_id: store_id.into(),
            authorization_model_id: authorization_model_id.into(),
            consistency: ConsistencyPreference::Unspecified,
            checks,
        }
    }

    pub fn with_consistency(mut self, consistency: ConsistencyPreference) -> Self {
        self.consistency = consistency;
        self
    }
}

/// Result of one unique check, shared by every correlation ID that asked for it.
#[derive(Debug, Clone)]
pub struct BatchCheckOutcome {
    pub result: DomainResult<CheckResponse>,
}

impl BatchCheckOutcome {
    pub fn new(result: DomainResult<CheckResponse>) -> Self {
        Self { result }
    }

    /// Returns true if the check succeeded and was allowed.
    pub fn allowed(&self) -> bool {
        matches!(&self.result, Ok(response) if response.allowed)
    }

    pub fn response(&self) -> Option<&CheckResponse> {
        self.result.as_ref().ok()
    }

    pub fn error(&self) -> Option<&DomainError> {
        self.result.as_ref().err()
    }

    /// Datastore queries issued by this check; zero for errors.
    pub fn datastore_query_count(&self) -> u32 {
        self.response()
            .map_or(0, |response| response.resolution_metadata.datastore_query_count)
    }
}

/// Metrics aggregated over a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchCheckMetadata {
    /// Sum of datastore queries over unique evaluations.
    pub datastore_query_count: u32,
    /// Submitted checks minus unique fingerprints.
    pub duplicate_check_count: usize,
}

/// Response from a batch check operation.
#[derive(Debug, Clone)]
pub struct BatchCheckResponse {
    /// Outcome per correlation ID. Duplicates share the same `Arc`.
    pub results: HashMap<CorrelationId, Arc<BatchCheckOutcome>>,
    pub metadata: BatchCheckMetadata,
}

impl BatchCheckResponse {
    pub fn get(&self, correlation_id: &str) -> Option<&Arc<BatchCheckOutcome>> {
        self.results.get(correlation_id)
    }
}

/// Errors that reject a whole batch.
#[derive(Debug, thiserror::Error)]
pub enum BatchCheckError {
    /// The batch request is empty.
    #[error("batch check requires at least one check")]
    EmptyBatch,

    /// The batch request exceeds the maximum allowed size.
    #[error("batch check received {size} checks, the maximum allowed is {max}")]
    BatchTooLarge { size: usize, max: usize },

    /// A check has no correlation ID.
    #[error("received empty correlation id for tuple: {tuple}")]
    EmptyCorrelationId { tuple: TupleKey },

    /// Two checks share a correlation ID.
    #[error("received duplicate correlation id: {correlation_id}")]
    DuplicateCorrelationId { correlation_id: CorrelationId },

    /// A check fingerprint could not be derived.
    #[error(transparent)]
    CacheKey(#[from] CacheKeyError),
}

impl BatchCheckError {
    /// Returns true for errors caused by a malformed batch.
    pub fn is_validation_error(&self) -> bool {
        !matches!(self, BatchCheckError::CacheKey(_))
    }
}

/// Result type for batch check operations.
pub type BatchCheckResult<T> = Result<T, BatchCheckError>;

/// Limits applied to every batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchCheckConfig {
    /// Maximum checks per batch. Zero selects the default.
    pub max_checks_per_batch: usize,
    /// Maximum concurrent evaluations. Zero selects the default.
    pub max_concurrent_checks: usize,
}

impl Default for BatchCheckConfig {
    fn default() -> Self {
        Self {
            max_checks_per_batch: DEFAULT_MAX_CHECKS_PER_BATCH,
            max_concurrent_checks: DEFAULT_MAX_CONCURRENT_CHECKS,
        }
    }
}

impl BatchCheckConfig {
    pub fn with_max_checks_per_batch(mut self, max: usize) -> Self {
        self.max_checks_per_batch = max;
        self
    }

    pub fn with_max_concurrent_checks(mut self, max: usize) -> Self {
        self.max_concurrent_checks = max;
        self
    }

    /// The batch size limit in effect.
    pub fn effective_max_checks_per_batch(&self) -> usize {
        non_zero_or(self.max_checks_per_batch, DEFAULT_MAX_CHECKS_PER_BATCH)
    }

    /// The concurrency ceiling in effect.
    pub fn effective_max_concurrent_checks(&self) -> usize {
        non_zero_or(self.max_concurrent_checks, DEFAULT_MAX_CONCURRENT_CHECKS)
    }
}

fn non_zero_or(value: usize, default: usize) -> usize {
    if value == 0 {
        default
    } else {
        value
    }
}
