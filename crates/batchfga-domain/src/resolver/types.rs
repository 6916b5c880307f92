//! Types exchanged with the check resolver.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The (user, relation, object) triple a check is asked about.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TupleKey {
    /// The user performing the access (e.g., "user:alice").
    pub user: String,
    /// The relation to check (e.g., "viewer").
    pub relation: String,
    /// The object identifier (e.g., "document:readme").
    pub object: String,
}

impl TupleKey {
    pub fn new(
        user: impl Into<String>,
        relation: impl Into<String>,
        object: impl Into<String>,
    ) -> Self {
        Self {
            user: user.into(),
            relation: relation.into(),
            object: object.into(),
        }
    }
}

impl fmt::Display for TupleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}@{}", self.object, self.relation, self.user)
    }
}

/// A contextual tuple for temporary authorization during a check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextualTuple {
    pub user: String,
    pub relation: String,
    pub object: String,
    /// Optional condition name that must be satisfied for this tuple.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition_name: Option<String>,
    /// Optional condition context (parameters) as JSON key-value pairs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition_context: Option<HashMap<String, serde_json::Value>>,
}

impl ContextualTuple {
    /// Creates a new ContextualTuple without a condition.
    pub fn new(
        user: impl Into<String>,
        relation: impl Into<String>,
        object: impl Into<String>,
    ) -> Self {
        Self {
            user: user.into(),
            relation: relation.into(),
            object: object.into(),
            condition_name: None,
            condition_context: None,
        }
    }

    /// Creates a new ContextualTuple with a condition.
    pub fn with_condition(
        user: impl Into<String>,
        relation: impl Into<String>,
        object: impl Into<String>,
        condition_name: impl Into<String>,
        condition_context: Option<HashMap<String, serde_json::Value>>,
    ) -> Self {
        Self {
            user: user.into(),
            relation: relation.into(),
            object: object.into(),
            condition_name: Some(condition_name.into()),
            condition_context,
        }
    }
}

/// How fresh the data behind a check must be.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsistencyPreference {
    #[default]
    Unspecified,
    /// Prefer cached results when available.
    MinimizeLatency,
    /// Always evaluate against the datastore, bypassing decision caches.
    HigherConsistency,
}

/// Request for a permission check.
#[derive(Debug, Clone)]
pub struct CheckRequest {
    /// The store ID to check against.
    pub store_id: String,
    /// The authorization model to evaluate the check with.
    pub authorization_model_id: String,
    /// The tuple being checked.
    pub tuple_key: TupleKey,
    /// Contextual tuples to consider during the check.
    /// Wrapped in Arc so batch tasks can share them without copying.
    pub contextual_tuples: Arc<Vec<ContextualTuple>>,
    /// Condition evaluation context variables.
    pub context: Arc<HashMap<String, serde_json::Value>>,
    /// Requested consistency.
    pub consistency: ConsistencyPreference,
}

impl CheckRequest {
    /// Creates a check request with no contextual tuples or context.
    pub fn new(
        store_id: impl Into<String>,
        authorization_model_id: impl Into<String>,
        tuple_key: TupleKey,
    ) -> Self {
        Self {
            store_id: store_id.into(),
            authorization_model_id: authorization_model_id.into(),
            tuple_key,
            contextual_tuples: Arc::new(Vec::new()),
            context: Arc::new(HashMap::new()),
            consistency: ConsistencyPreference::Unspecified,
        }
    }

    pub fn with_contextual_tuples(mut self, tuples: Arc<Vec<ContextualTuple>>) -> Self {
        self.contextual_tuples = tuples;
        self
    }

    pub fn with_context(mut self, context: Arc<HashMap<String, serde_json::Value>>) -> Self {
        self.context = context;
        self
    }

    pub fn with_consistency(mut self, consistency: ConsistencyPreference) -> Self {
        self.consistency = consistency;
        self
    }
}

/// Statistics reported by the resolver alongside a decision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolutionMetadata {
    /// Number of datastore queries the resolution issued.
    pub datastore_query_count: u32,
    /// Whether a cycle was encountered during traversal.
    pub cycle_detected: bool,
}

/// Result of a permission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResponse {
    /// Whether the check is allowed.
    pub allowed: bool,
    pub resolution_metadata: ResolutionMetadata,
}

impl CheckResponse {
    pub fn new(allowed: bool, datastore_query_count: u32) -> Self {
        Self {
            allowed,
            resolution_metadata: ResolutionMetadata {
                datastore_query_count,
                cycle_detected: false,
            },
        }
    }
}

/// Cache settings handed to the resolver with every check.
///
/// The resolver decides what to do with them; callers only forward them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveCheckOptions {
    /// Whether datastore iterators may be cached.
    pub cache_iterators: bool,
    /// Maximum number of cached entries.
    pub max_cache_size: u64,
    /// Lifetime of cached entries.
    pub cache_ttl: Duration,
}

impl Default for ResolveCheckOptions {
    fn default() -> Self {
        Self {
            cache_iterators: false,
            max_cache_size: 10_000,
            cache_ttl: Duration::from_secs(10),
        }
    }
}
