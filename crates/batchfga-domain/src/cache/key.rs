//! Deterministic check fingerprints.
//!
//! A [`CacheKey`] identifies everything that can influence a check decision:
//! store, authorization model, tuple, contextual tuples and context. The key
//! is the lowercase hex SHA-256 of a canonical JSON encoding in which object
//! keys are sorted at every level and contextual tuples are ordered, so two
//! logically identical checks always produce the same key.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::resolver::{ContextualTuple, TupleKey};
use crate::validation::{json_exceeds_max_depth, MAX_JSON_DEPTH};

/// Fingerprint of a single check.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors raised while deriving a cache key.
#[derive(Debug, Error)]
pub enum CacheKeyError {
    /// The check context nests deeper than the canonical encoder accepts.
    #[error("check context exceeds maximum nesting depth of {max_depth}")]
    ContextTooDeep { max_depth: usize },

    /// The canonical form could not be encoded.
    #[error("failed to encode check for cache key: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Inputs to [`check_cache_key`].
#[derive(Debug, Clone, Copy)]
pub struct CheckCacheKeyParams<'a> {
    pub store_id: &'a str,
    pub authorization_model_id: &'a str,
    pub tuple_key: &'a TupleKey,
    pub contextual_tuples: &'a [ContextualTuple],
    pub context: &'a HashMap<String, Value>,
}

#[derive(Serialize)]
struct CanonicalCheck<'a> {
    store_id: &'a str,
    authorization_model_id: &'a str,
    object: &'a str,
    relation: &'a str,
    user: &'a str,
    contextual_tuples: Vec<CanonicalTuple<'a>>,
    context: Value,
}

#[derive(Serialize, PartialEq, Eq)]
struct CanonicalTuple<'a> {
    object: &'a str,
    relation: &'a str,
    user: &'a str,
    condition_name: Option<&'a str>,
    condition_context: Option<String>,
}

impl Ord for CanonicalTuple<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.object, self.relation, self.user, self.condition_name)
            .cmp(&(other.object, other.relation, other.user, other.condition_name))
            .then_with(|| self.condition_context.cmp(&other.condition_context))
    }
}

impl PartialOrd for CanonicalTuple<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Derives the cache key for a check.
///
/// Fails when the context (or a contextual tuple's condition context) nests
/// deeper than [`MAX_JSON_DEPTH`].
pub fn check_cache_key(params: &CheckCacheKeyParams<'_>) -> Result<CacheKey, CacheKeyError> {
    let mut contextual_tuples = params
        .contextual_tuples
        .iter()
        .map(canonical_tuple)
        .collect::<Result<Vec<_>, _>>()?;
    contextual_tuples.sort();

    let canonical = CanonicalCheck {
        store_id: params.store_id,
        authorization_model_id: params.authorization_model_id,
        object: &params.tuple_key.object,
        relation: &params.tuple_key.relation,
        user: &params.tuple_key.user,
        contextual_tuples,
        context: canonical_map(params.context)?,
    };

    let encoded = serde_json::to_vec(&canonical)?;
    Ok(CacheKey(hex::encode(Sha256::digest(&encoded))))
}

fn canonical_tuple(tuple: &ContextualTuple) -> Result<CanonicalTuple<'_>, CacheKeyError> {
    let condition_context = match &tuple.condition_context {
        Some(context) => Some(serde_json::to_string(&canonical_map(context)?)?),
        None => None,
    };
    Ok(CanonicalTuple {
        object: &tuple.object,
        relation: &tuple.relation,
        user: &tuple.user,
        condition_name: tuple.condition_name.as_deref(),
        condition_context,
    })
}

fn canonical_map(map: &HashMap<String, Value>) -> Result<Value, CacheKeyError> {
    if map.values().any(|v| json_exceeds_max_depth(v, 1)) {
        return Err(CacheKeyError::ContextTooDeep {
            max_depth: MAX_JSON_DEPTH,
        });
    }
    let mut entries: Vec<_> = map.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    Ok(Value::Object(
        entries
            .into_iter()
            .map(|(k, v)| (k.clone(), canonical_value(v)))
            .collect(),
    ))
}

// Rebuilds objects in key order so the encoding is stable even when
// serde_json preserves insertion order.
fn canonical_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), canonical_value(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical_value).collect()),
        other => other.clone(),
    }
}
