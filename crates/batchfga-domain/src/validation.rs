//! Format checks for tuple keys and check context.
//!
//! These bounds mirror the OpenFGA API limits. Tuple format violations are
//! reported per check; a context that nests too deeply cannot be fingerprinted
//! and is rejected during key derivation.

use crate::error::{DomainError, DomainResult};
use crate::resolver::{ContextualTuple, TupleKey};

/// Maximum allowed JSON nesting depth for check context and condition context.
pub const MAX_JSON_DEPTH: usize = 10;

/// Maximum allowed relation name length.
pub const MAX_RELATION_LENGTH: usize = 50;

/// Maximum allowed object ID length (the part after "type:").
pub const MAX_OBJECT_ID_LENGTH: usize = 256;

/// Maximum allowed user identifier length ("type:id" or "type:id#relation").
pub const MAX_USER_ID_LENGTH: usize = 512;

/// Validates a user identifier format.
///
/// Valid formats:
/// - `type:id` (e.g., "user:alice")
/// - `type:id#relation` (e.g., "group:admins#member")
/// - `type:*` (wildcard)
///
/// Returns an error message if invalid, None if valid.
pub fn validate_user_format(user: &str) -> Option<&'static str> {
    if user.is_empty() {
        return Some("user cannot be empty");
    }
    if user.len() > MAX_USER_ID_LENGTH {
        return Some("user identifier exceeds maximum length of 512");
    }

    let Some((user_type, rest)) = user.split_once(':') else {
        return Some("user must be in 'type:id' format");
    };
    if user_type.is_empty() {
        return Some("user type cannot be empty");
    }

    // rest can be "id", "id#relation" or "*"
    let id = rest.split_once('#').map_or(rest, |(id, _)| id);
    if id.is_empty() {
        return Some("user id cannot be empty");
    }

    None
}

/// Validates an object identifier in "type:id" format.
pub fn validate_object_format(object: &str) -> Option<&'static str> {
    let Some((object_type, id)) = object.split_once(':') else {
        return Some("object must be in 'type:id' format");
    };
    if object_type.is_empty() {
        return Some("object type cannot be empty");
    }
    if id.is_empty() {
        return Some("object id cannot be empty");
    }
    if id.len() > MAX_OBJECT_ID_LENGTH {
        return Some("object identifier exceeds maximum length of 256");
    }
    None
}

/// Validates a relation name format (`^[^:#@\s]{1,50}$`).
pub fn validate_relation_format(relation: &str) -> Option<&'static str> {
    if relation.is_empty() {
        return Some("relation cannot be empty");
    }
    if relation.len() > MAX_RELATION_LENGTH {
        return Some("relation exceeds maximum length of 50 characters");
    }
    if relation
        .chars()
        .any(|c| c == ':' || c == '#' || c == '@' || c.is_whitespace())
    {
        return Some("relation contains invalid characters");
    }
    None
}

/// Validates all three parts of a tuple key.
pub fn validate_tuple_key(tuple_key: &TupleKey) -> DomainResult<()> {
    validate_parts(&tuple_key.user, &tuple_key.relation, &tuple_key.object)
}

/// Validates a contextual tuple with the same rules as a checked tuple.
pub fn validate_contextual_tuple(tuple: &ContextualTuple) -> DomainResult<()> {
    validate_parts(&tuple.user, &tuple.relation, &tuple.object)
}

fn validate_parts(user: &str, relation: &str, object: &str) -> DomainResult<()> {
    if let Some(reason) = validate_user_format(user) {
        return Err(DomainError::InvalidUserFormat {
            value: format!("'{user}': {reason}"),
        });
    }
    if let Some(reason) = validate_relation_format(relation) {
        return Err(DomainError::InvalidRelationFormat {
            value: format!("'{relation}': {reason}"),
        });
    }
    if let Some(reason) = validate_object_format(object) {
        return Err(DomainError::InvalidObjectFormat {
            value: format!("'{object}': {reason}"),
        });
    }
    Ok(())
}

/// Checks if a serde_json::Value exceeds the maximum nesting depth.
///
/// `current_depth` starts at 1 for values directly inside a top-level map.
pub fn json_exceeds_max_depth(value: &serde_json::Value, current_depth: usize) -> bool {
    if current_depth > MAX_JSON_DEPTH {
        return true;
    }
    match value {
        serde_json::Value::Object(obj) => obj
            .values()
            .any(|v| json_exceeds_max_depth(v, current_depth + 1)),
        serde_json::Value::Array(arr) => arr
            .iter()
            .any(|v| json_exceeds_max_depth(v, current_depth + 1)),
        _ => false,
    }
}
