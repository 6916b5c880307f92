//! Domain error types for authorization operations.

use thiserror::Error;

/// Domain-specific errors for a single permission check.
///
/// These errors never abort a batch: they are captured in the outcome of the
/// check that produced them. The type is `Clone` so one result can be shared
/// with every waiter of a coalesced check.
#[derive(Debug, Clone, Error)]
pub enum DomainError {
    /// Error during permission check resolution.
    #[error("resolver error: {message}")]
    ResolverError { message: String },

    /// Depth limit exceeded during graph traversal.
    #[error("depth limit exceeded (max: {max_depth})")]
    DepthLimitExceeded { max_depth: u32 },

    /// Timeout during permission check.
    #[error("timeout after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Invalid user format.
    #[error("invalid user format: {value}")]
    InvalidUserFormat { value: String },

    /// Invalid object format.
    #[error("invalid object format: {value}")]
    InvalidObjectFormat { value: String },

    /// Invalid relation format.
    #[error("invalid relation format: {value}")]
    InvalidRelationFormat { value: String },

    /// Type not found in authorization model.
    #[error("type not found: {type_name}")]
    TypeNotFound { type_name: String },

    /// Relation not found on type.
    #[error("relation '{relation}' not found on type '{type_name}'")]
    RelationNotFound { type_name: String, relation: String },

    /// The check context cannot be used (e.g., nested too deeply).
    #[error("invalid check context: {message}")]
    InvalidContext { message: String },

    /// Store not found.
    #[error("store not found: {store_id}")]
    StoreNotFound { store_id: String },

    /// The relationship datastore failed.
    #[error("storage error: {message}")]
    StorageError { message: String },

    /// The request context was cancelled.
    #[error("context cancelled")]
    Cancelled,

    /// The request context deadline passed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,

    /// An evaluation ended without producing a result.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl DomainError {
    /// Returns true for errors caused by the request context ending.
    pub fn is_context_error(&self) -> bool {
        matches!(self, DomainError::Cancelled | DomainError::DeadlineExceeded)
    }

    /// Returns true for errors caused by malformed check input.
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            DomainError::InvalidUserFormat { .. }
                | DomainError::InvalidObjectFormat { .. }
                | DomainError::InvalidRelationFormat { .. }
                | DomainError::InvalidContext { .. }
                | DomainError::TypeNotFound { .. }
                | DomainError::RelationNotFound { .. }
        )
    }
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
