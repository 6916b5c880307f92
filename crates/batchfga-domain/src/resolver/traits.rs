//! Traits for the check resolution engine.

use async_trait::async_trait;

use crate::context::RequestContext;
use crate::error::DomainResult;

use super::types::{CheckRequest, CheckResponse, ResolveCheckOptions};

/// Resolves a single permission check against an authorization model.
///
/// Implementations own their relationship datastore and evaluate relation
/// rewrites, usersets and conditions. They should stop work and return the
/// context error once `ctx` is done.
#[async_trait]
pub trait CheckResolver: Send + Sync {
    async fn resolve_check(
        &self,
        ctx: &RequestContext,
        request: &CheckRequest,
        options: &ResolveCheckOptions,
    ) -> DomainResult<CheckResponse>;
}
