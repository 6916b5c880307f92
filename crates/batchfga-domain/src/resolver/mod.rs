//! Check resolver interface and the request/response types it speaks.

mod traits;
mod types;

pub use traits::CheckResolver;
pub use types::{
    CheckRequest, CheckResponse, ConsistencyPreference, ContextualTuple, ResolutionMetadata,
    ResolveCheckOptions, TupleKey,
};
