//! batchfga-domain: Check types, fingerprints and decision caching
//!
//! This crate contains the pieces shared by every check path:
//! - Request/response types and the `CheckResolver` interface
//! - Deterministic check fingerprints (`CacheKey`)
//! - Check decision cache and cache controllers
//! - Request context (cancellation and deadlines)
//! - Tuple format validation
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              batchfga-domain                 │
//! ├─────────────────────────────────────────────┤
//! │  resolver/   - Check types & resolver trait │
//! │  cache/      - Fingerprints & decisions     │
//! │  context.rs  - Cancellation & deadlines     │
//! │  validation  - Tuple format checks          │
//! └─────────────────────────────────────────────┘
//! ```

pub mod cache;
pub mod context;
pub mod error;
pub mod resolver;
pub mod validation;

// Re-export commonly used types at the crate root
pub use cache::{CacheKey, CheckCache, CheckCacheConfig};
pub use context::RequestContext;
pub use error::{DomainError, DomainResult};
