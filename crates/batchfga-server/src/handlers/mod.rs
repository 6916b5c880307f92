//! Request handlers.
//!
//! - `check`: single check evaluation with decision caching and coalescing
//! - `batch`: batch checks with deduplication and bounded fan-out

pub mod batch;
pub mod check;
pub mod singleflight;
