//! batchfga-server: Batch check orchestration
//!
//! This crate contains the check execution layer:
//! - Single check command with decision caching and singleflight
//! - Batch check handler with deduplication and bounded concurrency
//! - Configuration management
//! - Structured logging setup
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              batchfga-server                 │
//! ├─────────────────────────────────────────────┤
//! │  config.rs   - Configuration management     │
//! │  logging.rs  - tracing subscriber setup     │
//! │  handlers/   - Request handlers             │
//! │    check.rs       - Single check            │
//! │    batch/         - Batch checks            │
//! │    singleflight   - In-flight coalescing    │
//! └─────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod handlers;
pub mod logging;

// Re-exports for convenience
pub use config::{ConfigLoadError, ServerConfig};
pub use handlers::batch::{BatchCheckHandler, BatchCheckRequest, BatchCheckResponse};
pub use handlers::check::{CheckCacheOptions, CheckCommand};
