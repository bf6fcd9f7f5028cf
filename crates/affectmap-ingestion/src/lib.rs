//! affectmap-ingestion — Incremental researcher ingestion-and-analysis engine.
//! - Seed identity loading
//! - OpenAlex work discovery with incremental paging
//! - Bounded work queue with watermark backpressure
//! - Per-paper LLM analysis with caching and retry
//! - Title-key deduplication and profile merging
//! - Checkpointed, crash-recoverable JSON artifacts

pub mod analysis;
pub mod context;
pub mod dedup;
pub mod enrich;
pub mod models;
pub mod pipeline;
pub mod queue;
pub mod seed;
pub mod sources;
pub mod store;
pub mod summary;
