//! Scheduling, dedup, and staleness engine.
//!
//! The modules here form the core pipeline: caller -> throttle gate ->
//! durable queue -> worker loop -> per-chain orchestrator -> staleness
//! cache, with the backoff policy deciding when a repeat occurrence or a
//! retry runs next.

/// Repeat/retry delay policy
pub mod backoff;
/// Staleness cache over the shared store
pub mod cache;
/// Durable job queue and worker loop
pub mod queue;
/// Per-chain sync orchestrator
pub mod syncer;
/// Per-key dedup throttle gate
pub mod throttle;

pub use syncer::{SyncerConfig, UtxoSyncer};
