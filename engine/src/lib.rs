//! Allocation engine for raffle ticket numbers.
//!
//! Composes the shard and reservation stores from `raffle-alloc-core`
//! into the operations a raffle platform needs:
//!
//! - [`AllocationEngine`]: explicit and random reservation, confirm,
//!   release and expiry sweeping, all race-free through store-level
//!   compare-and-swap
//! - [`ReservationLedger`]: guarded reservation lifecycle transitions
//! - [`StatsAggregator`]: O(shards) campaign statistics from cached
//!   counters
//! - [`Sweeper`]: background task driving periodic expiry passes
//!
//! # Example
//!
//! ```ignore
//! let engine = AllocationEngine::new(shards, reservations, clock, EngineConfig::from_env());
//! engine.ensure_initialized(campaign, 100_000, 4096, InitMode::Idempotent).await?;
//! let hold = engine.reserve_random(campaign, holder, 5).await?;
//! engine.confirm(hold.id).await?;
//! ```

pub mod config;
pub mod engine;
pub mod ledger;
pub mod metrics;
pub mod stats;
pub mod sweeper;

pub use config::EngineConfig;
pub use engine::{AllocationEngine, InitMode};
pub use ledger::ReservationLedger;
pub use crate::metrics::register_allocation_metrics;
pub use stats::{CampaignStats, StatsAggregator};
pub use sweeper::Sweeper;
