//! # Raffle Alloc Testing
//!
//! Testing utilities for the raffle allocation engine:
//!
//! - In-memory [`ShardStore`](raffle_alloc_core::ShardStore) and
//!   [`ReservationStore`](raffle_alloc_core::ReservationStore)
//!   implementations with the same CAS semantics as the durable adapters
//! - A settable [`FixedClock`](mocks::FixedClock) for deterministic TTL
//!   and sweep tests
//!
//! ## Example
//!
//! ```ignore
//! use raffle_alloc_testing::mocks::{FixedClock, InMemoryShardStore, InMemoryReservationStore};
//!
//! let shards = Arc::new(InMemoryShardStore::new());
//! let reservations = Arc::new(InMemoryReservationStore::new());
//! let clock = Arc::new(FixedClock::at_test_epoch());
//! let engine = AllocationEngine::new(shards, reservations, clock, EngineConfig::default());
//! ```

pub mod mocks;

pub use mocks::{FixedClock, InMemoryReservationStore, InMemoryShardStore};
