//! # Raffle Alloc Core
//!
//! Domain types and storage contracts for the raffle ticket allocation
//! engine.
//!
//! A raffle campaign sells numbered tickets (`0..total`). Each number is
//! in one of three states — available, reserved or sold — packed two bits
//! per number into fixed-size [`BitmapShard`]s, with cached counters kept
//! transactionally in step with the bits. All state change flows through
//! one compare-and-swap primitive, which is what lets many concurrent
//! request handlers reserve and purchase numbers without double
//! allocation and without any in-process global lock.
//!
//! ## Crate map
//!
//! - [`types`]: identifiers, [`TicketState`], [`Reservation`]
//! - [`bitmap`]: the two-bit packed shard and its CAS
//! - [`shard`]: shard routing arithmetic and campaign meta
//! - [`store`]: dyn-compatible [`ShardStore`] / [`ReservationStore`] traits
//! - [`error`]: the structured error taxonomy
//! - [`clock`]: injectable time source
//!
//! The engine itself lives in `raffle-alloc-engine`; durable adapters in
//! `raffle-alloc-postgres`; in-memory test doubles in
//! `raffle-alloc-testing`.

pub mod bitmap;
pub mod clock;
pub mod error;
pub mod shard;
pub mod store;
pub mod types;

pub use bitmap::{BitmapShard, encoding};
pub use clock::{Clock, SystemClock};
pub use error::{AllocationError, ShardError, StoreError};
pub use shard::{ShardIndex, ShardMeta, shard_bounds, shard_count, shard_for};
pub use store::{InitOutcome, ReservationStore, ShardAvailability, ShardStore, StoreFuture};
pub use types::{
    CampaignId, HolderId, Reservation, ReservationId, ReservationStatus, StateCounts,
    TicketNumber, TicketState,
};
