//! Storage contracts for shards and reservations.
//!
//! Two trait objects back the allocation engine: a [`ShardStore`] holding
//! the packed per-number state, and a [`ReservationStore`] holding the
//! durable ledger of holds. Both are deliberately minimal; the engine
//! composes every higher-level operation from their conditional-update
//! primitives.
//!
//! # The CAS contract
//!
//! `ShardStore::try_transition` must be a single atomic storage operation:
//! the bit mutation, the per-shard counter adjustment and the campaign
//! aggregate all move together or not at all. Two concurrent callers
//! racing for the same number see one `Ok(true)` and one `Ok(false)`,
//! never two successes. Partial persistence (bit flipped, counter stale)
//! is the primary correctness hazard this contract exists to prevent.
//!
//! # Dyn compatibility
//!
//! The traits use explicit `Pin<Box<dyn Future>>` returns instead of
//! `async fn` so they can be held as `Arc<dyn ShardStore>` /
//! `Arc<dyn ReservationStore>` and injected into the engine.

use crate::bitmap::BitmapShard;
use crate::error::StoreError;
use crate::shard::{ShardIndex, ShardMeta};
use crate::types::{CampaignId, Reservation, ReservationId, ReservationStatus, StateCounts, TicketNumber, TicketState};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by store trait methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Result of an initialization attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InitOutcome {
    /// Shards and meta were created by this call
    Created {
        /// How many shards were created
        shard_count: u32,
    },
    /// Shards already existed; nothing was written
    AlreadyInitialized,
}

/// Available count of one shard, for weighted random selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShardAvailability {
    /// Shard ordinal
    pub shard_index: ShardIndex,
    /// Cached available counter at read time
    pub available: u32,
}

/// Durable store of campaign shards and their counters.
///
/// One record per `(campaign_id, shard_index)`. Implementations:
///
/// - `PostgresShardStore` (in `raffle-alloc-postgres`): production,
///   server-side conditional updates
/// - `InMemoryShardStore` (in `raffle-alloc-testing`): fast, deterministic
///   testing
pub trait ShardStore: Send + Sync {
    /// Create all-available shards plus the meta record for a campaign,
    /// if none exist yet. Idempotent: a second call reports
    /// [`InitOutcome::AlreadyInitialized`] and writes nothing.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` on storage failure.
    fn ensure_initialized(
        &self,
        campaign_id: CampaignId,
        total_numbers: u32,
        shard_size: u32,
    ) -> StoreFuture<'_, InitOutcome>;

    /// Load the campaign's meta record, `None` if never initialized.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` on storage failure.
    fn meta(&self, campaign_id: CampaignId) -> StoreFuture<'_, Option<ShardMeta>>;

    /// Atomically transition one number from `from` to `to`.
    ///
    /// Returns `Ok(false)` without side effect when the current state is
    /// not `from` (the caller lost a race). On `Ok(true)` the bit pair,
    /// the shard counters and the campaign aggregate were persisted as
    /// one atomic unit.
    ///
    /// # Errors
    ///
    /// - `StoreError::CampaignNotFound` if the campaign was never initialized
    /// - `StoreError::OutOfRange` if `number` is outside the campaign
    /// - `StoreError::Database` on storage failure
    fn try_transition(
        &self,
        campaign_id: CampaignId,
        number: TicketNumber,
        from: TicketState,
        to: TicketState,
    ) -> StoreFuture<'_, bool>;

    /// Per-shard available counters, ordered by ascending shard index.
    ///
    /// # Errors
    ///
    /// - `StoreError::CampaignNotFound` if the campaign was never initialized
    /// - `StoreError::Database` on storage failure
    fn shard_availability(&self, campaign_id: CampaignId) -> StoreFuture<'_, Vec<ShardAvailability>>;

    /// Point-in-time snapshot of one shard for scanning.
    ///
    /// The snapshot is immediately stale under concurrency; callers must
    /// re-validate any candidate through [`try_transition`](Self::try_transition).
    ///
    /// # Errors
    ///
    /// - `StoreError::ShardNotFound` if the shard row is missing
    /// - `StoreError::CorruptShard` if the payload fails validation
    /// - `StoreError::Database` on storage failure
    fn load_shard(
        &self,
        campaign_id: CampaignId,
        shard_index: ShardIndex,
    ) -> StoreFuture<'_, BitmapShard>;

    /// Aggregate per-state counts across all of the campaign's shards.
    ///
    /// # Errors
    ///
    /// - `StoreError::CampaignNotFound` if the campaign was never initialized
    /// - `StoreError::Database` on storage failure
    fn counts(&self, campaign_id: CampaignId) -> StoreFuture<'_, StateCounts>;
}

/// Durable ledger of reservations, independent of shard storage.
///
/// Enables sweep and reconciliation without scanning bitmaps. One record
/// per reservation, keyed by its generated id.
pub trait ReservationStore: Send + Sync {
    /// Persist a new reservation record.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` on storage failure.
    fn create(&self, reservation: Reservation) -> StoreFuture<'_, ()>;

    /// Load a reservation by id, `None` if unknown.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` on storage failure.
    fn get(&self, id: ReservationId) -> StoreFuture<'_, Option<Reservation>>;

    /// Atomically transition a reservation's status from `from` to `to`.
    ///
    /// Same CAS semantics as the shard store: `Ok(false)` means the
    /// status was not `from` and nothing changed. This is what makes
    /// confirm-vs-sweep races resolve to exactly one winner.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` on storage failure.
    fn try_transition(
        &self,
        id: ReservationId,
        from: ReservationStatus,
        to: ReservationStatus,
    ) -> StoreFuture<'_, bool>;

    /// Active reservations whose `expires_at` is before `before`, oldest
    /// first, capped at `limit`. Feeds the sweep.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` on storage failure.
    fn find_expiring(
        &self,
        before: DateTime<Utc>,
        limit: u32,
    ) -> StoreFuture<'_, Vec<Reservation>>;
}
