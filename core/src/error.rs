//! Error types for the allocation engine and its storage adapters.
//!
//! Two layers, mirroring the split between the engine and its persistence:
//!
//! - [`StoreError`]: adapter-level failures (missing rows, corrupt shard
//!   payloads, database errors).
//! - [`AllocationError`]: the engine's structured taxonomy. Every variant
//!   carries enough context for a caller to map it deterministically to a
//!   transport-level response (409 for conflicts, 410 for expired holds,
//!   422 for insufficient availability, and so on).

use crate::shard::ShardIndex;
use crate::types::{CampaignId, ReservationId, ReservationStatus, TicketNumber};
use thiserror::Error;

/// Errors raised by a single [`BitmapShard`](crate::bitmap::BitmapShard).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShardError {
    /// Number falls outside this shard's `[start, end]` range.
    #[error("number {number} outside shard range {start}..={end}")]
    OutOfRange {
        /// The offending number
        number: TicketNumber,
        /// First number covered by the shard
        start: u32,
        /// Last number covered by the shard
        end: u32,
    },

    /// The packed bit pattern for a number decoded to the invalid `0b11`.
    ///
    /// Only possible when rehydrating a shard from corrupted storage; the
    /// in-process CAS never writes this pattern.
    #[error("corrupt state bits {bits:#04b} for number {number}")]
    CorruptState {
        /// Number whose bits are invalid
        number: TicketNumber,
        /// The invalid two-bit pattern
        bits: u8,
    },
}

/// Errors that can occur during storage adapter operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// No shards or meta exist for the campaign.
    #[error("campaign not found: {0}")]
    CampaignNotFound(CampaignId),

    /// The campaign exists but the addressed shard row is missing.
    #[error("shard {shard_index} not found for campaign {campaign_id}")]
    ShardNotFound {
        /// Campaign being addressed
        campaign_id: CampaignId,
        /// Missing shard ordinal
        shard_index: ShardIndex,
    },

    /// Number falls outside the campaign's total range.
    #[error("number {number} outside campaign {campaign_id} range")]
    OutOfRange {
        /// Campaign being addressed
        campaign_id: CampaignId,
        /// The offending number
        number: TicketNumber,
    },

    /// A persisted shard payload failed validation on load.
    #[error("corrupt shard data: {0}")]
    CorruptShard(String),

    /// Database connection or query error.
    #[error("database error: {0}")]
    Database(String),
}

impl From<ShardError> for StoreError {
    fn from(error: ShardError) -> Self {
        Self::CorruptShard(error.to_string())
    }
}

/// Structured error taxonomy of the allocation engine.
#[derive(Error, Debug)]
pub enum AllocationError {
    /// A requested number is outside the campaign's `0..total` range.
    /// Always a caller bug; never retried.
    #[error("number {number} outside campaign range 0..{total}")]
    OutOfRange {
        /// The offending number
        number: TicketNumber,
        /// The campaign's total number count
        total: u32,
    },

    /// An explicit reservation lost the race for one or more numbers.
    /// The whole call was rolled back; no partial hold remains.
    #[error("numbers unavailable: {conflicting:?}")]
    NumbersUnavailable {
        /// Numbers that were not `Available` when probed
        conflicting: Vec<TicketNumber>,
    },

    /// A random reservation cannot be satisfied: fewer numbers are
    /// available than requested. Verified against aggregate counts before
    /// any number is touched.
    #[error("insufficient availability: requested {requested}, available {available}")]
    InsufficientAvailability {
        /// Quantity the caller asked for
        requested: u32,
        /// Aggregate availability at call start
        available: u64,
    },

    /// Confirmation arrived after the hold expired. Surfaced as a
    /// payment-reconciliation case; the engine never silently overwrites
    /// a released number.
    #[error("reservation {0} expired before confirmation")]
    ReservationExpired(ReservationId),

    /// A ledger transition was attempted from a non-`Active` status
    /// (for example a double confirm). Always a bug signal.
    #[error("invalid reservation state transition: {reservation_id} is {current}, wanted {requested}")]
    InvalidStateTransition {
        /// Reservation whose transition was rejected
        reservation_id: ReservationId,
        /// Status the reservation is actually in
        current: ReservationStatus,
        /// Status the caller tried to move to
        requested: ReservationStatus,
    },

    /// Strict-mode initialization found existing shards for the campaign.
    #[error("campaign {0} already initialized")]
    AlreadyInitialized(CampaignId),

    /// The campaign has never been initialized.
    #[error("campaign {0} not initialized")]
    CampaignNotFound(CampaignId),

    /// No reservation exists with the given id.
    #[error("reservation {0} not found")]
    ReservationNotFound(ReservationId),

    /// Malformed request: empty or duplicated number list, zero quantity,
    /// or a quantity above the configured per-reservation limit.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Random selection gave up after its bounded attempt budget under
    /// heavy contention. Partial holds were rolled back; safe to retry.
    #[error("allocation contention: gave up after {attempts} attempts")]
    Contention {
        /// Attempts consumed before giving up
        attempts: u32,
    },

    /// A confirm flipped some numbers to `Sold` and then hit a failed CAS.
    /// `Sold` is terminal, so nothing was rolled back; the listed numbers
    /// need operator follow-up.
    #[error("reservation {reservation_id} partially confirmed; numbers needing reconciliation: {numbers:?}")]
    ReconciliationRequired {
        /// Reservation that was being confirmed
        reservation_id: ReservationId,
        /// Numbers whose `Reserved → Sold` CAS failed
        numbers: Vec<TicketNumber>,
    },

    /// Storage adapter failure, passed through.
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

impl AllocationError {
    /// Whether the caller may safely retry the same request.
    ///
    /// `Contention` always is; `NumbersUnavailable` is retryable with
    /// different numbers (or by falling back to random selection).
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Contention { .. } | Self::NumbersUnavailable { .. }
        )
    }
}
