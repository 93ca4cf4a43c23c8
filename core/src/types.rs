//! Domain types for the raffle ticket allocation engine.
//!
//! Value objects and entities shared by the engine and its storage adapters:
//! identifiers, the per-number ticket state, reservation records and
//! aggregate counts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for a raffle campaign
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CampaignId(Uuid);

impl CampaignId {
    /// Creates a new random `CampaignId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `CampaignId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CampaignId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CampaignId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a reservation (hold on a set of numbers)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReservationId(Uuid);

impl ReservationId {
    /// Creates a new random `ReservationId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `ReservationId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ReservationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ReservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for the holder of a reservation (a user or session)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HolderId(Uuid);

impl HolderId {
    /// Creates a new random `HolderId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `HolderId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for HolderId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for HolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Ticket numbers
// ============================================================================

/// A campaign-relative ticket number, 0-based.
///
/// A campaign with `total_numbers = N` sells numbers `0..N`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TicketNumber(u32);

impl TicketNumber {
    /// Creates a `TicketNumber`
    #[must_use]
    pub const fn new(number: u32) -> Self {
        Self(number)
    }

    /// Returns the raw number
    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for TicketNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for TicketNumber {
    fn from(number: u32) -> Self {
        Self(number)
    }
}

// ============================================================================
// Ticket state
// ============================================================================

/// Allocation state of a single ticket number.
///
/// Encoded as two bits in a [`BitmapShard`](crate::bitmap::BitmapShard);
/// one bit cannot distinguish three states. `0b11` is never written.
///
/// Valid transitions: `Available → Reserved → Sold` (terminal) and
/// `Reserved → Available` (release or expiry).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TicketState {
    /// Number may be reserved
    Available = 0b00,
    /// Number is held by an active reservation, pending payment
    Reserved = 0b01,
    /// Payment confirmed; terminal
    Sold = 0b10,
}

impl TicketState {
    /// Two-bit wire encoding of this state
    #[must_use]
    pub const fn bits(self) -> u8 {
        self as u8
    }

    /// Decode a two-bit value; `None` for the invalid `0b11` pattern
    #[must_use]
    pub const fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0b00 => Some(Self::Available),
            0b01 => Some(Self::Reserved),
            0b10 => Some(Self::Sold),
            _ => None,
        }
    }
}

impl fmt::Display for TicketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Available => write!(f, "available"),
            Self::Reserved => write!(f, "reserved"),
            Self::Sold => write!(f, "sold"),
        }
    }
}

// ============================================================================
// Reservations
// ============================================================================

/// Lifecycle status of a [`Reservation`].
///
/// Only `Active` reservations may transition. `Expiring` is the transient
/// claim a sweep takes before releasing numbers, so two concurrent sweeps
/// never double-release the same hold.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    /// Hold is live and awaiting payment confirmation
    Active,
    /// Claimed by a sweep; numbers are being returned to the pool
    Expiring,
    /// Payment confirmed; numbers are sold
    Confirmed,
    /// TTL elapsed; numbers were returned to the pool by a sweep
    Expired,
    /// Explicitly cancelled; numbers were returned to the pool
    Released,
}

impl ReservationStatus {
    /// Stable string form used by durable storage
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Expiring => "EXPIRING",
            Self::Confirmed => "CONFIRMED",
            Self::Expired => "EXPIRED",
            Self::Released => "RELEASED",
        }
    }

    /// Parse the stable string form; `None` for unknown values
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(Self::Active),
            "EXPIRING" => Some(Self::Expiring),
            "CONFIRMED" => Some(Self::Confirmed),
            "EXPIRED" => Some(Self::Expired),
            "RELEASED" => Some(Self::Released),
            _ => None,
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A time-bounded hold on a set of ticket numbers for one holder.
///
/// Created by a reserve operation, confirmed by payment, released by
/// cancellation, or expired by the sweep once `expires_at` passes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// Reservation identifier
    pub id: ReservationId,
    /// Campaign the numbers belong to
    pub campaign_id: CampaignId,
    /// User or session holding the numbers
    pub holder_id: HolderId,
    /// Held numbers, in acquisition order
    pub numbers: Vec<TicketNumber>,
    /// Current lifecycle status
    pub status: ReservationStatus,
    /// When the hold was created
    pub created_at: DateTime<Utc>,
    /// When the hold lapses unless confirmed
    pub expires_at: DateTime<Utc>,
}

impl Reservation {
    /// Creates a new `Active` reservation
    #[must_use]
    pub fn new(
        campaign_id: CampaignId,
        holder_id: HolderId,
        numbers: Vec<TicketNumber>,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ReservationId::new(),
            campaign_id,
            holder_id,
            numbers,
            status: ReservationStatus::Active,
            created_at,
            expires_at,
        }
    }

    /// Whether the TTL has elapsed at `now`
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

// ============================================================================
// Aggregate counts
// ============================================================================

/// Per-state number counts for one shard or one whole campaign.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCounts {
    /// Numbers in `Available` state
    pub available: u64,
    /// Numbers in `Reserved` state
    pub reserved: u64,
    /// Numbers in `Sold` state
    pub sold: u64,
}

impl StateCounts {
    /// Sum of all three states; equals the covered number range size
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.available + self.reserved + self.sold
    }
}
