//! Guarded reservation lifecycle over a [`ReservationStore`].
//!
//! The ledger is the durable record of holds, independent of shard
//! storage; it is what lets the sweep and payment reconciliation work
//! without ever scanning bitmaps. Every status change goes through the
//! store's atomic compare-and-swap, so a confirm racing a sweep resolves
//! to exactly one winner.

use chrono::{DateTime, Utc};
use raffle_alloc_core::{
    AllocationError, Reservation, ReservationId, ReservationStatus, ReservationStore,
};
use std::sync::Arc;

/// Guarded state transitions for reservations.
///
/// Only `Active` reservations may move; transitions from any other status
/// fail with [`AllocationError::InvalidStateTransition`] (or, for the
/// expiry-adjacent statuses on confirm, with
/// [`AllocationError::ReservationExpired`]).
#[derive(Clone)]
pub struct ReservationLedger {
    store: Arc<dyn ReservationStore>,
}

impl ReservationLedger {
    /// Creates a ledger over the given store
    #[must_use]
    pub fn new(store: Arc<dyn ReservationStore>) -> Self {
        Self { store }
    }

    /// Persist a new `Active` reservation.
    ///
    /// # Errors
    ///
    /// Returns `AllocationError::Storage` on store failure.
    pub async fn create(&self, reservation: Reservation) -> Result<(), AllocationError> {
        self.store.create(reservation).await.map_err(Into::into)
    }

    /// Load a reservation, `None` if unknown.
    ///
    /// # Errors
    ///
    /// Returns `AllocationError::Storage` on store failure.
    pub async fn get(&self, id: ReservationId) -> Result<Option<Reservation>, AllocationError> {
        self.store.get(id).await.map_err(Into::into)
    }

    /// Load a reservation that must exist.
    ///
    /// # Errors
    ///
    /// - `AllocationError::ReservationNotFound` if unknown
    /// - `AllocationError::Storage` on store failure
    pub async fn require(&self, id: ReservationId) -> Result<Reservation, AllocationError> {
        self.get(id)
            .await?
            .ok_or(AllocationError::ReservationNotFound(id))
    }

    /// Claim `Active → Confirmed`.
    ///
    /// # Errors
    ///
    /// - `AllocationError::ReservationExpired` if the hold already lapsed
    ///   (status `Expiring` or `Expired`) — a late confirm must never
    ///   resurrect numbers another holder may have picked up
    /// - `AllocationError::InvalidStateTransition` for any other
    ///   non-`Active` status (a double confirm is a bug signal)
    /// - `AllocationError::Storage` on store failure
    pub async fn mark_confirmed(&self, id: ReservationId) -> Result<(), AllocationError> {
        if self
            .store
            .try_transition(id, ReservationStatus::Active, ReservationStatus::Confirmed)
            .await?
        {
            return Ok(());
        }
        let current = self.require(id).await?;
        Err(Self::rejected(id, current.status, ReservationStatus::Confirmed))
    }

    /// Claim `Active → Expiring` for a sweep. Returns false when another
    /// sweep (or a confirm) got there first; the caller must then leave
    /// the reservation alone.
    ///
    /// # Errors
    ///
    /// Returns `AllocationError::Storage` on store failure.
    pub async fn try_claim_expiring(&self, id: ReservationId) -> Result<bool, AllocationError> {
        self.store
            .try_transition(id, ReservationStatus::Active, ReservationStatus::Expiring)
            .await
            .map_err(Into::into)
    }

    /// Complete a sweep claim: `Expiring → Expired`.
    ///
    /// # Errors
    ///
    /// - `AllocationError::InvalidStateTransition` if the reservation is
    ///   not in the `Expiring` claim state (ledger integrity violation)
    /// - `AllocationError::Storage` on store failure
    pub async fn mark_expired(&self, id: ReservationId) -> Result<(), AllocationError> {
        if self
            .store
            .try_transition(id, ReservationStatus::Expiring, ReservationStatus::Expired)
            .await?
        {
            return Ok(());
        }
        let current = self.require(id).await?;
        Err(AllocationError::InvalidStateTransition {
            reservation_id: id,
            current: current.status,
            requested: ReservationStatus::Expired,
        })
    }

    /// Claim `Active → Released`. Returns false when the reservation was
    /// not `Active`, which the release operation treats as an idempotent
    /// no-op rather than an error.
    ///
    /// # Errors
    ///
    /// Returns `AllocationError::Storage` on store failure.
    pub async fn mark_released(&self, id: ReservationId) -> Result<bool, AllocationError> {
        self.store
            .try_transition(id, ReservationStatus::Active, ReservationStatus::Released)
            .await
            .map_err(Into::into)
    }

    /// Active reservations expiring before `before`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `AllocationError::Storage` on store failure.
    pub async fn find_expiring(
        &self,
        before: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Reservation>, AllocationError> {
        self.store
            .find_expiring(before, limit)
            .await
            .map_err(Into::into)
    }

    const fn rejected(
        id: ReservationId,
        current: ReservationStatus,
        requested: ReservationStatus,
    ) -> AllocationError {
        match current {
            ReservationStatus::Expiring | ReservationStatus::Expired => {
                AllocationError::ReservationExpired(id)
            }
            _ => AllocationError::InvalidStateTransition {
                reservation_id: id,
                current,
                requested,
            },
        }
    }
}
