//! The allocation engine: race-free reservation, confirmation, release
//! and expiry over sharded ticket-number bitmaps.
//!
//! Every mutation funnels through the stores' compare-and-swap
//! primitives, so the engine itself holds no locks and keeps no state
//! beyond its configuration. Concurrent calls against the same campaign
//! are safe by construction: a number moves `Available → Reserved` for
//! exactly one caller, whatever the interleaving.

use crate::config::EngineConfig;
use crate::ledger::ReservationLedger;
use crate::metrics::{
    CONTENTION_TOTAL, RECONCILIATION_TOTAL, RESERVATIONS_CONFIRMED_TOTAL,
    RESERVATIONS_EXPIRED_TOTAL, RESERVATIONS_RELEASED_TOTAL, RESERVATIONS_TOTAL,
    RESERVATION_CONFLICTS_TOTAL,
};
use metrics::counter;
use raffle_alloc_core::{
    AllocationError, CampaignId, Clock, HolderId, InitOutcome, Reservation, ReservationId,
    ReservationStatus, ReservationStore, ShardAvailability, ShardMeta, ShardStore, TicketNumber,
    TicketState,
};
use rand::Rng;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// How `ensure_initialized` treats a campaign that already has shards.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InitMode {
    /// Existing shards are fine; report [`InitOutcome::AlreadyInitialized`]
    Idempotent,
    /// Existing shards are an error
    Strict,
}

/// Orchestrates reservations over a [`ShardStore`] and a reservation
/// ledger.
///
/// Cheap to clone via the contained `Arc`s; one engine instance is
/// normally shared across all request handlers and the background
/// sweeper.
#[derive(Clone)]
pub struct AllocationEngine {
    shards: Arc<dyn ShardStore>,
    ledger: ReservationLedger,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl AllocationEngine {
    /// Creates an engine over the given stores.
    #[must_use]
    pub fn new(
        shards: Arc<dyn ShardStore>,
        reservations: Arc<dyn ReservationStore>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        Self {
            shards,
            ledger: ReservationLedger::new(reservations),
            clock,
            config,
        }
    }

    /// The engine's reservation ledger, for callers that need direct
    /// reservation lookups.
    #[must_use]
    pub const fn ledger(&self) -> &ReservationLedger {
        &self.ledger
    }

    /// Current time from the engine's clock.
    #[must_use]
    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }

    /// Create the campaign's shards and meta record.
    ///
    /// # Errors
    ///
    /// - `AllocationError::InvalidRequest` if `total_numbers` or
    ///   `shard_size` is zero
    /// - `AllocationError::AlreadyInitialized` in [`InitMode::Strict`]
    ///   when shards already exist
    /// - `AllocationError::Storage` on store failure
    pub async fn ensure_initialized(
        &self,
        campaign_id: CampaignId,
        total_numbers: u32,
        shard_size: u32,
        mode: InitMode,
    ) -> Result<InitOutcome, AllocationError> {
        if total_numbers == 0 {
            return Err(AllocationError::InvalidRequest(
                "campaign must have at least one number".to_string(),
            ));
        }
        if shard_size == 0 {
            return Err(AllocationError::InvalidRequest(
                "shard size must be at least one".to_string(),
            ));
        }

        let outcome = self
            .shards
            .ensure_initialized(campaign_id, total_numbers, shard_size)
            .await?;
        match outcome {
            InitOutcome::Created { shard_count } => {
                info!(%campaign_id, total_numbers, shard_size, shard_count, "campaign initialized");
            }
            InitOutcome::AlreadyInitialized => {
                if mode == InitMode::Strict {
                    return Err(AllocationError::AlreadyInitialized(campaign_id));
                }
                debug!(%campaign_id, "campaign already initialized");
            }
        }
        Ok(outcome)
    }

    /// Reserve an explicit set of numbers, all-or-nothing.
    ///
    /// Every requested number is probed even after the first conflict, so
    /// the error lists the complete conflict set and the caller can
    /// re-pick in one round trip. On any conflict, acquired holds are
    /// rolled back in reverse acquisition order and no reservation record
    /// is written.
    ///
    /// # Errors
    ///
    /// - `AllocationError::InvalidRequest` for an empty, oversized or
    ///   duplicated number list
    /// - `AllocationError::OutOfRange` if a number is outside the campaign
    /// - `AllocationError::CampaignNotFound` if never initialized
    /// - `AllocationError::NumbersUnavailable` when any number was not
    ///   available; nothing is held afterwards
    /// - `AllocationError::Storage` on store failure
    pub async fn reserve_explicit(
        &self,
        campaign_id: CampaignId,
        holder_id: HolderId,
        numbers: &[TicketNumber],
    ) -> Result<Reservation, AllocationError> {
        let meta = self.require_meta(campaign_id).await?;
        validate_numbers(numbers, &meta, self.config.max_numbers_per_reservation)?;

        let mut acquired = Vec::with_capacity(numbers.len());
        let mut conflicting = Vec::new();
        for &number in numbers {
            match self
                .shards
                .try_transition(campaign_id, number, TicketState::Available, TicketState::Reserved)
                .await
            {
                Ok(true) => acquired.push(number),
                Ok(false) => conflicting.push(number),
                Err(error) => {
                    self.rollback_holds(campaign_id, &acquired).await;
                    return Err(error.into());
                }
            }
        }

        if !conflicting.is_empty() {
            self.rollback_holds(campaign_id, &acquired).await;
            counter!(RESERVATION_CONFLICTS_TOTAL).increment(1);
            debug!(%campaign_id, ?conflicting, "explicit reservation lost a race");
            return Err(AllocationError::NumbersUnavailable { conflicting });
        }

        self.finish_reservation(campaign_id, holder_id, acquired, "explicit")
            .await
    }

    /// Reserve `quantity` random numbers.
    ///
    /// Aggregate availability is verified before any number is touched.
    /// Selection is weighted by per-shard availability, with a uniform
    /// starting offset inside the chosen shard, so allocations spread
    /// evenly instead of piling onto the lowest numbers. Each candidate is
    /// re-validated through the store's CAS; a lost race just costs one
    /// attempt from a budget of `quantity × attempts_per_number`.
    ///
    /// # Errors
    ///
    /// - `AllocationError::InvalidRequest` for a zero or oversized quantity
    /// - `AllocationError::CampaignNotFound` if never initialized
    /// - `AllocationError::InsufficientAvailability` when fewer numbers
    ///   are available than requested
    /// - `AllocationError::Contention` when the attempt budget ran out;
    ///   partial holds were rolled back, safe to retry
    /// - `AllocationError::Storage` on store failure
    pub async fn reserve_random(
        &self,
        campaign_id: CampaignId,
        holder_id: HolderId,
        quantity: u32,
    ) -> Result<Reservation, AllocationError> {
        if quantity == 0 {
            return Err(AllocationError::InvalidRequest(
                "quantity must be at least one".to_string(),
            ));
        }
        if quantity > self.config.max_numbers_per_reservation {
            return Err(AllocationError::InvalidRequest(format!(
                "quantity {quantity} exceeds limit {}",
                self.config.max_numbers_per_reservation
            )));
        }
        self.require_meta(campaign_id).await?;

        let mut availability = self.shards.shard_availability(campaign_id).await?;
        let starting_total = total_available(&availability);
        if starting_total < u64::from(quantity) {
            return Err(AllocationError::InsufficientAvailability {
                requested: quantity,
                available: starting_total,
            });
        }

        let budget = quantity.saturating_mul(self.config.attempts_per_number);
        let mut attempts = 0u32;
        let mut held: Vec<TicketNumber> = Vec::with_capacity(quantity as usize);

        while (held.len() as u64) < u64::from(quantity) {
            if attempts >= budget {
                self.rollback_holds(campaign_id, &held).await;
                counter!(CONTENTION_TOTAL).increment(1);
                warn!(%campaign_id, attempts, quantity, "random selection exhausted attempt budget");
                return Err(AllocationError::Contention { attempts });
            }
            attempts += 1;

            let weight = total_available(&availability);
            if weight == 0 {
                // Snapshot drained; see whether the pool really is empty
                // or our counts are just stale.
                availability = self.shards.shard_availability(campaign_id).await?;
                if total_available(&availability) == 0 {
                    self.rollback_holds(campaign_id, &held).await;
                    return Err(AllocationError::InsufficientAvailability {
                        requested: quantity,
                        available: held.len() as u64,
                    });
                }
                continue;
            }

            let slot = {
                let mut rng = rand::thread_rng();
                rng.gen_range(0..weight)
            };
            let pick = pick_weighted(&availability, slot);
            let shard = self
                .shards
                .load_shard(campaign_id, availability[pick].shard_index)
                .await?;
            let offset = {
                let mut rng = rand::thread_rng();
                rng.gen_range(0..shard.len().max(1))
            };

            match shard.next_available_on_or_after(offset) {
                None => {
                    // The snapshot overstated this shard; drop it from the
                    // weights until the next refresh.
                    availability[pick].available = 0;
                }
                Some(number) => {
                    if self
                        .shards
                        .try_transition(
                            campaign_id,
                            number,
                            TicketState::Available,
                            TicketState::Reserved,
                        )
                        .await?
                    {
                        held.push(number);
                    }
                    // Won or lost, one fewer available number in that shard.
                    availability[pick].available =
                        availability[pick].available.saturating_sub(1);
                }
            }
        }

        self.finish_reservation(campaign_id, holder_id, held, "random")
            .await
    }

    /// Confirm a reservation after payment: ledger `Active → Confirmed`,
    /// then every held number `Reserved → Sold`.
    ///
    /// The ledger transition goes first so a concurrent sweep can no
    /// longer release the numbers mid-confirm. `Sold` is terminal; if any
    /// per-number CAS fails after others succeeded, nothing is rolled back
    /// and the failed numbers are surfaced for operator reconciliation.
    ///
    /// # Errors
    ///
    /// - `AllocationError::ReservationNotFound` if unknown
    /// - `AllocationError::ReservationExpired` if the hold lapsed first
    /// - `AllocationError::InvalidStateTransition` on a double confirm or
    ///   a confirm of a released hold
    /// - `AllocationError::ReconciliationRequired` on a partial confirm
    /// - `AllocationError::Storage` on store failure
    pub async fn confirm(&self, id: ReservationId) -> Result<Reservation, AllocationError> {
        let mut reservation = self.ledger.require(id).await?;
        self.ledger.mark_confirmed(id).await?;

        let mut failed = Vec::new();
        for &number in &reservation.numbers {
            if !self
                .shards
                .try_transition(
                    reservation.campaign_id,
                    number,
                    TicketState::Reserved,
                    TicketState::Sold,
                )
                .await?
            {
                failed.push(number);
            }
        }

        if !failed.is_empty() {
            counter!(RECONCILIATION_TOTAL).increment(1);
            error!(
                reservation_id = %id,
                campaign_id = %reservation.campaign_id,
                ?failed,
                "confirm found numbers not in reserved state"
            );
            return Err(AllocationError::ReconciliationRequired {
                reservation_id: id,
                numbers: failed,
            });
        }

        counter!(RESERVATIONS_CONFIRMED_TOTAL).increment(1);
        info!(reservation_id = %id, campaign_id = %reservation.campaign_id, "reservation confirmed");
        reservation.status = ReservationStatus::Confirmed;
        Ok(reservation)
    }

    /// Release a reservation before expiry, returning its numbers to the
    /// pool.
    ///
    /// Idempotent: releasing a reservation that is no longer `Active`
    /// (already confirmed, released or expired) is a no-op reported as
    /// `Ok(false)`.
    ///
    /// # Errors
    ///
    /// - `AllocationError::ReservationNotFound` if unknown
    /// - `AllocationError::Storage` on store failure
    pub async fn release(&self, id: ReservationId) -> Result<bool, AllocationError> {
        let reservation = self.ledger.require(id).await?;
        if !self.ledger.mark_released(id).await? {
            debug!(reservation_id = %id, "release was a no-op");
            return Ok(false);
        }

        self.release_numbers(&reservation).await;
        counter!(RESERVATIONS_RELEASED_TOTAL).increment(1);
        info!(reservation_id = %id, campaign_id = %reservation.campaign_id, "reservation released");
        Ok(true)
    }

    /// One expiry sweep pass: find lapsed `Active` reservations, claim
    /// each one, return its numbers and mark it `Expired`.
    ///
    /// A failed claim means a concurrent confirm or sweep won; that
    /// reservation is skipped. Per-reservation failures are logged and do
    /// not abort the pass. Returns the number of reservations expired.
    ///
    /// # Errors
    ///
    /// Returns `AllocationError::Storage` when the expiring-reservation
    /// query itself fails.
    pub async fn sweep_expired(&self) -> Result<usize, AllocationError> {
        let now = self.clock.now();
        let candidates = self
            .ledger
            .find_expiring(now, self.config.sweep_batch_size)
            .await?;

        let mut swept = 0;
        for reservation in candidates {
            match self.sweep_one(&reservation).await {
                Ok(true) => swept += 1,
                Ok(false) => {}
                Err(error) => {
                    warn!(
                        reservation_id = %reservation.id,
                        campaign_id = %reservation.campaign_id,
                        %error,
                        "failed to expire reservation"
                    );
                }
            }
        }

        if swept > 0 {
            info!(swept, "expiry sweep released lapsed reservations");
        }
        Ok(swept)
    }

    async fn sweep_one(&self, reservation: &Reservation) -> Result<bool, AllocationError> {
        if !self.ledger.try_claim_expiring(reservation.id).await? {
            return Ok(false);
        }
        self.release_numbers(reservation).await;
        self.ledger.mark_expired(reservation.id).await?;
        counter!(RESERVATIONS_EXPIRED_TOTAL).increment(1);
        debug!(reservation_id = %reservation.id, "reservation expired");
        Ok(true)
    }

    async fn require_meta(&self, campaign_id: CampaignId) -> Result<ShardMeta, AllocationError> {
        self.shards
            .meta(campaign_id)
            .await?
            .ok_or(AllocationError::CampaignNotFound(campaign_id))
    }

    /// Write the ledger record for freshly acquired holds. If the ledger
    /// write fails the holds are rolled back, so a reservation either
    /// exists in both stores or in neither.
    async fn finish_reservation(
        &self,
        campaign_id: CampaignId,
        holder_id: HolderId,
        numbers: Vec<TicketNumber>,
        kind: &'static str,
    ) -> Result<Reservation, AllocationError> {
        let now = self.clock.now();
        let reservation = Reservation::new(
            campaign_id,
            holder_id,
            numbers,
            now,
            now + self.config.reservation_ttl(),
        );
        if let Err(error) = self.ledger.create(reservation.clone()).await {
            self.rollback_holds(campaign_id, &reservation.numbers).await;
            return Err(error);
        }

        counter!(RESERVATIONS_TOTAL, "kind" => kind).increment(1);
        info!(
            reservation_id = %reservation.id,
            %campaign_id,
            count = reservation.numbers.len(),
            kind,
            "reservation created"
        );
        Ok(reservation)
    }

    /// Return acquired holds to the pool in reverse acquisition order.
    ///
    /// Best-effort: a number we hold as `Reserved` must transition back,
    /// so a failed CAS here indicates corruption and is logged rather
    /// than propagated (the original error is the one the caller needs).
    async fn rollback_holds(&self, campaign_id: CampaignId, acquired: &[TicketNumber]) {
        for &number in acquired.iter().rev() {
            match self
                .shards
                .try_transition(campaign_id, number, TicketState::Reserved, TicketState::Available)
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    warn!(%campaign_id, %number, "rollback found number not reserved");
                }
                Err(error) => {
                    warn!(%campaign_id, %number, %error, "rollback failed for number");
                }
            }
        }
    }

    async fn release_numbers(&self, reservation: &Reservation) {
        self.rollback_holds(reservation.campaign_id, &reservation.numbers)
            .await;
    }
}

fn total_available(availability: &[ShardAvailability]) -> u64 {
    availability
        .iter()
        .map(|entry| u64::from(entry.available))
        .sum()
}

/// Index of the shard owning `slot` under cumulative availability
/// weights. Caller guarantees `slot < total_available(availability)`;
/// ties between equal prefixes resolve to the lowest shard index.
fn pick_weighted(availability: &[ShardAvailability], slot: u64) -> usize {
    let mut remaining = slot;
    for (position, entry) in availability.iter().enumerate() {
        let weight = u64::from(entry.available);
        if remaining < weight {
            return position;
        }
        remaining -= weight;
    }
    availability.len().saturating_sub(1)
}

fn validate_numbers(
    numbers: &[TicketNumber],
    meta: &ShardMeta,
    max_numbers: u32,
) -> Result<(), AllocationError> {
    if numbers.is_empty() {
        return Err(AllocationError::InvalidRequest(
            "no numbers requested".to_string(),
        ));
    }
    if numbers.len() as u64 > u64::from(max_numbers) {
        return Err(AllocationError::InvalidRequest(format!(
            "{} numbers exceeds limit {max_numbers}",
            numbers.len()
        )));
    }
    let mut seen = HashSet::with_capacity(numbers.len());
    for &number in numbers {
        if !seen.insert(number) {
            return Err(AllocationError::InvalidRequest(format!(
                "duplicate number {number}"
            )));
        }
        if !meta.contains(number) {
            return Err(AllocationError::OutOfRange {
                number,
                total: meta.total_numbers,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use raffle_alloc_core::ShardIndex;

    #[allow(clippy::cast_possible_truncation)]
    fn availability(counts: &[u32]) -> Vec<ShardAvailability> {
        counts
            .iter()
            .enumerate()
            .map(|(index, &available)| ShardAvailability {
                shard_index: ShardIndex::new(index as u32),
                available,
            })
            .collect()
    }

    #[test]
    fn weighted_pick_walks_cumulative_ranges() {
        let shards = availability(&[3, 0, 5]);
        assert_eq!(pick_weighted(&shards, 0), 0);
        assert_eq!(pick_weighted(&shards, 2), 0);
        // Shard 1 has zero weight and can never be picked.
        assert_eq!(pick_weighted(&shards, 3), 2);
        assert_eq!(pick_weighted(&shards, 7), 2);
    }

    #[test]
    fn weighted_pick_prefers_lowest_index_on_ties() {
        let shards = availability(&[1, 1]);
        assert_eq!(pick_weighted(&shards, 0), 0);
        assert_eq!(pick_weighted(&shards, 1), 1);
    }

    #[test]
    fn validation_rejects_malformed_requests() {
        let meta = ShardMeta::new(CampaignId::new(), 100, 10);

        assert!(matches!(
            validate_numbers(&[], &meta, 5),
            Err(AllocationError::InvalidRequest(_))
        ));
        assert!(matches!(
            validate_numbers(
                &[TicketNumber::new(1), TicketNumber::new(1)],
                &meta,
                5
            ),
            Err(AllocationError::InvalidRequest(_))
        ));
        assert!(matches!(
            validate_numbers(&[TicketNumber::new(100)], &meta, 5),
            Err(AllocationError::OutOfRange { .. })
        ));
        let too_many: Vec<TicketNumber> = (0..6).map(TicketNumber::new).collect();
        assert!(matches!(
            validate_numbers(&too_many, &meta, 5),
            Err(AllocationError::InvalidRequest(_))
        ));
        assert!(validate_numbers(&[TicketNumber::new(99)], &meta, 5).is_ok());
    }
}
