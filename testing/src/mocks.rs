//! In-memory store implementations for fast, deterministic tests.
//!
//! Both stores guard their state with a `Mutex`, which gives every
//! operation the same atomicity the durable adapters provide through
//! conditional updates: two tasks racing a `try_transition` for the same
//! number observe one winner and one clean CAS failure.

use chrono::{DateTime, Duration, Utc};
use raffle_alloc_core::{
    BitmapShard, CampaignId, Clock, InitOutcome, Reservation, ReservationId, ReservationStatus,
    ReservationStore, ShardAvailability, ShardIndex, ShardMeta, ShardStore, StateCounts,
    StoreError, StoreFuture, TicketNumber, TicketState, shard_bounds, shard_for,
};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

// ============================================================================
// FixedClock
// ============================================================================

/// Settable clock for deterministic tests.
///
/// Starts at a fixed instant and only moves when the test advances it,
/// which makes TTL expiry and sweep behavior reproducible.
#[derive(Debug)]
pub struct FixedClock {
    time: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    /// Create a clock frozen at `time`
    #[must_use]
    pub fn new(time: DateTime<Utc>) -> Self {
        Self {
            time: Mutex::new(time),
        }
    }

    /// Clock frozen at 2025-01-01 00:00:00 UTC
    ///
    /// # Panics
    ///
    /// Panics if the hardcoded timestamp fails to convert, which should
    /// never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn at_test_epoch() -> Self {
        Self::new(
            DateTime::<Utc>::from_timestamp(1_735_689_600, 0)
                .expect("hardcoded timestamp should always convert"),
        )
    }

    /// Move the clock forward by `delta`
    pub fn advance(&self, delta: Duration) {
        if let Ok(mut time) = self.time.lock() {
            *time += delta;
        }
    }

    /// Set the clock to an absolute instant
    pub fn set(&self, time: DateTime<Utc>) {
        if let Ok(mut guard) = self.time.lock() {
            *guard = time;
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.time.lock().map_or_else(|e| *e.into_inner(), |t| *t)
    }
}

// ============================================================================
// InMemoryShardStore
// ============================================================================

struct CampaignShards {
    meta: ShardMeta,
    shards: Vec<BitmapShard>,
}

/// In-memory shard store with mutex-serialized CAS semantics.
#[derive(Default)]
pub struct InMemoryShardStore {
    campaigns: Mutex<HashMap<CampaignId, CampaignShards>>,
}

impl InMemoryShardStore {
    /// Creates an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<CampaignId, CampaignShards>>, StoreError> {
        self.campaigns
            .lock()
            .map_err(|_| StoreError::Database("shard store lock poisoned".to_string()))
    }
}

impl ShardStore for InMemoryShardStore {
    fn ensure_initialized(
        &self,
        campaign_id: CampaignId,
        total_numbers: u32,
        shard_size: u32,
    ) -> StoreFuture<'_, InitOutcome> {
        let result = (|| {
            let mut campaigns = self.lock()?;
            if campaigns.contains_key(&campaign_id) {
                return Ok(InitOutcome::AlreadyInitialized);
            }
            let meta = ShardMeta::new(campaign_id, total_numbers, shard_size);
            let shards = (0..meta.shard_count)
                .map(|i| {
                    let index = ShardIndex::new(i);
                    let (start, len) = shard_bounds(index, shard_size, total_numbers);
                    BitmapShard::new_available(index, start, len)
                })
                .collect();
            let shard_count = meta.shard_count;
            campaigns.insert(campaign_id, CampaignShards { meta, shards });
            Ok(InitOutcome::Created { shard_count })
        })();
        Box::pin(async move { result })
    }

    fn meta(&self, campaign_id: CampaignId) -> StoreFuture<'_, Option<ShardMeta>> {
        let result = self
            .lock()
            .map(|campaigns| campaigns.get(&campaign_id).map(|c| c.meta));
        Box::pin(async move { result })
    }

    fn try_transition(
        &self,
        campaign_id: CampaignId,
        number: TicketNumber,
        from: TicketState,
        to: TicketState,
    ) -> StoreFuture<'_, bool> {
        let result = (|| {
            let mut campaigns = self.lock()?;
            let campaign = campaigns
                .get_mut(&campaign_id)
                .ok_or(StoreError::CampaignNotFound(campaign_id))?;
            if !campaign.meta.contains(number) {
                return Err(StoreError::OutOfRange {
                    campaign_id,
                    number,
                });
            }
            let index = shard_for(number, campaign.meta.shard_size);
            let shard = campaign
                .shards
                .get_mut(index.value() as usize)
                .ok_or(StoreError::ShardNotFound {
                    campaign_id,
                    shard_index: index,
                })?;
            let flipped = shard.try_set_state(number, from, to)?;
            if flipped {
                // The aggregate moves in the same critical section as the
                // shard counters, matching the durable adapters' transaction.
                if from == TicketState::Available {
                    campaign.meta.total_available -= 1;
                }
                if to == TicketState::Available {
                    campaign.meta.total_available += 1;
                }
            }
            Ok(flipped)
        })();
        Box::pin(async move { result })
    }

    fn shard_availability(&self, campaign_id: CampaignId) -> StoreFuture<'_, Vec<ShardAvailability>> {
        let result = (|| {
            let campaigns = self.lock()?;
            let campaign = campaigns
                .get(&campaign_id)
                .ok_or(StoreError::CampaignNotFound(campaign_id))?;
            Ok(campaign
                .shards
                .iter()
                .map(|shard| ShardAvailability {
                    shard_index: shard.index(),
                    available: shard.count_available(),
                })
                .collect())
        })();
        Box::pin(async move { result })
    }

    fn load_shard(
        &self,
        campaign_id: CampaignId,
        shard_index: ShardIndex,
    ) -> StoreFuture<'_, BitmapShard> {
        let result = (|| {
            let campaigns = self.lock()?;
            let campaign = campaigns
                .get(&campaign_id)
                .ok_or(StoreError::CampaignNotFound(campaign_id))?;
            campaign
                .shards
                .get(shard_index.value() as usize)
                .cloned()
                .ok_or(StoreError::ShardNotFound {
                    campaign_id,
                    shard_index,
                })
        })();
        Box::pin(async move { result })
    }

    fn counts(&self, campaign_id: CampaignId) -> StoreFuture<'_, StateCounts> {
        let result = (|| {
            let campaigns = self.lock()?;
            let campaign = campaigns
                .get(&campaign_id)
                .ok_or(StoreError::CampaignNotFound(campaign_id))?;
            Ok(campaign.shards.iter().fold(StateCounts::default(), |acc, shard| {
                let counts = shard.counts();
                StateCounts {
                    available: acc.available + counts.available,
                    reserved: acc.reserved + counts.reserved,
                    sold: acc.sold + counts.sold,
                }
            }))
        })();
        Box::pin(async move { result })
    }
}

// ============================================================================
// InMemoryReservationStore
// ============================================================================

/// In-memory reservation ledger with mutex-serialized status transitions.
#[derive(Default)]
pub struct InMemoryReservationStore {
    reservations: Mutex<HashMap<ReservationId, Reservation>>,
}

impl InMemoryReservationStore {
    /// Creates an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<ReservationId, Reservation>>, StoreError> {
        self.reservations
            .lock()
            .map_err(|_| StoreError::Database("reservation store lock poisoned".to_string()))
    }
}

impl ReservationStore for InMemoryReservationStore {
    fn create(&self, reservation: Reservation) -> StoreFuture<'_, ()> {
        let result = (|| {
            let mut reservations = self.lock()?;
            if reservations.contains_key(&reservation.id) {
                return Err(StoreError::Database(format!(
                    "duplicate reservation id {}",
                    reservation.id
                )));
            }
            reservations.insert(reservation.id, reservation);
            Ok(())
        })();
        Box::pin(async move { result })
    }

    fn get(&self, id: ReservationId) -> StoreFuture<'_, Option<Reservation>> {
        let result = self.lock().map(|reservations| reservations.get(&id).cloned());
        Box::pin(async move { result })
    }

    fn try_transition(
        &self,
        id: ReservationId,
        from: ReservationStatus,
        to: ReservationStatus,
    ) -> StoreFuture<'_, bool> {
        let result = (|| {
            let mut reservations = self.lock()?;
            match reservations.get_mut(&id) {
                Some(reservation) if reservation.status == from => {
                    reservation.status = to;
                    Ok(true)
                }
                _ => Ok(false),
            }
        })();
        Box::pin(async move { result })
    }

    fn find_expiring(&self, before: DateTime<Utc>, limit: u32) -> StoreFuture<'_, Vec<Reservation>> {
        let result = (|| {
            let reservations = self.lock()?;
            let mut expiring: Vec<Reservation> = reservations
                .values()
                .filter(|r| r.status == ReservationStatus::Active && r.expires_at < before)
                .cloned()
                .collect();
            expiring.sort_by_key(|r| r.expires_at);
            expiring.truncate(limit as usize);
            Ok(expiring)
        })();
        Box::pin(async move { result })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use raffle_alloc_core::HolderId;

    fn block_on<F: std::future::Future>(future: F) -> F::Output {
        // The mocks complete eagerly; a trivial poll suffices.
        use std::task::{Context, Poll, Waker};

        let mut context = Context::from_waker(Waker::noop());
        let mut future = std::pin::pin!(future);
        match future.as_mut().poll(&mut context) {
            Poll::Ready(output) => output,
            Poll::Pending => unreachable!("mock store futures are always ready"),
        }
    }

    #[test]
    fn initialization_is_idempotent() {
        let store = InMemoryShardStore::new();
        let campaign = CampaignId::new();

        let first = block_on(store.ensure_initialized(campaign, 2500, 1000)).unwrap();
        assert_eq!(first, InitOutcome::Created { shard_count: 3 });

        let second = block_on(store.ensure_initialized(campaign, 2500, 1000)).unwrap();
        assert_eq!(second, InitOutcome::AlreadyInitialized);
    }

    #[test]
    fn transition_adjusts_aggregate_availability() {
        let store = InMemoryShardStore::new();
        let campaign = CampaignId::new();
        block_on(store.ensure_initialized(campaign, 100, 10)).unwrap();

        let flipped = block_on(store.try_transition(
            campaign,
            TicketNumber::new(42),
            TicketState::Available,
            TicketState::Reserved,
        ))
        .unwrap();
        assert!(flipped);

        let meta = block_on(store.meta(campaign)).unwrap().unwrap();
        assert_eq!(meta.total_available, 99);

        let counts = block_on(store.counts(campaign)).unwrap();
        assert_eq!(counts.available, 99);
        assert_eq!(counts.reserved, 1);
        assert_eq!(counts.total(), 100);
    }

    #[test]
    fn reservation_transitions_are_guarded() {
        let store = InMemoryReservationStore::new();
        let now = Utc::now();
        let reservation = Reservation::new(
            CampaignId::new(),
            HolderId::new(),
            vec![TicketNumber::new(1)],
            now,
            now + Duration::minutes(15),
        );
        let id = reservation.id;
        block_on(store.create(reservation)).unwrap();

        assert!(block_on(store.try_transition(
            id,
            ReservationStatus::Active,
            ReservationStatus::Confirmed
        ))
        .unwrap());
        // Already confirmed: a second claim loses.
        assert!(!block_on(store.try_transition(
            id,
            ReservationStatus::Active,
            ReservationStatus::Confirmed
        ))
        .unwrap());
    }

    #[test]
    fn find_expiring_only_returns_stale_active_holds() {
        let store = InMemoryReservationStore::new();
        let now = Utc::now();

        let stale = Reservation::new(
            CampaignId::new(),
            HolderId::new(),
            vec![TicketNumber::new(1)],
            now - Duration::minutes(30),
            now - Duration::minutes(15),
        );
        let fresh = Reservation::new(
            CampaignId::new(),
            HolderId::new(),
            vec![TicketNumber::new(2)],
            now,
            now + Duration::minutes(15),
        );
        let stale_id = stale.id;
        block_on(store.create(stale)).unwrap();
        block_on(store.create(fresh)).unwrap();

        let expiring = block_on(store.find_expiring(now, 10)).unwrap();
        assert_eq!(expiring.len(), 1);
        assert_eq!(expiring[0].id, stale_id);
    }
}
