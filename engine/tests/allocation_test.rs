//! End-to-end allocation flows against the in-memory stores.

#![allow(clippy::unwrap_used)]

use chrono::Duration;
use raffle_alloc_core::{
    AllocationError, CampaignId, HolderId, InitOutcome, ReservationStatus, ShardStore,
    TicketNumber,
};
use raffle_alloc_engine::{AllocationEngine, EngineConfig, InitMode, StatsAggregator};
use raffle_alloc_testing::{FixedClock, InMemoryReservationStore, InMemoryShardStore};
use std::sync::Arc;

struct Harness {
    engine: AllocationEngine,
    shards: Arc<InMemoryShardStore>,
    clock: Arc<FixedClock>,
    campaign: CampaignId,
}

async fn harness(total_numbers: u32, shard_size: u32) -> Harness {
    let shards = Arc::new(InMemoryShardStore::new());
    let clock = Arc::new(FixedClock::at_test_epoch());
    let engine = AllocationEngine::new(
        shards.clone(),
        Arc::new(InMemoryReservationStore::new()),
        clock.clone(),
        EngineConfig::default(),
    );
    let campaign = CampaignId::new();
    engine
        .ensure_initialized(campaign, total_numbers, shard_size, InitMode::Strict)
        .await
        .unwrap();
    Harness {
        engine,
        shards,
        clock,
        campaign,
    }
}

fn numbers(values: &[u32]) -> Vec<TicketNumber> {
    values.iter().copied().map(TicketNumber::new).collect()
}

#[tokio::test]
async fn explicit_reservation_holds_the_requested_numbers() {
    let h = harness(100, 10).await;
    let holder = HolderId::new();

    let reservation = h
        .engine
        .reserve_explicit(h.campaign, holder, &numbers(&[5, 15, 99]))
        .await
        .unwrap();

    assert_eq!(reservation.status, ReservationStatus::Active);
    assert_eq!(reservation.numbers, numbers(&[5, 15, 99]));
    assert_eq!(reservation.holder_id, holder);
    assert_eq!(
        reservation.expires_at - reservation.created_at,
        Duration::minutes(15)
    );

    let counts = h.shards.counts(h.campaign).await.unwrap();
    assert_eq!(counts.reserved, 3);
    assert_eq!(counts.available, 97);
}

#[tokio::test]
async fn explicit_reservation_is_all_or_nothing() {
    let h = harness(100, 10).await;

    h.engine
        .reserve_explicit(h.campaign, HolderId::new(), &numbers(&[6]))
        .await
        .unwrap();

    // 6 is taken; the whole [5, 6, 7] request must fail and hold nothing.
    let error = h
        .engine
        .reserve_explicit(h.campaign, HolderId::new(), &numbers(&[5, 6, 7]))
        .await
        .unwrap_err();
    match error {
        AllocationError::NumbersUnavailable { conflicting } => {
            assert_eq!(conflicting, numbers(&[6]));
        }
        other => panic!("expected NumbersUnavailable, got {other}"),
    }

    let counts = h.shards.counts(h.campaign).await.unwrap();
    assert_eq!(counts.reserved, 1);
    assert_eq!(counts.available, 99);
}

#[tokio::test]
async fn explicit_conflict_lists_every_contested_number() {
    let h = harness(100, 10).await;

    h.engine
        .reserve_explicit(h.campaign, HolderId::new(), &numbers(&[10, 20, 30]))
        .await
        .unwrap();

    let error = h
        .engine
        .reserve_explicit(h.campaign, HolderId::new(), &numbers(&[10, 15, 20, 25, 30]))
        .await
        .unwrap_err();
    match error {
        AllocationError::NumbersUnavailable { conflicting } => {
            assert_eq!(conflicting, numbers(&[10, 20, 30]));
        }
        other => panic!("expected NumbersUnavailable, got {other}"),
    }
}

#[tokio::test]
async fn random_reservation_can_drain_the_campaign() {
    let h = harness(10, 4).await;

    let reservation = h
        .engine
        .reserve_random(h.campaign, HolderId::new(), 10)
        .await
        .unwrap();

    let mut held = reservation.numbers.clone();
    held.sort();
    held.dedup();
    assert_eq!(held.len(), 10);

    let counts = h.shards.counts(h.campaign).await.unwrap();
    assert_eq!(counts.available, 0);
    assert_eq!(counts.reserved, 10);
}

#[tokio::test]
async fn random_reservation_fails_fast_when_short() {
    let h = harness(10, 4).await;

    h.engine
        .reserve_explicit(h.campaign, HolderId::new(), &numbers(&[3]))
        .await
        .unwrap();

    let error = h
        .engine
        .reserve_random(h.campaign, HolderId::new(), 10)
        .await
        .unwrap_err();
    match error {
        AllocationError::InsufficientAvailability {
            requested,
            available,
        } => {
            assert_eq!(requested, 10);
            assert_eq!(available, 9);
        }
        other => panic!("expected InsufficientAvailability, got {other}"),
    }

    // The failed request must not strand any holds.
    let counts = h.shards.counts(h.campaign).await.unwrap();
    assert_eq!(counts.reserved, 1);
    assert_eq!(counts.available, 9);
}

#[tokio::test]
async fn confirm_marks_numbers_sold() {
    let h = harness(100, 10).await;

    let reservation = h
        .engine
        .reserve_explicit(h.campaign, HolderId::new(), &numbers(&[1, 2]))
        .await
        .unwrap();
    let confirmed = h.engine.confirm(reservation.id).await.unwrap();
    assert_eq!(confirmed.status, ReservationStatus::Confirmed);

    let counts = h.shards.counts(h.campaign).await.unwrap();
    assert_eq!(counts.sold, 2);
    assert_eq!(counts.reserved, 0);

    // Sold numbers are gone for good.
    let error = h
        .engine
        .reserve_explicit(h.campaign, HolderId::new(), &numbers(&[1]))
        .await
        .unwrap_err();
    assert!(matches!(error, AllocationError::NumbersUnavailable { .. }));
}

#[tokio::test]
async fn double_confirm_is_rejected() {
    let h = harness(100, 10).await;

    let reservation = h
        .engine
        .reserve_explicit(h.campaign, HolderId::new(), &numbers(&[1]))
        .await
        .unwrap();
    h.engine.confirm(reservation.id).await.unwrap();

    let error = h.engine.confirm(reservation.id).await.unwrap_err();
    assert!(matches!(
        error,
        AllocationError::InvalidStateTransition {
            current: ReservationStatus::Confirmed,
            ..
        }
    ));
}

#[tokio::test]
async fn release_returns_numbers_and_is_idempotent() {
    let h = harness(100, 10).await;

    let reservation = h
        .engine
        .reserve_explicit(h.campaign, HolderId::new(), &numbers(&[7, 8]))
        .await
        .unwrap();

    assert!(h.engine.release(reservation.id).await.unwrap());
    let counts = h.shards.counts(h.campaign).await.unwrap();
    assert_eq!(counts.available, 100);

    // A second release is a no-op, not an error.
    assert!(!h.engine.release(reservation.id).await.unwrap());
    let counts = h.shards.counts(h.campaign).await.unwrap();
    assert_eq!(counts.available, 100);
}

#[tokio::test]
async fn sweep_expires_lapsed_reservations() {
    let h = harness(100, 10).await;

    let reservation = h
        .engine
        .reserve_explicit(h.campaign, HolderId::new(), &numbers(&[40, 41]))
        .await
        .unwrap();

    // Still fresh: nothing to sweep.
    assert_eq!(h.engine.sweep_expired().await.unwrap(), 0);

    h.clock.advance(Duration::minutes(16));
    assert_eq!(h.engine.sweep_expired().await.unwrap(), 1);

    let counts = h.shards.counts(h.campaign).await.unwrap();
    assert_eq!(counts.available, 100);

    let swept = h.engine.ledger().require(reservation.id).await.unwrap();
    assert_eq!(swept.status, ReservationStatus::Expired);

    // Another pass finds nothing.
    assert_eq!(h.engine.sweep_expired().await.unwrap(), 0);
}

#[tokio::test]
async fn confirm_after_expiry_is_rejected() {
    let h = harness(100, 10).await;

    let reservation = h
        .engine
        .reserve_explicit(h.campaign, HolderId::new(), &numbers(&[12]))
        .await
        .unwrap();
    h.clock.advance(Duration::minutes(16));
    h.engine.sweep_expired().await.unwrap();

    let error = h.engine.confirm(reservation.id).await.unwrap_err();
    assert!(matches!(error, AllocationError::ReservationExpired(_)));

    // The number went back to the pool and can be re-reserved.
    h.engine
        .reserve_explicit(h.campaign, HolderId::new(), &numbers(&[12]))
        .await
        .unwrap();
}

#[tokio::test]
async fn strict_initialization_rejects_existing_campaign() {
    let h = harness(100, 10).await;

    let error = h
        .engine
        .ensure_initialized(h.campaign, 100, 10, InitMode::Strict)
        .await
        .unwrap_err();
    assert!(matches!(error, AllocationError::AlreadyInitialized(_)));

    let outcome = h
        .engine
        .ensure_initialized(h.campaign, 100, 10, InitMode::Idempotent)
        .await
        .unwrap();
    assert_eq!(outcome, InitOutcome::AlreadyInitialized);
}

#[tokio::test]
async fn requests_are_validated_before_touching_state() {
    let h = harness(100, 10).await;
    let holder = HolderId::new();

    let error = h
        .engine
        .reserve_explicit(h.campaign, holder, &numbers(&[100]))
        .await
        .unwrap_err();
    assert!(matches!(error, AllocationError::OutOfRange { .. }));

    let error = h
        .engine
        .reserve_explicit(h.campaign, holder, &[])
        .await
        .unwrap_err();
    assert!(matches!(error, AllocationError::InvalidRequest(_)));

    let error = h
        .engine
        .reserve_random(h.campaign, holder, 0)
        .await
        .unwrap_err();
    assert!(matches!(error, AllocationError::InvalidRequest(_)));

    let error = h
        .engine
        .reserve_random(CampaignId::new(), holder, 1)
        .await
        .unwrap_err();
    assert!(matches!(error, AllocationError::CampaignNotFound(_)));

    let counts = h.shards.counts(h.campaign).await.unwrap();
    assert_eq!(counts.available, 100);
}

#[tokio::test]
async fn stats_track_the_full_lifecycle() {
    let h = harness(200, 64).await;
    let stats = StatsAggregator::new(h.shards.clone());

    let to_confirm = h
        .engine
        .reserve_explicit(h.campaign, HolderId::new(), &numbers(&[0, 1, 2, 3]))
        .await
        .unwrap();
    h.engine
        .reserve_random(h.campaign, HolderId::new(), 6)
        .await
        .unwrap();
    h.engine.confirm(to_confirm.id).await.unwrap();

    let snapshot = stats.campaign_stats(h.campaign).await.unwrap();
    assert_eq!(snapshot.total, 200);
    assert_eq!(snapshot.sold, 4);
    assert_eq!(snapshot.reserved, 6);
    assert_eq!(snapshot.available, 190);
    assert_eq!(snapshot.percent_available, 95);
    assert_eq!(snapshot.percent_complete, 2);

    let error = stats.campaign_stats(CampaignId::new()).await.unwrap_err();
    assert!(matches!(error, AllocationError::CampaignNotFound(_)));
}
