//! Business metrics for the allocation engine.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `raffle_reservations_total{kind}` - Reservations created, by selection kind
//! - `raffle_reservation_conflicts_total` - Explicit reservations lost to a race
//! - `raffle_reservations_confirmed_total` - Holds confirmed as sold
//! - `raffle_reservations_released_total` - Holds released by cancellation
//! - `raffle_reservations_expired_total` - Holds released by the sweep
//! - `raffle_allocation_contention_total` - Random selections that exhausted their attempt budget
//! - `raffle_reconciliation_cases_total` - Partial confirms needing operator follow-up

use metrics::describe_counter;

pub(crate) const RESERVATIONS_TOTAL: &str = "raffle_reservations_total";
pub(crate) const RESERVATION_CONFLICTS_TOTAL: &str = "raffle_reservation_conflicts_total";
pub(crate) const RESERVATIONS_CONFIRMED_TOTAL: &str = "raffle_reservations_confirmed_total";
pub(crate) const RESERVATIONS_RELEASED_TOTAL: &str = "raffle_reservations_released_total";
pub(crate) const RESERVATIONS_EXPIRED_TOTAL: &str = "raffle_reservations_expired_total";
pub(crate) const CONTENTION_TOTAL: &str = "raffle_allocation_contention_total";
pub(crate) const RECONCILIATION_TOTAL: &str = "raffle_reconciliation_cases_total";

/// Register metric descriptions with the installed recorder.
///
/// Call once at application startup, before any metrics are recorded.
pub fn register_allocation_metrics() {
    describe_counter!(
        RESERVATIONS_TOTAL,
        "Total reservations created, labeled by selection kind (explicit, random)"
    );
    describe_counter!(
        RESERVATION_CONFLICTS_TOTAL,
        "Explicit reservation attempts that lost a race and were rolled back"
    );
    describe_counter!(
        RESERVATIONS_CONFIRMED_TOTAL,
        "Reservations confirmed as sold after payment"
    );
    describe_counter!(
        RESERVATIONS_RELEASED_TOTAL,
        "Reservations released by explicit cancellation"
    );
    describe_counter!(
        RESERVATIONS_EXPIRED_TOTAL,
        "Reservations released by the expiry sweep"
    );
    describe_counter!(
        CONTENTION_TOTAL,
        "Random selections that exhausted their attempt budget under contention"
    );
    describe_counter!(
        RECONCILIATION_TOTAL,
        "Partial confirms flagged for operator reconciliation"
    );
}
