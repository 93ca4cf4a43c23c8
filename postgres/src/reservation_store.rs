//! `PostgreSQL` reservation ledger.
//!
//! Status transitions are conditional updates on the stored status
//! string, giving the same one-winner semantics as the shard store's
//! bit-level compare-and-swap.

use crate::schema::database_error;
use chrono::{DateTime, Utc};
use raffle_alloc_core::{
    CampaignId, HolderId, Reservation, ReservationId, ReservationStatus, ReservationStore,
    StoreError, StoreFuture, TicketNumber,
};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

/// Reservation store backed by the `reservations` table.
#[derive(Clone)]
pub struct PostgresReservationStore {
    pool: PgPool,
}

impl PostgresReservationStore {
    /// Creates a store over an existing pool
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert(&self, reservation: Reservation) -> Result<(), StoreError> {
        let numbers: Vec<i64> = reservation
            .numbers
            .iter()
            .map(|n| i64::from(n.value()))
            .collect();
        sqlx::query(
            r"
            INSERT INTO reservations
                (reservation_id, campaign_id, holder_id, numbers, status,
                 created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ",
        )
        .bind(*reservation.id.as_uuid())
        .bind(*reservation.campaign_id.as_uuid())
        .bind(*reservation.holder_id.as_uuid())
        .bind(numbers)
        .bind(reservation.status.as_str())
        .bind(reservation.created_at)
        .bind(reservation.expires_at)
        .execute(&self.pool)
        .await
        .map_err(database_error)?;
        Ok(())
    }

    async fn fetch(&self, id: ReservationId) -> Result<Option<Reservation>, StoreError> {
        let row = sqlx::query(
            r"
            SELECT reservation_id, campaign_id, holder_id, numbers, status,
                   created_at, expires_at
            FROM reservations
            WHERE reservation_id = $1
            ",
        )
        .bind(*id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(database_error)?;
        row.map(|row| reservation_from_row(&row)).transpose()
    }

    async fn transition(
        &self,
        id: ReservationId,
        from: ReservationStatus,
        to: ReservationStatus,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r"
            UPDATE reservations
            SET status = $3
            WHERE reservation_id = $1 AND status = $2
            ",
        )
        .bind(*id.as_uuid())
        .bind(from.as_str())
        .bind(to.as_str())
        .execute(&self.pool)
        .await
        .map_err(database_error)?;
        Ok(result.rows_affected() == 1)
    }

    async fn expiring(
        &self,
        before: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Reservation>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT reservation_id, campaign_id, holder_id, numbers, status,
                   created_at, expires_at
            FROM reservations
            WHERE status = $1 AND expires_at < $2
            ORDER BY expires_at
            LIMIT $3
            ",
        )
        .bind(ReservationStatus::Active.as_str())
        .bind(before)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(database_error)?;
        rows.iter().map(reservation_from_row).collect()
    }
}

impl ReservationStore for PostgresReservationStore {
    fn create(&self, reservation: Reservation) -> StoreFuture<'_, ()> {
        Box::pin(self.insert(reservation))
    }

    fn get(&self, id: ReservationId) -> StoreFuture<'_, Option<Reservation>> {
        Box::pin(self.fetch(id))
    }

    fn try_transition(
        &self,
        id: ReservationId,
        from: ReservationStatus,
        to: ReservationStatus,
    ) -> StoreFuture<'_, bool> {
        Box::pin(self.transition(id, from, to))
    }

    fn find_expiring(&self, before: DateTime<Utc>, limit: u32) -> StoreFuture<'_, Vec<Reservation>> {
        Box::pin(self.expiring(before, limit))
    }
}

fn reservation_from_row(row: &PgRow) -> Result<Reservation, StoreError> {
    let status_text: String = row.try_get("status").map_err(database_error)?;
    let status = ReservationStatus::parse(&status_text).ok_or_else(|| {
        StoreError::Database(format!("unknown reservation status: {status_text}"))
    })?;
    let raw_numbers: Vec<i64> = row.try_get("numbers").map_err(database_error)?;
    let numbers = raw_numbers
        .into_iter()
        .map(|n| {
            u32::try_from(n)
                .map(TicketNumber::new)
                .map_err(|_| StoreError::Database(format!("stored number out of range: {n}")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Reservation {
        id: ReservationId::from_uuid(row.try_get("reservation_id").map_err(database_error)?),
        campaign_id: CampaignId::from_uuid(row.try_get("campaign_id").map_err(database_error)?),
        holder_id: HolderId::from_uuid(row.try_get("holder_id").map_err(database_error)?),
        numbers,
        status,
        created_at: row.try_get("created_at").map_err(database_error)?,
        expires_at: row.try_get("expires_at").map_err(database_error)?,
    })
}
