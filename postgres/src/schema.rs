//! Schema setup for the shard and reservation tables.

use raffle_alloc_core::StoreError;
use sqlx::PgPool;

/// Create the allocation tables and indexes if they do not exist.
///
/// Idempotent; safe to run on every startup.
///
/// # Errors
///
/// Returns `StoreError::Database` when a DDL statement fails.
pub async fn initialize_schema(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS campaign_shard_meta (
            campaign_id UUID PRIMARY KEY,
            shard_size BIGINT NOT NULL,
            shard_count BIGINT NOT NULL,
            total_numbers BIGINT NOT NULL,
            total_available BIGINT NOT NULL
        )
        ",
    )
    .execute(pool)
    .await
    .map_err(database_error)?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS campaign_shards (
            campaign_id UUID NOT NULL REFERENCES campaign_shard_meta(campaign_id),
            shard_index BIGINT NOT NULL,
            start_number BIGINT NOT NULL,
            shard_len BIGINT NOT NULL,
            states BYTEA NOT NULL,
            available_count BIGINT NOT NULL,
            reserved_count BIGINT NOT NULL,
            sold_count BIGINT NOT NULL,
            PRIMARY KEY (campaign_id, shard_index)
        )
        ",
    )
    .execute(pool)
    .await
    .map_err(database_error)?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS reservations (
            reservation_id UUID PRIMARY KEY,
            campaign_id UUID NOT NULL,
            holder_id UUID NOT NULL,
            numbers BIGINT[] NOT NULL,
            status TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            expires_at TIMESTAMPTZ NOT NULL
        )
        ",
    )
    .execute(pool)
    .await
    .map_err(database_error)?;

    // The sweep query filters on status and orders by expiry.
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_reservations_status_expiry
         ON reservations(status, expires_at)",
    )
    .execute(pool)
    .await
    .map_err(database_error)?;

    Ok(())
}

pub(crate) fn database_error(error: sqlx::Error) -> StoreError {
    StoreError::Database(error.to_string())
}
