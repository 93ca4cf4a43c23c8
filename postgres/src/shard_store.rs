//! `PostgreSQL` shard store with server-side conditional updates.
//!
//! The packed two-bit layout is shared with
//! [`raffle_alloc_core::encoding`]; the byte index, shift and mask are
//! computed in Rust and the compare-and-swap runs inside Postgres with
//! `get_byte`/`set_byte`, so the state check and the bit write are one
//! atomic statement. Shard counters and the campaign aggregate move in
//! the same statement through a data-modifying CTE.

use crate::schema::database_error;
use metrics::counter;
use raffle_alloc_core::{
    BitmapShard, CampaignId, InitOutcome, ShardAvailability, ShardIndex, ShardMeta, ShardStore,
    StateCounts, StoreError, StoreFuture, TicketNumber, TicketState, encoding, shard_bounds,
    shard_for,
};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, info};

const CAS_CONFLICTS_TOTAL: &str = "raffle_shard_cas_conflicts_total";

/// Shard store backed by the `campaign_shards` and `campaign_shard_meta`
/// tables.
#[derive(Clone)]
pub struct PostgresShardStore {
    pool: PgPool,
}

impl PostgresShardStore {
    /// Creates a store over an existing pool
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying connection pool
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn init(
        &self,
        campaign_id: CampaignId,
        total_numbers: u32,
        shard_size: u32,
    ) -> Result<InitOutcome, StoreError> {
        let meta = ShardMeta::new(campaign_id, total_numbers, shard_size);
        let mut tx = self.pool.begin().await.map_err(database_error)?;

        let inserted = sqlx::query(
            r"
            INSERT INTO campaign_shard_meta
                (campaign_id, shard_size, shard_count, total_numbers, total_available)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (campaign_id) DO NOTHING
            ",
        )
        .bind(*campaign_id.as_uuid())
        .bind(i64::from(meta.shard_size))
        .bind(i64::from(meta.shard_count))
        .bind(i64::from(meta.total_numbers))
        .bind(i64::from(meta.total_numbers))
        .execute(&mut *tx)
        .await
        .map_err(database_error)?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await.map_err(database_error)?;
            return Ok(InitOutcome::AlreadyInitialized);
        }

        for index in 0..meta.shard_count {
            let shard_index = ShardIndex::new(index);
            let (start, len) = shard_bounds(shard_index, shard_size, total_numbers);
            sqlx::query(
                r"
                INSERT INTO campaign_shards
                    (campaign_id, shard_index, start_number, shard_len, states,
                     available_count, reserved_count, sold_count)
                VALUES ($1, $2, $3, $4, $5, $6, 0, 0)
                ",
            )
            .bind(*campaign_id.as_uuid())
            .bind(i64::from(index))
            .bind(i64::from(start))
            .bind(i64::from(len))
            .bind(vec![0u8; encoding::packed_len(len)])
            .bind(i64::from(len))
            .execute(&mut *tx)
            .await
            .map_err(database_error)?;
        }

        tx.commit().await.map_err(database_error)?;
        info!(%campaign_id, total_numbers, shard_count = meta.shard_count, "campaign shards created");
        Ok(InitOutcome::Created {
            shard_count: meta.shard_count,
        })
    }

    async fn fetch_meta(&self, campaign_id: CampaignId) -> Result<Option<ShardMeta>, StoreError> {
        let row = sqlx::query(
            r"
            SELECT shard_size, shard_count, total_numbers, total_available
            FROM campaign_shard_meta
            WHERE campaign_id = $1
            ",
        )
        .bind(*campaign_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(database_error)?;

        row.map(|row| {
            Ok(ShardMeta {
                campaign_id,
                shard_size: column_u32(&row, "shard_size")?,
                shard_count: column_u32(&row, "shard_count")?,
                total_numbers: column_u32(&row, "total_numbers")?,
                total_available: column_u64(&row, "total_available")?,
            })
        })
        .transpose()
    }

    async fn transition(
        &self,
        campaign_id: CampaignId,
        number: TicketNumber,
        from: TicketState,
        to: TicketState,
    ) -> Result<bool, StoreError> {
        let meta = self
            .fetch_meta(campaign_id)
            .await?
            .ok_or(StoreError::CampaignNotFound(campaign_id))?;
        if !meta.contains(number) {
            return Err(StoreError::OutOfRange {
                campaign_id,
                number,
            });
        }

        let shard_index = shard_for(number, meta.shard_size);
        let (start, _) = shard_bounds(shard_index, meta.shard_size, meta.total_numbers);
        let offset = number.value() - start;

        // The WHERE clause re-checks the current two bits inside the
        // statement; the bit write, the shard counters and the campaign
        // aggregate all commit together or the statement matches nothing.
        let result = sqlx::query(
            r"
            WITH flipped AS (
                UPDATE campaign_shards
                SET states = set_byte(states, $3, (get_byte(states, $3) & $4) | $5),
                    available_count = available_count + $6,
                    reserved_count = reserved_count + $7,
                    sold_count = sold_count + $8
                WHERE campaign_id = $1
                  AND shard_index = $2
                  AND (get_byte(states, $3) >> $9) & 3 = $10
                RETURNING shard_index
            )
            UPDATE campaign_shard_meta
            SET total_available = total_available + $6
            WHERE campaign_id = $1
              AND EXISTS (SELECT 1 FROM flipped)
            ",
        )
        .bind(*campaign_id.as_uuid())
        .bind(i64::from(shard_index.value()))
        .bind(byte_position(offset))
        .bind(i32::from(!encoding::mask(offset)))
        .bind(i32::from(to.bits() << encoding::shift(offset)))
        .bind(state_delta(TicketState::Available, from, to))
        .bind(state_delta(TicketState::Reserved, from, to))
        .bind(state_delta(TicketState::Sold, from, to))
        .bind(i32::try_from(encoding::shift(offset)).unwrap_or(0))
        .bind(i32::from(from.bits()))
        .execute(&self.pool)
        .await
        .map_err(database_error)?;

        let flipped = result.rows_affected() == 1;
        if !flipped {
            counter!(CAS_CONFLICTS_TOTAL).increment(1);
            debug!(%campaign_id, %number, %from, %to, "conditional update matched nothing");
        }
        Ok(flipped)
    }

    async fn availability(
        &self,
        campaign_id: CampaignId,
    ) -> Result<Vec<ShardAvailability>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT shard_index, available_count
            FROM campaign_shards
            WHERE campaign_id = $1
            ORDER BY shard_index
            ",
        )
        .bind(*campaign_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(database_error)?;

        if rows.is_empty() {
            return Err(StoreError::CampaignNotFound(campaign_id));
        }
        rows.iter()
            .map(|row| {
                Ok(ShardAvailability {
                    shard_index: ShardIndex::new(column_u32(row, "shard_index")?),
                    available: column_u32(row, "available_count")?,
                })
            })
            .collect()
    }

    async fn fetch_shard(
        &self,
        campaign_id: CampaignId,
        shard_index: ShardIndex,
    ) -> Result<BitmapShard, StoreError> {
        let row = sqlx::query(
            r"
            SELECT start_number, shard_len, states,
                   available_count, reserved_count, sold_count
            FROM campaign_shards
            WHERE campaign_id = $1 AND shard_index = $2
            ",
        )
        .bind(*campaign_id.as_uuid())
        .bind(i64::from(shard_index.value()))
        .fetch_optional(&self.pool)
        .await
        .map_err(database_error)?
        .ok_or(StoreError::ShardNotFound {
            campaign_id,
            shard_index,
        })?;

        let states: Vec<u8> = row.try_get("states").map_err(database_error)?;
        let counts = StateCounts {
            available: column_u64(&row, "available_count")?,
            reserved: column_u64(&row, "reserved_count")?,
            sold: column_u64(&row, "sold_count")?,
        };
        BitmapShard::from_parts(
            shard_index,
            column_u32(&row, "start_number")?,
            column_u32(&row, "shard_len")?,
            states,
            counts,
        )
        .map_err(Into::into)
    }

    async fn aggregate_counts(&self, campaign_id: CampaignId) -> Result<StateCounts, StoreError> {
        let row = sqlx::query(
            r"
            SELECT COUNT(*) AS shard_rows,
                   COALESCE(SUM(available_count), 0)::BIGINT AS available,
                   COALESCE(SUM(reserved_count), 0)::BIGINT AS reserved,
                   COALESCE(SUM(sold_count), 0)::BIGINT AS sold
            FROM campaign_shards
            WHERE campaign_id = $1
            ",
        )
        .bind(*campaign_id.as_uuid())
        .fetch_one(&self.pool)
        .await
        .map_err(database_error)?;

        let shard_rows: i64 = row.try_get("shard_rows").map_err(database_error)?;
        if shard_rows == 0 {
            return Err(StoreError::CampaignNotFound(campaign_id));
        }
        Ok(StateCounts {
            available: column_u64(&row, "available")?,
            reserved: column_u64(&row, "reserved")?,
            sold: column_u64(&row, "sold")?,
        })
    }
}

impl ShardStore for PostgresShardStore {
    fn ensure_initialized(
        &self,
        campaign_id: CampaignId,
        total_numbers: u32,
        shard_size: u32,
    ) -> StoreFuture<'_, InitOutcome> {
        Box::pin(self.init(campaign_id, total_numbers, shard_size))
    }

    fn meta(&self, campaign_id: CampaignId) -> StoreFuture<'_, Option<ShardMeta>> {
        Box::pin(self.fetch_meta(campaign_id))
    }

    fn try_transition(
        &self,
        campaign_id: CampaignId,
        number: TicketNumber,
        from: TicketState,
        to: TicketState,
    ) -> StoreFuture<'_, bool> {
        Box::pin(self.transition(campaign_id, number, from, to))
    }

    fn shard_availability(&self, campaign_id: CampaignId) -> StoreFuture<'_, Vec<ShardAvailability>> {
        Box::pin(self.availability(campaign_id))
    }

    fn load_shard(
        &self,
        campaign_id: CampaignId,
        shard_index: ShardIndex,
    ) -> StoreFuture<'_, BitmapShard> {
        Box::pin(self.fetch_shard(campaign_id, shard_index))
    }

    fn counts(&self, campaign_id: CampaignId) -> StoreFuture<'_, StateCounts> {
        Box::pin(self.aggregate_counts(campaign_id))
    }
}

/// Signed count adjustment for one state caused by a `from → to` flip.
fn state_delta(state: TicketState, from: TicketState, to: TicketState) -> i64 {
    i64::from(to == state) - i64::from(from == state)
}

/// Shard-relative byte position as the `int` Postgres `get_byte` expects.
fn byte_position(offset: u32) -> i32 {
    i32::try_from(encoding::byte_index(offset)).unwrap_or(i32::MAX)
}

fn column_u32(row: &PgRow, name: &str) -> Result<u32, StoreError> {
    let value: i64 = row.try_get(name).map_err(database_error)?;
    u32::try_from(value)
        .map_err(|_| StoreError::CorruptShard(format!("column {name} out of range: {value}")))
}

fn column_u64(row: &PgRow, name: &str) -> Result<u64, StoreError> {
    let value: i64 = row.try_get(name).map_err(database_error)?;
    u64::try_from(value)
        .map_err(|_| StoreError::CorruptShard(format!("column {name} is negative: {value}")))
}
