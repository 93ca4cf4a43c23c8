//! `PostgreSQL` storage adapters for the raffle allocation engine.
//!
//! Implements the `ShardStore` and `ReservationStore` traits from
//! `raffle-alloc-core` on top of sqlx. The shard compare-and-swap runs
//! server-side as a single conditional `UPDATE`, so any number of engine
//! instances can share one database without coordination.
//!
//! # Example
//!
//! ```ignore
//! use raffle_alloc_postgres::{PostgresConfig, PostgresShardStore, initialize_schema};
//!
//! let pool = PostgresConfig::from_env()?.connect().await?;
//! initialize_schema(&pool).await?;
//! let shards = PostgresShardStore::new(pool);
//! ```

pub mod config;
pub mod reservation_store;
pub mod schema;
pub mod shard_store;

pub use config::PostgresConfig;
pub use reservation_store::PostgresReservationStore;
pub use schema::initialize_schema;
pub use shard_store::PostgresShardStore;
