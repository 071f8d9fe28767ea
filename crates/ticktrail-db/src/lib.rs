//! `PostgreSQL` graph store for the ticktrail ingestion pipeline.
//!
//! Nodes live in five tables (`frames`, `events`, `actors`, `subsectors`,
//! `states`). Chronological chains are a nullable previous-key column on
//! the later row, and each actor row carries its current and initial state
//! counters.
//!
//! # Modules
//!
//! - [`postgres`] -- Connection pool, configuration, and migrations
//! - [`graph_store`] -- [`PgGraphStore`], the [`StoreGateway`] implementation
//! - [`error`] -- [`DbError`] and its retry classification
//!
//! [`StoreGateway`]: ticktrail_core::gateway::StoreGateway

mod chains;
pub mod error;
pub mod graph_store;
pub mod postgres;

pub use error::DbError;
pub use graph_store::{ActorPointers, PgGraphStore};
pub use postgres::{PostgresConfig, PostgresPool};

/// Keys are stored as `BIGINT`, so values past `i64::MAX` are refused.
pub(crate) fn to_db(value: u64) -> Result<i64, DbError> {
    let Ok(key) = i64::try_from(value) else {
        return Err(DbError::KeyOutOfRange(value));
    };
    Ok(key)
}

/// [`to_db`] over a sequence of keys.
pub(crate) fn keys_to_db(values: impl IntoIterator<Item = u64>) -> Result<Vec<i64>, DbError> {
    values.into_iter().map(to_db).collect()
}

/// Negative values never come from this crate and read back as zero.
pub(crate) fn from_db(value: i64) -> u64 {
    u64::try_from(value).unwrap_or_default()
}
