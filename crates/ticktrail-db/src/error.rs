//! Error types for the `PostgreSQL` graph store.
//!
//! [`DbError`] wraps [`sqlx`] failures. The pipeline only sees
//! [`StoreError`], so the conversion decides what is worth retrying:
//! lost connections, pool exhaustion, serialization conflicts, and server
//! resource or shutdown conditions are transient; everything else is fatal.

use ticktrail_core::gateway::StoreError;

/// SQLSTATE classes and codes that a retry can clear.
///
/// `08` connection exception, `40` transaction rollback (serialization
/// failure, deadlock), `53` insufficient resources, `57P01`..`57P03`
/// server shutting down or starting up.
const TRANSIENT_SQLSTATE_PREFIXES: [&str; 4] = ["08", "40", "53", "57P0"];

/// Errors that can occur in the data layer.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// A `PostgreSQL` operation failed.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// A `PostgreSQL` migration failed.
    #[error("PostgreSQL migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A key that does not fit the signed `BIGINT` columns.
    #[error("key {0} exceeds the BIGINT range")]
    KeyOutOfRange(u64),
}

impl DbError {
    /// Whether repeating the failed call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Postgres(e) => is_transient_sqlx(e),
            Self::Migration(_) | Self::Config(_) | Self::KeyOutOfRange(_) => false,
        }
    }

    /// The SQLSTATE reported by the server, if any.
    pub fn sqlstate(&self) -> Option<String> {
        match self {
            Self::Postgres(sqlx::Error::Database(db)) => db.code().map(|code| code.into_owned()),
            _ => None,
        }
    }
}

fn is_transient_sqlx(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db) => db.code().is_some_and(|code| is_transient_sqlstate(&code)),
        _ => false,
    }
}

fn is_transient_sqlstate(code: &str) -> bool {
    TRANSIENT_SQLSTATE_PREFIXES
        .iter()
        .any(|prefix| code.starts_with(prefix))
}

impl From<DbError> for StoreError {
    fn from(error: DbError) -> Self {
        if error.is_transient() {
            Self::Transient(error.to_string())
        } else {
            Self::Fatal(error.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;

    #[test]
    fn sqlstate_classification() {
        assert!(is_transient_sqlstate("40001"));
        assert!(is_transient_sqlstate("40P01"));
        assert!(is_transient_sqlstate("08006"));
        assert!(is_transient_sqlstate("53300"));
        assert!(is_transient_sqlstate("57P03"));
        assert!(!is_transient_sqlstate("23505"));
        assert!(!is_transient_sqlstate("42P01"));
        assert!(!is_transient_sqlstate("57014"));
    }

    #[test]
    fn connection_loss_is_transient() {
        let error = DbError::Postgres(sqlx::Error::Io(io::Error::new(
            io::ErrorKind::ConnectionReset,
            "reset by peer",
        )));
        assert!(error.is_transient());
        assert!(matches!(StoreError::from(error), StoreError::Transient(_)));
    }

    #[test]
    fn pool_timeout_is_transient() {
        assert!(DbError::Postgres(sqlx::Error::PoolTimedOut).is_transient());
    }

    #[test]
    fn config_and_missing_rows_are_fatal() {
        let error = DbError::Config("bad url".to_owned());
        assert!(!error.is_transient());
        assert!(matches!(StoreError::from(error), StoreError::Fatal(_)));
        assert!(!DbError::Postgres(sqlx::Error::RowNotFound).is_transient());
    }
}
