//! Error types for the ingest binary.
//!
//! [`IngestError`] is the top-level error that `main` turns into a process
//! exit code.

use std::io;
use std::net::SocketAddr;

use ticktrail_core::config::ConfigError;
use ticktrail_core::pipeline::PipelineError;
use ticktrail_db::DbError;

/// Top-level error for the ingest binary.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Configuration could not be loaded or failed validation.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: ConfigError,
    },

    /// The graph store could not be reached.
    #[error("store unreachable: {source}")]
    StoreUnreachable {
        /// The underlying database error.
        source: DbError,
    },

    /// Schema initialization failed.
    #[error("schema initialization failed: {source}")]
    Schema {
        /// The underlying database error.
        source: DbError,
    },

    /// The telemetry socket could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// The address requested.
        addr: SocketAddr,
        /// The underlying I/O error.
        source: io::Error,
    },

    /// Logging could not be installed.
    #[error("logging error: {message}")]
    Logging {
        /// Description of the failure.
        message: String,
    },

    /// OS signal handlers could not be installed.
    #[error("signal handler error: {source}")]
    Signal {
        /// The underlying I/O error.
        source: io::Error,
    },
}

impl IngestError {
    /// Classify a connection failure. An unparsable URL is a configuration
    /// problem, anything else means the store is unreachable.
    pub fn from_connect(source: DbError) -> Self {
        match source {
            DbError::Config(reason) => Self::Config {
                source: ConfigError::Invalid { reason },
            },
            other => Self::StoreUnreachable { source: other },
        }
    }

    /// Process exit code for this failure.
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Config { .. } => 2,
            Self::StoreUnreachable { .. } => 3,
            Self::Schema { .. } => 4,
            Self::Bind { .. } => 5,
            Self::Logging { .. } | Self::Signal { .. } => 1,
        }
    }
}

impl From<PipelineError> for IngestError {
    fn from(error: PipelineError) -> Self {
        match error {
            PipelineError::Config(source) => Self::Config { source },
            PipelineError::Bind { addr, source } => Self::Bind { addr, source },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_failure_class() {
        let config = IngestError::from(ConfigError::Invalid {
            reason: "batch.max_size".to_owned(),
        });
        assert_eq!(config.exit_code(), 2);

        let unreachable = IngestError::from_connect(DbError::Postgres(sqlx::Error::PoolTimedOut));
        assert_eq!(unreachable.exit_code(), 3);

        let schema = IngestError::Schema {
            source: DbError::Postgres(sqlx::Error::RowNotFound),
        };
        assert_eq!(schema.exit_code(), 4);

        let bind = IngestError::from(PipelineError::Bind {
            addr: "127.0.0.1:10666".parse().unwrap(),
            source: io::Error::new(io::ErrorKind::AddrInUse, "in use"),
        });
        assert_eq!(bind.exit_code(), 5);

        let signal = IngestError::Signal {
            source: io::Error::other("no signals"),
        };
        assert_eq!(signal.exit_code(), 1);
    }

    #[test]
    fn bad_url_is_a_config_failure() {
        let error = IngestError::from_connect(DbError::Config("Invalid database URL".to_owned()));
        assert_eq!(error.exit_code(), 2);
        assert!(error.to_string().contains("Invalid database URL"));
    }
}
