//! Command-line flags.
//!
//! Flags are the last configuration layer: they override both
//! `ticktrail.yaml` and the store credential environment variables.

use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};
use ticktrail_core::config::{ConfigError, IngestConfig, StoreBackend};

/// Config file read when `--config` is not given and it exists.
const DEFAULT_CONFIG_PATH: &str = "ticktrail.yaml";

/// Store backend selectable from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendArg {
    /// `PostgreSQL` graph store.
    Postgres,
    /// In-process graph, nothing persisted.
    Memory,
}

impl From<BackendArg> for StoreBackend {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Postgres => Self::Postgres,
            BackendArg::Memory => Self::Memory,
        }
    }
}

/// Receive game telemetry over UDP and thread it into a graph store.
#[derive(Debug, Parser)]
#[command(name = "ticktrail-ingest", version)]
pub struct Cli {
    /// YAML configuration file.
    #[arg(long, env = "TICKTRAIL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Graph store connection URL.
    #[arg(long)]
    pub uri: Option<String>,

    /// Graph store username.
    #[arg(long)]
    pub user: Option<String>,

    /// Graph store password.
    #[arg(long)]
    pub password: Option<String>,

    /// Require an encrypted store connection.
    #[arg(long)]
    pub tls: bool,

    /// Address to receive telemetry on.
    #[arg(long)]
    pub udp_host: Option<String>,

    /// Port to receive telemetry on.
    #[arg(long)]
    pub udp_port: Option<u16>,

    /// Events per batch.
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Longest a non-empty batch stays open, in milliseconds.
    #[arg(long)]
    pub flush_interval_ms: Option<u64>,

    /// Which graph store to write to.
    #[arg(long, value_enum)]
    pub store_backend: Option<BackendArg>,
}

impl Cli {
    /// Load the config file, apply flags, and validate the result.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed, or the
    /// merged configuration is invalid.
    pub fn load_config(&self) -> Result<IngestConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => IngestConfig::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                IngestConfig::from_file(Path::new(DEFAULT_CONFIG_PATH))?
            }
            None => {
                let mut config = IngestConfig::default();
                config.store.apply_env_overrides();
                config
            }
        };
        self.apply(&mut config);
        config.check()?;
        Ok(config)
    }

    /// Override `config` with every flag that was given.
    pub fn apply(&self, config: &mut IngestConfig) {
        if let Some(uri) = &self.uri {
            config.store.url.clone_from(uri);
        }
        if let Some(user) = &self.user {
            config.store.user = Some(user.clone());
        }
        if let Some(password) = &self.password {
            config.store.password = Some(password.clone());
        }
        if self.tls {
            config.store.tls = true;
        }
        if let Some(host) = &self.udp_host {
            config.ingress.host.clone_from(host);
        }
        if let Some(port) = self.udp_port {
            config.ingress.port = port;
        }
        if let Some(size) = self.batch_size {
            config.batch.max_size = size;
        }
        if let Some(interval) = self.flush_interval_ms {
            config.batch.max_wait_ms = interval;
        }
        if let Some(backend) = self.store_backend {
            config.store.backend = backend.into();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("ticktrail-ingest").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn flags_override_file_values() {
        let mut config = IngestConfig::parse(
            "store:\n  url: postgresql://file@db/ticktrail\ningress:\n  port: 9000\nbatch:\n  max_size: 500\n",
        )
        .unwrap();
        parse(&[
            "--uri",
            "postgresql://flag@db/ticktrail",
            "--user",
            "ingest",
            "--tls",
            "--udp-host",
            "0.0.0.0",
            "--udp-port",
            "10667",
            "--batch-size",
            "1000",
            "--flush-interval-ms",
            "250",
            "--store-backend",
            "memory",
        ])
        .apply(&mut config);

        assert_eq!(config.store.url, "postgresql://flag@db/ticktrail");
        assert_eq!(config.store.user.as_deref(), Some("ingest"));
        assert!(config.store.tls);
        assert_eq!(config.ingress.host, "0.0.0.0");
        assert_eq!(config.ingress.port, 10667);
        assert_eq!(config.batch.max_size, 1000);
        assert_eq!(config.batch.max_wait_ms, 250);
        assert_eq!(config.store.backend, StoreBackend::Memory);
        config.check().unwrap();
    }

    #[test]
    fn absent_flags_leave_config_alone() {
        let mut config = IngestConfig::default();
        parse(&[]).apply(&mut config);
        assert_eq!(config, IngestConfig::default());
    }

    #[test]
    fn out_of_range_batch_size_fails_check() {
        let mut config = IngestConfig::default();
        parse(&["--batch-size", "10"]).apply(&mut config);
        assert!(matches!(config.check(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let parsed =
            Cli::try_parse_from(["ticktrail-ingest", "--store-backend", "neo4j"]);
        assert!(parsed.is_err());
    }
}
