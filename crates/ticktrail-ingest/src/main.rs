//! Ingestion service entry point.
//!
//! # Startup Sequence
//!
//! 1. Parse flags and load `ticktrail.yaml` (exit 2 if invalid)
//! 2. Initialize structured logging (tracing)
//! 3. Connect to the graph store and verify it answers (exit 3)
//! 4. Run schema migrations (exit 4)
//! 5. Bind the UDP ingress and start the pipeline (exit 5)
//! 6. Run until Ctrl-C or SIGTERM, then drain and report

mod cli;
mod error;
mod logging;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use ticktrail_core::config::{IngestConfig, StoreBackend};
use ticktrail_core::gateway::StoreGateway;
use ticktrail_core::memory::MemoryGraph;
use ticktrail_core::pipeline::{self, ShutdownOutcome};
use ticktrail_db::{PgGraphStore, PostgresConfig, PostgresPool};
use tracing::{error, info, warn};

use crate::cli::Cli;
use crate::error::IngestError;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = cli.load_config();

    let logging = config
        .as_ref()
        .map(|config| config.logging.clone())
        .unwrap_or_default();
    if let Err(e) = logging::init(&logging) {
        eprintln!("ticktrail-ingest: {e}");
        return ExitCode::from(e.exit_code());
    }

    let result = match config {
        Ok(config) => run(&config).await,
        Err(source) => Err(IngestError::from(source)),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, exit_code = e.exit_code(), "ticktrail-ingest failed");
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(config: &IngestConfig) -> Result<(), IngestError> {
    info!(
        backend = ?config.store.backend,
        store = ?config.store,
        udp_host = config.ingress.host,
        udp_port = config.ingress.port,
        "ticktrail-ingest starting"
    );

    match config.store.backend {
        StoreBackend::Postgres => {
            let pool = PostgresPool::connect(&PostgresConfig::from_store(&config.store))
                .await
                .map_err(IngestError::from_connect)?;
            pool.verify_connectivity()
                .await
                .map_err(|source| IngestError::StoreUnreachable { source })?;
            pool.run_migrations()
                .await
                .map_err(|source| IngestError::Schema { source })?;

            let served = serve(config, Arc::new(PgGraphStore::new(&pool))).await;
            pool.close().await;
            served
        }
        StoreBackend::Memory => {
            warn!("memory backend selected, nothing will be persisted");
            serve(config, Arc::new(MemoryGraph::new())).await
        }
    }
}

/// Run the pipeline against `store` until a stop signal arrives.
async fn serve<G>(config: &IngestConfig, store: Arc<G>) -> Result<(), IngestError>
where
    G: StoreGateway + 'static,
{
    let pipeline = pipeline::start(config, store).await?;

    let signal = stop_requested()
        .await
        .map_err(|source| IngestError::Signal { source })?;
    info!(signal, "stop requested");

    let report = pipeline.shutdown().await;
    match report.outcome {
        ShutdownOutcome::Drained => info!(
            events_committed = report.metrics.events_committed,
            batches_committed = report.metrics.batches_committed,
            batches_failed = report.metrics.batches_failed,
            rejected = report.metrics.rejected,
            dropped = report.metrics.dropped,
            "ticktrail-ingest shutdown complete"
        ),
        ShutdownOutcome::Abandoned => warn!(
            events_committed = report.metrics.events_committed,
            grace_period_ms = config.shutdown.grace_period_ms,
            "ticktrail-ingest stopped before in-flight batches finished"
        ),
    }
    Ok(())
}

/// Wait for Ctrl-C, or SIGTERM on Unix.
#[cfg(unix)]
async fn stop_requested() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.map(|()| "SIGINT"),
        _ = terminate.recv() => Ok("SIGTERM"),
    }
}

/// Wait for Ctrl-C.
#[cfg(not(unix))]
async fn stop_requested() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await.map(|()| "Ctrl-C")
}
