//! Pipeline wiring: stages, channels, and shutdown.
//!
//! ```text
//! UDP ingress --raw queue--> decode (N workers, ordered) --events-->
//!     batch assembler --batches--> committer (compile + orchestrator)
//! ```
//!
//! Every stage is its own task and owns its receiving end. A stage stops
//! when its input closes and drops its output on the way out, so one
//! shutdown request at the ingress ripples down the chain: queued datagrams
//! are decoded, the open batch is drained, and the committer finishes the
//! remaining batches. [`RunningPipeline::shutdown`] waits for that up to the
//! grace period and then abandons whatever is still in flight.
//!
//! Two side tasks run alongside: the throughput reporter and the periodic
//! threading catch-up.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use ticktrail_types::TelemetryEvent;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::batch::{Batch, BatchAssembler};
use crate::compiler::compile;
use crate::config::{ConfigError, IngestConfig};
use crate::decoder::{Decoder, DecoderOptions, Rejection};
use crate::gateway::StoreGateway;
use crate::ingress::Ingress;
use crate::metrics::{MetricsSnapshot, PipelineMetrics};
use crate::orchestrator::WriteOrchestrator;
use crate::shutdown::ShutdownSignal;

/// Closed batches waiting for the committer.
const BATCH_QUEUE_DEPTH: usize = 4;

/// Errors that prevent the pipeline from starting.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The configuration is unusable.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The telemetry socket could not be bound.
    #[error("failed to bind telemetry ingress on {addr}: {source}")]
    Bind {
        /// The address requested.
        addr: SocketAddr,
        /// The underlying I/O error.
        source: io::Error,
    },
}

/// How shutdown ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every queued datagram and batch was processed.
    Drained,
    /// The grace period elapsed; in-flight work was abandoned.
    Abandoned,
}

/// Final state reported by [`RunningPipeline::shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Whether the drain completed in time.
    pub outcome: ShutdownOutcome,
    /// Counters at the moment shutdown finished.
    pub metrics: MetricsSnapshot,
}

/// A started pipeline.
#[derive(Debug)]
pub struct RunningPipeline {
    local_addr: SocketAddr,
    grace_period: Duration,
    metrics: Arc<PipelineMetrics>,
    shutdown: Arc<ShutdownSignal>,
    stages: Vec<JoinHandle<()>>,
    side_tasks: Vec<JoinHandle<()>>,
}

/// Bind the ingress and start every stage.
///
/// # Errors
///
/// Returns [`PipelineError::Config`] if the ingress address is invalid
/// or [`PipelineError::Bind`] if it cannot be bound.
pub async fn start<G>(config: &IngestConfig, gateway: Arc<G>) -> Result<RunningPipeline, PipelineError>
where
    G: StoreGateway + 'static,
{
    let addr = config.ingress.bind_addr()?;
    let ingress = Ingress::bind(addr, config.ingress.max_datagram_bytes)
        .await
        .map_err(|source| PipelineError::Bind { addr, source })?;
    let local_addr = ingress
        .local_addr()
        .map_err(|source| PipelineError::Bind { addr, source })?;

    let metrics = Arc::new(PipelineMetrics::new());
    let shutdown = Arc::new(ShutdownSignal::new());
    let orchestrator = Arc::new(WriteOrchestrator::new(
        gateway,
        config.retry.policy(),
        config.store.operation_timeout(),
        Arc::clone(&metrics),
    ));
    let decoder = Decoder::new(DecoderOptions {
        target_position: config.decoder.target_position,
    });

    let (raw_tx, raw_rx) = mpsc::channel(config.ingress.queue_depth.max(1));
    let (event_tx, event_rx) = mpsc::channel(config.batch.max_size.max(1));
    let (batch_tx, batch_rx) = mpsc::channel(BATCH_QUEUE_DEPTH);

    let stages = vec![
        tokio::spawn(ingress.run(raw_tx, Arc::clone(&metrics), Arc::clone(&shutdown))),
        tokio::spawn(decode_stage(
            raw_rx,
            event_tx,
            decoder,
            config.decoder.workers,
            Arc::clone(&metrics),
        )),
        tokio::spawn(BatchAssembler::from_config(&config.batch).run(event_rx, batch_tx)),
        tokio::spawn(commit_stage(batch_rx, Arc::clone(&orchestrator))),
    ];

    let mut side_tasks = vec![tokio::spawn(
        Arc::clone(&metrics).report_periodically(
            config.logging.report_interval(),
            Arc::clone(&shutdown),
        ),
    )];
    if let Some(every) = config.threading.catchup_interval() {
        side_tasks.push(tokio::spawn(catchup_stage(
            orchestrator,
            every,
            Arc::clone(&shutdown),
        )));
    }

    info!(
        addr = %local_addr,
        batch_size = config.batch.max_size,
        batch_wait_ms = config.batch.max_wait_ms,
        decoder_workers = config.decoder.workers,
        queue_depth = config.ingress.queue_depth,
        "ingestion pipeline started"
    );

    Ok(RunningPipeline {
        local_addr,
        grace_period: config.shutdown.grace_period(),
        metrics,
        shutdown,
        stages,
        side_tasks,
    })
}

impl RunningPipeline {
    /// The bound ingress address.
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Shared throughput counters.
    pub const fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    /// The shutdown signal, for wiring to OS signals.
    pub fn shutdown_signal(&self) -> Arc<ShutdownSignal> {
        Arc::clone(&self.shutdown)
    }

    /// Stop receiving, drain, and wait up to the grace period.
    pub async fn shutdown(self) -> ShutdownReport {
        info!(
            grace_period_ms = u64::try_from(self.grace_period.as_millis()).unwrap_or(u64::MAX),
            "pipeline shutting down"
        );
        self.shutdown.request();

        let aborters: Vec<_> = self.stages.iter().map(JoinHandle::abort_handle).collect();
        let drained = tokio::time::timeout(
            self.grace_period,
            futures::future::join_all(self.stages),
        )
        .await;

        let outcome = match drained {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        error!(error = %e, "pipeline stage panicked");
                    }
                }
                ShutdownOutcome::Drained
            }
            Err(_elapsed) => {
                warn!("grace period elapsed, abandoning in-flight batches");
                for aborter in aborters {
                    aborter.abort();
                }
                ShutdownOutcome::Abandoned
            }
        };

        for task in self.side_tasks {
            task.abort();
        }

        self.metrics.report();
        ShutdownReport {
            outcome,
            metrics: self.metrics.snapshot(),
        }
    }
}

/// Decode datagrams on up to `workers` tasks, re-joined in arrival order.
async fn decode_stage(
    raw: mpsc::Receiver<Vec<u8>>,
    events: mpsc::Sender<TelemetryEvent>,
    decoder: Decoder,
    workers: usize,
    metrics: Arc<PipelineMetrics>,
) {
    let payloads = futures::stream::unfold(raw, |mut raw| async move {
        raw.recv().await.map(|payload| (payload, raw))
    });
    let decoded = payloads
        .map(|payload| tokio::spawn(async move { decoder.decode(&payload) }))
        .buffered(workers.max(1));
    tokio::pin!(decoded);

    while let Some(joined) = decoded.next().await {
        match joined {
            Ok(Ok(event)) => {
                metrics.record_decoded();
                if events.send(event).await.is_err() {
                    warn!("event queue closed, decoder stopping");
                    return;
                }
            }
            Ok(Err(Rejection { reason, payload })) => {
                metrics.record_rejected();
                warn!(reason = %reason, payload = %payload, "telemetry record rejected");
            }
            Err(e) => {
                metrics.record_rejected();
                error!(error = %e, "decode task failed");
            }
        }
    }
}

/// Compile and commit batches one at a time.
async fn commit_stage<G: StoreGateway>(
    mut batches: mpsc::Receiver<Batch>,
    orchestrator: Arc<WriteOrchestrator<G>>,
) {
    while let Some(batch) = batches.recv().await {
        let Some(compiled) = compile(&batch) else {
            continue;
        };
        if let Err(e) = orchestrator.commit(&compiled).await {
            error!(
                batch_id = %batch.id,
                events = batch.len(),
                reason = %batch.reason,
                error = %e,
                "batch abandoned"
            );
        }
    }
}

/// Re-run threading on a timer to pick up anything a failed pass missed.
async fn catchup_stage<G: StoreGateway>(
    orchestrator: Arc<WriteOrchestrator<G>>,
    every: Duration,
    shutdown: Arc<ShutdownSignal>,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = orchestrator.run_threading().await {
                    warn!(error = %e, "threading catch-up failed");
                }
            }
            () = shutdown.wait() => return,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn record(counter: u64) -> Vec<u8> {
        format!(
            r#"{{"session":"abc","counter":{counter},"type":"move","frame":{{"tic":{counter}}},"actor":{{"id":1,"type":"player","position":{{"subsector":1}}}}}}"#
        )
        .into_bytes()
    }

    #[tokio::test]
    async fn decode_stage_keeps_arrival_order_across_workers() {
        let (raw_tx, raw_rx) = mpsc::channel(64);
        let (events_tx, mut events_rx) = mpsc::channel(64);
        let metrics = Arc::new(PipelineMetrics::new());

        for counter in [5, 3, 9, 1] {
            raw_tx.send(record(counter)).await.unwrap();
        }
        raw_tx.send(b"{not json".to_vec()).await.unwrap();
        raw_tx.send(record(7)).await.unwrap();
        drop(raw_tx);

        decode_stage(raw_rx, events_tx, Decoder::default(), 4, Arc::clone(&metrics)).await;

        let mut counters = Vec::new();
        while let Some(event) = events_rx.recv().await {
            counters.push(event.counter);
        }
        assert_eq!(counters, vec![5, 3, 9, 1, 7]);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.decoded, 5);
        assert_eq!(snapshot.rejected, 1);
    }

    #[tokio::test]
    async fn decode_stage_stops_when_events_are_unwanted() {
        let (raw_tx, raw_rx) = mpsc::channel(8);
        let (events_tx, events_rx) = mpsc::channel(1);
        drop(events_rx);
        raw_tx.send(record(1)).await.unwrap();
        raw_tx.send(record(2)).await.unwrap();

        // Returns while the raw sender is still open, releasing the queue.
        decode_stage(raw_rx, events_tx, Decoder::default(), 1, Arc::new(PipelineMetrics::new()))
            .await;
        assert!(raw_tx.is_closed());
    }
}
