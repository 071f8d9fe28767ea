//! Write orchestrator: commits compiled batches with bounded retry.
//!
//! A batch commits in two steps. The bulk insert runs first; once the store
//! acknowledges it, the threading sequence runs. Either step is retried
//! verbatim on transient failure, which is safe because both are
//! idempotent. A non-transient failure ends the batch at once.
//!
//! Only one batch is in flight per orchestrator: `commit` holds an async
//! mutex for both steps, so batch N+1's insert never starts before batch
//! N's threading has finished. Every store call is bounded by a timeout,
//! and a timeout counts as a transient failure.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use ticktrail_types::BatchId;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::compiler::CompiledBatch;
use crate::gateway::{StoreError, StoreGateway, WriteStats};
use crate::metrics::PipelineMetrics;
use crate::threading;

/// How transient failures are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per step, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each later retry.
    pub initial_backoff: Duration,
    /// Cap on the delay.
    pub max_backoff: Duration,
    /// Spread each delay by up to ±25%.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt number `attempt` (1-based), before jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1_u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    fn delay(&self, attempt: u32) -> Duration {
        let base = self.backoff(attempt);
        if !self.jitter {
            return base;
        }
        let millis = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
        let spread = millis / 4;
        if spread == 0 {
            return base;
        }
        let jittered =
            rand::rng().random_range(millis.saturating_sub(spread)..=millis.saturating_add(spread));
        Duration::from_millis(jittered)
    }
}

/// Why a batch could not be committed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrchestratorError {
    /// Every allowed attempt failed transiently.
    #[error("{step} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// The step that failed.
        step: &'static str,
        /// Attempts made.
        attempts: u32,
        /// The last failure.
        source: StoreError,
    },

    /// The store reported a failure that retrying cannot fix.
    #[error("{step} failed: {source}")]
    Fatal {
        /// The step that failed.
        step: &'static str,
        /// The failure.
        source: StoreError,
    },
}

/// The result of a step that eventually succeeded.
#[derive(Debug)]
struct Settled<T> {
    value: T,
    /// An earlier attempt timed out, so the store may have applied it.
    after_timeout: bool,
}

/// Events a successful insert committed.
fn committed_events(event_count: usize, stats: &WriteStats, after_timeout: bool) -> u64 {
    let events = u64::try_from(event_count).unwrap_or(u64::MAX);
    if after_timeout {
        events
    } else {
        events.saturating_sub(stats.duplicates_skipped)
    }
}

/// Serialized, retrying submitter of compiled batches.
#[derive(Debug)]
pub struct WriteOrchestrator<G> {
    gateway: Arc<G>,
    policy: RetryPolicy,
    timeout: Duration,
    metrics: Arc<PipelineMetrics>,
    in_flight: Mutex<()>,
}

impl<G: StoreGateway> WriteOrchestrator<G> {
    /// Create an orchestrator. `timeout` bounds each store call.
    pub fn new(
        gateway: Arc<G>,
        policy: RetryPolicy,
        timeout: Duration,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            gateway,
            policy,
            timeout,
            metrics,
            in_flight: Mutex::new(()),
        }
    }

    /// The store this orchestrator writes to.
    pub const fn gateway(&self) -> &Arc<G> {
        &self.gateway
    }

    /// Insert a batch, then thread it.
    ///
    /// Returns the number of events committed: the batch's distinct events
    /// minus any whose counter the store already held. When an insert
    /// attempt timed out before the one that succeeded, the store may have
    /// applied the timed-out attempt, so its rows come back as duplicates.
    /// Every distinct event is then counted as committed.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError`] when either step fails fatally or
    /// runs out of retries. The batch is then abandoned; the pipeline
    /// carries on with the next one.
    pub async fn commit(&self, batch: &CompiledBatch) -> Result<u64, OrchestratorError> {
        let _turn = self.in_flight.lock().await;
        let batch_id = Some(batch.batch_id);

        let result: Result<Settled<WriteStats>, OrchestratorError> = async {
            let insert = self
                .with_retry(batch_id, batch.mutation.label(), || {
                    self.gateway.execute(&batch.mutation)
                })
                .await?;
            let sequence = threading::sequence();
            self.with_retry(batch_id, "threading", || {
                self.gateway.execute_sequence(&sequence)
            })
            .await?;
            Ok(insert)
        }
        .await;

        match result {
            Ok(Settled {
                value: stats,
                after_timeout,
            }) => {
                let committed = committed_events(batch.event_count, &stats, after_timeout);
                self.metrics.record_committed(committed);
                if after_timeout && stats.duplicates_skipped > 0 {
                    info!(
                        batch_id = %batch.batch_id,
                        duplicates_skipped = stats.duplicates_skipped,
                        "insert retried after a timeout, duplicates counted as committed"
                    );
                }
                info!(
                    batch_id = %batch.batch_id,
                    events = committed,
                    nodes_created = stats.nodes_created,
                    links_created = stats.links_created,
                    duplicates_skipped = stats.duplicates_skipped,
                    "batch committed"
                );
                Ok(committed)
            }
            Err(e) => {
                self.metrics.record_batch_failed();
                Err(e)
            }
        }
    }

    /// Run the threading sequence on its own, outside any batch.
    ///
    /// Used for periodic catch-up. Safe alongside an in-flight `commit`
    /// because every threading step only touches unlinked nodes.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError`] as for [`commit`](Self::commit).
    pub async fn run_threading(&self) -> Result<(), OrchestratorError> {
        let sequence = threading::sequence();
        self.with_retry(None, "threading", || self.gateway.execute_sequence(&sequence))
            .await?;
        debug!("threading catch-up pass complete");
        Ok(())
    }

    async fn with_retry<T, F, Fut>(
        &self,
        batch_id: Option<BatchId>,
        step: &'static str,
        mut op: F,
    ) -> Result<Settled<T>, OrchestratorError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut attempt = 1_u32;
        let mut after_timeout = false;
        loop {
            let outcome = match tokio::time::timeout(self.timeout, op()).await {
                Ok(outcome) => outcome,
                Err(_elapsed) => Err(StoreError::Timeout(self.timeout)),
            };
            let error = match outcome {
                Ok(value) => {
                    return Ok(Settled {
                        value,
                        after_timeout,
                    });
                }
                Err(error) => error,
            };
            if matches!(error, StoreError::Timeout(_)) {
                after_timeout = true;
            }

            if !error.is_transient() {
                return Err(OrchestratorError::Fatal {
                    step,
                    source: error,
                });
            }
            if attempt >= self.policy.max_attempts {
                return Err(OrchestratorError::RetriesExhausted {
                    step,
                    attempts: attempt,
                    source: error,
                });
            }

            let delay = self.policy.delay(attempt);
            warn!(
                batch_id = ?batch_id.map(|id| id.to_string()),
                step,
                attempt,
                max_attempts = self.policy.max_attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %error,
                "transient store failure, retrying"
            );
            self.metrics.record_retry();
            tokio::time::sleep(delay).await;
            attempt = attempt.saturating_add(1);
        }
    }
}
