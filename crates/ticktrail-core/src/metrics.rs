//! Throughput counters for one pipeline instance.
//!
//! [`PipelineMetrics`] is created once per pipeline and handed to every
//! stage behind an [`Arc`]. Counters are relaxed atomics: they are only
//! ever read for reporting, never to make decisions.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::shutdown::ShutdownSignal;

/// Counters shared by every pipeline stage.
#[derive(Debug)]
pub struct PipelineMetrics {
    started_at: DateTime<Utc>,
    received: AtomicU64,
    decoded: AtomicU64,
    rejected: AtomicU64,
    dropped: AtomicU64,
    events_committed: AtomicU64,
    batches_committed: AtomicU64,
    batches_failed: AtomicU64,
    retries: AtomicU64,
}

/// A point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Seconds since the pipeline started.
    pub uptime_secs: u64,
    /// Datagrams read from the socket.
    pub received: u64,
    /// Datagrams that decoded into events.
    pub decoded: u64,
    /// Datagrams the decoder rejected.
    pub rejected: u64,
    /// Datagrams shed because the queue was full.
    pub dropped: u64,
    /// Events acknowledged by the store.
    pub events_committed: u64,
    /// Batches fully committed and threaded.
    pub batches_committed: u64,
    /// Batches abandoned after a fatal error or exhausted retries.
    pub batches_failed: u64,
    /// Store calls repeated after a transient failure.
    pub retries: u64,
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineMetrics {
    /// Create zeroed counters starting now.
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            received: AtomicU64::new(0),
            decoded: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            events_committed: AtomicU64::new(0),
            batches_committed: AtomicU64::new(0),
            batches_failed: AtomicU64::new(0),
            retries: AtomicU64::new(0),
        }
    }

    /// A datagram was read.
    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    /// A datagram decoded into an event.
    pub fn record_decoded(&self) {
        self.decoded.fetch_add(1, Ordering::Relaxed);
    }

    /// A datagram was rejected.
    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// A datagram was shed.
    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// A batch committed `events` events.
    pub fn record_committed(&self, events: u64) {
        self.events_committed.fetch_add(events, Ordering::Relaxed);
        self.batches_committed.fetch_add(1, Ordering::Relaxed);
    }

    /// A batch was abandoned.
    pub fn record_batch_failed(&self) {
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// A store call is being retried.
    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let elapsed = Utc::now()
            .signed_duration_since(self.started_at)
            .num_seconds();
        MetricsSnapshot {
            uptime_secs: u64::try_from(elapsed.max(0)).unwrap_or(u64::MAX),
            received: self.received.load(Ordering::Relaxed),
            decoded: self.decoded.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            events_committed: self.events_committed.load(Ordering::Relaxed),
            batches_committed: self.batches_committed.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }

    /// Log the current counters at `info`.
    pub fn report(&self) {
        let s = self.snapshot();
        info!(
            started_at = %self.started_at.to_rfc3339(),
            uptime_secs = s.uptime_secs,
            received = s.received,
            decoded = s.decoded,
            rejected = s.rejected,
            dropped = s.dropped,
            events_committed = s.events_committed,
            batches_committed = s.batches_committed,
            batches_failed = s.batches_failed,
            retries = s.retries,
            "pipeline throughput"
        );
    }

    /// Log the counters every `every` until shutdown is requested.
    pub async fn report_periodically(self: Arc<Self>, every: Duration, shutdown: Arc<ShutdownSignal>) {
        let mut ticker = tokio::time::interval(every.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => self.report(),
                () = shutdown.wait() => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = PipelineMetrics::new();
        metrics.record_received();
        metrics.record_received();
        metrics.record_decoded();
        metrics.record_rejected();
        metrics.record_dropped();
        metrics.record_retry();
        metrics.record_committed(3);
        metrics.record_batch_failed();

        let s = metrics.snapshot();
        assert_eq!(s.received, 2);
        assert_eq!(s.decoded, 1);
        assert_eq!(s.rejected, 1);
        assert_eq!(s.dropped, 1);
        assert_eq!(s.retries, 1);
        assert_eq!(s.events_committed, 3);
        assert_eq!(s.batches_committed, 1);
        assert_eq!(s.batches_failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reporter_stops_on_shutdown() {
        let metrics = Arc::new(PipelineMetrics::new());
        let shutdown = Arc::new(ShutdownSignal::new());
        let task = tokio::spawn(
            Arc::clone(&metrics).report_periodically(Duration::from_secs(1), Arc::clone(&shutdown)),
        );
        tokio::time::sleep(Duration::from_secs(3)).await;
        shutdown.request();
        assert!(task.await.is_ok());
    }
}
