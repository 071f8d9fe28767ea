//! Batch window: groups decoded events into bounded batches.
//!
//! The assembler owns one open batch. It closes the batch when the event
//! count reaches `max_size` or when `max_wait` has elapsed since the first
//! event entered it, whichever comes first. Events keep arrival order.
//!
//! The synchronous methods ([`BatchAssembler::push`],
//! [`BatchAssembler::take_expired`], [`BatchAssembler::drain`]) take the
//! current instant explicitly so the windowing rules are testable without
//! a runtime. [`BatchAssembler::run`] drives them from a channel.

use std::time::Duration;

use ticktrail_types::{BatchId, TelemetryEvent};
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, warn};

use crate::config::BatchConfig;

/// Which bound closed a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// The event count reached the size bound.
    Size,
    /// The time bound elapsed.
    Timer,
    /// The pipeline is stopping.
    Drain,
}

impl core::fmt::Display for FlushReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Size => f.write_str("size"),
            Self::Timer => f.write_str("timer"),
            Self::Drain => f.write_str("drain"),
        }
    }
}

/// A closed batch, ready for compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// Log correlation id.
    pub id: BatchId,
    /// Events in arrival order. Never empty.
    pub events: Vec<TelemetryEvent>,
    /// Which bound closed the batch.
    pub reason: FlushReason,
}

impl Batch {
    /// Number of events in the batch.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the batch holds no events.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Single-writer batch window.
#[derive(Debug)]
pub struct BatchAssembler {
    max_size: usize,
    max_wait: Duration,
    events: Vec<TelemetryEvent>,
    opened_at: Option<Instant>,
}

impl BatchAssembler {
    /// Create an assembler. A `max_size` of zero is treated as one.
    pub fn new(max_size: usize, max_wait: Duration) -> Self {
        let max_size = max_size.max(1);
        Self {
            max_size,
            max_wait,
            events: Vec::with_capacity(max_size),
            opened_at: None,
        }
    }

    /// Create an assembler from the `batch` config section.
    pub fn from_config(config: &BatchConfig) -> Self {
        Self::new(config.max_size, config.max_wait())
    }

    /// Number of events in the open batch.
    pub fn pending(&self) -> usize {
        self.events.len()
    }

    /// When the open batch must be flushed, if one is open.
    pub fn deadline(&self) -> Option<Instant> {
        self.opened_at
            .and_then(|opened| opened.checked_add(self.max_wait))
    }

    /// Add an event, returning the batch if it just reached the size bound.
    pub fn push(&mut self, event: TelemetryEvent, now: Instant) -> Option<Batch> {
        if self.opened_at.is_none() {
            self.opened_at = Some(now);
        }
        self.events.push(event);
        if self.events.len() >= self.max_size {
            return self.close(FlushReason::Size);
        }
        None
    }

    /// Close the open batch if its time bound has elapsed at `now`.
    ///
    /// An empty window yields nothing.
    pub fn take_expired(&mut self, now: Instant) -> Option<Batch> {
        match self.deadline() {
            Some(deadline) if now >= deadline => self.close(FlushReason::Timer),
            _ => None,
        }
    }

    /// Close the open batch regardless of bounds.
    pub fn drain(&mut self) -> Option<Batch> {
        self.close(FlushReason::Drain)
    }

    fn close(&mut self, reason: FlushReason) -> Option<Batch> {
        self.opened_at = None;
        if self.events.is_empty() {
            return None;
        }
        let events = core::mem::replace(&mut self.events, Vec::with_capacity(self.max_size));
        let batch = Batch {
            id: BatchId::new(),
            events,
            reason,
        };
        debug!(
            batch_id = %batch.id,
            events = batch.len(),
            reason = %batch.reason,
            "batch closed"
        );
        Some(batch)
    }

    /// Consume events until the sender side closes, emitting batches.
    ///
    /// When `events` closes, any open batch is drained before returning.
    /// Returns early if the batch receiver has gone away.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<TelemetryEvent>,
        batches: mpsc::Sender<Batch>,
    ) {
        loop {
            let deadline = self.deadline();
            let flushed = tokio::select! {
                received = events.recv() => match received {
                    Some(event) => self.push(event, Instant::now()),
                    None => break,
                },
                () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.take_expired(Instant::now())
                }
            };
            let Some(batch) = flushed else { continue };
            if batches.send(batch).await.is_err() {
                warn!("batch receiver closed, assembler stopping");
                return;
            }
        }

        let Some(batch) = self.drain() else { return };
        if batches.send(batch).await.is_err() {
            warn!("batch receiver closed before the final batch was handed over");
        }
    }
}
