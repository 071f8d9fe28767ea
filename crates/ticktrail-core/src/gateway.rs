//! Store gateway contract.
//!
//! The pipeline treats the graph store as an opaque service: hand it a
//! [`Mutation`], get back [`WriteStats`] or a [`StoreError`]. Two
//! implementations exist: [`MemoryGraph`](crate::memory::MemoryGraph) in
//! this crate and `PgGraphStore` in `ticktrail-db`.

use std::future::Future;
use std::time::Duration;

use crate::graph::BulkInsert;

/// One step of the threading sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadStep {
    /// Link unlinked frames by `tic`, per session.
    Frames,
    /// Link unlinked events by `counter`, per session.
    Events,
    /// Link unlinked states by event `counter`, per actor.
    States,
    /// Point each actor's current-state link at its chain head.
    RetargetCurrent,
    /// Give each actor without one an initial-state link to its chain tail.
    SetInitial,
}

impl ThreadStep {
    /// The five steps, in the order they must run.
    pub const ALL: [Self; 5] = [
        Self::Frames,
        Self::Events,
        Self::States,
        Self::RetargetCurrent,
        Self::SetInitial,
    ];

    /// Short name for logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Frames => "thread_frames",
            Self::Events => "thread_events",
            Self::States => "thread_states",
            Self::RetargetCurrent => "retarget_current",
            Self::SetInitial => "set_initial",
        }
    }
}

impl core::fmt::Display for ThreadStep {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of work for the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Create or merge every node of one batch.
    Insert(BulkInsert),
    /// Run one threading step.
    Thread(ThreadStep),
}

impl Mutation {
    /// Short name for logs.
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Insert(_) => "bulk_insert",
            Self::Thread(step) => step.as_str(),
        }
    }
}

/// What a mutation changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteStats {
    /// Nodes that did not exist before.
    pub nodes_created: u64,
    /// Previous-links and role/containment links added.
    pub links_created: u64,
    /// Current/initial pointers set or moved.
    pub pointers_moved: u64,
    /// Events skipped because their counter already existed.
    pub duplicates_skipped: u64,
}

impl WriteStats {
    /// Add another set of stats into this one.
    pub const fn absorb(&mut self, other: Self) {
        self.nodes_created = self.nodes_created.saturating_add(other.nodes_created);
        self.links_created = self.links_created.saturating_add(other.links_created);
        self.pointers_moved = self.pointers_moved.saturating_add(other.pointers_moved);
        self.duplicates_skipped = self
            .duplicates_skipped
            .saturating_add(other.duplicates_skipped);
    }

    /// Whether nothing changed.
    pub const fn is_noop(&self) -> bool {
        self.nodes_created == 0 && self.links_created == 0 && self.pointers_moved == 0
    }
}

/// Errors reported by a store gateway.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// A retryable failure (lost connection, serialization conflict, ...).
    #[error("transient store failure: {0}")]
    Transient(String),

    /// A failure retrying cannot fix (schema violation, bad query, ...).
    #[error("store failure: {0}")]
    Fatal(String),

    /// The store did not answer in time.
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),
}

impl StoreError {
    /// Whether the failed call may succeed if repeated verbatim.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout(_))
    }
}

/// A graph store that executes mutations transactionally.
///
/// Both methods must be idempotent for every [`Mutation`]: repeating a
/// call that already succeeded changes nothing further.
pub trait StoreGateway: Send + Sync {
    /// Execute one mutation in its own transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`]; see [`StoreError::is_transient`].
    fn execute(
        &self,
        mutation: &Mutation,
    ) -> impl Future<Output = Result<WriteStats, StoreError>> + Send;

    /// Execute several mutations in order inside one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`]; nothing is applied when it fails.
    fn execute_sequence(
        &self,
        mutations: &[Mutation],
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_are_retryable() {
        assert!(StoreError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(StoreError::Transient("connection reset".to_owned()).is_transient());
        assert!(!StoreError::Fatal("unique violation".to_owned()).is_transient());
    }

    #[test]
    fn stats_absorb_saturates() {
        let mut total = WriteStats {
            nodes_created: u64::MAX,
            ..WriteStats::default()
        };
        total.absorb(WriteStats {
            nodes_created: 1,
            links_created: 2,
            pointers_moved: 3,
            duplicates_skipped: 4,
        });
        assert_eq!(total.nodes_created, u64::MAX);
        assert_eq!(total.links_created, 2);
        assert!(!total.is_noop());
        assert!(WriteStats::default().is_noop());
    }

    #[test]
    fn steps_run_in_fixed_order() {
        let names: Vec<&str> = ThreadStep::ALL.iter().map(|s| s.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "thread_frames",
                "thread_events",
                "thread_states",
                "retarget_current",
                "set_initial"
            ]
        );
    }
}
