//! Mutation compiler: turns one batch into one bulk-insert mutation.
//!
//! Compilation is pure. Merge-on-create nodes (frames, actors, subsectors)
//! are deduplicated inside the batch with the first occurrence winning, the
//! same rule the store applies across batches. A counter seen twice in one
//! batch keeps its first event; later copies are dropped and reported in
//! [`CompiledBatch::duplicate_counters`].

use std::collections::HashSet;

use ticktrail_types::{ActorId, BatchId, Role, SessionId, SubSectorId, TelemetryEvent};
use tracing::warn;

use crate::batch::Batch;
use crate::gateway::Mutation;
use crate::graph::{
    ActorRecord, BulkInsert, EventRecord, FrameRecord, StateRecord, SubSectorRecord,
};

/// A batch compiled into its insert mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledBatch {
    /// The batch this was compiled from.
    pub batch_id: BatchId,
    /// Distinct events the mutation creates.
    pub event_count: usize,
    /// The bulk insert.
    pub mutation: Mutation,
    /// Counters that appeared more than once in the batch, in order seen.
    pub duplicate_counters: Vec<u64>,
}

/// Compile a batch. An empty batch yields `None`.
pub fn compile(batch: &Batch) -> Option<CompiledBatch> {
    let (insert, duplicate_counters) = compile_events(&batch.events)?;
    if !duplicate_counters.is_empty() {
        warn!(
            batch_id = %batch.id,
            duplicates = duplicate_counters.len(),
            counters = ?duplicate_counters,
            "duplicate event counters in batch, keeping first occurrence"
        );
    }
    Some(CompiledBatch {
        batch_id: batch.id,
        event_count: insert.events.len(),
        mutation: Mutation::Insert(insert),
        duplicate_counters,
    })
}

/// Compile a sequence of events into a [`BulkInsert`] plus the duplicate
/// counters that were dropped. An empty sequence yields `None`.
pub fn compile_events(events: &[TelemetryEvent]) -> Option<(BulkInsert, Vec<u64>)> {
    if events.is_empty() {
        return None;
    }

    let mut insert = BulkInsert::default();
    let mut duplicates = Vec::new();
    let mut seen_frames: HashSet<(&SessionId, u64)> = HashSet::new();
    let mut seen_events: HashSet<(&SessionId, u64)> = HashSet::new();
    let mut seen_actors: HashSet<(&SessionId, &ActorId)> = HashSet::new();
    let mut seen_subsectors: HashSet<(&SessionId, SubSectorId)> = HashSet::new();

    for event in events {
        let session = &event.session;
        if !seen_events.insert((session, event.counter)) {
            duplicates.push(event.counter);
            continue;
        }

        if seen_frames.insert((session, event.frame.tic)) {
            insert.frames.push(FrameRecord {
                session: session.clone(),
                tic: event.frame.tic,
                millis: event.frame.millis,
            });
        }

        insert.events.push(EventRecord {
            session: session.clone(),
            counter: event.counter,
            event_type: event.event_type,
            tic: event.frame.tic,
            level: event.level,
        });

        let self_targeted = event
            .target
            .as_ref()
            .is_some_and(|target| target.id == event.actor.id);

        for (role, snapshot) in event.participants() {
            if role == Role::Target && self_targeted {
                continue;
            }

            if seen_actors.insert((session, &snapshot.id)) {
                insert.actors.push(ActorRecord {
                    session: session.clone(),
                    actor_id: snapshot.id.clone(),
                    kind: snapshot.kind,
                });
            }

            let new_subsector = snapshot
                .position
                .map(|position| position.subsector)
                .filter(|&subsector| seen_subsectors.insert((session, subsector)));
            if let Some(subsector) = new_subsector {
                insert.subsectors.push(SubSectorRecord {
                    session: session.clone(),
                    subsector,
                });
            }

            insert.states.push(StateRecord {
                session: session.clone(),
                actor_id: snapshot.id.clone(),
                counter: event.counter,
                acting: role == Role::Actor,
                targeted: role == Role::Target || self_targeted,
                position: snapshot.position,
                health: snapshot.health,
                armor: snapshot.armor,
            });
        }
    }

    Some((insert, duplicates))
}
