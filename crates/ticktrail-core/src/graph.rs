//! Graph node records written by a bulk insert.
//!
//! These are the store-agnostic shapes of the data model. Every record is
//! scoped by [`SessionId`]. Frames, actors, and subsectors merge on create
//! (an existing node keeps its attributes); events and states are always
//! fresh nodes.

use std::collections::HashSet;

use ticktrail_types::{ActorId, ActorKind, EventType, LevelInfo, Position, SessionId, SubSectorId};

/// One simulation tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameRecord {
    /// Owning session.
    pub session: SessionId,
    /// Per-session tick number.
    pub tic: u64,
    /// Wall-clock offset, kept from the first occurrence.
    pub millis: u64,
}

/// One telemetry occurrence, attached to the frame it happened at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    /// Owning session.
    pub session: SessionId,
    /// Per-session ordering key.
    pub counter: u64,
    /// What happened.
    pub event_type: EventType,
    /// Tick of the frame this event occurs at.
    pub tic: u64,
    /// Level information, when reported.
    pub level: Option<LevelInfo>,
}

/// A simulation entity. Its kind is fixed at first observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorRecord {
    /// Owning session.
    pub session: SessionId,
    /// Session-scoped id.
    pub actor_id: ActorId,
    /// Player or enemy subtype.
    pub kind: ActorKind,
}

/// A spatial partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubSectorRecord {
    /// Owning session.
    pub session: SessionId,
    /// Session-scoped id.
    pub subsector: SubSectorId,
}

/// An immutable snapshot of one actor at one event.
///
/// The owning actor and session are denormalized onto the state so chain
/// lookups never need to go through the event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateRecord {
    /// Owning session.
    pub session: SessionId,
    /// Owning actor.
    pub actor_id: ActorId,
    /// Counter of the event this state participates in.
    pub counter: u64,
    /// The actor filled the acting slot.
    pub acting: bool,
    /// The actor filled the target slot.
    pub targeted: bool,
    /// Where the actor was. Links the state to its subsector when present.
    pub position: Option<Position>,
    /// Health at the event.
    pub health: i32,
    /// Armor at the event.
    pub armor: i32,
}

/// Every node one batch creates or merges.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkInsert {
    /// Frames, one per distinct (session, tic).
    pub frames: Vec<FrameRecord>,
    /// Subsectors, one per distinct (session, subsector).
    pub subsectors: Vec<SubSectorRecord>,
    /// Actors, one per distinct (session, id).
    pub actors: Vec<ActorRecord>,
    /// Events, one per distinct (session, counter).
    pub events: Vec<EventRecord>,
    /// States, one per (event, actor).
    pub states: Vec<StateRecord>,
}

impl BulkInsert {
    /// Whether there is nothing to write.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Total records across all node kinds.
    pub fn record_count(&self) -> usize {
        [
            self.frames.len(),
            self.subsectors.len(),
            self.actors.len(),
            self.events.len(),
            self.states.len(),
        ]
        .into_iter()
        .fold(0_usize, usize::saturating_add)
    }

    /// The part of this insert whose events are not stored yet.
    ///
    /// Frames, actors, and subsectors are kept only when a remaining event
    /// or state refers to them, so a skipped duplicate leaves no dangling
    /// nodes behind.
    pub fn without_stored(&self, is_stored: impl Fn(&SessionId, u64) -> bool) -> Self {
        let events: Vec<EventRecord> = self
            .events
            .iter()
            .filter(|event| !is_stored(&event.session, event.counter))
            .cloned()
            .collect();
        let fresh: HashSet<(&SessionId, u64)> =
            events.iter().map(|event| (&event.session, event.counter)).collect();
        let states: Vec<StateRecord> = self
            .states
            .iter()
            .filter(|state| fresh.contains(&(&state.session, state.counter)))
            .cloned()
            .collect();

        let tics: HashSet<(&SessionId, u64)> =
            events.iter().map(|event| (&event.session, event.tic)).collect();
        let actors: HashSet<(&SessionId, &ActorId)> = states
            .iter()
            .map(|state| (&state.session, &state.actor_id))
            .collect();
        let subsectors: HashSet<(&SessionId, SubSectorId)> = states
            .iter()
            .filter_map(|state| state.position.map(|p| (&state.session, p.subsector)))
            .collect();

        let frames = self
            .frames
            .iter()
            .filter(|frame| tics.contains(&(&frame.session, frame.tic)))
            .cloned()
            .collect();
        let subsectors = self
            .subsectors
            .iter()
            .filter(|s| subsectors.contains(&(&s.session, s.subsector)))
            .cloned()
            .collect();
        let actors = self
            .actors
            .iter()
            .filter(|actor| actors.contains(&(&actor.session, &actor.actor_id)))
            .cloned()
            .collect();

        Self {
            frames,
            subsectors,
            actors,
            events,
            states,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use ticktrail_types::{ActorSnapshot, FrameStamp, TelemetryEvent};

    use super::*;
    use crate::compiler::compile_events;

    fn event(counter: u64, tic: u64, actor: &str, subsector: u64) -> TelemetryEvent {
        TelemetryEvent {
            session: SessionId::new("abc"),
            counter,
            event_type: EventType::Move,
            frame: FrameStamp { tic, millis: 0 },
            actor: ActorSnapshot {
                id: ActorId::new(actor),
                kind: ActorKind::Imp,
                position: Some(Position {
                    x: 0,
                    y: 0,
                    z: 0,
                    angle: 0,
                    subsector: SubSectorId(subsector),
                }),
                health: 60,
                armor: 0,
            },
            target: None,
            level: None,
        }
    }

    #[test]
    fn stored_events_drop_their_dependent_rows() {
        let (insert, _) = compile_events(&[
            event(1, 10, "a", 100),
            event(2, 11, "b", 200),
            event(3, 11, "a", 300),
        ])
        .unwrap();

        let pruned = insert.without_stored(|_, counter| counter == 2);
        let counters: Vec<u64> = pruned.events.iter().map(|e| e.counter).collect();
        assert_eq!(counters, vec![1, 3]);
        assert!(pruned.states.iter().all(|s| s.actor_id.as_str() == "a"));
        assert_eq!(pruned.actors.len(), 1);
        let subsectors: Vec<SubSectorId> = pruned.subsectors.iter().map(|s| s.subsector).collect();
        assert_eq!(subsectors, vec![SubSectorId(100), SubSectorId(300)]);
        // Tic 11 is still referenced by event 3.
        assert_eq!(pruned.frames.len(), 2);
    }

    #[test]
    fn fully_stored_insert_is_empty() {
        let (insert, _) = compile_events(&[event(1, 10, "a", 100)]).unwrap();
        let pruned = insert.without_stored(|_, _| true);
        assert!(pruned.is_empty());
        assert_eq!(pruned.record_count(), 0);
    }

    #[test]
    fn nothing_stored_keeps_everything() {
        let (insert, _) =
            compile_events(&[event(1, 10, "a", 100), event(2, 12, "b", 100)]).unwrap();
        assert_eq!(insert.without_stored(|_, _| false), insert);
    }
}
