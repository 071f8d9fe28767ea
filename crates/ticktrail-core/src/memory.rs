//! In-memory graph store.
//!
//! [`MemoryGraph`] implements [`StoreGateway`] over ordered maps behind a
//! single async mutex, so every mutation (and every sequence) is applied
//! atomically. It backs the `memory` store backend for dry runs and serves
//! as the simulated store in tests, which is why it also exposes read-back
//! helpers.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

use ticktrail_types::{ActorId, ActorKind, EventType, LevelInfo, Position, SessionId, SubSectorId};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::gateway::{Mutation, StoreError, StoreGateway, ThreadStep, WriteStats};
use crate::graph::BulkInsert;
use crate::threading::{Candidate, Splice, plan_links, walk_to_tail};

/// A stored frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameNode {
    /// Wall-clock offset from the first occurrence.
    pub millis: u64,
    /// Tic of the previous frame.
    pub prev: Option<u64>,
}

/// A stored event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventNode {
    /// What happened.
    pub event_type: EventType,
    /// Tic of the frame it occurs at.
    pub tic: u64,
    /// Level information, when reported.
    pub level: Option<LevelInfo>,
    /// Counter of the previous event.
    pub prev: Option<u64>,
}

/// A stored actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorNode {
    /// Kind from the first observation.
    pub kind: ActorKind,
    /// Counter of the current state.
    pub current: Option<u64>,
    /// Counter of the initial state.
    pub initial: Option<u64>,
}

/// A stored state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateNode {
    /// Acting role.
    pub acting: bool,
    /// Targeted role.
    pub targeted: bool,
    /// Where the actor was.
    pub position: Option<Position>,
    /// Health at the event.
    pub health: i32,
    /// Armor at the event.
    pub armor: i32,
    /// Counter of the previous state of the same actor.
    pub prev: Option<u64>,
}

/// Node totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GraphCounts {
    /// Frames stored.
    pub frames: usize,
    /// Events stored.
    pub events: usize,
    /// Actors stored.
    pub actors: usize,
    /// Subsectors stored.
    pub subsectors: usize,
    /// States stored.
    pub states: usize,
}

trait Chained {
    fn prev(&self) -> Option<u64>;
    fn set_prev(&mut self, prev: Option<u64>);
}

macro_rules! impl_chained {
    ($($node:ty),*) => {
        $(impl Chained for $node {
            fn prev(&self) -> Option<u64> {
                self.prev
            }

            fn set_prev(&mut self, prev: Option<u64>) {
                self.prev = prev;
            }
        })*
    };
}

impl_chained!(FrameNode, EventNode, StateNode);

type StateScope = (SessionId, ActorId);

#[derive(Debug, Default)]
struct GraphState {
    frames: BTreeMap<(SessionId, u64), FrameNode>,
    events: BTreeMap<(SessionId, u64), EventNode>,
    actors: BTreeMap<StateScope, ActorNode>,
    subsectors: BTreeSet<(SessionId, SubSectorId)>,
    states: BTreeMap<(StateScope, u64), StateNode>,
}

/// Process-local graph store.
#[derive(Debug, Default)]
pub struct MemoryGraph {
    state: Mutex<GraphState>,
}

impl MemoryGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Node totals.
    pub async fn counts(&self) -> GraphCounts {
        let state = self.state.lock().await;
        GraphCounts {
            frames: state.frames.len(),
            events: state.events.len(),
            actors: state.actors.len(),
            subsectors: state.subsectors.len(),
            states: state.states.len(),
        }
    }

    /// Look up a frame.
    pub async fn frame(&self, session: &SessionId, tic: u64) -> Option<FrameNode> {
        let state = self.state.lock().await;
        state.frames.get(&(session.clone(), tic)).cloned()
    }

    /// Look up an event.
    pub async fn event(&self, session: &SessionId, counter: u64) -> Option<EventNode> {
        let state = self.state.lock().await;
        state.events.get(&(session.clone(), counter)).cloned()
    }

    /// Look up an actor.
    pub async fn actor(&self, session: &SessionId, actor: &ActorId) -> Option<ActorNode> {
        let state = self.state.lock().await;
        state.actors.get(&(session.clone(), actor.clone())).cloned()
    }

    /// Look up the state of `actor` at event `counter`.
    pub async fn state(
        &self,
        session: &SessionId,
        actor: &ActorId,
        counter: u64,
    ) -> Option<StateNode> {
        let state = self.state.lock().await;
        state
            .states
            .get(&((session.clone(), actor.clone()), counter))
            .cloned()
    }

    /// Whether a subsector exists.
    pub async fn has_subsector(&self, session: &SessionId, subsector: SubSectorId) -> bool {
        let state = self.state.lock().await;
        state.subsectors.contains(&(session.clone(), subsector))
    }

    /// Counters of `actor`'s states from current back to the tail.
    pub async fn state_chain(&self, session: &SessionId, actor: &ActorId) -> Vec<u64> {
        let state = self.state.lock().await;
        let scope = (session.clone(), actor.clone());
        let start = state.actors.get(&scope).and_then(|node| node.current);
        collect_chain(&state.states, &scope, start)
    }

    /// Counters of the session's events from the head back to the tail.
    pub async fn event_chain(&self, session: &SessionId) -> Vec<u64> {
        let state = self.state.lock().await;
        let start = chain_head(&state.events, session);
        collect_chain(&state.events, session, start)
    }

    /// Tics of the session's frames from the head back to the tail.
    pub async fn frame_chain(&self, session: &SessionId) -> Vec<u64> {
        let state = self.state.lock().await;
        let start = chain_head(&state.frames, session);
        collect_chain(&state.frames, session, start)
    }
}

impl StoreGateway for MemoryGraph {
    async fn execute(&self, mutation: &Mutation) -> Result<WriteStats, StoreError> {
        let mut state = self.state.lock().await;
        Ok(state.apply(mutation))
    }

    async fn execute_sequence(&self, mutations: &[Mutation]) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let mut total = WriteStats::default();
        for mutation in mutations {
            total.absorb(state.apply(mutation));
        }
        debug!(
            mutations = mutations.len(),
            links_created = total.links_created,
            pointers_moved = total.pointers_moved,
            "memory graph sequence applied"
        );
        Ok(())
    }
}

impl GraphState {
    fn apply(&mut self, mutation: &Mutation) -> WriteStats {
        match mutation {
            Mutation::Insert(insert) => self.insert(insert),
            Mutation::Thread(ThreadStep::Frames) => WriteStats {
                links_created: thread_chains(&mut self.frames),
                ..WriteStats::default()
            },
            Mutation::Thread(ThreadStep::Events) => WriteStats {
                links_created: thread_chains(&mut self.events),
                ..WriteStats::default()
            },
            Mutation::Thread(ThreadStep::States) => WriteStats {
                links_created: thread_chains(&mut self.states),
                ..WriteStats::default()
            },
            Mutation::Thread(ThreadStep::RetargetCurrent) => WriteStats {
                pointers_moved: self.retarget_current(),
                ..WriteStats::default()
            },
            Mutation::Thread(ThreadStep::SetInitial) => WriteStats {
                pointers_moved: self.set_initial(),
                ..WriteStats::default()
            },
        }
    }

    fn insert(&mut self, insert: &BulkInsert) -> WriteStats {
        let fresh = insert.without_stored(|session, counter| {
            self.events.contains_key(&(session.clone(), counter))
        });
        let duplicates = u64::try_from(insert.events.len().saturating_sub(fresh.events.len()))
            .unwrap_or(u64::MAX);

        let mut stats = WriteStats::default();
        let mut created = |is_new: bool| {
            if is_new {
                stats.nodes_created = stats.nodes_created.saturating_add(1);
            }
        };

        for frame in &fresh.frames {
            let key = (frame.session.clone(), frame.tic);
            created(!self.frames.contains_key(&key));
            self.frames.entry(key).or_insert_with(|| FrameNode {
                millis: frame.millis,
                prev: None,
            });
        }

        for subsector in &fresh.subsectors {
            created(
                self.subsectors
                    .insert((subsector.session.clone(), subsector.subsector)),
            );
        }

        for actor in &fresh.actors {
            let key = (actor.session.clone(), actor.actor_id.clone());
            created(!self.actors.contains_key(&key));
            self.actors.entry(key).or_insert(ActorNode {
                kind: actor.kind,
                current: None,
                initial: None,
            });
        }

        for event in &fresh.events {
            created(true);
            self.events.insert(
                (event.session.clone(), event.counter),
                EventNode {
                    event_type: event.event_type,
                    tic: event.tic,
                    level: event.level,
                    prev: None,
                },
            );
        }

        let mut links = u64::try_from(fresh.events.len()).unwrap_or(u64::MAX);
        for record in &fresh.states {
            let key = (
                (record.session.clone(), record.actor_id.clone()),
                record.counter,
            );
            if self.states.contains_key(&key) {
                continue;
            }
            self.states.insert(
                key,
                StateNode {
                    acting: record.acting,
                    targeted: record.targeted,
                    position: record.position,
                    health: record.health,
                    armor: record.armor,
                    prev: None,
                },
            );
            created(true);
            let state_links = 1_u64.saturating_add(u64::from(record.position.is_some()));
            links = links.saturating_add(state_links);
        }

        stats.links_created = links;
        stats.duplicates_skipped = duplicates;
        if duplicates > 0 {
            warn!(
                duplicates,
                "events with already-stored counters skipped, first write kept"
            );
        }
        stats
    }

    fn retarget_current(&mut self) -> u64 {
        let pointed = pointed_at(&self.states);
        let mut heads: BTreeMap<&StateScope, u64> = BTreeMap::new();
        for key in self.states.keys() {
            if pointed.contains(key) {
                continue;
            }
            let (scope, counter) = key;
            let head = heads.entry(scope).or_insert(*counter);
            *head = (*head).max(*counter);
        }

        let mut moved = 0_u64;
        for (scope, head) in heads {
            let Some(actor) = self.actors.get_mut(scope) else {
                continue;
            };
            if actor.current != Some(head) {
                actor.current = Some(head);
                moved = moved.saturating_add(1);
            }
        }
        moved
    }

    fn set_initial(&mut self) -> u64 {
        let mut moved = 0_u64;
        for (scope, actor) in &mut self.actors {
            let (Some(current), None) = (actor.current, actor.initial) else {
                continue;
            };
            let prev_of = |counter: &u64| {
                self.states
                    .get(&(scope.clone(), *counter))
                    .and_then(|node| node.prev)
            };
            match walk_to_tail(current, prev_of) {
                Ok(tail) => {
                    actor.initial = Some(tail);
                    moved = moved.saturating_add(1);
                }
                Err(e) => {
                    warn!(
                        session = %scope.0,
                        actor = %scope.1,
                        error = %e,
                        "state chain is cyclic, initial state not set"
                    );
                }
            }
        }
        moved
    }
}

/// Keys that some node in the table links to as its predecessor.
fn pointed_at<S: Ord + Clone, N: Chained>(table: &BTreeMap<(S, u64), N>) -> BTreeSet<(S, u64)> {
    table
        .iter()
        .filter_map(|((scope, _), node)| node.prev().map(|prev| (scope.clone(), prev)))
        .collect()
}

/// Plan and apply links for every scope in the table. Returns links made.
fn thread_chains<S: Ord + Clone, N: Chained>(table: &mut BTreeMap<(S, u64), N>) -> u64 {
    let pointed = pointed_at(table);
    let mut scopes: BTreeMap<S, Vec<Candidate<u64>>> = BTreeMap::new();
    for (key, node) in table.iter() {
        if pointed.contains(key) {
            continue;
        }
        scopes.entry(key.0.clone()).or_default().push(Candidate {
            key: key.1,
            linked: node.prev().is_some(),
        });
    }

    let mut created = 0_u64;
    for (scope, candidates) in scopes {
        let plan = plan_links(candidates);
        for link in plan.links {
            if let Some(node) = table.get_mut(&(scope.clone(), link.node)) {
                node.set_prev(Some(link.prev));
                created = created.saturating_add(1);
            }
        }
        for late in plan.late {
            created = created.saturating_add(splice(table, &scope, late));
        }
    }
    created
}

/// Thread a late node in front of its in-chain successor. Returns links made.
fn splice<S: Ord + Clone, N: Chained>(
    table: &mut BTreeMap<(S, u64), N>,
    scope: &S,
    late: u64,
) -> u64 {
    let pointed = pointed_at(table);
    let successor = table
        .range((
            Bound::Excluded((scope.clone(), late)),
            Bound::Unbounded,
        ))
        .take_while(|((node_scope, _), _)| node_scope == scope)
        .find(|(key, node)| node.prev().is_some() || pointed.contains(*key))
        .map(|((_, key), node)| (*key, node.prev()));

    let Some((successor, predecessor)) = successor else {
        return 0;
    };
    let plan = Splice {
        late,
        successor,
        predecessor,
    };
    debug!(late, successor, "splicing late node into chain");

    let (repointed, added) = plan.links();
    let mut created = 0_u64;
    for link in core::iter::once(repointed).chain(added) {
        if let Some(node) = table.get_mut(&(scope.clone(), link.node)) {
            node.set_prev(Some(link.prev));
            created = created.saturating_add(1);
        }
    }
    created
}

/// The greatest key in `scope` that nothing links to.
fn chain_head<S: Ord + Clone, N: Chained>(table: &BTreeMap<(S, u64), N>, scope: &S) -> Option<u64> {
    let pointed = pointed_at(table);
    table
        .keys()
        .filter(|(node_scope, _)| node_scope == scope)
        .filter(|key| !pointed.contains(*key))
        .map(|(_, key)| *key)
        .max()
}

/// Follow previous links from `start`, bounded by the table size.
fn collect_chain<S: Ord + Clone, N: Chained>(
    table: &BTreeMap<(S, u64), N>,
    scope: &S,
    start: Option<u64>,
) -> Vec<u64> {
    let mut chain = Vec::new();
    let mut next = start;
    while let Some(key) = next {
        if chain.len() >= table.len() {
            break;
        }
        chain.push(key);
        next = table.get(&(scope.clone(), key)).and_then(Chained::prev);
    }
    chain
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use proptest::prelude::*;
    use ticktrail_types::{ActorSnapshot, FrameStamp, TelemetryEvent};

    use super::*;
    use crate::compiler::compile_events;
    use crate::threading::sequence;

    fn session() -> SessionId {
        SessionId::new("abc")
    }

    fn event(counter: u64, tic: u64, actor: &str) -> TelemetryEvent {
        TelemetryEvent {
            session: session(),
            counter,
            event_type: EventType::Move,
            frame: FrameStamp {
                tic,
                millis: tic.saturating_mul(28),
            },
            actor: ActorSnapshot {
                id: ActorId::new(actor),
                kind: ActorKind::Player,
                position: Some(Position {
                    x: 10,
                    y: -20,
                    z: 0,
                    angle: 4_026_531_840,
                    subsector: SubSectorId(4_350_048_376),
                }),
                health: 100,
                armor: 0,
            },
            target: None,
            level: None,
        }
    }

    async fn ingest(graph: &MemoryGraph, events: &[TelemetryEvent]) -> WriteStats {
        let (insert, _) = compile_events(events).unwrap();
        let stats = graph.execute(&Mutation::Insert(insert)).await.unwrap();
        graph.execute_sequence(&sequence()).await.unwrap();
        stats
    }

    #[tokio::test]
    async fn four_actor_scenario() {
        let graph = MemoryGraph::new();
        ingest(
            &graph,
            &[
                event(1, 1407, "a"),
                event(21, 1407, "b"),
                event(33, 1408, "c"),
                event(44, 1408, "d"),
            ],
        )
        .await;

        let counts = graph.counts().await;
        assert_eq!(counts.frames, 2);
        assert_eq!(counts.actors, 4);
        assert_eq!(counts.states, 4);
        assert_eq!(counts.subsectors, 1);

        for (actor, counter) in [("a", 1), ("b", 21), ("c", 33), ("d", 44)] {
            let node = graph.actor(&session(), &ActorId::new(actor)).await.unwrap();
            assert_eq!(node.current, Some(counter));
            assert_eq!(node.initial, Some(counter));
        }
        assert_eq!(graph.event_chain(&session()).await, vec![44, 33, 21, 1]);
        assert_eq!(graph.frame_chain(&session()).await, vec![1408, 1407]);
    }

    #[tokio::test]
    async fn frame_merge_keeps_first_millis() {
        let graph = MemoryGraph::new();
        let mut first = event(1, 5, "a");
        first.frame.millis = 111;
        let mut second = event(2, 5, "a");
        second.frame.millis = 999;
        ingest(&graph, &[first]).await;
        ingest(&graph, &[second]).await;

        assert_eq!(graph.counts().await.frames, 1);
        assert_eq!(graph.frame(&session(), 5).await.unwrap().millis, 111);
    }

    #[tokio::test]
    async fn threading_is_idempotent() {
        let graph = MemoryGraph::new();
        ingest(&graph, &[event(1, 1, "a"), event(2, 2, "a")]).await;
        ingest(&graph, &[event(3, 3, "a")]).await;

        let mut second_run = WriteStats::default();
        for mutation in sequence() {
            second_run.absorb(graph.execute(&mutation).await.unwrap());
        }
        assert!(second_run.is_noop());
        assert_eq!(
            graph.state_chain(&session(), &ActorId::new("a")).await,
            vec![3, 2, 1]
        );
    }

    #[tokio::test]
    async fn chains_extend_across_batches_without_rethreading() {
        let graph = MemoryGraph::new();
        ingest(&graph, &[event(1, 1, "a"), event(2, 1, "a")]).await;
        let actor = graph.actor(&session(), &ActorId::new("a")).await.unwrap();
        assert_eq!((actor.current, actor.initial), (Some(2), Some(1)));

        ingest(&graph, &[event(3, 2, "a"), event(4, 2, "a")]).await;
        let actor = graph.actor(&session(), &ActorId::new("a")).await.unwrap();
        assert_eq!(actor.current, Some(4));
        assert_eq!(actor.initial, Some(1));
        assert_eq!(
            graph.state_chain(&session(), &ActorId::new("a")).await,
            vec![4, 3, 2, 1]
        );
    }

    #[tokio::test]
    async fn late_batch_is_spliced_in_order() {
        let graph = MemoryGraph::new();
        ingest(&graph, &[event(10, 10, "a"), event(30, 30, "a")]).await;
        ingest(&graph, &[event(20, 20, "a"), event(40, 40, "a")]).await;

        assert_eq!(
            graph.state_chain(&session(), &ActorId::new("a")).await,
            vec![40, 30, 20, 10]
        );
        assert_eq!(graph.event_chain(&session()).await, vec![40, 30, 20, 10]);
        assert_eq!(graph.frame_chain(&session()).await, vec![40, 30, 20, 10]);
    }

    #[tokio::test]
    async fn initial_state_never_moves() {
        let graph = MemoryGraph::new();
        ingest(&graph, &[event(10, 10, "a"), event(11, 11, "a")]).await;
        ingest(&graph, &[event(5, 5, "a")]).await;

        let actor = graph.actor(&session(), &ActorId::new("a")).await.unwrap();
        assert_eq!(actor.initial, Some(10));
        assert_eq!(actor.current, Some(11));
        assert_eq!(
            graph.state_chain(&session(), &ActorId::new("a")).await,
            vec![11, 10, 5]
        );
    }

    #[tokio::test]
    async fn cross_batch_duplicate_counter_keeps_first() {
        let graph = MemoryGraph::new();
        ingest(&graph, &[event(1, 1, "a")]).await;
        let stats = ingest(&graph, &[event(1, 2, "b")]).await;

        assert_eq!(stats.duplicates_skipped, 1);
        assert_eq!(graph.event(&session(), 1).await.unwrap().tic, 1);
        assert!(graph.state(&session(), &ActorId::new("b"), 1).await.is_none());
    }

    #[tokio::test]
    async fn duplicate_event_leaves_no_orphan_nodes() {
        let graph = MemoryGraph::new();
        ingest(&graph, &[event(1, 1, "a")]).await;
        let before = graph.counts().await;

        let mut replay = event(1, 2, "b");
        if let Some(position) = replay.actor.position.as_mut() {
            position.subsector = SubSectorId(77);
        }
        let stats = ingest(&graph, &[replay]).await;

        assert_eq!(stats.duplicates_skipped, 1);
        assert_eq!(stats.nodes_created, 0);
        assert_eq!(graph.counts().await, before);
        assert!(graph.actor(&session(), &ActorId::new("b")).await.is_none());
        assert!(!graph.has_subsector(&session(), SubSectorId(77)).await);
        assert!(graph.frame(&session(), 2).await.is_none());
    }

    #[tokio::test]
    async fn round_trip_preserves_fields() {
        let graph = MemoryGraph::new();
        let mut original = event(7, 9, "a");
        original.level = Some(LevelInfo {
            episode: 1,
            map: 2,
            difficulty: 3,
        });
        original.actor.health = -5;
        original.actor.armor = 42;
        ingest(&graph, &[original.clone()]).await;

        let stored_event = graph.event(&session(), 7).await.unwrap();
        assert_eq!(stored_event.event_type, original.event_type);
        assert_eq!(stored_event.tic, 9);
        assert_eq!(stored_event.level, original.level);
        let stored_state = graph.state(&session(), &ActorId::new("a"), 7).await.unwrap();
        assert_eq!(stored_state.position, original.actor.position);
        assert_eq!(stored_state.health, -5);
        assert_eq!(stored_state.armor, 42);
        assert!(stored_state.acting);
        assert_eq!(
            graph.frame(&session(), 9).await.unwrap().millis,
            original.frame.millis
        );
        assert!(
            graph
                .has_subsector(&session(), SubSectorId(4_350_048_376))
                .await
        );
    }

    /// Batches of events with distinct counters, arriving in any order.
    ///
    /// Each event has an acting actor out of four and maybe a target;
    /// counters are spaced so late arrivals land between stored ones, and
    /// two events share each tic.
    fn arrivals() -> impl Strategy<Value = Vec<Vec<TelemetryEvent>>> {
        prop::collection::vec((0_u8..4, prop::option::of(0_u8..4)), 1..40)
            .prop_flat_map(|roles| {
                let len = roles.len();
                let order = Just((0..len).collect::<Vec<_>>()).prop_shuffle();
                (Just(roles), order, prop::collection::vec(any::<bool>(), len))
            })
            .prop_map(|(roles, order, cuts)| {
                let mut batches = vec![Vec::new()];
                for (position, index) in order.into_iter().enumerate() {
                    let (actor, target) = roles.get(index).copied().unwrap();
                    let counter = u64::try_from(index).unwrap().saturating_mul(3).saturating_add(1);
                    let mut telemetry = event(counter, counter.saturating_div(2), &format!("actor-{actor}"));
                    telemetry.target = target.map(|target| ActorSnapshot {
                        id: ActorId::new(format!("actor-{target}")),
                        kind: ActorKind::Imp,
                        position: None,
                        health: 60,
                        armor: 0,
                    });
                    batches.last_mut().unwrap().push(telemetry);
                    if cuts.get(position).copied().unwrap_or(false) {
                        batches.push(Vec::new());
                    }
                }
                batches.retain(|batch| !batch.is_empty());
                batches
            })
    }

    async fn check_chains(batches: &[Vec<TelemetryEvent>]) {
        let graph = MemoryGraph::new();
        let mut participation: BTreeMap<ActorId, BTreeSet<u64>> = BTreeMap::new();
        let mut first_tail: BTreeMap<ActorId, u64> = BTreeMap::new();
        let mut counters = BTreeSet::new();
        let mut tics = BTreeSet::new();

        for batch in batches {
            let mut in_batch: BTreeMap<ActorId, u64> = BTreeMap::new();
            for telemetry in batch {
                counters.insert(telemetry.counter);
                tics.insert(telemetry.frame.tic);
                for (_, snapshot) in telemetry.participants() {
                    participation
                        .entry(snapshot.id.clone())
                        .or_default()
                        .insert(telemetry.counter);
                    let lowest = in_batch.entry(snapshot.id.clone()).or_insert(telemetry.counter);
                    *lowest = (*lowest).min(telemetry.counter);
                }
            }
            for (actor, lowest) in in_batch {
                first_tail.entry(actor).or_insert(lowest);
            }
            ingest(&graph, batch).await;
        }

        let descending = |keys: &BTreeSet<u64>| keys.iter().rev().copied().collect::<Vec<_>>();
        assert_eq!(graph.event_chain(&session()).await, descending(&counters));
        assert_eq!(graph.frame_chain(&session()).await, descending(&tics));

        for (actor, states) in &participation {
            let chain = graph.state_chain(&session(), actor).await;
            assert_eq!(chain, descending(states), "state chain of {actor}");
            let node = graph.actor(&session(), actor).await.unwrap();
            assert_eq!(node.current, states.last().copied(), "current of {actor}");
            // The tail when the actor was first threaded; later, lower
            // arrivals extend the chain without moving it.
            assert_eq!(node.initial, first_tail.get(actor).copied(), "initial of {actor}");
            assert!(chain.contains(&node.initial.unwrap()));
            if batches.len() == 1 {
                assert_eq!(node.initial, chain.last().copied());
            }
        }

        let mut rerun = WriteStats::default();
        for mutation in sequence() {
            rerun.absorb(graph.execute(&mutation).await.unwrap());
        }
        assert!(rerun.is_noop(), "re-threading changed the graph: {rerun:?}");
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, .. ProptestConfig::default() })]

        #[test]
        fn chains_and_pointers_hold_for_any_arrival_order(batches in arrivals()) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            runtime.block_on(check_chains(&batches));
        }
    }

    #[tokio::test]
    async fn in_order_arrival_keeps_initial_at_tail() {
        let graph = MemoryGraph::new();
        ingest(&graph, &[event(1, 1, "a"), event(4, 2, "a")]).await;
        ingest(&graph, &[event(7, 3, "a")]).await;

        let chain = graph.state_chain(&session(), &ActorId::new("a")).await;
        let actor = graph.actor(&session(), &ActorId::new("a")).await.unwrap();
        assert_eq!(actor.current, chain.first().copied());
        assert_eq!(actor.initial, chain.last().copied());
    }
}
