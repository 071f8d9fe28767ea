//! [`StoreGateway`] over `PostgreSQL`.
//!
//! Each gateway call is one transaction. The transaction first takes a
//! transaction-scoped advisory lock so concurrent writers (another ingest
//! process, or a catch-up pass) never interleave threading steps.
//!
//! Bulk inserts use `UNNEST` arrays with `ON CONFLICT DO NOTHING`, which
//! makes them idempotent: frames, actors, and subsectors keep their first
//! attributes. An event whose counter is already stored is skipped
//! together with its states and with any frame, actor, or subsector that
//! only it referred to.

use std::collections::{HashMap, HashSet};

use sqlx::{PgConnection, PgPool};
use ticktrail_core::gateway::{Mutation, StoreError, StoreGateway, ThreadStep, WriteStats};
use ticktrail_core::graph::{BulkInsert, StateRecord};
use ticktrail_core::memory::GraphCounts;
use ticktrail_core::threading::walk_to_tail;
use ticktrail_types::{ActorId, SessionId};
use tracing::{debug, warn};

use crate::chains::{self, EVENTS, FRAMES, STATES};
use crate::error::DbError;
use crate::postgres::PostgresPool;
use crate::{from_db, keys_to_db, to_db};

/// Advisory lock key shared by every ticktrail writer.
const GRAPH_LOCK_KEY: i64 = 0x7469_636b_7472_6169;

/// Actor pointers as stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActorPointers {
    /// Counter of the current state.
    pub current: Option<u64>,
    /// Counter of the initial state.
    pub initial: Option<u64>,
}

/// `PostgreSQL`-backed graph store.
#[derive(Debug, Clone)]
pub struct PgGraphStore {
    pool: PgPool,
}

impl PgGraphStore {
    /// Wrap a connected pool.
    pub fn new(pool: &PostgresPool) -> Self {
        Self {
            pool: pool.pool().clone(),
        }
    }

    /// Run mutations in order inside one locked transaction.
    async fn run(&self, mutations: &[Mutation]) -> Result<WriteStats, DbError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(GRAPH_LOCK_KEY)
            .execute(&mut *tx)
            .await?;

        let mut total = WriteStats::default();
        for mutation in mutations {
            total.absorb(apply(&mut *tx, mutation).await?);
        }
        tx.commit().await?;
        Ok(total)
    }

    /// Node totals across all sessions.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails.
    pub async fn counts(&self) -> Result<GraphCounts, DbError> {
        let (frames, events, actors, subsectors, states): (i64, i64, i64, i64, i64) =
            sqlx::query_as(
                r"SELECT
                      (SELECT COUNT(*) FROM frames),
                      (SELECT COUNT(*) FROM events),
                      (SELECT COUNT(*) FROM actors),
                      (SELECT COUNT(*) FROM subsectors),
                      (SELECT COUNT(*) FROM states)",
            )
            .fetch_one(&self.pool)
            .await?;
        let count = |n: i64| usize::try_from(n).unwrap_or_default();
        Ok(GraphCounts {
            frames: count(frames),
            events: count(events),
            actors: count(actors),
            subsectors: count(subsectors),
            states: count(states),
        })
    }

    /// Current and initial pointers of one actor.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails.
    pub async fn actor_pointers(
        &self,
        session: &SessionId,
        actor: &ActorId,
    ) -> Result<Option<ActorPointers>, DbError> {
        let row: Option<(Option<i64>, Option<i64>)> = sqlx::query_as(
            r"SELECT current_counter, initial_counter FROM actors
              WHERE session = $1 AND actor_id = $2",
        )
        .bind(session.as_str())
        .bind(actor.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(current, initial)| ActorPointers {
            current: current.map(from_db),
            initial: initial.map(from_db),
        }))
    }

    /// State counters of one actor, newest first, walked from `current`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if a query fails.
    pub async fn state_chain(
        &self,
        session: &SessionId,
        actor: &ActorId,
    ) -> Result<Vec<u64>, DbError> {
        let Some(ActorPointers {
            current: Some(current),
            ..
        }) = self.actor_pointers(session, actor).await?
        else {
            return Ok(Vec::new());
        };

        let mut conn = self.pool.acquire().await?;
        let prev_links = chains::state_links(&mut conn, session.as_str(), actor.as_str()).await?;

        let mut chain = Vec::new();
        let walked = walk_to_tail(current, |counter| {
            chain.push(*counter);
            prev_links.get(counter).copied()
        });
        if let Err(e) = walked {
            warn!(session = %session, actor = %actor, error = %e, "state chain is cyclic");
        }
        Ok(chain)
    }

    /// Wall-clock offset stored for one frame.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails.
    pub async fn frame_millis(&self, session: &SessionId, tic: u64) -> Result<Option<u64>, DbError> {
        let millis: Option<i64> =
            sqlx::query_scalar("SELECT millis FROM frames WHERE session = $1 AND tic = $2")
                .bind(session.as_str())
                .bind(to_db(tic)?)
                .fetch_optional(&self.pool)
                .await?;
        Ok(millis.map(from_db))
    }
}

impl StoreGateway for PgGraphStore {
    async fn execute(&self, mutation: &Mutation) -> Result<WriteStats, StoreError> {
        Ok(self.run(core::slice::from_ref(mutation)).await?)
    }

    async fn execute_sequence(&self, mutations: &[Mutation]) -> Result<(), StoreError> {
        let total = self.run(mutations).await?;
        debug!(
            mutations = mutations.len(),
            links_created = total.links_created,
            pointers_moved = total.pointers_moved,
            "PostgreSQL sequence committed"
        );
        Ok(())
    }
}

async fn apply(conn: &mut PgConnection, mutation: &Mutation) -> Result<WriteStats, DbError> {
    let stats = match mutation {
        Mutation::Insert(insert) => bulk_insert(conn, insert).await?,
        Mutation::Thread(ThreadStep::Frames) => WriteStats {
            links_created: chains::thread(conn, FRAMES).await?,
            ..WriteStats::default()
        },
        Mutation::Thread(ThreadStep::Events) => WriteStats {
            links_created: chains::thread(conn, EVENTS).await?,
            ..WriteStats::default()
        },
        Mutation::Thread(ThreadStep::States) => WriteStats {
            links_created: chains::thread(conn, STATES).await?,
            ..WriteStats::default()
        },
        Mutation::Thread(ThreadStep::RetargetCurrent) => WriteStats {
            pointers_moved: chains::retarget_current(conn).await?,
            ..WriteStats::default()
        },
        Mutation::Thread(ThreadStep::SetInitial) => WriteStats {
            pointers_moved: chains::set_initial(conn).await?,
            ..WriteStats::default()
        },
    };
    Ok(stats)
}

async fn bulk_insert(conn: &mut PgConnection, insert: &BulkInsert) -> Result<WriteStats, DbError> {
    if insert.is_empty() {
        return Ok(WriteStats::default());
    }

    // The advisory lock is held, so nothing can store these counters
    // between this lookup and the inserts below.
    let stored = stored_counters(conn, insert).await?;
    let fresh = insert.without_stored(|session, counter| {
        stored
            .get(session.as_str())
            .is_some_and(|counters| counters.contains(&counter))
    });
    let duplicates = u64::try_from(insert.events.len().saturating_sub(fresh.events.len()))
        .unwrap_or(u64::MAX);
    if duplicates > 0 {
        warn!(
            duplicates,
            "events with already-stored counters skipped, first write kept"
        );
    }
    if fresh.is_empty() {
        return Ok(WriteStats {
            duplicates_skipped: duplicates,
            ..WriteStats::default()
        });
    }

    let mut nodes = insert_frames(conn, &fresh).await?;
    nodes = nodes.saturating_add(insert_subsectors(conn, &fresh).await?);
    nodes = nodes.saturating_add(insert_actors(conn, &fresh).await?);
    let events = insert_events(conn, &fresh).await?;
    let (state_nodes, state_links) = insert_states(conn, &fresh.states).await?;

    Ok(WriteStats {
        nodes_created: nodes.saturating_add(events).saturating_add(state_nodes),
        links_created: events.saturating_add(state_links),
        pointers_moved: 0,
        duplicates_skipped: duplicates,
    })
}

/// Counters in `insert` that are already stored, grouped by session.
async fn stored_counters(
    conn: &mut PgConnection,
    insert: &BulkInsert,
) -> Result<HashMap<String, HashSet<u64>>, DbError> {
    let sessions: Vec<&str> = insert.events.iter().map(|e| e.session.as_str()).collect();
    let counters = keys_to_db(insert.events.iter().map(|e| e.counter))?;

    let rows: Vec<(String, i64)> = sqlx::query_as(
        r"SELECT e.session, e.counter
          FROM events e
          JOIN UNNEST($1::TEXT[], $2::BIGINT[]) AS u(session, counter)
            ON e.session = u.session AND e.counter = u.counter",
    )
    .bind(&sessions)
    .bind(&counters)
    .fetch_all(&mut *conn)
    .await?;

    let mut stored: HashMap<String, HashSet<u64>> = HashMap::new();
    for (session, counter) in rows {
        stored.entry(session).or_default().insert(from_db(counter));
    }
    Ok(stored)
}

async fn insert_frames(conn: &mut PgConnection, insert: &BulkInsert) -> Result<u64, DbError> {
    let sessions: Vec<&str> = insert.frames.iter().map(|f| f.session.as_str()).collect();
    let tics = keys_to_db(insert.frames.iter().map(|f| f.tic))?;
    let millis = keys_to_db(insert.frames.iter().map(|f| f.millis))?;

    let result = sqlx::query(
        r"INSERT INTO frames (session, tic, millis)
          SELECT * FROM UNNEST($1::TEXT[], $2::BIGINT[], $3::BIGINT[])
          ON CONFLICT (session, tic) DO NOTHING",
    )
    .bind(&sessions)
    .bind(&tics)
    .bind(&millis)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

async fn insert_subsectors(conn: &mut PgConnection, insert: &BulkInsert) -> Result<u64, DbError> {
    if insert.subsectors.is_empty() {
        return Ok(0);
    }
    let sessions: Vec<&str> = insert.subsectors.iter().map(|s| s.session.as_str()).collect();
    let ids = keys_to_db(insert.subsectors.iter().map(|s| s.subsector.into_inner()))?;

    let result = sqlx::query(
        r"INSERT INTO subsectors (session, subsector)
          SELECT * FROM UNNEST($1::TEXT[], $2::BIGINT[])
          ON CONFLICT (session, subsector) DO NOTHING",
    )
    .bind(&sessions)
    .bind(&ids)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

async fn insert_actors(conn: &mut PgConnection, insert: &BulkInsert) -> Result<u64, DbError> {
    let len = insert.actors.len();
    let mut sessions = Vec::with_capacity(len);
    let mut actor_ids = Vec::with_capacity(len);
    let mut kinds = Vec::with_capacity(len);
    for actor in &insert.actors {
        sessions.push(actor.session.as_str());
        actor_ids.push(actor.actor_id.as_str());
        kinds.push(actor.kind.as_str());
    }

    let result = sqlx::query(
        r"INSERT INTO actors (session, actor_id, kind)
          SELECT * FROM UNNEST($1::TEXT[], $2::TEXT[], $3::TEXT[])
          ON CONFLICT (session, actor_id) DO NOTHING",
    )
    .bind(&sessions)
    .bind(&actor_ids)
    .bind(&kinds)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

/// Insert events. Returns how many rows were written.
async fn insert_events(conn: &mut PgConnection, insert: &BulkInsert) -> Result<u64, DbError> {
    let len = insert.events.len();
    let mut sessions = Vec::with_capacity(len);
    let mut counters = Vec::with_capacity(len);
    let mut event_types = Vec::with_capacity(len);
    let mut tics = Vec::with_capacity(len);
    let mut episodes: Vec<Option<i64>> = Vec::with_capacity(len);
    let mut maps: Vec<Option<i64>> = Vec::with_capacity(len);
    let mut difficulties: Vec<Option<i64>> = Vec::with_capacity(len);
    for event in &insert.events {
        sessions.push(event.session.as_str());
        counters.push(to_db(event.counter)?);
        event_types.push(event.event_type.as_str());
        tics.push(to_db(event.tic)?);
        episodes.push(event.level.map(|level| i64::from(level.episode)));
        maps.push(event.level.map(|level| i64::from(level.map)));
        difficulties.push(event.level.map(|level| i64::from(level.difficulty)));
    }

    let result = sqlx::query(
        r"INSERT INTO events (session, counter, event_type, tic, episode, map, difficulty)
          SELECT * FROM UNNEST($1::TEXT[], $2::BIGINT[], $3::TEXT[], $4::BIGINT[], $5::BIGINT[], $6::BIGINT[], $7::BIGINT[])
          ON CONFLICT (session, counter) DO NOTHING",
    )
    .bind(&sessions)
    .bind(&counters)
    .bind(&event_types)
    .bind(&tics)
    .bind(&episodes)
    .bind(&maps)
    .bind(&difficulties)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

/// Insert states. Returns (nodes created, links created).
async fn insert_states(
    conn: &mut PgConnection,
    states: &[StateRecord],
) -> Result<(u64, u64), DbError> {
    if states.is_empty() {
        return Ok((0, 0));
    }

    let len = states.len();
    let mut sessions = Vec::with_capacity(len);
    let mut actor_ids = Vec::with_capacity(len);
    let mut counters = Vec::with_capacity(len);
    let mut acting = Vec::with_capacity(len);
    let mut targeted = Vec::with_capacity(len);
    let mut xs: Vec<Option<i32>> = Vec::with_capacity(len);
    let mut ys: Vec<Option<i32>> = Vec::with_capacity(len);
    let mut zs: Vec<Option<i32>> = Vec::with_capacity(len);
    let mut angles: Vec<Option<i64>> = Vec::with_capacity(len);
    let mut subsectors: Vec<Option<i64>> = Vec::with_capacity(len);
    let mut healths = Vec::with_capacity(len);
    let mut armors = Vec::with_capacity(len);
    let mut links = 0_u64;
    for state in states {
        sessions.push(state.session.as_str());
        actor_ids.push(state.actor_id.as_str());
        counters.push(to_db(state.counter)?);
        acting.push(state.acting);
        targeted.push(state.targeted);
        xs.push(state.position.map(|p| p.x));
        ys.push(state.position.map(|p| p.y));
        zs.push(state.position.map(|p| p.z));
        angles.push(state.position.map(|p| i64::from(p.angle)));
        subsectors.push(
            state
                .position
                .map(|p| to_db(p.subsector.into_inner()))
                .transpose()?,
        );
        healths.push(state.health);
        armors.push(state.armor);
        // Actor and event links, plus the subsector link when positioned.
        links = links
            .saturating_add(1)
            .saturating_add(u64::from(state.position.is_some()));
    }

    let result = sqlx::query(
        r"INSERT INTO states (session, actor_id, counter, acting, targeted, x, y, z, angle, subsector, health, armor)
          SELECT * FROM UNNEST($1::TEXT[], $2::TEXT[], $3::BIGINT[], $4::BOOLEAN[], $5::BOOLEAN[], $6::INTEGER[], $7::INTEGER[], $8::INTEGER[], $9::BIGINT[], $10::BIGINT[], $11::INTEGER[], $12::INTEGER[])
          ON CONFLICT (session, actor_id, counter) DO NOTHING",
    )
    .bind(&sessions)
    .bind(&actor_ids)
    .bind(&counters)
    .bind(&acting)
    .bind(&targeted)
    .bind(&xs)
    .bind(&ys)
    .bind(&zs)
    .bind(&angles)
    .bind(&subsectors)
    .bind(&healths)
    .bind(&armors)
    .execute(&mut *conn)
    .await?;
    Ok((result.rows_affected(), links))
}
