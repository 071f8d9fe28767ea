//! Threading steps executed as SQL.
//!
//! Chain decisions come from [`ticktrail_core::threading`]: candidates (rows
//! nobody points at) are read per scope, [`plan_links`] decides the new
//! links, and late rows are spliced one at a time. Pointer maintenance is a
//! single statement for `current` and a host-side tail walk for `initial`.
//!
//! Every function runs on the caller's transaction.

use std::collections::BTreeMap;

use sqlx::PgConnection;
use ticktrail_core::threading::{Candidate, Link, Splice, plan_links, walk_to_tail};
use tracing::{debug, warn};

use crate::error::DbError;
use crate::{from_db, keys_to_db, to_db};

/// A table whose rows form per-scope chains through a previous-key column.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ChainTable {
    table: &'static str,
    key: &'static str,
    prev: &'static str,
    /// Chains are per actor rather than per session.
    per_actor: bool,
}

pub(crate) const FRAMES: ChainTable = ChainTable {
    table: "frames",
    key: "tic",
    prev: "prev_tic",
    per_actor: false,
};

pub(crate) const EVENTS: ChainTable = ChainTable {
    table: "events",
    key: "counter",
    prev: "prev_counter",
    per_actor: false,
};

pub(crate) const STATES: ChainTable = ChainTable {
    table: "states",
    key: "counter",
    prev: "prev_counter",
    per_actor: true,
};

/// Session, plus actor for state chains.
type Scope = (String, Option<String>);

impl ChainTable {
    fn same_scope(self, a: &str, b: &str) -> String {
        if self.per_actor {
            format!("{a}.session = {b}.session AND {a}.actor_id = {b}.actor_id")
        } else {
            format!("{a}.session = {b}.session")
        }
    }

    fn is_pointed_at(self, alias: &str) -> String {
        let Self { table, key, prev, .. } = self;
        format!(
            "EXISTS (SELECT 1 FROM {table} n WHERE {same} AND n.{prev} = {alias}.{key})",
            same = self.same_scope("n", alias),
        )
    }

    fn candidates_sql(self) -> String {
        let Self { table, key, prev, .. } = self;
        let actor = if self.per_actor { "c.actor_id" } else { "NULL::TEXT" };
        format!(
            "SELECT c.session, {actor}, c.{key}, c.{prev} IS NOT NULL \
             FROM {table} c \
             WHERE NOT {pointed}",
            pointed = self.is_pointed_at("c"),
        )
    }

    /// `$1` key, `$2` session, `$3` actor.
    fn successor_sql(self) -> String {
        let Self { table, key, prev, .. } = self;
        let actor_filter = if self.per_actor { " AND c.actor_id = $3" } else { "" };
        format!(
            "SELECT c.{key}, c.{prev} FROM {table} c \
             WHERE c.session = $2{actor_filter} AND c.{key} > $1 \
               AND (c.{prev} IS NOT NULL OR {pointed}) \
             ORDER BY c.{key} \
             LIMIT 1",
            pointed = self.is_pointed_at("c"),
        )
    }

    fn link_sql(self) -> String {
        let Self { table, key, prev, .. } = self;
        let actor_filter = if self.per_actor { " AND t.actor_id = u.actor_id" } else { "" };
        format!(
            "UPDATE {table} AS t SET {prev} = u.prev \
             FROM UNNEST($1::TEXT[], $2::TEXT[], $3::BIGINT[], $4::BIGINT[]) \
                  AS u(session, actor_id, node, prev) \
             WHERE t.session = u.session{actor_filter} AND t.{key} = u.node"
        )
    }
}

/// Link every unlinked row of `table` into its chain. Returns links made.
pub(crate) async fn thread(conn: &mut PgConnection, table: ChainTable) -> Result<u64, DbError> {
    let rows: Vec<(String, Option<String>, i64, bool)> = sqlx::query_as(&table.candidates_sql())
        .fetch_all(&mut *conn)
        .await?;

    let mut scopes: BTreeMap<Scope, Vec<Candidate<u64>>> = BTreeMap::new();
    for (session, actor, key, linked) in rows {
        scopes.entry((session, actor)).or_default().push(Candidate {
            key: from_db(key),
            linked,
        });
    }

    let mut created = 0_u64;
    for (scope, candidates) in scopes {
        let plan = plan_links(candidates);
        created = created.saturating_add(apply_links(conn, table, &scope, &plan.links).await?);
        for late in plan.late {
            created = created.saturating_add(splice(conn, table, &scope, late).await?);
        }
    }
    Ok(created)
}

async fn apply_links(
    conn: &mut PgConnection,
    table: ChainTable,
    scope: &Scope,
    links: &[Link<u64>],
) -> Result<u64, DbError> {
    if links.is_empty() {
        return Ok(0);
    }
    let sessions = vec![scope.0.as_str(); links.len()];
    let actors = vec![scope.1.as_deref(); links.len()];
    let nodes = keys_to_db(links.iter().map(|link| link.node))?;
    let prevs = keys_to_db(links.iter().map(|link| link.prev))?;

    let result = sqlx::query(&table.link_sql())
        .bind(&sessions)
        .bind(&actors)
        .bind(&nodes)
        .bind(&prevs)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

/// Thread one late row in front of its in-chain successor.
async fn splice(
    conn: &mut PgConnection,
    table: ChainTable,
    scope: &Scope,
    late: u64,
) -> Result<u64, DbError> {
    let sql = table.successor_sql();
    let mut query = sqlx::query_as::<_, (i64, Option<i64>)>(&sql)
        .bind(to_db(late)?)
        .bind(scope.0.as_str());
    if table.per_actor {
        query = query.bind(scope.1.as_deref());
    }
    let Some((successor, predecessor)) = query.fetch_optional(&mut *conn).await? else {
        return Ok(0);
    };

    let plan = Splice {
        late,
        successor: from_db(successor),
        predecessor: predecessor.map(from_db),
    };
    debug!(
        table = table.table,
        session = %scope.0,
        late,
        successor = plan.successor,
        "splicing late row into chain"
    );

    // Repoint the successor first so no two rows ever share a predecessor.
    let (repointed, added) = plan.links();
    let mut created = apply_links(conn, table, scope, &[repointed]).await?;
    if let Some(added) = added {
        created = created.saturating_add(apply_links(conn, table, scope, &[added]).await?);
    }
    Ok(created)
}

/// Point every actor's `current_counter` at the head of its state chain.
pub(crate) async fn retarget_current(conn: &mut PgConnection) -> Result<u64, DbError> {
    let result = sqlx::query(
        r"WITH heads AS (
              SELECT s.session, s.actor_id, MAX(s.counter) AS counter
              FROM states s
              WHERE NOT EXISTS (
                  SELECT 1 FROM states n
                  WHERE n.session = s.session
                    AND n.actor_id = s.actor_id
                    AND n.prev_counter = s.counter
              )
              GROUP BY s.session, s.actor_id
          )
          UPDATE actors a
          SET current_counter = h.counter
          FROM heads h
          WHERE a.session = h.session
            AND a.actor_id = h.actor_id
            AND a.current_counter IS DISTINCT FROM h.counter",
    )
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

/// Give each actor that has a current state but no initial one its tail.
pub(crate) async fn set_initial(conn: &mut PgConnection) -> Result<u64, DbError> {
    let pending: Vec<(String, String, i64)> = sqlx::query_as(
        r"SELECT session, actor_id, current_counter
          FROM actors
          WHERE current_counter IS NOT NULL AND initial_counter IS NULL",
    )
    .fetch_all(&mut *conn)
    .await?;

    let mut moved = 0_u64;
    for (session, actor_id, current) in pending {
        let prev_links = state_links(conn, &session, &actor_id).await?;
        let tail = match walk_to_tail(from_db(current), |counter| prev_links.get(counter).copied()) {
            Ok(tail) => tail,
            Err(e) => {
                warn!(
                    session = %session,
                    actor = %actor_id,
                    error = %e,
                    "state chain is cyclic, initial state not set"
                );
                continue;
            }
        };

        let result = sqlx::query(
            r"UPDATE actors SET initial_counter = $3
              WHERE session = $1 AND actor_id = $2 AND initial_counter IS NULL",
        )
        .bind(&session)
        .bind(&actor_id)
        .bind(to_db(tail)?)
        .execute(&mut *conn)
        .await?;
        moved = moved.saturating_add(result.rows_affected());
    }
    Ok(moved)
}

/// Map of state counter to previous counter for one actor.
pub(crate) async fn state_links(
    conn: &mut PgConnection,
    session: &str,
    actor_id: &str,
) -> Result<BTreeMap<u64, u64>, DbError> {
    let rows: Vec<(i64, Option<i64>)> = sqlx::query_as(
        r"SELECT counter, prev_counter FROM states
          WHERE session = $1 AND actor_id = $2 AND prev_counter IS NOT NULL",
    )
    .bind(session)
    .bind(actor_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows
        .into_iter()
        .filter_map(|(counter, prev)| prev.map(|prev| (from_db(counter), from_db(prev))))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_queries_are_scoped_by_actor() {
        assert!(STATES.candidates_sql().contains("n.actor_id = c.actor_id"));
        assert!(STATES.successor_sql().contains("c.actor_id = $3"));
        assert!(STATES.link_sql().contains("t.actor_id = u.actor_id"));
    }

    #[test]
    fn session_chains_ignore_actor_column() {
        for table in [FRAMES, EVENTS] {
            assert!(table.candidates_sql().contains("NULL::TEXT"));
            assert!(!table.successor_sql().contains("$3"));
            assert!(!table.link_sql().contains("t.actor_id"));
        }
        assert!(FRAMES.link_sql().contains("SET prev_tic = u.prev"));
        assert!(EVENTS.successor_sql().contains("ORDER BY c.counter"));
    }
}
