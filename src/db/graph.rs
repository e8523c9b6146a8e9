//! Dependency graph: `ticket -> prerequisite` edges.
//!
//! The relation is kept acyclic. A prerequisite counts as satisfied only
//! when it is `Closed` with resolution `Completed`; closing it any other way
//! blocks its dependents for as long as the edge exists.

use sqlx::SqliteConnection;
use tracing::{debug, info};

use super::activity::record_on;
use super::tickets::{TICKET_SELECT, TicketRow, ticket_by_key_on};
use super::{now, to_millis};
use crate::error::{Error, Result};
use crate::model::*;

/// Count of prerequisites that are not `Closed`+`Completed`.
pub(crate) async fn unsatisfied_count_on(conn: &mut SqliteConnection, id: TicketId) -> Result<i64> {
    let (n,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM dependencies d
         JOIN tickets pre ON pre.id = d.depends_on_id
         WHERE d.ticket_id = ?1
           AND NOT (pre.status = 'closed' AND pre.resolution = 'completed')",
    )
    .bind(id.0)
    .fetch_one(&mut *conn)
    .await?;
    Ok(n)
}

impl super::Db {
    /// Record that `ticket` cannot start before `prerequisite` completes.
    ///
    /// Fails with `Cycle` if `prerequisite` already depends on `ticket`,
    /// directly or transitively; the graph is left unchanged. Adding an edge
    /// that already exists is a no-op.
    pub async fn add_dependency(&self, ticket: &TicketKey, prerequisite: &TicketKey) -> Result<()> {
        if ticket == prerequisite {
            return Err(Error::InvalidArgument(format!(
                "{ticket} cannot depend on itself"
            )));
        }

        let (t, pre) = {
            let mut conn = self.pool().acquire().await?;
            let t = ticket_by_key_on(&mut conn, ticket).await?;
            let pre = ticket_by_key_on(&mut conn, prerequisite).await?;
            (t, pre)
        };
        let at = now();

        let mut tx = self.pool().begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO dependencies (ticket_id, depends_on_id, created_at) VALUES (?1, ?2, ?3)
             ON CONFLICT DO NOTHING",
        )
        .bind(t.id.0)
        .bind(pre.id.0)
        .bind(to_millis(at))
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            debug!(%ticket, %prerequisite, "dependency already present");
            return Ok(());
        }

        // With the edge in place, reaching `ticket` from `prerequisite`
        // means the edge closed a loop.
        let (cyclic,): (bool,) = sqlx::query_as(
            "WITH RECURSIVE reach(id) AS (
                 SELECT ?1
                 UNION
                 SELECT d.depends_on_id FROM dependencies d JOIN reach r ON d.ticket_id = r.id
             )
             SELECT EXISTS (SELECT 1 FROM reach WHERE id = ?2)",
        )
        .bind(pre.id.0)
        .bind(t.id.0)
        .fetch_one(&mut *tx)
        .await?;

        if cyclic {
            // dropping tx rolls the insert back
            return Err(Error::Cycle {
                ticket: ticket.to_string(),
                prerequisite: prerequisite.to_string(),
            });
        }

        record_on(
            &mut tx,
            ticket,
            &Action::DependencyAdded,
            None,
            &format!("{ticket} now depends on {prerequisite}"),
            at,
        )
        .await?;
        tx.commit().await?;

        info!(%ticket, %prerequisite, "dependency added");
        Ok(())
    }

    /// Remove an edge. Fails with `NotFound` if it doesn't exist.
    pub async fn remove_dependency(
        &self,
        ticket: &TicketKey,
        prerequisite: &TicketKey,
    ) -> Result<()> {
        let mut tx = self.pool().begin().await?;

        let removed = sqlx::query(
            "DELETE FROM dependencies
             WHERE ticket_id = (SELECT t.id FROM tickets t JOIN projects p ON p.id = t.project_id
                                WHERE p.key = ?1 AND t.sequence = ?2)
               AND depends_on_id = (SELECT t.id FROM tickets t JOIN projects p ON p.id = t.project_id
                                    WHERE p.key = ?3 AND t.sequence = ?4)",
        )
        .bind(&ticket.project)
        .bind(ticket.sequence)
        .bind(&prerequisite.project)
        .bind(prerequisite.sequence)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if removed == 0 {
            // Distinguish an unknown ticket from a missing edge.
            ticket_by_key_on(&mut tx, ticket).await?;
            ticket_by_key_on(&mut tx, prerequisite).await?;
            return Err(Error::NotFound(format!(
                "dependency {ticket} -> {prerequisite}"
            )));
        }

        record_on(
            &mut tx,
            ticket,
            &Action::DependencyRemoved,
            None,
            &format!("{ticket} no longer depends on {prerequisite}"),
            now(),
        )
        .await?;
        tx.commit().await?;

        info!(%ticket, %prerequisite, "dependency removed");
        Ok(())
    }

    /// True iff every prerequisite is `Closed` with resolution `Completed`.
    pub async fn is_satisfied(&self, ticket: &TicketKey) -> Result<bool> {
        let mut conn = self.pool().acquire().await?;
        let t = ticket_by_key_on(&mut conn, ticket).await?;
        Ok(unsatisfied_count_on(&mut conn, t.id).await? == 0)
    }

    /// Tickets that depend directly on `ticket`.
    pub async fn dependents(&self, ticket: &TicketKey) -> Result<Vec<Ticket>> {
        let mut conn = self.pool().acquire().await?;
        let t = ticket_by_key_on(&mut conn, ticket).await?;

        let rows: Vec<TicketRow> = sqlx::query_as(&format!(
            "{TICKET_SELECT}
             WHERE t.id IN (SELECT ticket_id FROM dependencies WHERE depends_on_id = ?1)
             ORDER BY p.key ASC, t.sequence ASC"
        ))
        .bind(t.id.0)
        .fetch_all(&mut *conn)
        .await?;

        rows.into_iter().map(TicketRow::try_into_ticket).collect()
    }

    /// Tickets that `ticket` depends on directly.
    pub async fn prerequisites(&self, ticket: &TicketKey) -> Result<Vec<Ticket>> {
        let mut conn = self.pool().acquire().await?;
        let t = ticket_by_key_on(&mut conn, ticket).await?;

        let rows: Vec<TicketRow> = sqlx::query_as(&format!(
            "{TICKET_SELECT}
             WHERE t.id IN (SELECT depends_on_id FROM dependencies WHERE ticket_id = ?1)
             ORDER BY p.key ASC, t.sequence ASC"
        ))
        .bind(t.id.0)
        .fetch_all(&mut *conn)
        .await?;

        rows.into_iter().map(TicketRow::try_into_ticket).collect()
    }
}
