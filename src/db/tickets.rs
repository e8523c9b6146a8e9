//! Project and ticket management primitives.
//!
//! Status, resolution and completion time are written only through the
//! state machine (see `claims` and [`super::Db::transition`]); nothing here
//! touches them after creation.

use std::collections::BTreeSet;

use sqlx::SqliteConnection;
use tracing::{debug, info};

use super::activity::record_on;
use super::{from_millis, now, to_millis};
use crate::error::{Error, Result};
use crate::model::ticket::validate_project_key;
use crate::model::transition;
use crate::model::*;
use crate::telemetry::metrics;
use opentelemetry::KeyValue;

/// Column list shared by every ticket query. Expects `tickets t JOIN projects p`.
pub(crate) const TICKET_SELECT: &str = "SELECT t.id, t.project_id, p.key AS project_key, t.sequence,
        t.title, t.description, t.status, t.resolution, t.complexity, t.brain,
        t.created_at, t.updated_at, t.completed_at,
        (SELECT group_concat(d.depends_on_id) FROM dependencies d WHERE d.ticket_id = t.id) AS deps
     FROM tickets t JOIN projects p ON p.id = t.project_id";

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
pub(crate) struct TicketRow {
    id: i64,
    project_id: i64,
    project_key: String,
    sequence: i64,
    title: String,
    description: String,
    status: String,
    resolution: Option<String>,
    complexity: String,
    brain: Option<String>,
    created_at: i64,
    updated_at: i64,
    completed_at: Option<i64>,
    deps: Option<String>,
}

impl TicketRow {
    pub(crate) fn try_into_ticket(self) -> Result<Ticket> {
        let dependencies = self
            .deps
            .as_deref()
            .unwrap_or("")
            .split(',')
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<i64>()
                    .map(TicketId)
                    .map_err(|e| Error::Other(format!("bad dependency id {s:?}: {e}")))
            })
            .collect::<Result<BTreeSet<_>>>()?;

        Ok(Ticket {
            id: TicketId(self.id),
            project_id: ProjectId(self.project_id),
            key: TicketKey::new(self.project_key, self.sequence),
            title: self.title,
            description: self.description,
            status: self.status.parse()?,
            resolution: self.resolution.map(|r| r.parse()).transpose()?,
            dependencies,
            complexity: self.complexity.parse()?,
            brain: self.brain,
            created_at: from_millis(self.created_at)?,
            updated_at: from_millis(self.updated_at)?,
            completed_at: self.completed_at.map(from_millis).transpose()?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ProjectRow {
    id: i64,
    key: String,
    name: String,
    created_at: i64,
}

impl ProjectRow {
    fn try_into_project(self) -> Result<Project> {
        Ok(Project {
            id: ProjectId(self.id),
            key: self.key,
            name: self.name,
            created_at: from_millis(self.created_at)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Inner functions: accept &mut SqliteConnection so they work with both
// pooled connections and open transactions.
// ---------------------------------------------------------------------------

pub(crate) async fn ticket_by_key_on(conn: &mut SqliteConnection, key: &TicketKey) -> Result<Ticket> {
    let row: Option<TicketRow> =
        sqlx::query_as(&format!("{TICKET_SELECT} WHERE p.key = ?1 AND t.sequence = ?2"))
            .bind(&key.project)
            .bind(key.sequence)
            .fetch_optional(&mut *conn)
            .await?;

    row.ok_or_else(|| Error::NotFound(format!("ticket {key}")))?
        .try_into_ticket()
}

pub(crate) async fn ticket_by_id_on(conn: &mut SqliteConnection, id: TicketId) -> Result<Ticket> {
    let row: Option<TicketRow> = sqlx::query_as(&format!("{TICKET_SELECT} WHERE t.id = ?1"))
        .bind(id.0)
        .fetch_optional(&mut *conn)
        .await?;

    row.ok_or_else(|| Error::NotFound(format!("ticket {id}")))?
        .try_into_ticket()
}

/// Persist a status change produced by the state machine.
///
/// Guarded on the status the transition was computed from; returns false if
/// the row had already moved on.
pub(crate) async fn write_status_on(
    conn: &mut SqliteConnection,
    ticket: &Ticket,
    from: Status,
) -> Result<bool> {
    let rows = sqlx::query(
        "UPDATE tickets SET status = ?1, resolution = ?2, completed_at = ?3, updated_at = ?4
         WHERE id = ?5 AND status = ?6",
    )
    .bind(ticket.status.as_str())
    .bind(ticket.resolution.map(|r| r.as_str()))
    .bind(ticket.completed_at.map(to_millis))
    .bind(to_millis(ticket.updated_at))
    .bind(ticket.id.0)
    .bind(from.as_str())
    .execute(&mut *conn)
    .await?
    .rows_affected();

    if rows > 0 {
        metrics::ticket_transitions().add(
            1,
            &[
                KeyValue::new("from", from.as_str()),
                KeyValue::new("to", ticket.status.as_str()),
            ],
        );
    }
    Ok(rows > 0)
}

impl super::Db {
    // -----------------------------------------------------------------------
    // Projects
    // -----------------------------------------------------------------------

    /// Create a project. Keys are unique and never change.
    pub async fn create_project(&self, key: &str, name: &str) -> Result<Project> {
        validate_project_key(key)?;
        if name.trim().is_empty() {
            return Err(Error::InvalidArgument("project name is empty".to_string()));
        }

        let created_at = now();
        let inserted: Option<(i64,)> = sqlx::query_as(
            "INSERT INTO projects (key, name, created_at) VALUES (?1, ?2, ?3)
             ON CONFLICT (key) DO NOTHING
             RETURNING id",
        )
        .bind(key)
        .bind(name)
        .bind(to_millis(created_at))
        .fetch_optional(self.pool())
        .await?;

        let (id,) =
            inserted.ok_or_else(|| Error::InvalidArgument(format!("project {key} already exists")))?;

        info!(project = key, "project created");
        Ok(Project {
            id: ProjectId(id),
            key: key.to_string(),
            name: name.to_string(),
            created_at,
        })
    }

    pub async fn get_project(&self, key: &str) -> Result<Project> {
        let row: Option<ProjectRow> =
            sqlx::query_as("SELECT id, key, name, created_at FROM projects WHERE key = ?1")
                .bind(key)
                .fetch_optional(self.pool())
                .await?;

        row.ok_or_else(|| Error::NotFound(format!("project {key}")))?
            .try_into_project()
    }

    pub async fn list_projects(&self) -> Result<Vec<Project>> {
        let rows: Vec<ProjectRow> =
            sqlx::query_as("SELECT id, key, name, created_at FROM projects ORDER BY key ASC")
                .fetch_all(self.pool())
                .await?;

        rows.into_iter().map(ProjectRow::try_into_project).collect()
    }

    /// Delete a project. Refused while any ticket still references it.
    pub async fn delete_project(&self, key: &str) -> Result<()> {
        let mut tx = self.pool().begin().await?;

        let deleted = sqlx::query(
            "DELETE FROM projects WHERE key = ?1
             AND NOT EXISTS (SELECT 1 FROM tickets t WHERE t.project_id = projects.id)",
        )
        .bind(key)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if deleted == 0 {
            let tickets: Option<(i64,)> = sqlx::query_as(
                "SELECT COUNT(t.id) FROM projects p LEFT JOIN tickets t ON t.project_id = p.id
                 WHERE p.key = ?1 GROUP BY p.id",
            )
            .bind(key)
            .fetch_optional(&mut *tx)
            .await?;

            return match tickets {
                None => Err(Error::NotFound(format!("project {key}"))),
                Some((n,)) => Err(Error::InvalidArgument(format!(
                    "project {key} still has {n} ticket(s)"
                ))),
            };
        }

        tx.commit().await?;
        info!(project = key, "project deleted");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Tickets
    // -----------------------------------------------------------------------

    /// Create a ticket in `Ready`, allocating the next sequence in its project.
    ///
    /// Initial prerequisites are attached in the same transaction; a new
    /// ticket has no dependents, so they cannot form a cycle.
    pub async fn create_ticket(&self, new: NewTicket) -> Result<Ticket> {
        if new.title.trim().is_empty() {
            return Err(Error::InvalidArgument("ticket title is empty".to_string()));
        }
        let project = self.get_project(&new.project_key).await?;
        let created_at = now();

        let mut tx = self.pool().begin().await?;

        let (id, sequence): (i64, i64) = sqlx::query_as(
            "INSERT INTO tickets (project_id, sequence, title, description, status, complexity, brain, created_at, updated_at)
             VALUES (?1, (SELECT COALESCE(MAX(sequence), 0) + 1 FROM tickets WHERE project_id = ?1),
                     ?2, ?3, 'ready', ?4, ?5, ?6, ?6)
             RETURNING id, sequence",
        )
        .bind(project.id.0)
        .bind(&new.title)
        .bind(&new.description)
        .bind(new.complexity.as_str())
        .bind(&new.brain)
        .bind(to_millis(created_at))
        .fetch_one(&mut *tx)
        .await?;

        let key = TicketKey::new(project.key.clone(), sequence);

        for prerequisite in &new.depends_on {
            let pre = ticket_by_key_on(&mut tx, prerequisite).await?;
            sqlx::query(
                "INSERT INTO dependencies (ticket_id, depends_on_id, created_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT DO NOTHING",
            )
            .bind(id)
            .bind(pre.id.0)
            .bind(to_millis(created_at))
            .execute(&mut *tx)
            .await?;
        }

        record_on(
            &mut tx,
            &key,
            &Action::TicketCreated,
            None,
            &format!("created {key}: {}", new.title),
            created_at,
        )
        .await?;

        let ticket = ticket_by_id_on(&mut tx, TicketId(id)).await?;
        tx.commit().await?;

        info!(ticket = %key, complexity = %ticket.complexity, "ticket created");
        Ok(ticket)
    }

    /// Get a ticket by key.
    pub async fn get_ticket(&self, key: &TicketKey) -> Result<Ticket> {
        let mut conn = self.pool().acquire().await?;
        ticket_by_key_on(&mut conn, key).await
    }

    /// List tickets by project and/or status, in key order.
    pub async fn list_tickets(&self, filter: &Filter) -> Result<Vec<Ticket>> {
        let rows: Vec<TicketRow> = sqlx::query_as(&format!(
            "{TICKET_SELECT}
             WHERE (?1 IS NULL OR p.key = ?1) AND (?2 IS NULL OR t.status = ?2)
             ORDER BY p.key ASC, t.sequence ASC
             LIMIT ?3"
        ))
        .bind(filter.project_key.as_deref())
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.sql_limit())
        .fetch_all(self.pool())
        .await?;

        rows.into_iter().map(TicketRow::try_into_ticket).collect()
    }

    /// Administrative status override, still bound by the transition table.
    ///
    /// Compare-and-swap on the observed status: if another caller moved the
    /// ticket in between, this fails with `ConcurrentConflict` rather than
    /// overwriting their change. Claims are left as they are; a claim on a
    /// ticket moved out of `Working` is cleaned up by release or expiry.
    ///
    /// `Working` is only reachable through `acquire`, which creates the claim
    /// and checks prerequisites.
    pub async fn transition(
        &self,
        key: &TicketKey,
        to: Status,
        resolution: Option<Resolution>,
    ) -> Result<Ticket> {
        let mut ticket = self.get_ticket(key).await?;
        if to == Status::Working {
            return Err(Error::State {
                key: key.to_string(),
                status: ticket.status,
                reason: "use acquire to move a ticket to working".to_string(),
            });
        }
        let at = now();
        let from = transition::apply(&mut ticket, to, resolution, at)?;

        let mut tx = self.pool().begin().await?;

        if !write_status_on(&mut tx, &ticket, from).await? {
            debug!(ticket = %key, expected = %from, "status moved during transition");
            return Err(Error::ConcurrentConflict {
                key: key.to_string(),
                detail: format!("status changed concurrently (expected {from})"),
            });
        }

        let summary = match resolution {
            Some(r) => format!("{from} -> {to} ({r})"),
            None => format!("{from} -> {to}"),
        };
        record_on(&mut tx, key, &Action::Transitioned, None, &summary, at).await?;
        tx.commit().await?;

        info!(ticket = %key, %from, %to, "ticket transitioned");
        Ok(ticket)
    }
}
