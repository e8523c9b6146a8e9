//! Activity log: append inside the caller's transaction, read for audit.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use super::{from_millis, to_millis};
use crate::error::Result;
use crate::model::{Action, ActivityEntry, TicketKey};

/// Append one activity entry on the given connection (usually a transaction).
pub(crate) async fn record_on(
    conn: &mut SqliteConnection,
    key: &TicketKey,
    action: &Action,
    worker_id: Option<&str>,
    summary: &str,
    at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO activity (ticket_key, action, worker_id, summary, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )
    .bind(key.to_string())
    .bind(action.to_string())
    .bind(worker_id)
    .bind(summary)
    .bind(to_millis(at))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

#[derive(sqlx::FromRow)]
struct ActivityRow {
    seq: i64,
    ticket_key: String,
    action: String,
    worker_id: Option<String>,
    summary: String,
    timestamp: i64,
}

impl ActivityRow {
    fn try_into_entry(self) -> Result<ActivityEntry> {
        Ok(ActivityEntry {
            seq: self.seq,
            ticket_key: self.ticket_key.parse()?,
            action: Action::parse(&self.action),
            worker_id: self.worker_id,
            summary: self.summary,
            timestamp: from_millis(self.timestamp)?,
        })
    }
}

impl super::Db {
    /// Activity entries in sequence order, optionally for one ticket.
    pub async fn activity(
        &self,
        ticket: Option<&TicketKey>,
        limit: Option<u32>,
    ) -> Result<Vec<ActivityEntry>> {
        let rows: Vec<ActivityRow> = sqlx::query_as(
            "SELECT seq, ticket_key, action, worker_id, summary, timestamp FROM activity
             WHERE (?1 IS NULL OR ticket_key = ?1)
             ORDER BY seq ASC
             LIMIT ?2",
        )
        .bind(ticket.map(|k| k.to_string()))
        .bind(limit.map(i64::from).unwrap_or(-1))
        .fetch_all(self.pool())
        .await?;

        rows.into_iter().map(ActivityRow::try_into_entry).collect()
    }
}
