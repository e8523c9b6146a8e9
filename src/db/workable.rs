//! Workable query: what can an agent start right now?

use tracing::debug;

use super::tickets::{TICKET_SELECT, TicketRow};
use crate::error::Result;
use crate::model::*;

impl super::Db {
    /// Tickets that are `Ready`, have every prerequisite `Closed`+`Completed`
    /// and hold no active claim.
    ///
    /// Ordering is by `order`; the default puts the least complex work first
    /// and breaks ties by age. A status filter other than `Ready` can never
    /// match, so it yields an empty list.
    pub async fn list_workable(&self, filter: &Filter, order: WorkOrder) -> Result<Vec<Ticket>> {
        if filter.status.is_some_and(|s| s != Status::Ready) {
            return Ok(Vec::new());
        }

        let rows: Vec<TicketRow> = sqlx::query_as(&format!(
            "{TICKET_SELECT}
             WHERE t.status = 'ready'
               AND (?1 IS NULL OR p.key = ?1)
               AND NOT EXISTS (
                   SELECT 1 FROM dependencies d
                   JOIN tickets pre ON pre.id = d.depends_on_id
                   WHERE d.ticket_id = t.id
                     AND NOT (pre.status = 'closed' AND pre.resolution = 'completed'))
               AND NOT EXISTS (
                   SELECT 1 FROM claims c WHERE c.ticket_id = t.id AND c.active = 1)
             ORDER BY {}
             LIMIT ?2",
            order.order_by()
        ))
        .bind(filter.project_key.as_deref())
        .bind(filter.sql_limit())
        .fetch_all(self.pool())
        .await?;

        debug!(count = rows.len(), ?order, "workable tickets listed");
        rows.into_iter().map(TicketRow::try_into_ticket).collect()
    }
}
