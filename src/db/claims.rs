//! Claim lease manager: acquire, renew, release, expire, list.
//!
//! The only writer of claim rows. Each mutating operation is one transaction
//! that starts with a guarded UPDATE, so two callers racing on the same
//! ticket are ordered by SQLite's writer lock and the loser observes the
//! winner's commit. The partial unique index on active claims backs this up
//! at the schema level.

use chrono::{DateTime, Duration, Utc};
use opentelemetry::KeyValue;
use sqlx::SqliteConnection;
use tracing::{Instrument, debug, info, warn};
use uuid::Uuid;

use super::activity::record_on;
use super::graph::unsatisfied_count_on;
use super::tickets::{ticket_by_id_on, ticket_by_key_on, write_status_on};
use super::{from_millis, is_unique_violation, now, to_millis};
use crate::error::{Error, ErrorKind, Result};
use crate::model::transition;
use crate::model::*;
use crate::telemetry::claims::{OpTimer, record_outcome, start_claim_span};
use crate::telemetry::metrics;

const CLAIM_COLUMNS: &str = "c.id, c.ticket_id, c.worker_id, c.acquired_at, c.expires_at, c.active";

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct ClaimRow {
    id: String,
    ticket_id: i64,
    worker_id: String,
    acquired_at: i64,
    expires_at: i64,
    active: i64,
}

impl ClaimRow {
    fn try_into_claim(self) -> Result<Claim> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| Error::Other(format!("bad claim id {:?}: {e}", self.id)))?;
        Ok(Claim {
            id: ClaimId(id),
            ticket_id: TicketId(self.ticket_id),
            worker_id: self.worker_id,
            acquired_at: from_millis(self.acquired_at)?,
            expires_at: from_millis(self.expires_at)?,
            active: self.active != 0,
        })
    }
}

/// Claim joined with the ticket it covers.
#[derive(sqlx::FromRow)]
struct ActiveClaimRow {
    #[sqlx(flatten)]
    claim: ClaimRow,
    project_key: String,
    sequence: i64,
    status: String,
}

fn validate_worker(worker_id: &str) -> Result<()> {
    if worker_id.trim().is_empty() {
        return Err(Error::InvalidArgument("worker id is empty".to_string()));
    }
    Ok(())
}

fn validate_lease(lease: Duration) -> Result<()> {
    if lease <= Duration::zero() {
        return Err(Error::InvalidArgument(format!(
            "lease must be positive, got {}s",
            lease.num_seconds()
        )));
    }
    Ok(())
}

/// Current holder of the active claim on `ticket_id`, if any.
async fn active_holder_on(conn: &mut SqliteConnection, ticket_id: TicketId) -> Result<Option<String>> {
    let holder: Option<(String,)> =
        sqlx::query_as("SELECT worker_id FROM claims WHERE ticket_id = ?1 AND active = 1")
            .bind(ticket_id.0)
            .fetch_optional(&mut *conn)
            .await?;
    Ok(holder.map(|(w,)| w))
}

/// Explain why an ownership-guarded claim update matched nothing.
async fn ownership_error_on(
    conn: &mut SqliteConnection,
    key: &TicketKey,
    ticket_id: TicketId,
) -> Error {
    match active_holder_on(conn, ticket_id).await {
        Ok(None) => Error::NotFound(format!("no active claim on {key}")),
        Ok(Some(holder)) => Error::ConcurrentConflict {
            key: key.to_string(),
            detail: format!("claimed by {holder}"),
        },
        Err(e) => e,
    }
}

fn count_conflict<T>(operation: &'static str, result: &Result<T>) {
    if let Err(e) = result {
        if e.kind() == ErrorKind::ConcurrentConflict {
            metrics::claim_conflicts().add(1, &[KeyValue::new("operation", operation)]);
        }
    }
}

fn outcome_label<T>(result: &Result<T>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(e) => match e.kind() {
            ErrorKind::ConcurrentConflict => "conflict",
            ErrorKind::NotFound => "not_found",
            ErrorKind::State => "state",
            ErrorKind::InvalidArgument => "invalid_argument",
            _ => "error",
        },
    }
}

impl super::Db {
    // -----------------------------------------------------------------------
    // Acquire
    // -----------------------------------------------------------------------

    /// Grant `worker_id` an exclusive lease on a `Ready` ticket whose
    /// prerequisites are all complete, moving it to `Working`.
    ///
    /// Of any number of simultaneous calls for one ticket, exactly one
    /// succeeds; the rest fail with `ConcurrentConflict`. On any failure no
    /// claim is recorded and the status is unchanged.
    pub async fn acquire(&self, key: &TicketKey, worker_id: &str, lease: Duration) -> Result<Claim> {
        let span = start_claim_span("acquire", key, Some(worker_id));
        let _timer = OpTimer::start("acquire");

        let result = self
            .acquire_inner(key, worker_id, lease)
            .instrument(span.clone())
            .await;

        count_conflict("acquire", &result);
        record_outcome(&span, outcome_label(&result));
        result
    }

    async fn acquire_inner(&self, key: &TicketKey, worker_id: &str, lease: Duration) -> Result<Claim> {
        validate_worker(worker_id)?;
        validate_lease(lease)?;
        transition::validate(Status::Ready, Status::Working, None)?;

        let ticket = self.get_ticket(key).await?;
        let acquired_at = now();
        let expires_at = acquired_at
            .checked_add_signed(lease)
            .ok_or_else(|| Error::InvalidArgument("lease is too long".to_string()))?;

        let mut tx = self.pool().begin().await?;

        // Status, claim presence and prerequisites are checked by the same
        // statement that takes the ticket.
        let taken = sqlx::query(
            "UPDATE tickets SET status = 'working', updated_at = ?1
             WHERE id = ?2 AND status = 'ready'
               AND NOT EXISTS (SELECT 1 FROM claims c WHERE c.ticket_id = tickets.id AND c.active = 1)
               AND NOT EXISTS (
                   SELECT 1 FROM dependencies d JOIN tickets pre ON pre.id = d.depends_on_id
                   WHERE d.ticket_id = tickets.id
                     AND NOT (pre.status = 'closed' AND pre.resolution = 'completed'))",
        )
        .bind(to_millis(acquired_at))
        .bind(ticket.id.0)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if taken == 0 {
            return Err(acquire_refusal_on(&mut tx, key, ticket.id).await);
        }

        let claim = Claim {
            id: ClaimId::new(),
            ticket_id: ticket.id,
            worker_id: worker_id.to_string(),
            acquired_at,
            expires_at,
            active: true,
        };

        let inserted = sqlx::query(
            "INSERT INTO claims (id, ticket_id, worker_id, acquired_at, expires_at, active)
             VALUES (?1, ?2, ?3, ?4, ?5, 1)",
        )
        .bind(claim.id.0.to_string())
        .bind(claim.ticket_id.0)
        .bind(&claim.worker_id)
        .bind(to_millis(claim.acquired_at))
        .bind(to_millis(claim.expires_at))
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                return Err(Error::ConcurrentConflict {
                    key: key.to_string(),
                    detail: "claimed concurrently".to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        }

        record_on(
            &mut tx,
            key,
            &Action::Claimed,
            Some(worker_id),
            &format!("{worker_id} claimed {key} until {}", expires_at.to_rfc3339()),
            acquired_at,
        )
        .await?;
        tx.commit().await?;

        metrics::claims_acquired().add(1, &[]);
        metrics::ticket_transitions().add(
            1,
            &[
                KeyValue::new("from", Status::Ready.as_str()),
                KeyValue::new("to", Status::Working.as_str()),
            ],
        );
        info!(ticket = %key, worker = worker_id, claim = %claim.id, %expires_at, "claim acquired");
        Ok(claim)
    }

    // -----------------------------------------------------------------------
    // Renew
    // -----------------------------------------------------------------------

    /// Push out the holder's lease by `extension`, counted from the later of
    /// the current deadline and now. Never touches ticket status.
    pub async fn renew(&self, key: &TicketKey, worker_id: &str, extension: Duration) -> Result<Claim> {
        let span = start_claim_span("renew", key, Some(worker_id));
        let _timer = OpTimer::start("renew");

        let result = self
            .renew_inner(key, worker_id, extension)
            .instrument(span.clone())
            .await;

        count_conflict("renew", &result);
        record_outcome(&span, outcome_label(&result));
        result
    }

    async fn renew_inner(&self, key: &TicketKey, worker_id: &str, extension: Duration) -> Result<Claim> {
        validate_worker(worker_id)?;
        validate_lease(extension)?;

        let ticket = self.get_ticket(key).await?;
        let at = now();

        let mut tx = self.pool().begin().await?;

        let row: Option<ClaimRow> = sqlx::query_as(
            "UPDATE claims SET expires_at = MAX(expires_at, ?1) + ?2
             WHERE ticket_id = ?3 AND active = 1 AND worker_id = ?4
             RETURNING id, ticket_id, worker_id, acquired_at, expires_at, active",
        )
        .bind(to_millis(at))
        .bind(extension.num_milliseconds())
        .bind(ticket.id.0)
        .bind(worker_id)
        .fetch_optional(&mut *tx)
        .await?;

        let claim = match row {
            Some(row) => row.try_into_claim()?,
            None => return Err(ownership_error_on(&mut tx, key, ticket.id).await),
        };

        record_on(
            &mut tx,
            key,
            &Action::ClaimRenewed,
            Some(worker_id),
            &format!("{worker_id} renewed {key} until {}", claim.expires_at.to_rfc3339()),
            at,
        )
        .await?;
        tx.commit().await?;

        debug!(ticket = %key, worker = worker_id, expires_at = %claim.expires_at, "claim renewed");
        Ok(claim)
    }

    // -----------------------------------------------------------------------
    // Release
    // -----------------------------------------------------------------------

    /// End the caller's claim and move the ticket according to `outcome`.
    ///
    /// Completing a ticket does not touch its dependents; they show up in
    /// [`Db::list_workable`](super::Db::list_workable) on its next call.
    pub async fn release(
        &self,
        key: &TicketKey,
        worker_id: &str,
        outcome: ReleaseOutcome,
    ) -> Result<Ticket> {
        let span = start_claim_span("release", key, Some(worker_id));
        let _timer = OpTimer::start("release");

        let result = async {
            validate_worker(worker_id)?;
            self.release_inner(key, Some(worker_id), outcome).await
        }
        .instrument(span.clone())
        .await;

        count_conflict("release", &result);
        record_outcome(&span, outcome_label(&result));
        result
    }

    /// Administrative release of whoever holds the claim.
    ///
    /// Logged as `force_released:<outcome>` with the displaced holder.
    pub async fn force_release(&self, key: &TicketKey, outcome: ReleaseOutcome) -> Result<Ticket> {
        let span = start_claim_span("force_release", key, None);
        let _timer = OpTimer::start("force_release");

        let result = self
            .release_inner(key, None, outcome)
            .instrument(span.clone())
            .await;

        record_outcome(&span, outcome_label(&result));
        result
    }

    /// `worker_id = None` skips the ownership check.
    async fn release_inner(
        &self,
        key: &TicketKey,
        worker_id: Option<&str>,
        outcome: ReleaseOutcome,
    ) -> Result<Ticket> {
        let (to, resolution) = outcome.target();
        let ticket = self.get_ticket(key).await?;
        let at = now();
        let forced = worker_id.is_none();

        let mut tx = self.pool().begin().await?;

        let holder: Option<(String,)> = sqlx::query_as(
            "UPDATE claims SET active = 0, ended_at = ?1, end_reason = ?2
             WHERE ticket_id = ?3 AND active = 1 AND (?4 IS NULL OR worker_id = ?4)
             RETURNING worker_id",
        )
        .bind(to_millis(at))
        .bind(Action::released(outcome, forced).to_string())
        .bind(ticket.id.0)
        .bind(worker_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((holder,)) = holder else {
            return Err(ownership_error_on(&mut tx, key, ticket.id).await);
        };

        // Re-read under the write lock; the pre-transaction copy may be stale.
        let mut ticket = ticket_by_id_on(&mut tx, ticket.id).await?;
        let from = transition::apply(&mut ticket, to, resolution, at)?;

        if !write_status_on(&mut tx, &ticket, from).await? {
            return Err(Error::ConcurrentConflict {
                key: key.to_string(),
                detail: format!("status changed concurrently (expected {from})"),
            });
        }

        let summary = if forced {
            format!("claim of {holder} force-released: {outcome}, {from} -> {to}")
        } else {
            format!("{holder} released: {outcome}, {from} -> {to}")
        };
        record_on(
            &mut tx,
            key,
            &Action::released(outcome, forced),
            Some(&holder),
            &summary,
            at,
        )
        .await?;
        tx.commit().await?;

        metrics::claims_released().add(
            1,
            &[
                KeyValue::new("outcome", outcome.label()),
                KeyValue::new("forced", forced),
            ],
        );
        if forced {
            warn!(ticket = %key, holder = %holder, %outcome, "claim force-released");
        } else {
            info!(ticket = %key, worker = %holder, %outcome, status = %to, "claim released");
        }
        Ok(ticket)
    }

    // -----------------------------------------------------------------------
    // Expire
    // -----------------------------------------------------------------------

    /// Reclaim every active claim whose deadline is at or before `now`.
    ///
    /// Each claim is ended in its own transaction and its ticket goes back to
    /// `Ready` if it is still `Working`. A failure on one ticket is reported
    /// and the sweep moves on. Running it again straight away finds nothing.
    pub async fn expire(&self, now: DateTime<Utc>) -> Result<ExpiryReport> {
        let _timer = OpTimer::start("expire");

        let candidates: Vec<ActiveClaimRow> = sqlx::query_as(&format!(
            "SELECT {CLAIM_COLUMNS}, p.key AS project_key, t.sequence, t.status
             FROM claims c
             JOIN tickets t ON t.id = c.ticket_id
             JOIN projects p ON p.id = t.project_id
             WHERE c.active = 1 AND c.expires_at <= ?1
             ORDER BY c.expires_at ASC"
        ))
        .bind(to_millis(now))
        .fetch_all(self.pool())
        .await?;

        let mut report = ExpiryReport::default();
        for row in candidates {
            let key = TicketKey::new(row.project_key, row.sequence);
            let claim = match row.claim.try_into_claim() {
                Ok(claim) => claim,
                Err(e) => {
                    warn!(ticket = %key, error = %e, "unreadable claim skipped by sweep");
                    report.errors.push((key, e));
                    continue;
                }
            };

            let span = start_claim_span("expire", &key, Some(&claim.worker_id));
            let result = self.expire_one(&key, &claim, now).instrument(span.clone()).await;
            record_outcome(&span, outcome_label(&result));

            match result {
                Ok(true) => report.expired += 1,
                Ok(false) => debug!(ticket = %key, "claim already ended before sweep reached it"),
                Err(e) => {
                    warn!(ticket = %key, error = %e, "failed to expire claim");
                    report.errors.push((key, e));
                }
            }
        }

        if report.expired > 0 {
            metrics::claims_expired().add(report.expired as u64, &[]);
        }
        Ok(report)
    }

    /// Returns false if the claim was no longer active and expired.
    async fn expire_one(&self, key: &TicketKey, claim: &Claim, now: DateTime<Utc>) -> Result<bool> {
        let mut tx = self.pool().begin().await?;

        let ended = sqlx::query(
            "UPDATE claims SET active = 0, ended_at = ?1, end_reason = 'expired'
             WHERE id = ?2 AND active = 1 AND expires_at <= ?1",
        )
        .bind(to_millis(now))
        .bind(claim.id.0.to_string())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if ended == 0 {
            return Ok(false);
        }

        let mut ticket = ticket_by_id_on(&mut tx, claim.ticket_id).await?;
        let disposition = if ticket.status == Status::Working {
            let from = transition::apply(&mut ticket, Status::Ready, None, now)?;
            if !write_status_on(&mut tx, &ticket, from).await? {
                return Err(Error::ConcurrentConflict {
                    key: key.to_string(),
                    detail: format!("status changed concurrently (expected {from})"),
                });
            }
            "returned to ready".to_string()
        } else {
            format!("left in {}", ticket.status)
        };

        record_on(
            &mut tx,
            key,
            &Action::ClaimExpired,
            Some(&claim.worker_id),
            &format!(
                "lease held by {} expired at {}; {disposition}",
                claim.worker_id,
                claim.expires_at.to_rfc3339()
            ),
            now,
        )
        .await?;
        tx.commit().await?;

        info!(
            ticket = %key,
            worker = %claim.worker_id,
            expired_at = %claim.expires_at,
            status = %ticket.status,
            "claim expired"
        );
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Snapshot of active claims, soonest deadline first. Never mutates.
    ///
    /// The filter's status applies to the claimed ticket's status.
    pub async fn list_active(&self, filter: &Filter) -> Result<Vec<ActiveClaim>> {
        let rows: Vec<ActiveClaimRow> = sqlx::query_as(&format!(
            "SELECT {CLAIM_COLUMNS}, p.key AS project_key, t.sequence, t.status
             FROM claims c
             JOIN tickets t ON t.id = c.ticket_id
             JOIN projects p ON p.id = t.project_id
             WHERE c.active = 1
               AND (?1 IS NULL OR p.key = ?1)
               AND (?2 IS NULL OR t.status = ?2)
             ORDER BY c.expires_at ASC, c.acquired_at ASC
             LIMIT ?3"
        ))
        .bind(filter.project_key.as_deref())
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.sql_limit())
        .fetch_all(self.pool())
        .await?;

        let snapshot = now();
        rows.into_iter()
            .map(|row| {
                let claim = row.claim.try_into_claim()?;
                let remaining = (claim.expires_at - snapshot).max(Duration::zero());
                Ok(ActiveClaim {
                    claim,
                    ticket_key: TicketKey::new(row.project_key, row.sequence),
                    ticket_status: row.status.parse()?,
                    remaining,
                })
            })
            .collect()
    }

    /// The active claim on a ticket, if any.
    pub async fn active_claim(&self, key: &TicketKey) -> Result<Option<Claim>> {
        let mut conn = self.pool().acquire().await?;
        let ticket = ticket_by_key_on(&mut conn, key).await?;

        let row: Option<ClaimRow> = sqlx::query_as(&format!(
            "SELECT {CLAIM_COLUMNS} FROM claims c WHERE c.ticket_id = ?1 AND c.active = 1"
        ))
        .bind(ticket.id.0)
        .fetch_optional(&mut *conn)
        .await?;

        row.map(ClaimRow::try_into_claim).transpose()
    }

    /// Every claim ever recorded on a ticket, oldest first.
    pub async fn claim_history(&self, key: &TicketKey) -> Result<Vec<Claim>> {
        let mut conn = self.pool().acquire().await?;
        let ticket = ticket_by_key_on(&mut conn, key).await?;

        let rows: Vec<ClaimRow> = sqlx::query_as(&format!(
            "SELECT {CLAIM_COLUMNS} FROM claims c WHERE c.ticket_id = ?1
             ORDER BY c.acquired_at ASC, c.rowid ASC"
        ))
        .bind(ticket.id.0)
        .fetch_all(&mut *conn)
        .await?;

        rows.into_iter().map(ClaimRow::try_into_claim).collect()
    }
}

/// Explain why the guarded acquire matched nothing. Runs inside the
/// acquire transaction, after the failed write.
async fn acquire_refusal_on(conn: &mut SqliteConnection, key: &TicketKey, id: TicketId) -> Error {
    let classify = async {
        if let Some(holder) = active_holder_on(conn, id).await? {
            return Ok(Error::ConcurrentConflict {
                key: key.to_string(),
                detail: format!("claimed by {holder}"),
            });
        }

        let ticket = ticket_by_id_on(conn, id).await?;
        if ticket.status != Status::Ready {
            return Ok(Error::State {
                key: key.to_string(),
                status: ticket.status,
                reason: "only ready tickets can be claimed".to_string(),
            });
        }

        let unsatisfied = unsatisfied_count_on(conn, id).await?;
        if unsatisfied > 0 {
            return Ok(Error::State {
                key: key.to_string(),
                status: ticket.status,
                reason: format!("{unsatisfied} prerequisite(s) not completed"),
            });
        }

        Ok::<_, Error>(Error::ConcurrentConflict {
            key: key.to_string(),
            detail: "ticket changed concurrently".to_string(),
        })
    };

    match classify.await {
        Ok(err) | Err(err) => err,
    }
}
