use chrono::Duration;
use ticketq::db::Db;
use ticketq::model::{
    Action, Filter, NewTicket, ReleaseOutcome, Resolution, Status, Ticket, TicketKey,
};
use ticketq::{Error, ErrorKind};

/// Helper: fresh in-memory store with project `A`.
async fn test_db() -> Db {
    let db = Db::in_memory().await.unwrap();
    db.create_project("A", "Alpha").await.unwrap();
    db
}

async fn ticket(db: &Db, title: &str) -> Ticket {
    db.create_ticket(NewTicket::new("A", title)).await.unwrap()
}

fn hour() -> Duration {
    Duration::minutes(60)
}

#[tokio::test]
async fn acquire_moves_ticket_to_working() {
    let db = test_db().await;
    let t = ticket(&db, "first").await;

    let claim = db.acquire(&t.key, "w1", hour()).await.unwrap();
    assert!(claim.active);
    assert_eq!(claim.worker_id, "w1");
    assert_eq!(claim.ticket_id, t.id);
    assert_eq!(claim.expires_at - claim.acquired_at, hour());

    let t = db.get_ticket(&t.key).await.unwrap();
    assert_eq!(t.status, Status::Working);

    let active = db.active_claim(&t.key).await.unwrap().unwrap();
    assert_eq!(active.id, claim.id);
}

#[tokio::test]
async fn second_acquire_is_a_conflict() {
    let db = test_db().await;
    let t = ticket(&db, "contested").await;

    db.acquire(&t.key, "w1", hour()).await.unwrap();
    let err = db.acquire(&t.key, "w2", hour()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ConcurrentConflict);
    assert!(err.is_recoverable());
    assert!(err.to_string().contains("w1"), "{err}");

    // Same worker asking again is no different.
    let err = db.acquire(&t.key, "w1", hour()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConcurrentConflict);
}

#[tokio::test]
async fn acquire_rejects_bad_arguments() {
    let db = test_db().await;
    let t = ticket(&db, "t").await;

    let err = db.acquire(&t.key, "  ", hour()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let err = db.acquire(&t.key, "w1", Duration::zero()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let err = db
        .acquire(&TicketKey::new("A", 99), "w1", hour())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    // Nothing was recorded by the failed attempts.
    assert!(db.claim_history(&t.key).await.unwrap().is_empty());
    assert_eq!(db.get_ticket(&t.key).await.unwrap().status, Status::Ready);
}

#[tokio::test]
async fn acquire_requires_ready_status() {
    let db = test_db().await;
    let t = ticket(&db, "t").await;

    db.acquire(&t.key, "w1", hour()).await.unwrap();
    db.release(&t.key, "w1", ReleaseOutcome::Block).await.unwrap();

    let err = db.acquire(&t.key, "w2", hour()).await.unwrap_err();
    match err {
        Error::State { status, .. } => assert_eq!(status, Status::Blocked),
        other => panic!("expected State error, got {other:?}"),
    }
}

#[tokio::test]
async fn acquire_requires_completed_prerequisites() {
    let db = test_db().await;
    let pre = ticket(&db, "pre").await;
    let t = db
        .create_ticket(NewTicket::new("A", "dependent").depends_on(pre.key.clone()))
        .await
        .unwrap();

    let err = db.acquire(&t.key, "w1", hour()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::State);
    assert!(db.active_claim(&t.key).await.unwrap().is_none());
    assert_eq!(db.get_ticket(&t.key).await.unwrap().status, Status::Ready);
}

#[tokio::test]
async fn renew_extends_own_lease_only() {
    let db = test_db().await;
    let t = ticket(&db, "t").await;
    let claim = db.acquire(&t.key, "w1", hour()).await.unwrap();

    let renewed = db.renew(&t.key, "w1", Duration::minutes(30)).await.unwrap();
    assert_eq!(renewed.id, claim.id);
    assert_eq!(renewed.expires_at, claim.expires_at + Duration::minutes(30));
    assert_eq!(
        db.get_ticket(&t.key).await.unwrap().status,
        Status::Working,
        "renewal never changes status"
    );

    let err = db.renew(&t.key, "w2", hour()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConcurrentConflict);

    let entries = db.activity(Some(&t.key), None).await.unwrap();
    assert_eq!(
        entries
            .iter()
            .filter(|e| e.action == Action::ClaimRenewed)
            .count(),
        1
    );
}

#[tokio::test]
async fn renew_without_claim_is_not_found() {
    let db = test_db().await;
    let t = ticket(&db, "t").await;

    let err = db.renew(&t.key, "w1", hour()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn release_outcomes_drive_status() {
    let db = test_db().await;

    let cases = [
        (ReleaseOutcome::Complete(Resolution::Completed), Status::Closed),
        (ReleaseOutcome::Complete(Resolution::WontDo), Status::Closed),
        (ReleaseOutcome::Block, Status::Blocked),
        (ReleaseOutcome::NeedsHuman, Status::Human),
        (ReleaseOutcome::ReturnToReady, Status::Ready),
        (ReleaseOutcome::Abandon, Status::Ready),
    ];

    for (outcome, expected) in cases {
        let t = ticket(&db, &outcome.to_string()).await;
        db.acquire(&t.key, "w1", hour()).await.unwrap();
        let after = db.release(&t.key, "w1", outcome).await.unwrap();

        assert_eq!(after.status, expected, "{outcome}");
        assert!(db.active_claim(&t.key).await.unwrap().is_none());
        if let ReleaseOutcome::Complete(resolution) = outcome {
            assert_eq!(after.resolution, Some(resolution));
            assert!(after.completed_at.is_some());
        } else {
            assert_eq!(after.resolution, None);
            assert!(after.completed_at.is_none());
        }
    }
}

#[tokio::test]
async fn release_by_other_worker_is_a_conflict() {
    let db = test_db().await;
    let t = ticket(&db, "t").await;
    db.acquire(&t.key, "w1", hour()).await.unwrap();

    let err = db
        .release(&t.key, "w2", ReleaseOutcome::Abandon)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConcurrentConflict);

    // Untouched.
    assert!(db.active_claim(&t.key).await.unwrap().is_some());
    assert_eq!(db.get_ticket(&t.key).await.unwrap().status, Status::Working);
}

#[tokio::test]
async fn release_twice_is_not_found() {
    let db = test_db().await;
    let t = ticket(&db, "t").await;
    db.acquire(&t.key, "w1", hour()).await.unwrap();
    db.release(&t.key, "w1", ReleaseOutcome::ReturnToReady)
        .await
        .unwrap();

    let err = db
        .release(&t.key, "w1", ReleaseOutcome::ReturnToReady)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn force_release_overrides_ownership_and_is_logged_distinctly() {
    let db = test_db().await;
    let t = ticket(&db, "t").await;
    db.acquire(&t.key, "w1", hour()).await.unwrap();

    let after = db
        .force_release(&t.key, ReleaseOutcome::NeedsHuman)
        .await
        .unwrap();
    assert_eq!(after.status, Status::Human);

    let entries = db.activity(Some(&t.key), None).await.unwrap();
    let last = entries.last().unwrap();
    assert_eq!(last.action, Action::ForceReleased("needs_human".to_string()));
    assert_eq!(last.worker_id.as_deref(), Some("w1"));
}

#[tokio::test]
async fn reclaim_creates_a_fresh_claim_record() {
    let db = test_db().await;
    let t = ticket(&db, "t").await;

    let first = db.acquire(&t.key, "w1", hour()).await.unwrap();
    db.release(&t.key, "w1", ReleaseOutcome::Abandon).await.unwrap();
    let second = db.acquire(&t.key, "w2", hour()).await.unwrap();

    assert_ne!(first.id, second.id);
    let history = db.claim_history(&t.key).await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(!history[0].active);
    assert!(history[1].active);
    assert_eq!(history[1].worker_id, "w2");
}

#[tokio::test]
async fn list_active_orders_by_deadline_and_never_mutates() {
    let db = test_db().await;
    let long = ticket(&db, "long").await;
    let short = ticket(&db, "short").await;
    let idle = ticket(&db, "idle").await;

    db.acquire(&long.key, "w1", Duration::minutes(90)).await.unwrap();
    db.acquire(&short.key, "w2", Duration::minutes(5)).await.unwrap();

    let active = db.list_active(&Filter::default()).await.unwrap();
    let keys: Vec<_> = active.iter().map(|a| a.ticket_key.clone()).collect();
    assert_eq!(keys, vec![short.key.clone(), long.key.clone()]);

    assert!(active[0].remaining <= Duration::minutes(5));
    assert!(active[0].remaining > Duration::zero());
    assert!(!active[0].is_overdue());
    assert_eq!(active[1].ticket_status, Status::Working);

    let limited = db.list_active(&Filter::default().limit(1)).await.unwrap();
    assert_eq!(limited.len(), 1);

    let none = db
        .list_active(&Filter::default().status(Status::Review))
        .await
        .unwrap();
    assert!(none.is_empty());

    assert_eq!(db.get_ticket(&idle.key).await.unwrap().status, Status::Ready);
    assert_eq!(db.list_active(&Filter::default()).await.unwrap().len(), 2);
}

#[tokio::test]
async fn claim_lifecycle_is_recorded_in_activity_log() {
    let db = test_db().await;
    let t = ticket(&db, "t").await;

    db.acquire(&t.key, "w1", hour()).await.unwrap();
    db.release(&t.key, "w1", ReleaseOutcome::Complete(Resolution::Completed))
        .await
        .unwrap();

    let actions: Vec<_> = db
        .activity(Some(&t.key), None)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.action.to_string())
        .collect();
    assert_eq!(actions, vec!["ticket_created", "claimed", "released:complete"]);
}
