//! The full two-ticket walk-through: dependency gating, conflict, completion,
//! lease expiry and re-offer.

use chrono::Duration;
use ticketq::ErrorKind;
use ticketq::db::Db;
use ticketq::model::{
    Filter, NewTicket, ReleaseOutcome, Resolution, Status, TicketKey, WorkOrder,
};

async fn workable(db: &Db) -> Vec<TicketKey> {
    db.list_workable(&Filter::default(), WorkOrder::default())
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.key)
        .collect()
}

#[tokio::test]
async fn end_to_end_scenario() {
    let db = Db::in_memory().await.unwrap();
    db.create_project("A", "Scenario").await.unwrap();

    let a1 = db.create_ticket(NewTicket::new("A", "one")).await.unwrap();
    let a2 = db
        .create_ticket(NewTicket::new("A", "two").depends_on(a1.key.clone()))
        .await
        .unwrap();
    assert_eq!(a1.key.to_string(), "A-1");
    assert_eq!(a2.key.to_string(), "A-2");
    assert_eq!(a1.status, Status::Ready);
    assert_eq!(a2.status, Status::Ready);

    assert_eq!(workable(&db).await, vec![a1.key.clone()]);

    let lease = Duration::minutes(60);
    db.acquire(&a1.key, "w1", lease).await.unwrap();
    assert_eq!(db.get_ticket(&a1.key).await.unwrap().status, Status::Working);

    let err = db.acquire(&a1.key, "w2", lease).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConcurrentConflict);

    db.release(&a1.key, "w1", ReleaseOutcome::Complete(Resolution::Completed))
        .await
        .unwrap();
    let a1_now = db.get_ticket(&a1.key).await.unwrap();
    assert_eq!(a1_now.status, Status::Closed);
    assert_eq!(a1_now.resolution, Some(Resolution::Completed));

    assert_eq!(workable(&db).await, vec![a2.key.clone()]);

    let claim = db.acquire(&a2.key, "w2", lease).await.unwrap();
    assert!(workable(&db).await.is_empty());

    // Simulated clock advance past the lease.
    let report = db
        .expire(claim.acquired_at + lease + Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(report.expired, 1);

    assert!(db.active_claim(&a2.key).await.unwrap().is_none());
    assert_eq!(db.get_ticket(&a2.key).await.unwrap().status, Status::Ready);
    assert_eq!(workable(&db).await, vec![a2.key.clone()]);

    let log: Vec<String> = db
        .activity(None, None)
        .await
        .unwrap()
        .into_iter()
        .map(|e| format!("{} {}", e.ticket_key, e.action))
        .collect();
    assert_eq!(
        log,
        vec![
            "A-1 ticket_created",
            "A-2 ticket_created",
            "A-1 claimed",
            "A-1 released:complete",
            "A-2 claimed",
            "A-2 claim_expired",
        ]
    );
}
