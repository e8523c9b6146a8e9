use chrono::Duration;
use ticketq::db::Db;
use ticketq::model::{
    Action, Complexity, Filter, NewTicket, ReleaseOutcome, Resolution, Status, TicketKey,
};
use ticketq::{Error, ErrorKind};

/// Helper: fresh migrated in-memory store.
async fn test_db() -> Db {
    let db = Db::in_memory().await.unwrap();
    assert!(db.health_check().await.is_ok());
    db
}

#[tokio::test]
async fn project_keys_are_validated_and_unique() {
    let db = test_db().await;

    let p = db.create_project("API", "Public API").await.unwrap();
    assert_eq!(p.key, "API");
    assert_eq!(db.get_project("API").await.unwrap().name, "Public API");

    for bad in ["", "api", "1API", "WAYTOOLONGKEY", "A-B"] {
        let err = db.create_project(bad, "x").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument, "{bad:?}");
    }

    let err = db.create_project("API", "again").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    db.create_project("WEB", "Site").await.unwrap();
    let keys: Vec<_> = db
        .list_projects()
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.key)
        .collect();
    assert_eq!(keys, vec!["API", "WEB"]);
}

#[tokio::test]
async fn delete_project_refuses_while_tickets_exist() {
    let db = test_db().await;
    db.create_project("A", "Alpha").await.unwrap();
    db.create_project("E", "Empty").await.unwrap();
    db.create_ticket(NewTicket::new("A", "t")).await.unwrap();

    let err = db.delete_project("A").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    db.delete_project("E").await.unwrap();
    assert_eq!(
        db.get_project("E").await.unwrap_err().kind(),
        ErrorKind::NotFound
    );
    assert_eq!(
        db.delete_project("E").await.unwrap_err().kind(),
        ErrorKind::NotFound
    );
}

#[tokio::test]
async fn tickets_get_sequential_keys_per_project() {
    let db = test_db().await;
    db.create_project("A", "Alpha").await.unwrap();
    db.create_project("B", "Beta").await.unwrap();

    let a1 = db.create_ticket(NewTicket::new("A", "a1")).await.unwrap();
    let b1 = db.create_ticket(NewTicket::new("B", "b1")).await.unwrap();
    let a2 = db
        .create_ticket(
            NewTicket::new("A", "a2")
                .description("details")
                .complexity(Complexity::Large)
                .brain("start with the parser"),
        )
        .await
        .unwrap();

    assert_eq!(a1.key, TicketKey::new("A", 1));
    assert_eq!(b1.key, TicketKey::new("B", 1));
    assert_eq!(a2.key, TicketKey::new("A", 2));

    let fetched = db.get_ticket(&"a-2".parse().unwrap()).await.unwrap();
    assert_eq!(fetched.title, "a2");
    assert_eq!(fetched.description, "details");
    assert_eq!(fetched.complexity, Complexity::Large);
    assert_eq!(fetched.brain.as_deref(), Some("start with the parser"));
    assert_eq!(fetched.status, Status::Ready);
    assert!(fetched.resolution.is_none());
    assert!(fetched.completed_at.is_none());
}

#[tokio::test]
async fn create_ticket_validates_inputs() {
    let db = test_db().await;
    db.create_project("A", "Alpha").await.unwrap();

    let err = db.create_ticket(NewTicket::new("A", "  ")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let err = db.create_ticket(NewTicket::new("ZZ", "t")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = db
        .create_ticket(NewTicket::new("A", "t").depends_on(TicketKey::new("A", 7)))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    // The failed creation rolled back; the next ticket still gets A-1.
    let t = db.create_ticket(NewTicket::new("A", "ok")).await.unwrap();
    assert_eq!(t.key, TicketKey::new("A", 1));
}

#[tokio::test]
async fn list_tickets_filters() {
    let db = test_db().await;
    db.create_project("A", "Alpha").await.unwrap();
    db.create_project("B", "Beta").await.unwrap();
    let a1 = db.create_ticket(NewTicket::new("A", "a1")).await.unwrap();
    db.create_ticket(NewTicket::new("A", "a2")).await.unwrap();
    db.create_ticket(NewTicket::new("B", "b1")).await.unwrap();

    db.acquire(&a1.key, "w", Duration::minutes(5)).await.unwrap();

    assert_eq!(db.list_tickets(&Filter::default()).await.unwrap().len(), 3);
    assert_eq!(
        db.list_tickets(&Filter::default().project("A"))
            .await
            .unwrap()
            .len(),
        2
    );
    let working = db
        .list_tickets(&Filter::default().status(Status::Working))
        .await
        .unwrap();
    assert_eq!(working.len(), 1);
    assert_eq!(working[0].key, a1.key);
    assert_eq!(
        db.list_tickets(&Filter::default().limit(2)).await.unwrap().len(),
        2
    );
}

#[tokio::test]
async fn admin_transition_follows_the_table() {
    let db = test_db().await;
    db.create_project("A", "Alpha").await.unwrap();
    let t = db.create_ticket(NewTicket::new("A", "t")).await.unwrap();

    let err = db.transition(&t.key, Status::Closed, Some(Resolution::Completed)).await;
    assert!(
        matches!(err, Err(Error::InvalidTransition { from: Status::Ready, to: Status::Closed })),
        "{err:?}"
    );

    db.acquire(&t.key, "w", Duration::minutes(5)).await.unwrap();
    db.release(&t.key, "w", ReleaseOutcome::Block).await.unwrap();

    let t2 = db.transition(&t.key, Status::Ready, None).await.unwrap();
    assert_eq!(t2.status, Status::Ready);

    let last = db.activity(Some(&t.key), None).await.unwrap();
    assert_eq!(last.last().unwrap().action, Action::Transitioned);
    assert_eq!(last.last().unwrap().summary, "blocked -> ready");
}

#[tokio::test]
async fn admin_transition_cannot_enter_working() {
    let db = test_db().await;
    db.create_project("A", "Alpha").await.unwrap();
    let pre = db.create_ticket(NewTicket::new("A", "pre")).await.unwrap();
    let t = db
        .create_ticket(NewTicket::new("A", "gated").depends_on(pre.key.clone()))
        .await
        .unwrap();

    let err = db.transition(&t.key, Status::Working, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::State);
    assert_eq!(db.get_ticket(&t.key).await.unwrap().status, Status::Ready);
    assert!(db.active_claim(&t.key).await.unwrap().is_none());

    // Blocked tickets go back through ready, never straight to working.
    db.acquire(&pre.key, "w", Duration::minutes(5)).await.unwrap();
    db.release(&pre.key, "w", ReleaseOutcome::Block).await.unwrap();
    let err = db.transition(&pre.key, Status::Working, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::State);
    assert_eq!(db.get_ticket(&pre.key).await.unwrap().status, Status::Blocked);

    // Only the creation entries and pre's claim cycle were logged.
    let transitions = db
        .activity(None, None)
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.action == Action::Transitioned)
        .count();
    assert_eq!(transitions, 0);
}

#[tokio::test]
async fn closed_is_terminal() {
    let db = test_db().await;
    db.create_project("A", "Alpha").await.unwrap();
    let t = db.create_ticket(NewTicket::new("A", "t")).await.unwrap();

    db.acquire(&t.key, "w", Duration::minutes(5)).await.unwrap();
    db.release(&t.key, "w", ReleaseOutcome::Complete(Resolution::Duplicate))
        .await
        .unwrap();

    for to in Status::ALL {
        let err = db.transition(&t.key, to, None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::State, "closed -> {to}");
    }
    let err = db.acquire(&t.key, "w", Duration::minutes(5)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::State);
}

#[tokio::test]
async fn activity_limit_and_filter() {
    let db = test_db().await;
    db.create_project("A", "Alpha").await.unwrap();
    let a1 = db.create_ticket(NewTicket::new("A", "a1")).await.unwrap();
    db.create_ticket(NewTicket::new("A", "a2")).await.unwrap();

    assert_eq!(db.activity(None, None).await.unwrap().len(), 2);
    assert_eq!(db.activity(None, Some(1)).await.unwrap().len(), 1);

    let only = db.activity(Some(&a1.key), None).await.unwrap();
    assert_eq!(only.len(), 1);
    assert_eq!(only[0].action, Action::TicketCreated);
    assert!(only[0].worker_id.is_none());
}
