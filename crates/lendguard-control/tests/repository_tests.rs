use chrono::{Duration, Utc};
use lendguard_control::{
    AlertStatus, EventQuery, InMemorySecurityRepository, SecurityAlert, SecurityEvent,
    SecurityEventType, SecurityRepository, Severity,
};

#[test]
fn event_query_filters_by_user_type_and_severity() {
    let repo = InMemorySecurityRepository::new();
    let now = Utc::now();
    repo.insert_event(
        &SecurityEvent::new(SecurityEventType::LoginFailure)
            .with_user(Some("u1".to_string()))
            .at(now - Duration::minutes(5)),
    )
    .expect("insert");
    repo.insert_event(
        &SecurityEvent::new(SecurityEventType::XssAttempt)
            .with_user(Some("u1".to_string()))
            .at(now),
    )
    .expect("insert");
    repo.insert_event(
        &SecurityEvent::new(SecurityEventType::LoginFailure)
            .with_user(Some("u2".to_string()))
            .at(now - Duration::hours(2)),
    )
    .expect("insert");

    let for_u1 = repo
        .list_events(&EventQuery {
            user_id: Some("u1".to_string()),
            ..EventQuery::default()
        })
        .expect("list");
    assert_eq!(for_u1.len(), 2);
    assert_eq!(for_u1[0].event_type, SecurityEventType::XssAttempt);

    let high = repo
        .list_events(&EventQuery {
            min_severity: Some(Severity::High),
            ..EventQuery::default()
        })
        .expect("list");
    assert_eq!(high.len(), 1);

    let recent_failures = repo
        .list_events(&EventQuery {
            event_type: Some(SecurityEventType::LoginFailure),
            since: Some(now - Duration::minutes(15)),
            ..EventQuery::default()
        })
        .expect("list");
    assert_eq!(recent_failures.len(), 1);
}

#[test]
fn alert_status_transitions() {
    let repo = InMemorySecurityRepository::new();
    let alert = SecurityAlert::new("brute_force_suspected", Severity::High, "t", "d");
    repo.insert_alert(&alert).expect("insert");

    let resolved = repo
        .update_alert_status(&alert.id, AlertStatus::Resolved)
        .expect("update");
    assert_eq!(resolved.status, AlertStatus::Resolved);
    assert!(resolved.resolved_at.is_some());
    assert!(repo.list_alerts(Some(AlertStatus::Open)).expect("list").is_empty());
    assert!(repo.update_alert_status("missing", AlertStatus::Open).is_err());
}
