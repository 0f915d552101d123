use chrono::{Duration, Utc};
use lendguard_control::{
    AlertStatus, EncryptedField, EventQuery, SecurityAlert, SecurityEvent, SecurityEventType,
    SecurityRepository, SessionAnomaly, SessionPolicy, SessionRecord, Severity,
    SqliteSecurityRepository,
};
use serde_json::json;

fn repo() -> SqliteSecurityRepository {
    let repo = SqliteSecurityRepository::open_in_memory().expect("repo");
    repo.ensure_schema().expect("schema");
    repo
}

#[test]
fn sqlite_events_roundtrip_with_filters() {
    let repo = repo();
    let now = Utc::now();
    let event = SecurityEvent::new(SecurityEventType::SqlInjectionAttempt)
        .with_user(Some("u1".to_string()))
        .with_ip(Some("203.0.113.9".to_string()))
        .with_details(json!({ "field": "notes" }))
        .at(now);
    repo.insert_event(&event).expect("insert");
    repo.insert_event(
        &SecurityEvent::new(SecurityEventType::Other("custom_audit".to_string()))
            .at(now - Duration::days(2)),
    )
    .expect("insert");

    let all = repo.list_events(&EventQuery::default()).expect("list");
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].id, event.id);
    assert_eq!(all[0].ip_address.as_deref(), Some("203.0.113.9"));
    assert_eq!(
        all[1].event_type,
        SecurityEventType::Other("custom_audit".to_string())
    );

    let recent = repo
        .list_events(&EventQuery {
            since: Some(now - Duration::hours(24)),
            min_severity: Some(Severity::High),
            ..EventQuery::default()
        })
        .expect("list");
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].details["field"], "notes");
}

#[test]
fn sqlite_alerts_and_anomalies() {
    let repo = repo();
    let alert = SecurityAlert::new("injection_attempt", Severity::High, "Injection", "xss");
    repo.insert_alert(&alert).expect("insert");
    let acknowledged = repo
        .update_alert_status(&alert.id, AlertStatus::Acknowledged)
        .expect("update");
    assert_eq!(acknowledged.status, AlertStatus::Acknowledged);
    assert_eq!(repo.list_alerts(None).expect("list").len(), 1);
    assert!(repo.list_alerts(Some(AlertStatus::Open)).expect("list").is_empty());

    repo.insert_anomaly(&SessionAnomaly {
        id: "a1".to_string(),
        session_id: "s1".to_string(),
        user_id: "u1".to_string(),
        anomaly_type: "new_ip".to_string(),
        risk_score: 25,
        details: json!({}),
        created_at: Utc::now(),
    })
    .expect("anomaly");
    assert_eq!(repo.list_anomalies(Some("u1")).expect("list").len(), 1);
    assert!(repo.list_anomalies(Some("u2")).expect("list").is_empty());
}

#[test]
fn sqlite_sessions_and_encrypted_fields() {
    let repo = repo();
    let mut session = SessionRecord::new("s1", "u1", &SessionPolicy::default(), Utc::now());
    repo.save_session(&session).expect("save");
    session.risk_score = 40;
    repo.save_session(&session).expect("save again");
    let sessions = repo.load_sessions().expect("load");
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].risk_score, 40);

    let field = EncryptedField {
        table_name: "contact_entities".to_string(),
        record_id: "c1".to_string(),
        field_name: "ssn".to_string(),
        encrypted_value: "ciphertext".to_string(),
        updated_at: Utc::now(),
    };
    repo.put_encrypted_field(&field).expect("put");
    let loaded = repo
        .get_encrypted_field("contact_entities", "c1", "ssn")
        .expect("get")
        .expect("present");
    assert_eq!(loaded.encrypted_value, "ciphertext");
    assert!(repo
        .get_encrypted_field("contact_entities", "c1", "dob")
        .expect("get")
        .is_none());
}

#[test]
fn sqlite_repository_persists_to_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("guard.sqlite");
    {
        let repo = SqliteSecurityRepository::open(&path).expect("open");
        repo.ensure_schema().expect("schema");
        repo.insert_event(&SecurityEvent::new(SecurityEventType::LoginSuccess))
            .expect("insert");
    }
    let reopened = SqliteSecurityRepository::open(&path).expect("reopen");
    reopened.ensure_schema().expect("schema");
    assert_eq!(reopened.list_events(&EventQuery::default()).expect("list").len(), 1);
}
