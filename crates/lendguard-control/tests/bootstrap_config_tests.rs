use lendguard_control::{
    load_from_system_config, EventQuery, InMemoryPolicyService, PolicyService, SystemConfigLoader,
    MAX_ESCALATION_WINDOW_MINUTES, MAX_SESSION_MINUTES,
};

#[test]
fn bootstrap_with_empty_storage_uses_memory() {
    let config = SystemConfigLoader::from_str(
        r#"
        [storage]
        sqlite_path = ""
        [risk]
        warning_threshold = 45
        [geo]
        allowed_country = "us"
        "#,
    )
    .expect("config");
    let bundle = load_from_system_config(&config).expect("bundle");
    let events = bundle
        .repository
        .list_events(&EventQuery::default())
        .expect("events");
    assert!(events.is_empty());
    assert_eq!(bundle.policy.risk_thresholds().warning, 45);
    assert_eq!(bundle.policy.geo_policy().allowed_country, "US");
    assert_eq!(bundle.policy.rate_limit_rule("login").max_attempts, 5);
    assert_eq!(bundle.policy.rate_limit_rule("unknown_action").max_attempts, 100);
}

#[test]
fn bootstrap_with_sqlite_path_restores_sessions() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("guard.sqlite");
    let raw = format!("storage = {{ sqlite_path = {:?} }}", path.display().to_string());
    let config = SystemConfigLoader::from_str(&raw).expect("config");

    let bundle = load_from_system_config(&config).expect("bundle");
    let record = lendguard_control::SessionRecord::new(
        "s1",
        "u1",
        &bundle.policy.session_policy(),
        chrono::Utc::now(),
    );
    bundle.repository.save_session(&record).expect("save");
    drop(bundle);

    let reloaded = load_from_system_config(&config).expect("bundle");
    assert!(reloaded.sessions.get("s1").is_some());
}

#[test]
fn oversized_windows_are_clamped() {
    let config = SystemConfigLoader::from_str(
        r#"
        [session]
        max_age_minutes = 9223372036854775807
        idle_timeout_minutes = 9223372036854775807
        [escalation]
        window_minutes = 9223372036854775807
        "#,
    )
    .expect("config");
    let policy = InMemoryPolicyService::from_config(&config);
    assert_eq!(policy.session_policy().max_age_minutes, MAX_SESSION_MINUTES);
    assert_eq!(policy.session_policy().idle_timeout_minutes, MAX_SESSION_MINUTES);
    assert_eq!(policy.escalation_policy().window_minutes, MAX_ESCALATION_WINDOW_MINUTES);
    // Window arithmetic must stay within chrono's range.
    let now = chrono::Utc::now();
    let _ = now - chrono::Duration::minutes(policy.escalation_policy().window_minutes);
    let _ = now + chrono::Duration::minutes(policy.session_policy().max_age_minutes);
}

#[test]
fn zero_windows_are_raised_to_one_minute() {
    let config = SystemConfigLoader::from_str(
        r#"
        [session]
        max_age_minutes = 0
        [escalation]
        window_minutes = -5
        "#,
    )
    .expect("config");
    let policy = InMemoryPolicyService::from_config(&config);
    assert_eq!(policy.session_policy().max_age_minutes, 1);
    assert_eq!(policy.escalation_policy().window_minutes, 1);
}
