//! Promotes correlated security events to alerts.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use lendguard_control::{
    AlertStatus, EscalationPolicy, EventQuery, EventSink, PolicyService, RepositoryError,
    SecurityAlert, SecurityEvent, SecurityEventType, SecurityRepository, Severity,
};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, warn};

pub const CRITICAL_EVENT_ALERT: &str = "critical_security_event";
pub const BRUTE_FORCE_ALERT: &str = "brute_force_suspected";
pub const REPEATED_HIGH_SEVERITY_ALERT: &str = "repeated_high_severity";
pub const INJECTION_ALERT: &str = "injection_attempt";

fn subject_of(event: &SecurityEvent) -> Option<String> {
    event
        .user_id
        .as_ref()
        .map(|user| format!("user:{user}"))
        .or_else(|| event.ip_address.as_ref().map(|ip| format!("ip:{ip}")))
}

struct Candidate {
    alert_type: &'static str,
    severity: Severity,
    subject: String,
    title: String,
    description: String,
    count: usize,
}

pub struct EscalationEngine {
    repository: Arc<dyn SecurityRepository>,
}

impl EscalationEngine {
    pub fn new(repository: Arc<dyn SecurityRepository>) -> Self {
        Self { repository }
    }

    /// Evaluates `event`, which must already be persisted, and stores any
    /// alert it raises.
    pub fn evaluate(
        &self,
        event: &SecurityEvent,
        policy: &EscalationPolicy,
    ) -> Result<Vec<SecurityAlert>, RepositoryError> {
        let since = event.created_at - Duration::minutes(policy.window_minutes);
        let mut candidates = Vec::new();
        let subject = subject_of(event).unwrap_or_else(|| format!("event:{}", event.id));

        if event.severity == Severity::Critical {
            candidates.push(Candidate {
                alert_type: CRITICAL_EVENT_ALERT,
                severity: Severity::Critical,
                subject: subject.clone(),
                title: "Critical security event".to_string(),
                description: format!("{} recorded with critical severity", event.event_type),
                count: 1,
            });
        }

        if event.event_type.is_injection() {
            candidates.push(Candidate {
                alert_type: INJECTION_ALERT,
                severity: Severity::High,
                subject: subject.clone(),
                title: "Injection attempt detected".to_string(),
                description: format!("{} blocked in submitted input", event.event_type),
                count: 1,
            });
        }

        if event.event_type == SecurityEventType::LoginFailure {
            let scopes = [
                event.user_id.as_ref().map(|user| {
                    (
                        format!("user:{user}"),
                        EventQuery {
                            user_id: Some(user.clone()),
                            ..EventQuery::default()
                        },
                    )
                }),
                event.ip_address.as_ref().map(|ip| {
                    (
                        format!("ip:{ip}"),
                        EventQuery {
                            ip_address: Some(ip.clone()),
                            ..EventQuery::default()
                        },
                    )
                }),
            ];
            for (scope_subject, mut query) in scopes.into_iter().flatten() {
                query.event_type = Some(SecurityEventType::LoginFailure);
                query.since = Some(since);
                let count = self.repository.list_events(&query)?.len();
                if count >= policy.failed_login_threshold {
                    candidates.push(Candidate {
                        alert_type: BRUTE_FORCE_ALERT,
                        severity: Severity::High,
                        title: "Possible brute force attack".to_string(),
                        description: format!(
                            "{count} failed logins for {scope_subject} within {} minutes",
                            policy.window_minutes
                        ),
                        subject: scope_subject,
                        count,
                    });
                }
            }
        }

        if event.severity >= Severity::High {
            if let Some(user) = event.user_id.as_ref() {
                let query = EventQuery {
                    user_id: Some(user.clone()),
                    min_severity: Some(Severity::High),
                    since: Some(since),
                    ..EventQuery::default()
                };
                let count = self.repository.list_events(&query)?.len();
                if count >= policy.high_event_threshold {
                    candidates.push(Candidate {
                        alert_type: REPEATED_HIGH_SEVERITY_ALERT,
                        severity: Severity::High,
                        subject: format!("user:{user}"),
                        title: "Repeated high severity events".to_string(),
                        description: format!(
                            "{count} high severity events for user {user} within {} minutes",
                            policy.window_minutes
                        ),
                        count,
                    });
                }
            }
        }

        let mut raised = Vec::new();
        for candidate in candidates {
            if self.has_open_alert(candidate.alert_type, &candidate.subject, since)? {
                debug!(
                    alert_type = candidate.alert_type,
                    subject = %candidate.subject,
                    "escalation suppressed by open alert"
                );
                continue;
            }
            let mut alert = SecurityAlert::new(
                candidate.alert_type,
                candidate.severity,
                candidate.title,
                candidate.description,
            );
            alert.user_id = event.user_id.clone();
            alert.metadata = json!({
                "subject": candidate.subject,
                "event_id": event.id,
                "event_type": event.event_type.as_str(),
                "count": candidate.count,
            });
            self.repository.insert_alert(&alert)?;
            warn!(
                alert_id = %alert.id,
                alert_type = %alert.alert_type,
                severity = alert.severity.as_str(),
                subject = %candidate.subject,
                "security alert raised"
            );
            raised.push(alert);
        }
        Ok(raised)
    }

    fn has_open_alert(
        &self,
        alert_type: &str,
        subject: &str,
        since: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let open = self.repository.list_alerts(Some(AlertStatus::Open))?;
        Ok(open.iter().any(|alert| {
            alert.alert_type == alert_type
                && alert.created_at >= since
                && alert.metadata.get("subject").and_then(|value| value.as_str()) == Some(subject)
        }))
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct RecordedEvent {
    pub event: SecurityEvent,
    pub alerts: Vec<SecurityAlert>,
}

/// Persists an event, publishes it to live subscribers and runs escalation.
pub struct EventRecorder {
    repository: Arc<dyn SecurityRepository>,
    sink: Arc<dyn EventSink>,
    policy: Arc<dyn PolicyService>,
    escalation: EscalationEngine,
}

impl EventRecorder {
    pub fn new(
        repository: Arc<dyn SecurityRepository>,
        sink: Arc<dyn EventSink>,
        policy: Arc<dyn PolicyService>,
    ) -> Self {
        Self {
            escalation: EscalationEngine::new(repository.clone()),
            repository,
            sink,
            policy,
        }
    }

    pub fn record(&self, event: SecurityEvent) -> Result<RecordedEvent, RepositoryError> {
        self.repository.insert_event(&event)?;
        if event.severity >= Severity::High {
            warn!(
                event_id = %event.id,
                event_type = %event.event_type,
                severity = event.severity.as_str(),
                user_id = event.user_id.as_deref().unwrap_or("-"),
                ip = event.ip_address.as_deref().unwrap_or("-"),
                "security event"
            );
        } else {
            debug!(
                event_id = %event.id,
                event_type = %event.event_type,
                severity = event.severity.as_str(),
                "security event"
            );
        }
        self.sink.publish(&event);
        let alerts = self
            .escalation
            .evaluate(&event, &self.policy.escalation_policy())?;
        Ok(RecordedEvent { event, alerts })
    }
}
