use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use lendguard_control::{
    AlertStatus, EventQuery, PolicyService, RepositoryError, SecurityEvent, SecurityEventType,
    SecurityRepository, SessionRecord, SessionStore, Severity,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::escalation::EventRecorder;

const BLOCKING_EVENT_TYPES: &[SecurityEventType] = &[
    SecurityEventType::RateLimitExceeded,
    SecurityEventType::GeoBlocked,
    SecurityEventType::XssAttempt,
    SecurityEventType::SqlInjectionAttempt,
    SecurityEventType::WebhookSignatureInvalid,
];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SecurityMetrics {
    pub total_events_24h: usize,
    pub events_by_severity: BTreeMap<String, usize>,
    pub open_alerts: usize,
    pub critical_alerts: usize,
    pub active_sessions: usize,
    pub high_risk_sessions: usize,
    pub failed_logins_24h: usize,
    pub blocked_requests_24h: usize,
    pub security_score: u32,
    pub generated_at: DateTime<Utc>,
}

/// `max(0, 100 - 5 * critical - 2 * open - high_risk_sessions)`.
pub fn security_score(critical_alerts: usize, open_alerts: usize, high_risk_sessions: usize) -> u32 {
    let penalty = critical_alerts
        .saturating_mul(5)
        .saturating_add(open_alerts.saturating_mul(2))
        .saturating_add(high_risk_sessions);
    100usize.saturating_sub(penalty) as u32
}

pub struct SecurityMonitor {
    repository: Arc<dyn SecurityRepository>,
    sessions: Arc<dyn SessionStore>,
    policy: Arc<dyn PolicyService>,
    recorder: Arc<EventRecorder>,
    latest: RwLock<Option<SecurityMetrics>>,
}

impl SecurityMonitor {
    pub fn new(
        repository: Arc<dyn SecurityRepository>,
        sessions: Arc<dyn SessionStore>,
        policy: Arc<dyn PolicyService>,
        recorder: Arc<EventRecorder>,
    ) -> Self {
        Self {
            repository,
            sessions,
            policy,
            recorder,
            latest: RwLock::new(None),
        }
    }

    pub fn latest(&self) -> Option<SecurityMetrics> {
        self.latest.read().clone()
    }

    pub fn refresh(&self) -> Result<SecurityMetrics, RepositoryError> {
        self.refresh_at(Utc::now())
    }

    pub fn refresh_at(&self, now: DateTime<Utc>) -> Result<SecurityMetrics, RepositoryError> {
        let events = self.repository.list_events(&EventQuery {
            since: Some(now - Duration::hours(24)),
            ..EventQuery::default()
        })?;

        let mut events_by_severity: BTreeMap<String, usize> = [
            Severity::Low,
            Severity::Medium,
            Severity::High,
            Severity::Critical,
        ]
        .iter()
        .map(|severity| (severity.as_str().to_string(), 0))
        .collect();
        for event in &events {
            *events_by_severity
                .entry(event.severity.as_str().to_string())
                .or_default() += 1;
        }
        let failed_logins_24h = events
            .iter()
            .filter(|event| event.event_type == SecurityEventType::LoginFailure)
            .count();
        let blocked_requests_24h = events
            .iter()
            .filter(|event| BLOCKING_EVENT_TYPES.contains(&event.event_type))
            .count();

        let open = self.repository.list_alerts(Some(AlertStatus::Open))?;
        let critical_alerts = open
            .iter()
            .filter(|alert| alert.severity == Severity::Critical)
            .count();

        let high_threshold = self.policy.risk_thresholds().high;
        let active = self.sessions.list_active(now);
        let high_risk_sessions = active
            .iter()
            .filter(|session| session.risk_score >= high_threshold)
            .count();

        let metrics = SecurityMetrics {
            total_events_24h: events.len(),
            events_by_severity,
            open_alerts: open.len(),
            critical_alerts,
            active_sessions: active.len(),
            high_risk_sessions,
            failed_logins_24h,
            blocked_requests_24h,
            security_score: security_score(critical_alerts, open.len(), high_risk_sessions),
            generated_at: now,
        };
        debug!(
            score = metrics.security_score,
            open_alerts = metrics.open_alerts,
            active_sessions = metrics.active_sessions,
            "security metrics refreshed"
        );
        *self.latest.write() = Some(metrics.clone());
        Ok(metrics)
    }

    pub fn sweep_sessions(&self) -> Result<Vec<SessionRecord>, RepositoryError> {
        self.sweep_sessions_at(Utc::now())
    }

    /// Terminates expired and idle sessions, persisting each one and
    /// recording a `session_terminated` event.
    pub fn sweep_sessions_at(&self, now: DateTime<Utc>) -> Result<Vec<SessionRecord>, RepositoryError> {
        let closed = self.sessions.sweep_expired(&self.policy.session_policy(), now);
        for session in &closed {
            self.repository.save_session(session)?;
            let reason = if session.expires_at <= now {
                "expired"
            } else {
                "idle_timeout"
            };
            let event = SecurityEvent::new(SecurityEventType::SessionTerminated)
                .with_user(Some(session.user_id.clone()))
                .with_ip(session.ip_address.clone())
                .with_user_agent(session.user_agent.clone())
                .with_details(json!({
                    "session_id": session.session_id,
                    "reason": reason,
                }))
                .at(now);
            self.recorder.record(event)?;
        }
        if !closed.is_empty() {
            info!(terminated = closed.len(), "session sweep closed sessions");
        }
        Ok(closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_floor_is_zero() {
        assert_eq!(security_score(0, 0, 0), 100);
        assert_eq!(security_score(1, 3, 2), 100 - 5 - 6 - 2);
        assert_eq!(security_score(30, 0, 0), 0);
    }
}
