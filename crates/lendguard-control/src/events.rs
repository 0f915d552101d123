use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SecurityEventType {
    LoginSuccess,
    LoginFailure,
    Logout,
    XssAttempt,
    SqlInjectionAttempt,
    RateLimitExceeded,
    SuspiciousSession,
    SessionTerminated,
    GeoBlocked,
    WebhookSignatureInvalid,
    DeviceChange,
    InputValidationFailed,
    DataAccess,
    Other(String),
}

impl SecurityEventType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::LoginSuccess => "login_success",
            Self::LoginFailure => "login_failure",
            Self::Logout => "logout",
            Self::XssAttempt => "xss_attempt",
            Self::SqlInjectionAttempt => "sql_injection_attempt",
            Self::RateLimitExceeded => "rate_limit_exceeded",
            Self::SuspiciousSession => "suspicious_session",
            Self::SessionTerminated => "session_terminated",
            Self::GeoBlocked => "geo_blocked",
            Self::WebhookSignatureInvalid => "webhook_signature_invalid",
            Self::DeviceChange => "device_change",
            Self::InputValidationFailed => "input_validation_failed",
            Self::DataAccess => "data_access",
            Self::Other(name) => name.as_str(),
        }
    }

    pub fn default_severity(&self) -> Severity {
        match self {
            Self::LoginSuccess | Self::Logout | Self::DataAccess | Self::SessionTerminated => {
                Severity::Low
            }
            Self::LoginFailure
            | Self::InputValidationFailed
            | Self::DeviceChange
            | Self::RateLimitExceeded
            | Self::Other(_) => Severity::Medium,
            Self::XssAttempt
            | Self::SqlInjectionAttempt
            | Self::SuspiciousSession
            | Self::GeoBlocked
            | Self::WebhookSignatureInvalid => Severity::High,
        }
    }

    pub fn is_injection(&self) -> bool {
        matches!(self, Self::XssAttempt | Self::SqlInjectionAttempt)
    }
}

impl From<String> for SecurityEventType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "login_success" => Self::LoginSuccess,
            "login_failure" => Self::LoginFailure,
            "logout" => Self::Logout,
            "xss_attempt" => Self::XssAttempt,
            "sql_injection_attempt" => Self::SqlInjectionAttempt,
            "rate_limit_exceeded" => Self::RateLimitExceeded,
            "suspicious_session" => Self::SuspiciousSession,
            "session_terminated" => Self::SessionTerminated,
            "geo_blocked" => Self::GeoBlocked,
            "webhook_signature_invalid" => Self::WebhookSignatureInvalid,
            "device_change" => Self::DeviceChange,
            "input_validation_failed" => Self::InputValidationFailed,
            "data_access" => Self::DataAccess,
            _ => Self::Other(value),
        }
    }
}

impl From<SecurityEventType> for String {
    fn from(value: SecurityEventType) -> Self {
        match value {
            SecurityEventType::Other(name) => name,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for SecurityEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub id: String,
    pub user_id: Option<String>,
    pub event_type: SecurityEventType,
    pub severity: Severity,
    pub details: Value,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl SecurityEvent {
    pub fn new(event_type: SecurityEventType) -> Self {
        let severity = event_type.default_severity();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: None,
            event_type,
            severity,
            details: Value::Null,
            ip_address: None,
            user_agent: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_user(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn with_ip(mut self, ip_address: Option<String>) -> Self {
        self.ip_address = ip_address;
        self
    }

    pub fn with_user_agent(mut self, user_agent: Option<String>) -> Self {
        self.user_agent = user_agent;
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Open,
    Acknowledged,
    Resolved,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Open => "open",
            AlertStatus::Acknowledged => "acknowledged",
            AlertStatus::Resolved => "resolved",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "open" => Some(Self::Open),
            "acknowledged" => Some(Self::Acknowledged),
            "resolved" => Some(Self::Resolved),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SecurityAlert {
    pub id: String,
    pub alert_type: String,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub user_id: Option<String>,
    pub metadata: Value,
    pub status: AlertStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl SecurityAlert {
    pub fn new(
        alert_type: impl Into<String>,
        severity: Severity,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            alert_type: alert_type.into(),
            severity,
            title: title.into(),
            description: description.into(),
            user_id: None,
            metadata: Value::Null,
            status: AlertStatus::Open,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionAnomaly {
    pub id: String,
    pub session_id: String,
    pub user_id: String,
    pub anomaly_type: String,
    pub risk_score: u32,
    pub details: Value,
    pub created_at: DateTime<Utc>,
}

/// Live feed of recorded security events.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: &SecurityEvent);
    fn subscribe(&self) -> broadcast::Receiver<SecurityEvent>;
}

#[derive(Clone)]
pub struct BroadcastEventSink {
    sender: broadcast::Sender<SecurityEvent>,
}

impl BroadcastEventSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn shared(capacity: usize) -> Arc<Self> {
        Arc::new(Self::new(capacity))
    }
}

impl EventSink for BroadcastEventSink {
    fn publish(&self, event: &SecurityEvent) {
        // No subscribers is the normal case.
        let _ = self.sender.send(event.clone());
    }

    fn subscribe(&self) -> broadcast::Receiver<SecurityEvent> {
        self.sender.subscribe()
    }
}

/// Sink that also keeps every published event in memory.
#[derive(Clone)]
pub struct InMemoryEventSink {
    events: Arc<Mutex<Vec<SecurityEvent>>>,
    inner: BroadcastEventSink,
}

impl InMemoryEventSink {
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            inner: BroadcastEventSink::new(64),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn list(&self) -> Vec<SecurityEvent> {
        self.events.lock().clone()
    }
}

impl Default for InMemoryEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for InMemoryEventSink {
    fn publish(&self, event: &SecurityEvent) {
        self.events.lock().push(event.clone());
        self.inner.publish(event);
    }

    fn subscribe(&self) -> broadcast::Receiver<SecurityEvent> {
        self.inner.subscribe()
    }
}
