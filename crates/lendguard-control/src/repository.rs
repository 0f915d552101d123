use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::events::{AlertStatus, SecurityAlert, SecurityEvent, SecurityEventType, SessionAnomaly, Severity};
use crate::session::SessionRecord;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("repository error: {0}")]
    Store(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("not found: {0}")]
    NotFound(String),
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EventQuery {
    pub user_id: Option<String>,
    pub ip_address: Option<String>,
    pub event_type: Option<SecurityEventType>,
    pub min_severity: Option<Severity>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl EventQuery {
    pub fn matches(&self, event: &SecurityEvent) -> bool {
        if let Some(user_id) = &self.user_id {
            if event.user_id.as_ref() != Some(user_id) {
                return false;
            }
        }
        if let Some(ip) = &self.ip_address {
            if event.ip_address.as_ref() != Some(ip) {
                return false;
            }
        }
        if let Some(event_type) = &self.event_type {
            if &event.event_type != event_type {
                return false;
            }
        }
        if let Some(min) = self.min_severity {
            if event.severity < min {
                return false;
            }
        }
        if let Some(since) = self.since {
            if event.created_at < since {
                return false;
            }
        }
        true
    }
}

/// Encrypted value stored for one field of one CRM record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EncryptedField {
    pub table_name: String,
    pub record_id: String,
    pub field_name: String,
    pub encrypted_value: String,
    pub updated_at: DateTime<Utc>,
}

pub trait SecurityRepository: Send + Sync {
    fn insert_event(&self, event: &SecurityEvent) -> Result<(), RepositoryError>;
    /// Newest first.
    fn list_events(&self, query: &EventQuery) -> Result<Vec<SecurityEvent>, RepositoryError>;
    fn insert_alert(&self, alert: &SecurityAlert) -> Result<(), RepositoryError>;
    fn list_alerts(&self, status: Option<AlertStatus>) -> Result<Vec<SecurityAlert>, RepositoryError>;
    fn update_alert_status(
        &self,
        alert_id: &str,
        status: AlertStatus,
    ) -> Result<SecurityAlert, RepositoryError>;
    fn insert_anomaly(&self, anomaly: &SessionAnomaly) -> Result<(), RepositoryError>;
    fn list_anomalies(&self, user_id: Option<&str>) -> Result<Vec<SessionAnomaly>, RepositoryError>;
    fn save_session(&self, session: &SessionRecord) -> Result<(), RepositoryError>;
    fn load_sessions(&self) -> Result<Vec<SessionRecord>, RepositoryError>;
    fn put_encrypted_field(&self, field: &EncryptedField) -> Result<(), RepositoryError>;
    fn get_encrypted_field(
        &self,
        table_name: &str,
        record_id: &str,
        field_name: &str,
    ) -> Result<Option<EncryptedField>, RepositoryError>;
}

#[derive(Default)]
struct MemoryTables {
    events: Vec<SecurityEvent>,
    alerts: Vec<SecurityAlert>,
    anomalies: Vec<SessionAnomaly>,
    sessions: HashMap<String, SessionRecord>,
    encrypted: HashMap<(String, String, String), EncryptedField>,
}

#[derive(Clone, Default)]
pub struct InMemorySecurityRepository {
    tables: Arc<RwLock<MemoryTables>>,
}

impl InMemorySecurityRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl SecurityRepository for InMemorySecurityRepository {
    fn insert_event(&self, event: &SecurityEvent) -> Result<(), RepositoryError> {
        self.tables.write().events.push(event.clone());
        Ok(())
    }

    fn list_events(&self, query: &EventQuery) -> Result<Vec<SecurityEvent>, RepositoryError> {
        let tables = self.tables.read();
        let mut events: Vec<SecurityEvent> = tables
            .events
            .iter()
            .filter(|event| query.matches(event))
            .cloned()
            .collect();
        events.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = query.limit {
            events.truncate(limit);
        }
        Ok(events)
    }

    fn insert_alert(&self, alert: &SecurityAlert) -> Result<(), RepositoryError> {
        self.tables.write().alerts.push(alert.clone());
        Ok(())
    }

    fn list_alerts(&self, status: Option<AlertStatus>) -> Result<Vec<SecurityAlert>, RepositoryError> {
        let tables = self.tables.read();
        let mut alerts: Vec<SecurityAlert> = tables
            .alerts
            .iter()
            .filter(|alert| status.map_or(true, |status| alert.status == status))
            .cloned()
            .collect();
        alerts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(alerts)
    }

    fn update_alert_status(
        &self,
        alert_id: &str,
        status: AlertStatus,
    ) -> Result<SecurityAlert, RepositoryError> {
        let mut tables = self.tables.write();
        let alert = tables
            .alerts
            .iter_mut()
            .find(|alert| alert.id == alert_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("alert {alert_id}")))?;
        alert.status = status;
        alert.resolved_at = match status {
            AlertStatus::Resolved => Some(Utc::now()),
            _ => None,
        };
        Ok(alert.clone())
    }

    fn insert_anomaly(&self, anomaly: &SessionAnomaly) -> Result<(), RepositoryError> {
        self.tables.write().anomalies.push(anomaly.clone());
        Ok(())
    }

    fn list_anomalies(&self, user_id: Option<&str>) -> Result<Vec<SessionAnomaly>, RepositoryError> {
        let tables = self.tables.read();
        let mut anomalies: Vec<SessionAnomaly> = tables
            .anomalies
            .iter()
            .filter(|anomaly| user_id.map_or(true, |user| anomaly.user_id == user))
            .cloned()
            .collect();
        anomalies.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(anomalies)
    }

    fn save_session(&self, session: &SessionRecord) -> Result<(), RepositoryError> {
        self.tables
            .write()
            .sessions
            .insert(session.session_id.clone(), session.clone());
        Ok(())
    }

    fn load_sessions(&self) -> Result<Vec<SessionRecord>, RepositoryError> {
        Ok(self.tables.read().sessions.values().cloned().collect())
    }

    fn put_encrypted_field(&self, field: &EncryptedField) -> Result<(), RepositoryError> {
        let key = (
            field.table_name.clone(),
            field.record_id.clone(),
            field.field_name.clone(),
        );
        self.tables.write().encrypted.insert(key, field.clone());
        Ok(())
    }

    fn get_encrypted_field(
        &self,
        table_name: &str,
        record_id: &str,
        field_name: &str,
    ) -> Result<Option<EncryptedField>, RepositoryError> {
        let key = (
            table_name.to_string(),
            record_id.to_string(),
            field_name.to_string(),
        );
        Ok(self.tables.read().encrypted.get(&key).cloned())
    }
}
