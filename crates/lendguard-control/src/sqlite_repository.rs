use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde_json::Value;

use crate::events::{AlertStatus, SecurityAlert, SecurityEvent, SessionAnomaly, Severity};
use crate::repository::{EncryptedField, EventQuery, RepositoryError, SecurityRepository};
use crate::session::SessionRecord;

pub struct SqliteSecurityRepository {
    conn: Arc<Mutex<Connection>>,
}

fn store_err(err: rusqlite::Error) -> RepositoryError {
    RepositoryError::Store(err.to_string())
}

fn ts(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|err| RepositoryError::Serialization(err.to_string()))
}

fn parse_json(value: &str) -> Result<Value, RepositoryError> {
    serde_json::from_str(value).map_err(|err| RepositoryError::Serialization(err.to_string()))
}

fn severity_rank(severity: Severity) -> i64 {
    match severity {
        Severity::Low => 0,
        Severity::Medium => 1,
        Severity::High => 2,
        Severity::Critical => 3,
    }
}

fn parse_severity(value: &str) -> Result<Severity, RepositoryError> {
    Severity::parse(value)
        .ok_or_else(|| RepositoryError::Serialization(format!("unknown severity: {value}")))
}

impl SqliteSecurityRepository {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RepositoryError> {
        let conn = Connection::open(path).map_err(store_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self, RepositoryError> {
        let conn = Connection::open_in_memory().map_err(store_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn ensure_schema(&self) -> Result<(), RepositoryError> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS security_events (
                id TEXT PRIMARY KEY,
                user_id TEXT,
                event_type TEXT NOT NULL,
                severity TEXT NOT NULL,
                severity_rank INTEGER NOT NULL,
                details TEXT NOT NULL,
                ip_address TEXT,
                user_agent TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_security_events_created
                ON security_events (created_at);
            CREATE TABLE IF NOT EXISTS security_alerts (
                id TEXT PRIMARY KEY,
                alert_type TEXT NOT NULL,
                severity TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                user_id TEXT,
                metadata TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                resolved_at TEXT
            );
            CREATE TABLE IF NOT EXISTS session_anomalies (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                anomaly_type TEXT NOT NULL,
                risk_score INTEGER NOT NULL,
                details TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS active_sessions (
                session_id TEXT PRIMARY KEY,
                record TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE TABLE IF NOT EXISTS encrypted_fields (
                table_name TEXT NOT NULL,
                record_id TEXT NOT NULL,
                field_name TEXT NOT NULL,
                encrypted_value TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (table_name, record_id, field_name)
            );",
        )
        .map_err(store_err)?;
        Ok(())
    }

    fn event_from_row(row: &Row<'_>) -> Result<SecurityEvent, RepositoryError> {
        let event_type: String = row.get(2).map_err(store_err)?;
        let severity: String = row.get(3).map_err(store_err)?;
        let details: String = row.get(4).map_err(store_err)?;
        let created_at: String = row.get(7).map_err(store_err)?;
        Ok(SecurityEvent {
            id: row.get(0).map_err(store_err)?,
            user_id: row.get(1).map_err(store_err)?,
            event_type: event_type.into(),
            severity: parse_severity(&severity)?,
            details: parse_json(&details)?,
            ip_address: row.get(5).map_err(store_err)?,
            user_agent: row.get(6).map_err(store_err)?,
            created_at: parse_ts(&created_at)?,
        })
    }

    fn alert_from_row(row: &Row<'_>) -> Result<SecurityAlert, RepositoryError> {
        let severity: String = row.get(2).map_err(store_err)?;
        let metadata: String = row.get(6).map_err(store_err)?;
        let status: String = row.get(7).map_err(store_err)?;
        let created_at: String = row.get(8).map_err(store_err)?;
        let resolved_at: Option<String> = row.get(9).map_err(store_err)?;
        Ok(SecurityAlert {
            id: row.get(0).map_err(store_err)?,
            alert_type: row.get(1).map_err(store_err)?,
            severity: parse_severity(&severity)?,
            title: row.get(3).map_err(store_err)?,
            description: row.get(4).map_err(store_err)?,
            user_id: row.get(5).map_err(store_err)?,
            metadata: parse_json(&metadata)?,
            status: AlertStatus::parse(&status)
                .ok_or_else(|| RepositoryError::Serialization(format!("unknown status: {status}")))?,
            created_at: parse_ts(&created_at)?,
            resolved_at: resolved_at.as_deref().map(parse_ts).transpose()?,
        })
    }

    fn load_alert(conn: &Connection, alert_id: &str) -> Result<Option<SecurityAlert>, RepositoryError> {
        let mut stmt = conn
            .prepare(
                "SELECT id, alert_type, severity, title, description, user_id, metadata, status,
                        created_at, resolved_at
                 FROM security_alerts WHERE id = ?1",
            )
            .map_err(store_err)?;
        let mut rows = stmt.query(params![alert_id]).map_err(store_err)?;
        match rows.next().map_err(store_err)? {
            Some(row) => Ok(Some(Self::alert_from_row(row)?)),
            None => Ok(None),
        }
    }
}

impl SecurityRepository for SqliteSecurityRepository {
    fn insert_event(&self, event: &SecurityEvent) -> Result<(), RepositoryError> {
        let details = serde_json::to_string(&event.details)
            .map_err(|err| RepositoryError::Serialization(err.to_string()))?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO security_events
                (id, user_id, event_type, severity, severity_rank, details, ip_address, user_agent, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                event.id,
                event.user_id,
                event.event_type.as_str(),
                event.severity.as_str(),
                severity_rank(event.severity),
                details,
                event.ip_address,
                event.user_agent,
                ts(&event.created_at),
            ],
        )
        .map_err(store_err)?;
        Ok(())
    }

    fn list_events(&self, query: &EventQuery) -> Result<Vec<SecurityEvent>, RepositoryError> {
        let mut sql = String::from(
            "SELECT id, user_id, event_type, severity, details, ip_address, user_agent, created_at
             FROM security_events WHERE 1 = 1",
        );
        let mut values: Vec<SqlValue> = Vec::new();
        if let Some(user_id) = &query.user_id {
            values.push(SqlValue::Text(user_id.clone()));
            sql.push_str(&format!(" AND user_id = ?{}", values.len()));
        }
        if let Some(ip) = &query.ip_address {
            values.push(SqlValue::Text(ip.clone()));
            sql.push_str(&format!(" AND ip_address = ?{}", values.len()));
        }
        if let Some(event_type) = &query.event_type {
            values.push(SqlValue::Text(event_type.as_str().to_string()));
            sql.push_str(&format!(" AND event_type = ?{}", values.len()));
        }
        if let Some(min) = query.min_severity {
            values.push(SqlValue::Integer(severity_rank(min)));
            sql.push_str(&format!(" AND severity_rank >= ?{}", values.len()));
        }
        if let Some(since) = &query.since {
            values.push(SqlValue::Text(ts(since)));
            sql.push_str(&format!(" AND created_at >= ?{}", values.len()));
        }
        sql.push_str(" ORDER BY created_at DESC");
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql).map_err(store_err)?;
        let mut rows = stmt.query(params_from_iter(values)).map_err(store_err)?;
        let mut events = Vec::new();
        while let Some(row) = rows.next().map_err(store_err)? {
            events.push(Self::event_from_row(row)?);
        }
        Ok(events)
    }

    fn insert_alert(&self, alert: &SecurityAlert) -> Result<(), RepositoryError> {
        let metadata = serde_json::to_string(&alert.metadata)
            .map_err(|err| RepositoryError::Serialization(err.to_string()))?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO security_alerts
                (id, alert_type, severity, title, description, user_id, metadata, status, created_at, resolved_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                alert.id,
                alert.alert_type,
                alert.severity.as_str(),
                alert.title,
                alert.description,
                alert.user_id,
                metadata,
                alert.status.as_str(),
                ts(&alert.created_at),
                alert.resolved_at.as_ref().map(ts),
            ],
        )
        .map_err(store_err)?;
        Ok(())
    }

    fn list_alerts(&self, status: Option<AlertStatus>) -> Result<Vec<SecurityAlert>, RepositoryError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, alert_type, severity, title, description, user_id, metadata, status,
                        created_at, resolved_at
                 FROM security_alerts
                 WHERE ?1 IS NULL OR status = ?1
                 ORDER BY created_at DESC",
            )
            .map_err(store_err)?;
        let mut rows = stmt
            .query(params![status.map(|status| status.as_str())])
            .map_err(store_err)?;
        let mut alerts = Vec::new();
        while let Some(row) = rows.next().map_err(store_err)? {
            alerts.push(Self::alert_from_row(row)?);
        }
        Ok(alerts)
    }

    fn update_alert_status(
        &self,
        alert_id: &str,
        status: AlertStatus,
    ) -> Result<SecurityAlert, RepositoryError> {
        let resolved_at = match status {
            AlertStatus::Resolved => Some(ts(&Utc::now())),
            _ => None,
        };
        let conn = self.conn.lock();
        let changed = conn
            .execute(
                "UPDATE security_alerts SET status = ?1, resolved_at = ?2 WHERE id = ?3",
                params![status.as_str(), resolved_at, alert_id],
            )
            .map_err(store_err)?;
        if changed == 0 {
            return Err(RepositoryError::NotFound(format!("alert {alert_id}")));
        }
        Self::load_alert(&conn, alert_id)?
            .ok_or_else(|| RepositoryError::NotFound(format!("alert {alert_id}")))
    }

    fn insert_anomaly(&self, anomaly: &SessionAnomaly) -> Result<(), RepositoryError> {
        let details = serde_json::to_string(&anomaly.details)
            .map_err(|err| RepositoryError::Serialization(err.to_string()))?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO session_anomalies
                (id, session_id, user_id, anomaly_type, risk_score, details, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                anomaly.id,
                anomaly.session_id,
                anomaly.user_id,
                anomaly.anomaly_type,
                anomaly.risk_score,
                details,
                ts(&anomaly.created_at),
            ],
        )
        .map_err(store_err)?;
        Ok(())
    }

    fn list_anomalies(&self, user_id: Option<&str>) -> Result<Vec<SessionAnomaly>, RepositoryError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, session_id, user_id, anomaly_type, risk_score, details, created_at
                 FROM session_anomalies
                 WHERE ?1 IS NULL OR user_id = ?1
                 ORDER BY created_at DESC",
            )
            .map_err(store_err)?;
        let mut rows = stmt.query(params![user_id]).map_err(store_err)?;
        let mut anomalies = Vec::new();
        while let Some(row) = rows.next().map_err(store_err)? {
            let details: String = row.get(5).map_err(store_err)?;
            let created_at: String = row.get(6).map_err(store_err)?;
            anomalies.push(SessionAnomaly {
                id: row.get(0).map_err(store_err)?,
                session_id: row.get(1).map_err(store_err)?,
                user_id: row.get(2).map_err(store_err)?,
                anomaly_type: row.get(3).map_err(store_err)?,
                risk_score: row.get(4).map_err(store_err)?,
                details: parse_json(&details)?,
                created_at: parse_ts(&created_at)?,
            });
        }
        Ok(anomalies)
    }

    fn save_session(&self, session: &SessionRecord) -> Result<(), RepositoryError> {
        let payload = serde_json::to_string(session)
            .map_err(|err| RepositoryError::Serialization(err.to_string()))?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO active_sessions (session_id, record, updated_at)
             VALUES (?1, ?2, CURRENT_TIMESTAMP)
             ON CONFLICT(session_id) DO UPDATE
             SET record = excluded.record, updated_at = CURRENT_TIMESTAMP",
            params![session.session_id, payload],
        )
        .map_err(store_err)?;
        Ok(())
    }

    fn load_sessions(&self) -> Result<Vec<SessionRecord>, RepositoryError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT record FROM active_sessions")
            .map_err(store_err)?;
        let mut rows = stmt.query([]).map_err(store_err)?;
        let mut sessions = Vec::new();
        while let Some(row) = rows.next().map_err(store_err)? {
            let payload: String = row.get(0).map_err(store_err)?;
            let record: SessionRecord = serde_json::from_str(&payload)
                .map_err(|err| RepositoryError::Serialization(err.to_string()))?;
            sessions.push(record);
        }
        Ok(sessions)
    }

    fn put_encrypted_field(&self, field: &EncryptedField) -> Result<(), RepositoryError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO encrypted_fields
                (table_name, record_id, field_name, encrypted_value, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(table_name, record_id, field_name) DO UPDATE
             SET encrypted_value = excluded.encrypted_value, updated_at = excluded.updated_at",
            params![
                field.table_name,
                field.record_id,
                field.field_name,
                field.encrypted_value,
                ts(&field.updated_at),
            ],
        )
        .map_err(store_err)?;
        Ok(())
    }

    fn get_encrypted_field(
        &self,
        table_name: &str,
        record_id: &str,
        field_name: &str,
    ) -> Result<Option<EncryptedField>, RepositoryError> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT encrypted_value, updated_at FROM encrypted_fields
                 WHERE table_name = ?1 AND record_id = ?2 AND field_name = ?3",
                params![table_name, record_id, field_name],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()
            .map_err(store_err)?;
        let Some((encrypted_value, updated_at)) = row else {
            return Ok(None);
        };
        Ok(Some(EncryptedField {
            table_name: table_name.to_string(),
            record_id: record_id.to_string(),
            field_name: field_name.to_string(),
            encrypted_value,
            updated_at: parse_ts(&updated_at)?,
        }))
    }
}
