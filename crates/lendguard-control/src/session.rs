use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::policy::SessionPolicy;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub user_id: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub device_fingerprint: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_active: bool,
    pub risk_score: u32,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionInvalidReason {
    NotFound,
    Inactive,
    Expired,
    IdleTimeout,
}

impl SessionInvalidReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionInvalidReason::NotFound => "not_found",
            SessionInvalidReason::Inactive => "inactive",
            SessionInvalidReason::Expired => "expired",
            SessionInvalidReason::IdleTimeout => "idle_timeout",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionValidation {
    pub valid: bool,
    pub reason: Option<SessionInvalidReason>,
    pub session: Option<SessionRecord>,
}

impl SessionRecord {
    pub fn new(
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        policy: &SessionPolicy,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            ip_address: None,
            user_agent: None,
            device_fingerprint: None,
            created_at: now,
            last_activity: now,
            expires_at: now + Duration::minutes(policy.max_age_minutes),
            is_active: true,
            risk_score: 0,
        }
    }

    /// An expired session never counts as valid, whatever `is_active` says.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at > now
    }

    pub fn invalid_reason(
        &self,
        policy: &SessionPolicy,
        now: DateTime<Utc>,
    ) -> Option<SessionInvalidReason> {
        if self.expires_at <= now {
            return Some(SessionInvalidReason::Expired);
        }
        if !self.is_active {
            return Some(SessionInvalidReason::Inactive);
        }
        if policy.idle_timeout_minutes > 0
            && now - self.last_activity >= Duration::minutes(policy.idle_timeout_minutes)
        {
            return Some(SessionInvalidReason::IdleTimeout);
        }
        None
    }
}

pub trait SessionStore: Send + Sync {
    fn create(&self, record: SessionRecord);
    fn get(&self, session_id: &str) -> Option<SessionRecord>;
    fn update(&self, record: SessionRecord) -> bool;
    fn touch(&self, session_id: &str, now: DateTime<Utc>) -> bool;
    fn terminate(&self, session_id: &str) -> Option<SessionRecord>;
    fn list_for_user(&self, user_id: &str) -> Vec<SessionRecord>;
    fn list_active(&self, now: DateTime<Utc>) -> Vec<SessionRecord>;
    fn active_count(&self, now: DateTime<Utc>) -> usize {
        self.list_active(now).len()
    }
    /// Deactivates every expired or idle session and returns the ones it closed.
    fn sweep_expired(&self, policy: &SessionPolicy, now: DateTime<Utc>) -> Vec<SessionRecord>;
}

pub fn validate_session(
    store: &dyn SessionStore,
    session_id: &str,
    policy: &SessionPolicy,
    now: DateTime<Utc>,
) -> SessionValidation {
    let Some(record) = store.get(session_id) else {
        return SessionValidation {
            valid: false,
            reason: Some(SessionInvalidReason::NotFound),
            session: None,
        };
    };
    let reason = record.invalid_reason(policy, now);
    SessionValidation {
        valid: reason.is_none(),
        reason,
        session: Some(record),
    }
}

/// Closed sessions kept per user as the new-IP / new-agent baseline.
pub const INACTIVE_HISTORY_PER_USER: usize = 10;

pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<String, SessionRecord>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn with_sessions(records: Vec<SessionRecord>) -> Self {
        let store = Self::new();
        for record in records {
            store.create(record);
        }
        store
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore for InMemorySessionStore {
    fn create(&self, record: SessionRecord) {
        self.sessions
            .lock()
            .insert(record.session_id.clone(), record);
    }

    fn get(&self, session_id: &str) -> Option<SessionRecord> {
        self.sessions.lock().get(session_id).cloned()
    }

    fn update(&self, record: SessionRecord) -> bool {
        let mut sessions = self.sessions.lock();
        match sessions.get_mut(&record.session_id) {
            Some(existing) => {
                *existing = record;
                true
            }
            None => false,
        }
    }

    fn touch(&self, session_id: &str, now: DateTime<Utc>) -> bool {
        let mut sessions = self.sessions.lock();
        match sessions.get_mut(session_id) {
            Some(record) if record.is_valid_at(now) => {
                record.last_activity = now;
                true
            }
            _ => false,
        }
    }

    fn terminate(&self, session_id: &str) -> Option<SessionRecord> {
        let mut sessions = self.sessions.lock();
        let record = sessions.get_mut(session_id)?;
        record.is_active = false;
        Some(record.clone())
    }

    fn list_for_user(&self, user_id: &str) -> Vec<SessionRecord> {
        let mut records: Vec<SessionRecord> = self
            .sessions
            .lock()
            .values()
            .filter(|record| record.user_id == user_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        records
    }

    fn list_active(&self, now: DateTime<Utc>) -> Vec<SessionRecord> {
        self.sessions
            .lock()
            .values()
            .filter(|record| record.is_valid_at(now))
            .cloned()
            .collect()
    }

    fn sweep_expired(&self, policy: &SessionPolicy, now: DateTime<Utc>) -> Vec<SessionRecord> {
        let mut closed = Vec::new();
        let mut sessions = self.sessions.lock();
        for record in sessions.values_mut() {
            if !record.is_active {
                continue;
            }
            if record.invalid_reason(policy, now).is_some() {
                record.is_active = false;
                closed.push(record.clone());
            }
        }
        evict_inactive(&mut sessions, INACTIVE_HISTORY_PER_USER);
        closed
    }
}

/// Drops closed sessions beyond the newest `keep` per user.
fn evict_inactive(sessions: &mut HashMap<String, SessionRecord>, keep: usize) {
    let mut closed_by_user: HashMap<&str, Vec<(DateTime<Utc>, &str)>> = HashMap::new();
    for record in sessions.values().filter(|record| !record.is_active) {
        closed_by_user
            .entry(record.user_id.as_str())
            .or_default()
            .push((record.last_activity, record.session_id.as_str()));
    }
    let mut evicted = Vec::new();
    for (_, mut closed) in closed_by_user {
        if closed.len() <= keep {
            continue;
        }
        closed.sort_by(|a, b| b.0.cmp(&a.0));
        evicted.extend(closed.split_off(keep).into_iter().map(|(_, id)| id.to_string()));
    }
    for session_id in evicted {
        sessions.remove(&session_id);
    }
}
