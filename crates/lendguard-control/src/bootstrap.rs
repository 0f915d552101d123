use std::sync::Arc;

use tracing::{info, warn};

use crate::config::SystemConfig;
use crate::events::{BroadcastEventSink, EventSink};
use crate::policy::{InMemoryPolicyService, PolicyService};
use crate::rate_limit::{InMemoryRateLimiter, RateLimiter};
use crate::repository::{InMemorySecurityRepository, RepositoryError, SecurityRepository};
use crate::session::{InMemorySessionStore, SessionStore};
use crate::sqlite_repository::SqliteSecurityRepository;

const EVENT_CHANNEL_CAPACITY: usize = 256;

pub struct ControlPlaneBundle {
    pub policy: Arc<dyn PolicyService>,
    pub repository: Arc<dyn SecurityRepository>,
    pub sessions: Arc<dyn SessionStore>,
    pub rate_limiter: Arc<dyn RateLimiter>,
    pub events: Arc<dyn EventSink>,
}

pub struct ControlPlaneStores {
    pub repository: Arc<dyn SecurityRepository>,
    pub sessions: Arc<dyn SessionStore>,
    pub rate_limiter: Arc<dyn RateLimiter>,
    pub events: Arc<dyn EventSink>,
}

impl ControlPlaneStores {
    pub fn in_memory() -> Self {
        Self {
            repository: InMemorySecurityRepository::shared(),
            sessions: InMemorySessionStore::shared(),
            rate_limiter: InMemoryRateLimiter::shared(),
            events: BroadcastEventSink::shared(EVENT_CHANNEL_CAPACITY),
        }
    }
}

impl Default for ControlPlaneStores {
    fn default() -> Self {
        Self::in_memory()
    }
}

pub fn from_config_with_stores(config: &SystemConfig, stores: ControlPlaneStores) -> ControlPlaneBundle {
    ControlPlaneBundle {
        policy: Arc::new(InMemoryPolicyService::from_config(config)),
        repository: stores.repository,
        sessions: stores.sessions,
        rate_limiter: stores.rate_limiter,
        events: stores.events,
    }
}

pub fn load_from_system_config(config: &SystemConfig) -> Result<ControlPlaneBundle, RepositoryError> {
    let repository = build_repository(config)?;
    let sessions = InMemorySessionStore::shared();
    restore_sessions(repository.as_ref(), sessions.as_ref())?;

    let stores = ControlPlaneStores {
        repository,
        sessions,
        rate_limiter: InMemoryRateLimiter::shared(),
        events: BroadcastEventSink::shared(EVENT_CHANNEL_CAPACITY),
    };
    Ok(from_config_with_stores(config, stores))
}

fn build_repository(config: &SystemConfig) -> Result<Arc<dyn SecurityRepository>, RepositoryError> {
    let path = config.get_string("storage.sqlite_path");
    if path.trim().is_empty() {
        warn!("storage.sqlite_path is empty, security records are kept in memory");
        return Ok(InMemorySecurityRepository::shared());
    }
    let repo = SqliteSecurityRepository::open(path.trim())?;
    repo.ensure_schema()?;
    info!(path = %path, "security repository opened");
    Ok(Arc::new(repo))
}

fn restore_sessions(
    repository: &dyn SecurityRepository,
    sessions: &dyn SessionStore,
) -> Result<usize, RepositoryError> {
    let records = repository.load_sessions()?;
    let mut restored = 0;
    for record in records.into_iter().filter(|record| record.is_active) {
        sessions.create(record);
        restored += 1;
    }
    if restored > 0 {
        info!(restored, "restored active sessions");
    }
    Ok(restored)
}
