pub mod bootstrap;
pub mod config;
pub mod events;
pub mod policy;
pub mod rate_limit;
pub mod repository;
pub mod session;
pub mod sqlite_repository;
pub mod static_config;

pub use bootstrap::{
    from_config_with_stores, load_from_system_config, ControlPlaneBundle, ControlPlaneStores,
};
pub use config::{ConfigError, SystemConfig, SystemConfigLoader};
pub use events::{
    AlertStatus, BroadcastEventSink, EventSink, InMemoryEventSink, SecurityAlert, SecurityEvent,
    SecurityEventType, SessionAnomaly, Severity,
};
pub use policy::{
    default_rate_limit_rules, EscalationPolicy, GeoPolicy, InMemoryPolicyService, PipelineConfig,
    PolicyService, RateLimitRule, RiskThresholds, SessionPolicy, ValidationPolicy,
    DEFAULT_RATE_LIMIT_ACTION, MAX_ESCALATION_WINDOW_MINUTES, MAX_SESSION_MINUTES,
};
pub use rate_limit::{InMemoryRateLimiter, RateLimitDecision, RateLimiter};
pub use repository::{
    EncryptedField, EventQuery, InMemorySecurityRepository, RepositoryError, SecurityRepository,
};
pub use session::{
    validate_session, InMemorySessionStore, SessionInvalidReason, SessionRecord, SessionStore,
    SessionValidation, INACTIVE_HISTORY_PER_USER,
};
pub use sqlite_repository::SqliteSecurityRepository;
