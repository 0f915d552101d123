use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::config::SystemConfig;

/// Score boundaries for the risk levels. A score at or above a threshold
/// belongs to that level.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RiskThresholds {
    pub warning: u32,
    pub high: u32,
    pub critical: u32,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            warning: 50,
            high: 70,
            critical: 90,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RateLimitRule {
    pub max_attempts: u32,
    pub window_seconds: u64,
    pub block_seconds: u64,
}

impl RateLimitRule {
    pub const fn new(max_attempts: u32, window_seconds: u64, block_seconds: u64) -> Self {
        Self {
            max_attempts,
            window_seconds,
            block_seconds,
        }
    }

    pub fn unlimited() -> Self {
        Self::new(0, 60, 0)
    }
}

impl Default for RateLimitRule {
    fn default() -> Self {
        Self::new(100, 60, 60)
    }
}

pub const DEFAULT_RATE_LIMIT_ACTION: &str = "api_call";

pub fn default_rate_limit_rules() -> HashMap<String, RateLimitRule> {
    let mut rules = HashMap::new();
    rules.insert("login".to_string(), RateLimitRule::new(5, 900, 900));
    rules.insert("password_reset".to_string(), RateLimitRule::new(3, 3600, 3600));
    rules.insert("form_submit".to_string(), RateLimitRule::new(10, 60, 60));
    rules.insert("document_upload".to_string(), RateLimitRule::new(20, 3600, 600));
    rules.insert(DEFAULT_RATE_LIMIT_ACTION.to_string(), RateLimitRule::default());
    rules
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GeoPolicy {
    pub allowed_country: String,
    pub fail_open: bool,
}

impl Default for GeoPolicy {
    fn default() -> Self {
        Self {
            allowed_country: "US".to_string(),
            fail_open: false,
        }
    }
}

/// Upper bound on session lifetimes and idle timeouts (30 days).
pub const MAX_SESSION_MINUTES: i64 = 30 * 24 * 60;
/// Upper bound on the escalation correlation window (7 days).
pub const MAX_ESCALATION_WINDOW_MINUTES: i64 = 7 * 24 * 60;

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct SessionPolicy {
    pub max_age_minutes: i64,
    pub idle_timeout_minutes: i64,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            max_age_minutes: 480,
            idle_timeout_minutes: 30,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct EscalationPolicy {
    pub window_minutes: i64,
    pub failed_login_threshold: usize,
    pub high_event_threshold: usize,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            window_minutes: 15,
            failed_login_threshold: 5,
            high_event_threshold: 3,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ValidationPolicy {
    pub max_input_length: usize,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            max_input_length: 10_000,
        }
    }
}

/// Ordered step names of the security pipeline. Empty means the built-in order.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub steps: Vec<String>,
}

pub trait PolicyService: Send + Sync {
    fn risk_thresholds(&self) -> RiskThresholds;
    fn rate_limit_rule(&self, action: &str) -> RateLimitRule;
    fn geo_policy(&self) -> GeoPolicy;
    fn session_policy(&self) -> SessionPolicy;
    fn escalation_policy(&self) -> EscalationPolicy;
    fn validation_policy(&self) -> ValidationPolicy;
    fn pipeline_config(&self) -> PipelineConfig;
}

pub struct InMemoryPolicyService {
    thresholds: RwLock<RiskThresholds>,
    rate_limits: RwLock<HashMap<String, RateLimitRule>>,
    geo: RwLock<GeoPolicy>,
    session: RwLock<SessionPolicy>,
    escalation: RwLock<EscalationPolicy>,
    validation: RwLock<ValidationPolicy>,
    pipeline: RwLock<PipelineConfig>,
}

impl InMemoryPolicyService {
    pub fn new() -> Self {
        Self {
            thresholds: RwLock::new(RiskThresholds::default()),
            rate_limits: RwLock::new(default_rate_limit_rules()),
            geo: RwLock::new(GeoPolicy::default()),
            session: RwLock::new(SessionPolicy::default()),
            escalation: RwLock::new(EscalationPolicy::default()),
            validation: RwLock::new(ValidationPolicy::default()),
            pipeline: RwLock::new(PipelineConfig::default()),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn from_config(config: &SystemConfig) -> Self {
        let service = Self::new();
        service.set_risk_thresholds(RiskThresholds {
            warning: config.get_u32("risk.warning_threshold"),
            high: config.get_u32("risk.high_threshold"),
            critical: config.get_u32("risk.critical_threshold"),
        });
        service.set_geo_policy(GeoPolicy {
            allowed_country: config.get_string("geo.allowed_country").to_uppercase(),
            fail_open: config.get_bool("geo.fail_open"),
        });
        service.set_session_policy(SessionPolicy {
            max_age_minutes: config
                .get_number("session.max_age_minutes")
                .clamp(1, MAX_SESSION_MINUTES),
            idle_timeout_minutes: config
                .get_number("session.idle_timeout_minutes")
                .clamp(0, MAX_SESSION_MINUTES),
        });
        service.set_escalation_policy(EscalationPolicy {
            window_minutes: config
                .get_number("escalation.window_minutes")
                .clamp(1, MAX_ESCALATION_WINDOW_MINUTES),
            failed_login_threshold: config.get_u32("escalation.failed_login_threshold").max(1)
                as usize,
            high_event_threshold: config.get_u32("escalation.high_event_threshold").max(1) as usize,
        });
        service.set_validation_policy(ValidationPolicy {
            max_input_length: config.get_u32("validation.max_input_length") as usize,
        });
        service.set_pipeline_config(PipelineConfig {
            steps: config
                .get_string("pipeline.steps")
                .split(',')
                .map(str::trim)
                .filter(|step| !step.is_empty())
                .map(str::to_string)
                .collect(),
        });
        service
    }

    pub fn set_risk_thresholds(&self, thresholds: RiskThresholds) {
        *self.thresholds.write() = thresholds;
    }

    pub fn set_rate_limit_rule(&self, action: &str, rule: RateLimitRule) {
        self.rate_limits.write().insert(action.to_string(), rule);
    }

    pub fn set_geo_policy(&self, policy: GeoPolicy) {
        *self.geo.write() = policy;
    }

    pub fn set_session_policy(&self, policy: SessionPolicy) {
        *self.session.write() = policy;
    }

    pub fn set_escalation_policy(&self, policy: EscalationPolicy) {
        *self.escalation.write() = policy;
    }

    pub fn set_validation_policy(&self, policy: ValidationPolicy) {
        *self.validation.write() = policy;
    }

    pub fn set_pipeline_config(&self, config: PipelineConfig) {
        *self.pipeline.write() = config;
    }
}

impl Default for InMemoryPolicyService {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyService for InMemoryPolicyService {
    fn risk_thresholds(&self) -> RiskThresholds {
        *self.thresholds.read()
    }

    fn rate_limit_rule(&self, action: &str) -> RateLimitRule {
        let rules = self.rate_limits.read();
        rules
            .get(action)
            .or_else(|| rules.get(DEFAULT_RATE_LIMIT_ACTION))
            .copied()
            .unwrap_or_default()
    }

    fn geo_policy(&self) -> GeoPolicy {
        self.geo.read().clone()
    }

    fn session_policy(&self) -> SessionPolicy {
        *self.session.read()
    }

    fn escalation_policy(&self) -> EscalationPolicy {
        *self.escalation.read()
    }

    fn validation_policy(&self) -> ValidationPolicy {
        *self.validation.read()
    }

    fn pipeline_config(&self) -> PipelineConfig {
        self.pipeline.read().clone()
    }
}
