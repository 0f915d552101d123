use std::collections::BTreeMap;

use lendguard_control::{
    RateLimitDecision, SecurityAlert, SessionInvalidReason, SessionRecord, SessionValidation,
};
use serde::{Deserialize, Serialize};

use crate::fingerprint::DeviceFingerprint;
use crate::pipeline::PipelineStep;
use crate::risk::{RiskAssessment, RiskInput};
use crate::validation::{FormFieldInput, FormValidation};

pub const DEFAULT_INSPECT_ACTION: &str = "form_submit";

fn default_action() -> String {
    DEFAULT_INSPECT_ACTION.to_string()
}

/// One client submission run through the security pipeline.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SecurityRequest {
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default = "default_action")]
    pub action: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub device_fingerprint: Option<String>,
    #[serde(default)]
    pub failed_login_attempts: u32,
    #[serde(default)]
    pub fields: BTreeMap<String, FormFieldInput>,
}

impl SecurityRequest {
    pub fn rate_limit_identifier(&self) -> String {
        self.user_id
            .as_deref()
            .or(self.ip_address.as_deref())
            .filter(|value| !value.trim().is_empty())
            .unwrap_or("anonymous")
            .to_string()
    }

    pub fn risk_input(&self) -> RiskInput {
        RiskInput {
            user_id: self.user_id.clone(),
            ip_address: self.ip_address.clone(),
            user_agent: self.user_agent.clone(),
            device_fingerprint: self.device_fingerprint.clone(),
            failed_login_attempts: self.failed_login_attempts,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SecurityVerdict {
    pub request_id: String,
    pub allowed: bool,
    pub rejected_by: Option<PipelineStep>,
    pub reason: Option<String>,
    pub steps: Vec<PipelineStep>,
    pub rate_limit: Option<RateLimitDecision>,
    pub session: Option<SessionValidation>,
    pub validation: Option<FormValidation>,
    pub risk: Option<RiskAssessment>,
    pub requires_verification: bool,
    pub events: Vec<String>,
    pub alerts: Vec<SecurityAlert>,
}

impl SecurityVerdict {
    pub(crate) fn new(request_id: String) -> Self {
        Self {
            request_id,
            allowed: true,
            rejected_by: None,
            reason: None,
            steps: Vec::new(),
            rate_limit: None,
            session: None,
            validation: None,
            risk: None,
            requires_verification: false,
            events: Vec::new(),
            alerts: Vec::new(),
        }
    }
}

/// Sign-in context used to open a session.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionStart {
    pub user_id: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    /// Raw browser traits; hashed when present.
    pub fingerprint: Option<DeviceFingerprint>,
    /// Precomputed fingerprint hash, used when `fingerprint` is absent.
    pub device_fingerprint: Option<String>,
    pub failed_login_attempts: u32,
}

impl SessionStart {
    pub fn fingerprint_hash(&self) -> Option<String> {
        self.fingerprint
            .as_ref()
            .map(DeviceFingerprint::hash)
            .or_else(|| self.device_fingerprint.clone())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionOpened {
    /// `None` when the sign-in scored critical and no session was issued.
    pub session: Option<SessionRecord>,
    pub risk: RiskAssessment,
    pub alerts: Vec<SecurityAlert>,
}

/// Current request context for a session check; missing values are taken
/// from the stored session.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionContext {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub device_fingerprint: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionCheck {
    pub valid: bool,
    pub reason: Option<SessionInvalidReason>,
    pub session: Option<SessionRecord>,
    pub risk: Option<RiskAssessment>,
}
