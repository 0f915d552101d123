pub mod crypto;
pub mod errors;
pub mod escalation;
pub mod fingerprint;
pub mod geo;
pub mod monitor;
pub mod pipeline;
pub mod risk;
pub mod types;
pub mod validation;
pub mod webhook;

pub use crypto::{CryptoError, FieldCipher};
pub use errors::{categorize, sanitize_error, ErrorCategory, RawError, SanitizedError};
pub use escalation::{EscalationEngine, EventRecorder, RecordedEvent};
pub use fingerprint::DeviceFingerprint;
pub use geo::{
    is_private_or_loopback, suspicious_indicators, GeoDecision, GeoError, GeoGate, GeoLookup,
    GeoReason, HttpGeoLookup, HttpGeoLookupConfig, StaticGeoLookup,
};
pub use monitor::{security_score, SecurityMetrics, SecurityMonitor};
pub use pipeline::{default_steps, PipelineStep, SecurityPipeline};
pub use risk::{
    assess, derive_signals, risk_level, risk_score, RiskAction, RiskAssessment, RiskFactor,
    RiskInput, RiskLevel, RiskSignals,
};
pub use types::{
    SecurityRequest, SecurityVerdict, SessionCheck, SessionContext, SessionOpened, SessionStart,
    DEFAULT_INSPECT_ACTION,
};
pub use validation::{
    detect_threats, sanitize, FieldKind, FieldValidation, FormFieldInput, FormValidation,
    InputValidator, ThreatMatch, ThreatType,
};
pub use webhook::{sign, verify_signature, WebhookError, SIGNATURE_HEADER};

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use lendguard_control::{
    validate_session, ControlPlaneBundle, EncryptedField, EventSink, PolicyService,
    RateLimitDecision, RateLimiter, RepositoryError, SecurityAlert, SecurityEvent,
    SecurityEventType, SecurityRepository, SessionAnomaly, SessionInvalidReason, SessionRecord,
    SessionStore, Severity,
};
use serde_json::json;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("webhook rejected: {0}")]
    Webhook(#[from] WebhookError),
    #[error("field encryption failed: {0}")]
    Crypto(#[from] CryptoError),
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

/// Secrets the kernel needs beyond runtime policy.
#[derive(Clone, Default)]
pub struct KernelConfig {
    pub webhook_secret: String,
    pub master_key: String,
}

enum StepOutcome {
    Continue,
    Reject(String),
}

#[derive(Default)]
struct InspectionContext {
    session: Option<SessionRecord>,
}

pub struct SecurityKernel {
    config: KernelConfig,
    policy: Arc<dyn PolicyService>,
    repository: Arc<dyn SecurityRepository>,
    sessions: Arc<dyn SessionStore>,
    rate_limiter: Arc<dyn RateLimiter>,
    events: Arc<dyn EventSink>,
    recorder: Arc<EventRecorder>,
    monitor: SecurityMonitor,
    geo: GeoGate,
}

impl SecurityKernel {
    pub fn new(config: KernelConfig, bundle: ControlPlaneBundle, geo: Arc<dyn GeoLookup>) -> Self {
        let recorder = Arc::new(EventRecorder::new(
            bundle.repository.clone(),
            bundle.events.clone(),
            bundle.policy.clone(),
        ));
        let monitor = SecurityMonitor::new(
            bundle.repository.clone(),
            bundle.sessions.clone(),
            bundle.policy.clone(),
            recorder.clone(),
        );
        Self {
            config,
            policy: bundle.policy,
            repository: bundle.repository,
            sessions: bundle.sessions,
            rate_limiter: bundle.rate_limiter,
            events: bundle.events,
            recorder,
            monitor,
            geo: GeoGate::new(geo),
        }
    }

    pub fn policy(&self) -> &Arc<dyn PolicyService> {
        &self.policy
    }

    pub fn repository(&self) -> &Arc<dyn SecurityRepository> {
        &self.repository
    }

    pub fn monitor(&self) -> &SecurityMonitor {
        &self.monitor
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SecurityEvent> {
        self.events.subscribe()
    }

    pub fn record_event(&self, event: SecurityEvent) -> Result<RecordedEvent, KernelError> {
        Ok(self.recorder.record(event)?)
    }

    /// Runs the configured pipeline steps in order and stops at the first
    /// rejection.
    pub fn inspect(&self, req: SecurityRequest) -> Result<SecurityVerdict, KernelError> {
        self.inspect_at(req, Utc::now())
    }

    pub fn inspect_at(
        &self,
        req: SecurityRequest,
        now: DateTime<Utc>,
    ) -> Result<SecurityVerdict, KernelError> {
        let request_id = req
            .request_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let pipeline = SecurityPipeline::from_config(&self.policy.pipeline_config());
        let mut verdict = SecurityVerdict::new(request_id);
        let mut ctx = InspectionContext::default();

        for step in &pipeline.steps {
            verdict.steps.push(*step);
            let outcome = match step {
                PipelineStep::RateLimit => self.rate_limit_step(&req, &mut verdict)?,
                PipelineStep::Session => self.session_step(&req, now, &mut ctx, &mut verdict)?,
                PipelineStep::InputValidation => self.validation_step(&req, &mut verdict)?,
                PipelineStep::Risk => self.risk_step(&req, now, &mut ctx, &mut verdict)?,
            };
            if let StepOutcome::Reject(reason) = outcome {
                info!(
                    request_id = %verdict.request_id,
                    step = step.as_str(),
                    reason = %reason,
                    user_id = req.user_id.as_deref().unwrap_or("-"),
                    "security pipeline rejected request"
                );
                verdict.allowed = false;
                verdict.rejected_by = Some(*step);
                verdict.reason = Some(reason);
                return Ok(verdict);
            }
        }
        debug!(request_id = %verdict.request_id, "security pipeline passed");
        Ok(verdict)
    }

    fn rate_limit_step(
        &self,
        req: &SecurityRequest,
        verdict: &mut SecurityVerdict,
    ) -> Result<StepOutcome, KernelError> {
        let identifier = req.rate_limit_identifier();
        let decision = self.check_rate_limit_inner(&identifier, &req.action, Some(req), verdict)?;
        let allowed = decision.allowed;
        verdict.rate_limit = Some(decision);
        if allowed {
            Ok(StepOutcome::Continue)
        } else {
            Ok(StepOutcome::Reject(format!("rate limit exceeded for {}", req.action)))
        }
    }

    fn session_step(
        &self,
        req: &SecurityRequest,
        now: DateTime<Utc>,
        ctx: &mut InspectionContext,
        verdict: &mut SecurityVerdict,
    ) -> Result<StepOutcome, KernelError> {
        let Some(session_id) = req.session_id.as_deref() else {
            return Ok(StepOutcome::Continue);
        };
        let check = validate_session(
            self.sessions.as_ref(),
            session_id,
            &self.policy.session_policy(),
            now,
        );
        verdict.session = Some(check.clone());

        if let Some(reason) = check.reason {
            let event = match reason {
                SessionInvalidReason::Expired | SessionInvalidReason::IdleTimeout => {
                    self.close_session(session_id, reason.as_str(), now)?
                }
                SessionInvalidReason::NotFound | SessionInvalidReason::Inactive => self
                    .request_event(req, SecurityEventType::SuspiciousSession)
                    .with_severity(Severity::Medium)
                    .with_details(json!({
                        "session_id": session_id,
                        "reason": reason.as_str(),
                    })),
            };
            self.push_event(event, verdict)?;
            return Ok(StepOutcome::Reject(format!("session {}", reason.as_str())));
        }

        let Some(session) = check.session else {
            return Ok(StepOutcome::Continue);
        };
        if let Some(user_id) = req.user_id.as_deref() {
            if session.user_id != user_id {
                let event = self
                    .request_event(req, SecurityEventType::SuspiciousSession)
                    .with_details(json!({
                        "session_id": session_id,
                        "reason": "user_mismatch",
                        "session_user_id": session.user_id,
                    }));
                self.push_event(event, verdict)?;
                return Ok(StepOutcome::Reject("session belongs to another user".to_string()));
            }
        }
        self.sessions.touch(session_id, now);
        ctx.session = self.sessions.get(session_id);
        Ok(StepOutcome::Continue)
    }

    fn validation_step(
        &self,
        req: &SecurityRequest,
        verdict: &mut SecurityVerdict,
    ) -> Result<StepOutcome, KernelError> {
        if req.fields.is_empty() {
            return Ok(StepOutcome::Continue);
        }
        let validation = self.validate_fields(req, &req.fields, verdict)?;
        let valid = validation.valid;
        verdict.validation = Some(validation);
        if valid {
            Ok(StepOutcome::Continue)
        } else {
            Ok(StepOutcome::Reject("input rejected".to_string()))
        }
    }

    fn risk_step(
        &self,
        req: &SecurityRequest,
        now: DateTime<Utc>,
        ctx: &mut InspectionContext,
        verdict: &mut SecurityVerdict,
    ) -> Result<StepOutcome, KernelError> {
        let mut input = req.risk_input();
        if input.user_id.is_none() {
            input.user_id = ctx.session.as_ref().map(|session| session.user_id.clone());
        }
        let history = match input.user_id.as_deref() {
            Some(user_id) => self.sessions.list_for_user(user_id),
            None => Vec::new(),
        };
        let assessment = assess(&derive_signals(&input, &history), &self.policy.risk_thresholds());
        verdict.risk = Some(assessment.clone());

        if let Some(session) = ctx.session.as_mut() {
            session.risk_score = assessment.score;
            self.sessions.update(session.clone());
            self.repository.save_session(session)?;
        }
        if assessment.level >= RiskLevel::Medium {
            self.flag_risk(req, ctx.session.as_ref(), &assessment, verdict)?;
        }
        match assessment.action {
            RiskAction::TerminateSession => {
                if let Some(session) = ctx.session.as_ref() {
                    let event = self.close_session(&session.session_id, "critical_risk", now)?;
                    self.push_event(event, verdict)?;
                }
                Ok(StepOutcome::Reject(format!("risk score {} is critical", assessment.score)))
            }
            RiskAction::RequireVerification => {
                verdict.requires_verification = true;
                Ok(StepOutcome::Continue)
            }
            RiskAction::Allow | RiskAction::Warn => Ok(StepOutcome::Continue),
        }
    }

    fn flag_risk(
        &self,
        req: &SecurityRequest,
        session: Option<&SessionRecord>,
        assessment: &RiskAssessment,
        verdict: &mut SecurityVerdict,
    ) -> Result<(), KernelError> {
        let severity = severity_for(assessment.level);
        let factors: Vec<&str> = assessment.factors.iter().map(|f| f.code.as_str()).collect();
        if let Some(session) = session {
            self.repository.insert_anomaly(&SessionAnomaly {
                id: Uuid::new_v4().to_string(),
                session_id: session.session_id.clone(),
                user_id: session.user_id.clone(),
                anomaly_type: "elevated_risk".to_string(),
                risk_score: assessment.score,
                details: json!({ "factors": factors, "level": assessment.level }),
                created_at: Utc::now(),
            })?;
        }
        let event = self
            .request_event(req, SecurityEventType::SuspiciousSession)
            .with_severity(severity)
            .with_details(json!({
                "risk_score": assessment.score,
                "factors": factors,
                "session_id": session.map(|s| s.session_id.as_str()),
            }));
        self.push_event(event, verdict)
    }

    /// Deactivates and persists a session and returns the matching
    /// `session_terminated` event, not yet recorded.
    fn close_session(
        &self,
        session_id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<SecurityEvent, KernelError> {
        let closed = self.sessions.terminate(session_id);
        if let Some(session) = closed.as_ref() {
            self.repository.save_session(session)?;
        }
        Ok(SecurityEvent::new(SecurityEventType::SessionTerminated)
            .with_user(closed.as_ref().map(|s| s.user_id.clone()))
            .with_ip(closed.as_ref().and_then(|s| s.ip_address.clone()))
            .with_user_agent(closed.as_ref().and_then(|s| s.user_agent.clone()))
            .with_details(json!({ "session_id": session_id, "reason": reason }))
            .at(now))
    }

    fn request_event(&self, req: &SecurityRequest, event_type: SecurityEventType) -> SecurityEvent {
        SecurityEvent::new(event_type)
            .with_user(req.user_id.clone())
            .with_ip(req.ip_address.clone())
            .with_user_agent(req.user_agent.clone())
    }

    fn push_event(
        &self,
        event: SecurityEvent,
        verdict: &mut SecurityVerdict,
    ) -> Result<(), KernelError> {
        let recorded = self.recorder.record(event)?;
        verdict.events.push(recorded.event.id);
        verdict.alerts.extend(recorded.alerts);
        Ok(())
    }

    fn check_rate_limit_inner(
        &self,
        identifier: &str,
        action: &str,
        req: Option<&SecurityRequest>,
        verdict: &mut SecurityVerdict,
    ) -> Result<RateLimitDecision, KernelError> {
        let rule = self.policy.rate_limit_rule(action);
        let decision = self.rate_limiter.check(identifier, action, &rule);
        if !decision.allowed {
            let base = match req {
                Some(req) => self.request_event(req, SecurityEventType::RateLimitExceeded),
                None => SecurityEvent::new(SecurityEventType::RateLimitExceeded),
            };
            let event = base.with_details(json!({
                "action": action,
                "identifier": identifier,
                "retry_after_seconds": decision.retry_after_seconds,
            }));
            self.push_event(event, verdict)?;
        }
        Ok(decision)
    }

    fn validate_fields(
        &self,
        req: &SecurityRequest,
        fields: &BTreeMap<String, FormFieldInput>,
        verdict: &mut SecurityVerdict,
    ) -> Result<FormValidation, KernelError> {
        let validator = InputValidator::new(self.policy.validation_policy().max_input_length);
        let validation = validator.validate_form(fields);

        for threat_type in &validation.threat_types {
            let flagged: Vec<&str> = validation
                .threats()
                .filter(|(_, threat)| threat.threat_type == *threat_type)
                .map(|(field, _)| field)
                .collect();
            let patterns: Vec<&str> = validation
                .threats()
                .filter(|(_, threat)| threat.threat_type == *threat_type)
                .map(|(_, threat)| threat.pattern.as_str())
                .collect();
            let event_type = match threat_type {
                ThreatType::XssAttempt => SecurityEventType::XssAttempt,
                ThreatType::SqlInjectionAttempt => SecurityEventType::SqlInjectionAttempt,
            };
            let event = self
                .request_event(req, event_type)
                .with_details(json!({ "fields": flagged, "patterns": patterns }));
            self.push_event(event, verdict)?;
        }

        if !validation.valid && validation.threat_types.is_empty() {
            let errors: Vec<&str> = validation
                .fields
                .iter()
                .flat_map(|field| field.errors.iter().map(String::as_str))
                .collect();
            let event = self
                .request_event(req, SecurityEventType::InputValidationFailed)
                .with_severity(Severity::Low)
                .with_details(json!({ "errors": errors }));
            self.push_event(event, verdict)?;
        }
        Ok(validation)
    }

    /// Form validation as a standalone operation. Threats are still recorded.
    pub fn validate_form(
        &self,
        user_id: Option<String>,
        ip_address: Option<String>,
        fields: &BTreeMap<String, FormFieldInput>,
    ) -> Result<(FormValidation, Vec<SecurityAlert>), KernelError> {
        let req = SecurityRequest {
            user_id,
            ip_address,
            ..SecurityRequest::default()
        };
        let mut scratch = SecurityVerdict::new(String::new());
        let validation = self.validate_fields(&req, fields, &mut scratch)?;
        Ok((validation, scratch.alerts))
    }

    pub fn check_rate_limit(
        &self,
        identifier: &str,
        action: &str,
    ) -> Result<RateLimitDecision, KernelError> {
        if identifier.trim().is_empty() {
            return Err(KernelError::BadRequest("identifier is required".to_string()));
        }
        let mut scratch = SecurityVerdict::new(String::new());
        self.check_rate_limit_inner(identifier, action, None, &mut scratch)
    }

    pub fn reset_rate_limit(&self, identifier: &str, action: &str) {
        self.rate_limiter.reset(identifier, action);
    }

    pub fn prune_rate_limits(&self) -> usize {
        self.rate_limiter.prune()
    }

    pub fn assess_risk(&self, input: &RiskInput) -> RiskAssessment {
        let history = match input.user_id.as_deref() {
            Some(user_id) => self.sessions.list_for_user(user_id),
            None => Vec::new(),
        };
        assess(&derive_signals(input, &history), &self.policy.risk_thresholds())
    }

    pub fn create_session(&self, start: SessionStart) -> Result<SessionOpened, KernelError> {
        if start.user_id.trim().is_empty() {
            return Err(KernelError::BadRequest("user_id is required".to_string()));
        }
        let now = Utc::now();
        let fingerprint = start.fingerprint_hash();
        let input = RiskInput {
            user_id: Some(start.user_id.clone()),
            ip_address: start.ip_address.clone(),
            user_agent: start.user_agent.clone(),
            device_fingerprint: fingerprint.clone(),
            failed_login_attempts: start.failed_login_attempts,
        };
        let risk = self.assess_risk(&input);
        let req = SecurityRequest {
            user_id: Some(start.user_id.clone()),
            ip_address: start.ip_address.clone(),
            user_agent: start.user_agent.clone(),
            device_fingerprint: fingerprint.clone(),
            ..SecurityRequest::default()
        };
        let mut verdict = SecurityVerdict::new(String::new());

        if risk.action == RiskAction::TerminateSession {
            self.flag_risk(&req, None, &risk, &mut verdict)?;
            warn!(user_id = %start.user_id, risk_score = risk.score, "session refused");
            return Ok(SessionOpened {
                session: None,
                risk,
                alerts: verdict.alerts,
            });
        }

        let mut session = SessionRecord::new(
            Uuid::new_v4().to_string(),
            start.user_id.clone(),
            &self.policy.session_policy(),
            now,
        );
        session.ip_address = start.ip_address.clone();
        session.user_agent = start.user_agent.clone();
        session.device_fingerprint = fingerprint;
        session.risk_score = risk.score;
        self.sessions.create(session.clone());
        self.repository.save_session(&session)?;

        let event = self
            .request_event(&req, SecurityEventType::LoginSuccess)
            .with_details(json!({ "session_id": session.session_id, "risk_score": risk.score }));
        self.push_event(event, &mut verdict)?;
        if risk.level >= RiskLevel::Medium {
            self.flag_risk(&req, Some(&session), &risk, &mut verdict)?;
        }
        info!(
            user_id = %session.user_id,
            session_id = %session.session_id,
            risk_score = risk.score,
            "session created"
        );
        Ok(SessionOpened {
            session: Some(session),
            risk,
            alerts: verdict.alerts,
        })
    }

    /// Validates, touches and re-scores a session.
    pub fn check_session(
        &self,
        session_id: &str,
        context: &SessionContext,
    ) -> Result<SessionCheck, KernelError> {
        let now = Utc::now();
        let check = validate_session(
            self.sessions.as_ref(),
            session_id,
            &self.policy.session_policy(),
            now,
        );
        let mut verdict = SecurityVerdict::new(String::new());
        let Some(session) = check.session.clone().filter(|_| check.valid) else {
            if let Some(reason @ (SessionInvalidReason::Expired | SessionInvalidReason::IdleTimeout)) =
                check.reason
            {
                if check.session.as_ref().is_some_and(|s| s.is_active) {
                    let event = self.close_session(session_id, reason.as_str(), now)?;
                    self.push_event(event, &mut verdict)?;
                }
            }
            return Ok(SessionCheck {
                valid: false,
                reason: check.reason,
                session: self.sessions.get(session_id).or(check.session),
                risk: None,
            });
        };

        self.sessions.touch(session_id, now);
        let req = SecurityRequest {
            user_id: Some(session.user_id.clone()),
            ip_address: context.ip_address.clone().or(session.ip_address.clone()),
            user_agent: context.user_agent.clone().or(session.user_agent.clone()),
            device_fingerprint: context
                .device_fingerprint
                .clone()
                .or(session.device_fingerprint.clone()),
            ..SecurityRequest::default()
        };
        let mut ctx = InspectionContext {
            session: self.sessions.get(session_id),
        };
        let outcome = self.risk_step(&req, now, &mut ctx, &mut verdict)?;
        let risk = verdict.risk.take();
        match outcome {
            StepOutcome::Continue => Ok(SessionCheck {
                valid: true,
                reason: None,
                session: self.sessions.get(session_id),
                risk,
            }),
            StepOutcome::Reject(_) => Ok(SessionCheck {
                valid: false,
                reason: Some(SessionInvalidReason::Inactive),
                session: self.sessions.get(session_id),
                risk,
            }),
        }
    }

    pub fn terminate_session(&self, session_id: &str) -> Result<SessionRecord, KernelError> {
        let Some(session) = self.sessions.terminate(session_id) else {
            return Err(KernelError::NotFound(format!("session {session_id}")));
        };
        self.repository.save_session(&session)?;
        let event = SecurityEvent::new(SecurityEventType::Logout)
            .with_user(Some(session.user_id.clone()))
            .with_ip(session.ip_address.clone())
            .with_user_agent(session.user_agent.clone())
            .with_details(json!({ "session_id": session_id }));
        self.recorder.record(event)?;
        Ok(session)
    }

    pub async fn check_geo(
        &self,
        ip_address: &str,
        headers: &HashMap<String, String>,
    ) -> Result<GeoDecision, KernelError> {
        let decision = self
            .geo
            .check(&self.policy.geo_policy(), ip_address, headers)
            .await;
        if !decision.allowed {
            let user_agent = headers
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case("user-agent"))
                .map(|(_, value)| value.clone());
            let event = SecurityEvent::new(SecurityEventType::GeoBlocked)
                .with_ip(Some(ip_address.to_string()))
                .with_user_agent(user_agent)
                .with_details(json!({
                    "reason": decision.reason,
                    "country_code": decision.country_code,
                    "indicators": decision.indicators,
                }));
            self.recorder.record(event)?;
        }
        Ok(decision)
    }

    pub fn verify_webhook(
        &self,
        body: &[u8],
        signature: Option<&str>,
        ip_address: Option<String>,
    ) -> Result<(), KernelError> {
        match verify_signature(&self.config.webhook_secret, body, signature) {
            Ok(()) => Ok(()),
            Err(err) => {
                if err != WebhookError::MissingSecret {
                    let event = SecurityEvent::new(SecurityEventType::WebhookSignatureInvalid)
                        .with_ip(ip_address)
                        .with_details(json!({ "error": err.to_string(), "body_len": body.len() }));
                    self.recorder.record(event)?;
                } else {
                    warn!("webhook verification attempted without a configured secret");
                }
                Err(err.into())
            }
        }
    }

    fn cipher(&self) -> Result<FieldCipher, KernelError> {
        Ok(FieldCipher::new(&self.config.master_key)?)
    }

    pub fn encrypt_field(
        &self,
        table_name: &str,
        record_id: &str,
        field_name: &str,
        plaintext: &str,
    ) -> Result<EncryptedField, KernelError> {
        if table_name.trim().is_empty() || record_id.trim().is_empty() || field_name.trim().is_empty() {
            return Err(KernelError::BadRequest(
                "table_name, record_id and field_name are required".to_string(),
            ));
        }
        let encrypted_value = self.cipher()?.encrypt(plaintext)?;
        let field = EncryptedField {
            table_name: table_name.to_string(),
            record_id: record_id.to_string(),
            field_name: field_name.to_string(),
            encrypted_value,
            updated_at: Utc::now(),
        };
        self.repository.put_encrypted_field(&field)?;
        Ok(field)
    }

    /// Decrypts `encrypted_value` when given, otherwise the stored value of
    /// the addressed field.
    pub fn decrypt_field(
        &self,
        encrypted_value: Option<&str>,
        table_name: &str,
        record_id: &str,
        field_name: &str,
    ) -> Result<String, KernelError> {
        let cipher = self.cipher()?;
        if let Some(value) = encrypted_value.filter(|value| !value.trim().is_empty()) {
            return Ok(cipher.decrypt(value)?);
        }
        let stored = self
            .repository
            .get_encrypted_field(table_name, record_id, field_name)?
            .ok_or_else(|| {
                KernelError::NotFound(format!("{table_name}.{field_name} for {record_id}"))
            })?;
        let plaintext = cipher.decrypt(&stored.encrypted_value)?;
        let event = SecurityEvent::new(SecurityEventType::DataAccess).with_details(json!({
            "table_name": table_name,
            "record_id": record_id,
            "field_name": field_name,
        }));
        self.recorder.record(event)?;
        Ok(plaintext)
    }
}

fn severity_for(level: RiskLevel) -> Severity {
    match level {
        RiskLevel::Low => Severity::Low,
        RiskLevel::Medium => Severity::Medium,
        RiskLevel::High => Severity::High,
        RiskLevel::Critical => Severity::Critical,
    }
}
