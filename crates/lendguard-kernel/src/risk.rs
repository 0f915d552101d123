//! Session risk scoring.
//!
//! Every flagged condition adds a fixed penalty; the score is the capped sum.
//! Nothing is remembered between checks, the score is recomputed from the
//! signals each time.

use std::net::IpAddr;

use lendguard_control::{RiskThresholds, SessionRecord};
use serde::{Deserialize, Serialize};

use crate::geo::is_private_or_loopback;

pub const MAX_RISK_SCORE: u32 = 100;
pub const NEW_IP_PENALTY: u32 = 25;
pub const NEW_USER_AGENT_PENALTY: u32 = 20;
pub const FAILED_LOGIN_PENALTY: u32 = 10;
pub const FAILED_LOGIN_PENALTY_CAP: u32 = 30;
pub const PRIVATE_NETWORK_PENALTY: u32 = 10;
pub const SUSPICIOUS_USER_AGENT_PENALTY: u32 = 30;
pub const FINGERPRINT_CHANGED_PENALTY: u32 = 15;

const SUSPICIOUS_AGENTS: &[&str] = &[
    "bot",
    "crawler",
    "spider",
    "scraper",
    "headless",
    "curl",
    "wget",
    "python-requests",
    "phantom",
    "selenium",
];

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskSignals {
    pub new_ip_address: bool,
    pub new_user_agent: bool,
    pub failed_login_attempts: u32,
    pub private_network: bool,
    pub suspicious_user_agent: bool,
    pub fingerprint_changed: bool,
}

/// What is known about the request being scored.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskInput {
    pub user_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub device_fingerprint: Option<String>,
    pub failed_login_attempts: u32,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskAction {
    Allow,
    Warn,
    RequireVerification,
    TerminateSession,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskFactor {
    pub code: String,
    pub penalty: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub score: u32,
    pub level: RiskLevel,
    pub action: RiskAction,
    pub factors: Vec<RiskFactor>,
}

pub fn is_suspicious_user_agent(user_agent: &str) -> bool {
    let lowered = user_agent.to_lowercase();
    SUSPICIOUS_AGENTS.iter().any(|marker| lowered.contains(marker))
}

/// Derives signals by comparing the request with the user's earlier sessions.
/// A user without history has no baseline, so nothing counts as new.
pub fn derive_signals(input: &RiskInput, history: &[SessionRecord]) -> RiskSignals {
    let ip = input.ip_address.as_deref().map(str::trim).filter(|ip| !ip.is_empty());
    let agent = input
        .user_agent
        .as_deref()
        .map(str::trim)
        .filter(|agent| !agent.is_empty());

    let new_ip_address = match ip {
        Some(ip) if !history.is_empty() => !history
            .iter()
            .any(|session| session.ip_address.as_deref() == Some(ip)),
        _ => false,
    };
    let new_user_agent = match agent {
        Some(agent) if !history.is_empty() => !history
            .iter()
            .any(|session| session.user_agent.as_deref() == Some(agent)),
        _ => false,
    };
    let private_network = ip
        .and_then(|ip| ip.parse::<IpAddr>().ok())
        .is_some_and(is_private_or_loopback);

    let latest_fingerprint = history
        .iter()
        .filter(|session| session.device_fingerprint.is_some())
        .max_by_key(|session| session.created_at)
        .and_then(|session| session.device_fingerprint.as_deref());
    let fingerprint_changed = match (latest_fingerprint, input.device_fingerprint.as_deref()) {
        (Some(previous), Some(current)) => previous != current,
        _ => false,
    };

    RiskSignals {
        new_ip_address,
        new_user_agent,
        failed_login_attempts: input.failed_login_attempts,
        private_network,
        suspicious_user_agent: agent.is_some_and(is_suspicious_user_agent),
        fingerprint_changed,
    }
}

pub fn risk_factors(signals: &RiskSignals) -> Vec<RiskFactor> {
    let mut factors = Vec::new();
    let mut push = |flagged: bool, code: &str, penalty: u32| {
        if flagged && penalty > 0 {
            factors.push(RiskFactor {
                code: code.to_string(),
                penalty,
            });
        }
    };
    push(signals.new_ip_address, "new_ip_address", NEW_IP_PENALTY);
    push(signals.new_user_agent, "new_user_agent", NEW_USER_AGENT_PENALTY);
    push(
        signals.failed_login_attempts > 0,
        "failed_login_attempts",
        signals
            .failed_login_attempts
            .saturating_mul(FAILED_LOGIN_PENALTY)
            .min(FAILED_LOGIN_PENALTY_CAP),
    );
    push(signals.private_network, "private_network", PRIVATE_NETWORK_PENALTY);
    push(
        signals.suspicious_user_agent,
        "suspicious_user_agent",
        SUSPICIOUS_USER_AGENT_PENALTY,
    );
    push(
        signals.fingerprint_changed,
        "fingerprint_changed",
        FINGERPRINT_CHANGED_PENALTY,
    );
    factors
}

fn capped_total(factors: &[RiskFactor]) -> u32 {
    factors
        .iter()
        .fold(0u32, |total, factor| total.saturating_add(factor.penalty))
        .min(MAX_RISK_SCORE)
}

pub fn risk_score(signals: &RiskSignals) -> u32 {
    capped_total(&risk_factors(signals))
}

pub fn risk_level(score: u32, thresholds: &RiskThresholds) -> RiskLevel {
    if score >= thresholds.critical {
        RiskLevel::Critical
    } else if score >= thresholds.high {
        RiskLevel::High
    } else if score >= thresholds.warning {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

impl RiskLevel {
    pub fn action(&self) -> RiskAction {
        match self {
            RiskLevel::Low => RiskAction::Allow,
            RiskLevel::Medium => RiskAction::Warn,
            RiskLevel::High => RiskAction::RequireVerification,
            RiskLevel::Critical => RiskAction::TerminateSession,
        }
    }
}

pub fn assess(signals: &RiskSignals, thresholds: &RiskThresholds) -> RiskAssessment {
    let factors = risk_factors(signals);
    let score = capped_total(&factors);
    let level = risk_level(score, thresholds);
    RiskAssessment {
        score,
        level,
        action: level.action(),
        factors,
    }
}
