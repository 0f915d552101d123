//! Maps raw failure text to one of nine generic user-facing categories.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Auth,
    Database,
    Network,
    Validation,
    Permission,
    RateLimit,
    Session,
    Server,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Auth => "auth",
            ErrorCategory::Database => "database",
            ErrorCategory::Network => "network",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Permission => "permission",
            ErrorCategory::RateLimit => "rate_limit",
            ErrorCategory::Session => "session",
            ErrorCategory::Server => "server",
            ErrorCategory::Unknown => "unknown",
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ErrorCategory::Auth => "AUTH_ERROR",
            ErrorCategory::Database => "DATABASE_ERROR",
            ErrorCategory::Network => "NETWORK_ERROR",
            ErrorCategory::Validation => "VALIDATION_ERROR",
            ErrorCategory::Permission => "PERMISSION_ERROR",
            ErrorCategory::RateLimit => "RATE_LIMIT_ERROR",
            ErrorCategory::Session => "SESSION_ERROR",
            ErrorCategory::Server => "SERVER_ERROR",
            ErrorCategory::Unknown => "UNKNOWN_ERROR",
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorCategory::Auth => "Authentication failed. Please check your credentials and try again.",
            ErrorCategory::Database => "We couldn't save or load your data. Please try again.",
            ErrorCategory::Network => {
                "Network connection problem. Please check your connection and try again."
            }
            ErrorCategory::Validation => "Some of the information entered is invalid. Please review and try again.",
            ErrorCategory::Permission => "You don't have permission to perform this action.",
            ErrorCategory::RateLimit => "Too many requests. Please wait a moment and try again.",
            ErrorCategory::Session => "Your session has expired. Please sign in again.",
            ErrorCategory::Server => "The server encountered a problem. Please try again later.",
            ErrorCategory::Unknown => "An unexpected error occurred. Please try again.",
        }
    }
}

/// Failure as reported by a backend call.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RawError {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub status: Option<u16>,
}

impl RawError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SanitizedError {
    pub category: ErrorCategory,
    pub message: String,
    pub code: String,
}

static RE_SERVER_STATUS: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\b5\d{2}\b").ok());

const RATE_LIMIT_HINTS: &[&str] = &["rate limit", "too many requests", "too many attempts", "throttl"];
const SESSION_HINTS: &[&str] = &[
    "session",
    "jwt expired",
    "token expired",
    "refresh token",
    "signed out",
];
const PERMISSION_HINTS: &[&str] = &[
    "permission",
    "forbidden",
    "not authorized",
    "access denied",
    "row-level security",
    "insufficient privilege",
];
const AUTH_HINTS: &[&str] = &[
    "unauthorized",
    "authentication",
    "invalid login",
    "invalid credentials",
    "invalid password",
    "email not confirmed",
    "user not found",
];
const DATABASE_HINTS: &[&str] = &[
    "database",
    "duplicate key",
    "violates",
    "constraint",
    "relation",
    "column",
    "postgres",
    "sqlite",
    "deadlock",
];
const VALIDATION_HINTS: &[&str] = &[
    "validation",
    "invalid",
    "required",
    "must be",
    "malformed",
    "out of range",
];
const SERVER_HINTS: &[&str] = &["internal", "server error", "unexpected", "panic"];

fn contains_any(text: &str, hints: &[&str]) -> bool {
    hints.iter().any(|hint| text.contains(hint))
}

fn looks_like_server_status(raw: &RawError, text: &str) -> bool {
    if raw.status.is_some_and(|status| (500..=599).contains(&status)) {
        return true;
    }
    let Some(regex) = RE_SERVER_STATUS.as_ref() else {
        return false;
    };
    regex.is_match(text) || raw.code.as_deref().is_some_and(|code| regex.is_match(code))
}

/// Network is checked before every other category.
pub fn categorize(raw: &RawError) -> ErrorCategory {
    let text = raw.message.to_lowercase();

    if text.contains("timeout")
        || text.contains("timed out")
        || text.contains("network")
        || text.contains("failed to fetch")
        || looks_like_server_status(raw, &text)
    {
        return ErrorCategory::Network;
    }

    match raw.status {
        Some(429) => return ErrorCategory::RateLimit,
        Some(401) => return ErrorCategory::Auth,
        Some(403) => return ErrorCategory::Permission,
        Some(440) => return ErrorCategory::Session,
        Some(400) | Some(422) => return ErrorCategory::Validation,
        _ => {}
    }

    if contains_any(&text, RATE_LIMIT_HINTS) {
        ErrorCategory::RateLimit
    } else if contains_any(&text, SESSION_HINTS) {
        ErrorCategory::Session
    } else if contains_any(&text, PERMISSION_HINTS) {
        ErrorCategory::Permission
    } else if contains_any(&text, AUTH_HINTS) {
        ErrorCategory::Auth
    } else if contains_any(&text, DATABASE_HINTS) {
        ErrorCategory::Database
    } else if contains_any(&text, VALIDATION_HINTS) {
        ErrorCategory::Validation
    } else if contains_any(&text, SERVER_HINTS) {
        ErrorCategory::Server
    } else {
        ErrorCategory::Unknown
    }
}

pub fn sanitize_error(raw: &RawError) -> SanitizedError {
    let category = categorize(raw);
    SanitizedError {
        category,
        message: category.user_message().to_string(),
        code: category.code().to_string(),
    }
}
