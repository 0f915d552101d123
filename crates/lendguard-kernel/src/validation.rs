//! Injection detection and form-field validation.
//!
//! Detection is a scan over a fixed list of regular expressions. The sanitizer
//! removes every XSS match until none is left and then HTML-escapes what
//! remains, so a flagged substring never survives sanitization.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatType {
    XssAttempt,
    SqlInjectionAttempt,
}

impl ThreatType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatType::XssAttempt => "xss_attempt",
            ThreatType::SqlInjectionAttempt => "sql_injection_attempt",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThreatMatch {
    pub threat_type: ThreatType,
    pub pattern: String,
    pub matched: String,
}

struct InjectionPattern {
    name: &'static str,
    threat: ThreatType,
    regex: &'static LazyLock<Option<Regex>>,
}

macro_rules! injection_pattern {
    ($name:ident, $regex_str:expr) => {
        static $name: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new($regex_str).ok());
    };
}

// ── XSS ────────────────────────────────────────────────────────────────────
injection_pattern!(RE_SCRIPT_BLOCK, r"(?is)<\s*script\b[^>]*>.*?<\s*/\s*script\s*>");
injection_pattern!(RE_SCRIPT_TAG, r"(?i)<\s*/?\s*script\b[^>]*>?");
injection_pattern!(RE_JAVASCRIPT_URI, r"(?i)javascript\s*:");
injection_pattern!(RE_VBSCRIPT_URI, r"(?i)vbscript\s*:");
injection_pattern!(RE_EVENT_HANDLER, r"(?i)\bon[a-z]+\s*=");
injection_pattern!(
    RE_EMBEDDED_OBJECT,
    r"(?i)<\s*/?\s*(?:iframe|object|embed|applet|meta|base)\b[^>]*>?"
);
injection_pattern!(RE_DATA_HTML, r"(?i)data\s*:\s*text/html");
injection_pattern!(RE_CSS_EXPRESSION, r"(?i)expression\s*\(");

// ── SQL injection ──────────────────────────────────────────────────────────
injection_pattern!(RE_UNION_SELECT, r"(?i)\bunion\b(?:\s+all)?\s+select\b");
injection_pattern!(RE_DDL, r"(?i)\b(?:drop|truncate|alter)\s+(?:table|database|schema)\b");
injection_pattern!(
    RE_STACKED_QUERY,
    r"(?i);\s*(?:drop|delete|insert|update|truncate|exec|execute|shutdown)\b"
);
injection_pattern!(
    RE_QUOTED_TAUTOLOGY,
    r#"(?i)['"]\s*(?:or|and)\s+['"]?\w+['"]?\s*=\s*['"]?\w+"#
);
injection_pattern!(RE_NUMERIC_TAUTOLOGY, r"(?i)\b(?:or|and)\s+(\d+)\s*=\s*\d+\b");
injection_pattern!(RE_QUOTE_COMMENT, r#"['"]\s*(?:--|#|/\*)"#);
injection_pattern!(RE_DELETE_FROM, r"(?i)\bdelete\s+from\b");
injection_pattern!(RE_INSERT_INTO, r"(?i)\binsert\s+into\b[\s\S]*?\bvalues\b");
injection_pattern!(RE_EXEC_PROC, r"(?i)\bexec(?:ute)?\s*(?:\(|xp_|sp_)");
injection_pattern!(
    RE_TIME_DELAY,
    r"(?i)\b(?:pg_sleep|sleep|benchmark)\s*\(|\bwaitfor\s+delay\b"
);

static XSS_PATTERNS: &[InjectionPattern] = &[
    InjectionPattern { name: "script_block", threat: ThreatType::XssAttempt, regex: &RE_SCRIPT_BLOCK },
    InjectionPattern { name: "script_tag", threat: ThreatType::XssAttempt, regex: &RE_SCRIPT_TAG },
    InjectionPattern { name: "javascript_uri", threat: ThreatType::XssAttempt, regex: &RE_JAVASCRIPT_URI },
    InjectionPattern { name: "vbscript_uri", threat: ThreatType::XssAttempt, regex: &RE_VBSCRIPT_URI },
    InjectionPattern { name: "event_handler", threat: ThreatType::XssAttempt, regex: &RE_EVENT_HANDLER },
    InjectionPattern { name: "embedded_object", threat: ThreatType::XssAttempt, regex: &RE_EMBEDDED_OBJECT },
    InjectionPattern { name: "data_html", threat: ThreatType::XssAttempt, regex: &RE_DATA_HTML },
    InjectionPattern { name: "css_expression", threat: ThreatType::XssAttempt, regex: &RE_CSS_EXPRESSION },
];

static SQL_PATTERNS: &[InjectionPattern] = &[
    InjectionPattern { name: "union_select", threat: ThreatType::SqlInjectionAttempt, regex: &RE_UNION_SELECT },
    InjectionPattern { name: "ddl", threat: ThreatType::SqlInjectionAttempt, regex: &RE_DDL },
    InjectionPattern { name: "stacked_query", threat: ThreatType::SqlInjectionAttempt, regex: &RE_STACKED_QUERY },
    InjectionPattern { name: "quoted_tautology", threat: ThreatType::SqlInjectionAttempt, regex: &RE_QUOTED_TAUTOLOGY },
    InjectionPattern { name: "numeric_tautology", threat: ThreatType::SqlInjectionAttempt, regex: &RE_NUMERIC_TAUTOLOGY },
    InjectionPattern { name: "quote_comment", threat: ThreatType::SqlInjectionAttempt, regex: &RE_QUOTE_COMMENT },
    InjectionPattern { name: "delete_from", threat: ThreatType::SqlInjectionAttempt, regex: &RE_DELETE_FROM },
    InjectionPattern { name: "insert_into", threat: ThreatType::SqlInjectionAttempt, regex: &RE_INSERT_INTO },
    InjectionPattern { name: "exec_proc", threat: ThreatType::SqlInjectionAttempt, regex: &RE_EXEC_PROC },
    InjectionPattern { name: "time_delay", threat: ThreatType::SqlInjectionAttempt, regex: &RE_TIME_DELAY },
];

fn scan(patterns: &[InjectionPattern], input: &str, out: &mut Vec<ThreatMatch>) {
    for pattern in patterns {
        let Some(regex) = pattern.regex.as_ref() else {
            continue;
        };
        if let Some(found) = regex.find(input) {
            out.push(ThreatMatch {
                threat_type: pattern.threat,
                pattern: pattern.name.to_string(),
                matched: found.as_str().to_string(),
            });
        }
    }
}

/// Every pattern that matches `input`, XSS patterns first.
pub fn detect_threats(input: &str) -> Vec<ThreatMatch> {
    let mut matches = Vec::new();
    scan(XSS_PATTERNS, input, &mut matches);
    scan(SQL_PATTERNS, input, &mut matches);
    matches
}

pub fn threat_types(matches: &[ThreatMatch]) -> Vec<ThreatType> {
    let mut types: Vec<ThreatType> = Vec::new();
    for found in matches {
        if !types.contains(&found.threat_type) {
            types.push(found.threat_type);
        }
    }
    types
}

fn strip_xss(input: &str) -> String {
    let mut text = input.to_string();
    // Every removal shortens the text, so this terminates.
    loop {
        let mut changed = false;
        for pattern in XSS_PATTERNS {
            let Some(regex) = pattern.regex.as_ref() else {
                continue;
            };
            if regex.is_match(&text) {
                text = regex.replace_all(&text, "").into_owned();
                changed = true;
            }
        }
        if !changed {
            return text;
        }
    }
}

fn escape_html(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            '/' => escaped.push_str("&#x2F;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

pub fn sanitize(input: &str) -> String {
    escape_html(strip_xss(input).trim())
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    #[default]
    Text,
    Email,
    Phone,
    Name,
    Currency,
    ZipCode,
    Ssn,
    Url,
}

static RE_EMAIL: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}$").ok());
static RE_PHONE_CHARS: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[\d\s\-().+]+$").ok());
static RE_NAME: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^\p{L}[\p{L}\s'.\-]*$").ok());
static RE_CURRENCY: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^\$?(?:\d{1,3}(?:,\d{3})+|\d+)(?:\.\d{1,2})?$").ok());
static RE_ZIP: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"^\d{5}(?:-\d{4})?$").ok());
static RE_SSN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^(\d{3})-?(\d{2})-?(\d{4})$").ok());
static RE_URL: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"^https?://[^\s<>"']+$"#).ok());

fn matches(regex: &LazyLock<Option<Regex>>, value: &str) -> bool {
    regex.as_ref().is_some_and(|regex| regex.is_match(value))
}

fn valid_phone(value: &str) -> bool {
    if !matches(&RE_PHONE_CHARS, value) {
        return false;
    }
    let digits: String = value.chars().filter(char::is_ascii_digit).collect();
    digits.len() == 10 || (digits.len() == 11 && digits.starts_with('1'))
}

fn valid_ssn(value: &str) -> bool {
    let Some(captures) = RE_SSN.as_ref().and_then(|regex| regex.captures(value)) else {
        return false;
    };
    let area = &captures[1];
    let group = &captures[2];
    let serial = &captures[3];
    area != "000" && area != "666" && !area.starts_with('9') && group != "00" && serial != "0000"
}

fn format_error(kind: FieldKind, value: &str) -> Option<&'static str> {
    let ok = match kind {
        FieldKind::Text => true,
        FieldKind::Email => matches(&RE_EMAIL, value),
        FieldKind::Phone => valid_phone(value),
        FieldKind::Name => value.chars().count() <= 100 && matches(&RE_NAME, value),
        FieldKind::Currency => matches(&RE_CURRENCY, value),
        FieldKind::ZipCode => matches(&RE_ZIP, value),
        FieldKind::Ssn => valid_ssn(value),
        FieldKind::Url => matches(&RE_URL, value),
    };
    if ok {
        return None;
    }
    Some(match kind {
        FieldKind::Text => "invalid text",
        FieldKind::Email => "invalid email address",
        FieldKind::Phone => "invalid phone number",
        FieldKind::Name => "invalid name",
        FieldKind::Currency => "invalid currency amount",
        FieldKind::ZipCode => "invalid ZIP code",
        FieldKind::Ssn => "invalid social security number",
        FieldKind::Url => "invalid URL",
    })
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FormFieldInput {
    pub value: String,
    #[serde(default)]
    pub kind: FieldKind,
    #[serde(default)]
    pub required: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldValidation {
    pub field: String,
    pub valid: bool,
    pub errors: Vec<String>,
    pub threats: Vec<ThreatMatch>,
    pub sanitized: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FormValidation {
    pub valid: bool,
    pub fields: Vec<FieldValidation>,
    pub threat_types: Vec<ThreatType>,
}

impl FormValidation {
    pub fn threats(&self) -> impl Iterator<Item = (&str, &ThreatMatch)> {
        self.fields
            .iter()
            .flat_map(|field| field.threats.iter().map(move |threat| (field.field.as_str(), threat)))
    }
}

#[derive(Clone, Debug)]
pub struct InputValidator {
    max_length: usize,
}

impl InputValidator {
    pub fn new(max_length: usize) -> Self {
        Self { max_length }
    }

    pub fn validate_field(&self, field: &str, input: &FormFieldInput) -> FieldValidation {
        let value = input.value.trim();
        let mut errors = Vec::new();

        if value.is_empty() {
            if input.required {
                errors.push(format!("{field} is required"));
            }
            return FieldValidation {
                field: field.to_string(),
                valid: errors.is_empty(),
                errors,
                threats: Vec::new(),
                sanitized: String::new(),
            };
        }

        if self.max_length > 0 && value.chars().count() > self.max_length {
            errors.push(format!("{field} exceeds {} characters", self.max_length));
        }

        let threats = detect_threats(value);
        if threats.is_empty() {
            if let Some(message) = format_error(input.kind, value) {
                errors.push(format!("{field}: {message}"));
            }
        }

        FieldValidation {
            field: field.to_string(),
            valid: errors.is_empty() && threats.is_empty(),
            errors,
            threats,
            sanitized: sanitize(value),
        }
    }

    /// Fields are reported in name order.
    pub fn validate_form(&self, fields: &BTreeMap<String, FormFieldInput>) -> FormValidation {
        let results: Vec<FieldValidation> = fields
            .iter()
            .map(|(name, input)| self.validate_field(name, input))
            .collect();
        let mut types = Vec::new();
        for result in &results {
            for threat in threat_types(&result.threats) {
                if !types.contains(&threat) {
                    types.push(threat);
                }
            }
        }
        FormValidation {
            valid: results.iter().all(|result| result.valid),
            fields: results,
            threat_types: types,
        }
    }
}

impl Default for InputValidator {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_script_tags_and_strips_them() {
        let input = "hello <script>alert(1)</script> world";
        let threats = detect_threats(input);
        assert_eq!(threat_types(&threats), vec![ThreatType::XssAttempt]);
        let clean = sanitize(input);
        assert!(!clean.to_lowercase().contains("script"));
        assert!(clean.starts_with("hello"));
    }

    #[test]
    fn nested_payloads_do_not_reassemble() {
        let clean = sanitize("javajavascript:script:alert(1)");
        assert!(!clean.to_lowercase().contains("javascript:"));
    }

    #[test]
    fn flags_common_sql_injection() {
        for input in [
            "' OR '1'='1",
            "1; DROP TABLE leads",
            "x UNION SELECT password FROM users",
            "admin'--",
            "1 or 1=1",
        ] {
            let types = threat_types(&detect_threats(input));
            assert!(
                types.contains(&ThreatType::SqlInjectionAttempt),
                "not flagged: {input}"
            );
        }
    }

    #[test]
    fn ordinary_loan_notes_are_clean() {
        for input in [
            "Borrower prefers a 30-year fixed rate.",
            "Call back on Monday about the appraisal",
            "Income: $85,000 / year",
            "Selected the option from the dropdown",
        ] {
            assert!(detect_threats(input).is_empty(), "false positive: {input}");
        }
    }

    #[test]
    fn field_kinds_are_checked() {
        let validator = InputValidator::default();
        let check = |kind, value: &str| {
            validator
                .validate_field(
                    "f",
                    &FormFieldInput {
                        value: value.to_string(),
                        kind,
                        required: true,
                    },
                )
                .valid
        };
        assert!(check(FieldKind::Email, "jane@lender.com"));
        assert!(!check(FieldKind::Email, "jane@"));
        assert!(check(FieldKind::Phone, "(555) 123-4567"));
        assert!(check(FieldKind::Phone, "+1 555 123 4567"));
        assert!(!check(FieldKind::Phone, "12345"));
        assert!(check(FieldKind::Name, "Mary-Jane O'Neil"));
        assert!(!check(FieldKind::Name, "R2D2"));
        assert!(check(FieldKind::Currency, "$250,000.00"));
        assert!(check(FieldKind::Currency, "1500"));
        assert!(!check(FieldKind::Currency, "12,34"));
        assert!(check(FieldKind::ZipCode, "94105-1234"));
        assert!(check(FieldKind::Ssn, "123-45-6789"));
        assert!(!check(FieldKind::Ssn, "666-45-6789"));
        assert!(!check(FieldKind::Ssn, "123-00-6789"));
        assert!(check(FieldKind::Url, "https://example.com/a"));
        assert!(!check(FieldKind::Url, "ftp://example.com"));
    }

    #[test]
    fn required_and_length_limits() {
        let validator = InputValidator::new(5);
        let empty = validator.validate_field(
            "first_name",
            &FormFieldInput {
                value: "   ".to_string(),
                kind: FieldKind::Name,
                required: true,
            },
        );
        assert!(!empty.valid);
        assert_eq!(empty.errors, vec!["first_name is required".to_string()]);

        let long = validator.validate_field(
            "notes",
            &FormFieldInput {
                value: "abcdefgh".to_string(),
                ..FormFieldInput::default()
            },
        );
        assert!(!long.valid);
    }

    #[test]
    fn form_validation_collects_threat_types() {
        let mut fields = BTreeMap::new();
        fields.insert(
            "email".to_string(),
            FormFieldInput {
                value: "jane@lender.com".to_string(),
                kind: FieldKind::Email,
                required: true,
            },
        );
        fields.insert(
            "notes".to_string(),
            FormFieldInput {
                value: "<img src=x onerror=alert(1)>".to_string(),
                ..FormFieldInput::default()
            },
        );
        let result = InputValidator::default().validate_form(&fields);
        assert!(!result.valid);
        assert_eq!(result.threat_types, vec![ThreatType::XssAttempt]);
        assert_eq!(result.threats().count(), 1);
        assert!(result.fields[0].valid);
    }

    #[test]
    fn form_validation_reads_back_from_json() {
        let mut fields = BTreeMap::new();
        fields.insert(
            "search".to_string(),
            FormFieldInput {
                value: "' OR 1=1 --".to_string(),
                ..FormFieldInput::default()
            },
        );
        let result = InputValidator::default().validate_form(&fields);
        let encoded = serde_json::to_string(&result).expect("encode");
        let decoded: FormValidation = serde_json::from_str(&encoded).expect("decode");
        assert_eq!(decoded, result);
        assert!(decoded
            .threats()
            .any(|(_, threat)| threat.pattern == "numeric_tautology"));
    }
}
