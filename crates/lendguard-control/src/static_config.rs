#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueType {
    String,
    Number,
    Boolean,
}

impl ValueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::String => "string",
            ValueType::Number => "number",
            ValueType::Boolean => "boolean",
        }
    }
}

#[derive(Clone, Debug)]
pub struct StaticConfigItem {
    pub key: &'static str,
    pub description: &'static str,
    pub value_type: ValueType,
    pub default_value: &'static str,
}

pub static STATIC_CONFIG_TABLE: &[StaticConfigItem] = &[
    StaticConfigItem {
        key: "storage.sqlite_path",
        description: "SQLite database path for security records (empty keeps records in memory)",
        value_type: ValueType::String,
        default_value: "lendguard.sqlite",
    },
    StaticConfigItem {
        key: "security.admin_token",
        description: "Bearer token required by the admin API",
        value_type: ValueType::String,
        default_value: "",
    },
    StaticConfigItem {
        key: "security.webhook_secret",
        description: "Shared secret for webhook HMAC-SHA256 signatures",
        value_type: ValueType::String,
        default_value: "",
    },
    StaticConfigItem {
        key: "security.master_key",
        description: "Master key for field-level encryption",
        value_type: ValueType::String,
        default_value: "",
    },
    StaticConfigItem {
        key: "geo.endpoint",
        description: "Geolocation lookup URL, {ip} is substituted",
        value_type: ValueType::String,
        default_value: "http://ip-api.com/json/{ip}?fields=status,countryCode",
    },
    StaticConfigItem {
        key: "geo.allowed_country",
        description: "ISO country code allowed through the geo gate",
        value_type: ValueType::String,
        default_value: "US",
    },
    StaticConfigItem {
        key: "geo.timeout_ms",
        description: "Geolocation lookup timeout in milliseconds",
        value_type: ValueType::Number,
        default_value: "3000",
    },
    StaticConfigItem {
        key: "geo.fail_open",
        description: "Allow access when the geolocation lookup fails",
        value_type: ValueType::Boolean,
        default_value: "false",
    },
    StaticConfigItem {
        key: "session.max_age_minutes",
        description: "Absolute session lifetime",
        value_type: ValueType::Number,
        default_value: "480",
    },
    StaticConfigItem {
        key: "session.idle_timeout_minutes",
        description: "Inactivity period after which a session is terminated",
        value_type: ValueType::Number,
        default_value: "30",
    },
    StaticConfigItem {
        key: "session.validation_interval_seconds",
        description: "Interval of the background session sweep",
        value_type: ValueType::Number,
        default_value: "300",
    },
    StaticConfigItem {
        key: "monitor.metrics_interval_seconds",
        description: "Interval of the security metrics refresh",
        value_type: ValueType::Number,
        default_value: "30",
    },
    StaticConfigItem {
        key: "risk.warning_threshold",
        description: "Risk score that triggers a warning",
        value_type: ValueType::Number,
        default_value: "50",
    },
    StaticConfigItem {
        key: "risk.high_threshold",
        description: "Risk score that requires re-verification",
        value_type: ValueType::Number,
        default_value: "70",
    },
    StaticConfigItem {
        key: "risk.critical_threshold",
        description: "Risk score that terminates the session",
        value_type: ValueType::Number,
        default_value: "90",
    },
    StaticConfigItem {
        key: "validation.max_input_length",
        description: "Maximum accepted length of a single form field",
        value_type: ValueType::Number,
        default_value: "10000",
    },
    StaticConfigItem {
        key: "escalation.window_minutes",
        description: "Correlation window for alert escalation",
        value_type: ValueType::Number,
        default_value: "15",
    },
    StaticConfigItem {
        key: "escalation.failed_login_threshold",
        description: "Failed logins within the window that raise a brute force alert",
        value_type: ValueType::Number,
        default_value: "5",
    },
    StaticConfigItem {
        key: "escalation.high_event_threshold",
        description: "High severity events within the window that raise an alert",
        value_type: ValueType::Number,
        default_value: "3",
    },
    StaticConfigItem {
        key: "pipeline.steps",
        description: "Comma separated security pipeline steps (empty uses the built-in order)",
        value_type: ValueType::String,
        default_value: "",
    },
];
