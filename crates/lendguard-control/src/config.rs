use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::static_config::{StaticConfigItem, ValueType, STATIC_CONFIG_TABLE};

/// Flattened `section.key` view of the service configuration file.
///
/// Every lookup falls back to the default recorded in the static key table, so
/// an empty file is a valid configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SystemConfig {
    values: HashMap<String, String>,
}

impl SystemConfig {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn get_string(&self, key: &str) -> String {
        self.get(key)
            .map(str::to_string)
            .or_else(|| default_value(key))
            .unwrap_or_default()
    }

    pub fn get_number(&self, key: &str) -> i64 {
        self.get(key)
            .and_then(|value| value.parse::<i64>().ok())
            .or_else(|| default_value(key).and_then(|value| value.parse::<i64>().ok()))
            .unwrap_or_default()
    }

    /// Non-negative number clamped into `u32`.
    pub fn get_u32(&self, key: &str) -> u32 {
        self.get_number(key).clamp(0, u32::MAX as i64) as u32
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key)
            .and_then(parse_bool)
            .or_else(|| default_value(key).and_then(|value| parse_bool(&value)))
            .unwrap_or(false)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.values.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config parse error: {0}")]
    Parse(String),
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unknown config key: {0}")]
    UnknownKey(String),
    #[error("type mismatch for key {0}: expected {1}")]
    TypeMismatch(String, String),
}

pub struct SystemConfigLoader;

impl SystemConfigLoader {
    pub fn from_str(input: &str) -> Result<SystemConfig, ConfigError> {
        let value: toml::Value =
            toml::from_str(input).map_err(|err| ConfigError::Parse(err.to_string()))?;
        let mut values = HashMap::new();
        flatten_into(&mut values, "", &value)?;
        Ok(SystemConfig { values })
    }

    pub fn from_path(path: &Path) -> Result<(String, SystemConfig), ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config = Self::from_str(&raw)?;
        Ok((raw, config))
    }

    /// Template written when the service starts without a config file.
    pub fn default_template() -> String {
        let lines = [
            "storage = { sqlite_path = \"lendguard.sqlite\" }",
            "security = { admin_token = \"\", webhook_secret = \"\", master_key = \"\" }",
            "geo = { allowed_country = \"US\", timeout_ms = 3000, fail_open = false }",
            "session = { max_age_minutes = 480, idle_timeout_minutes = 30, validation_interval_seconds = 300 }",
            "monitor = { metrics_interval_seconds = 30 }",
            "risk = { warning_threshold = 50, high_threshold = 70, critical_threshold = 90 }",
        ];
        format!("{}\n", lines.join("\n"))
    }
}

/// Walks nested tables into `section.key` entries, checking each leaf
/// against the static key table.
fn flatten_into(
    output: &mut HashMap<String, String>,
    path: &str,
    value: &toml::Value,
) -> Result<(), ConfigError> {
    let (raw, found) = match value {
        toml::Value::Table(table) => {
            for (key, nested) in table {
                let nested_path = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}.{key}")
                };
                flatten_into(output, &nested_path, nested)?;
            }
            return Ok(());
        }
        toml::Value::String(text) => (text.clone(), ValueType::String),
        toml::Value::Integer(number) => (number.to_string(), ValueType::Number),
        toml::Value::Float(number) => (number.to_string(), ValueType::Number),
        toml::Value::Boolean(flag) => (flag.to_string(), ValueType::Boolean),
        _ => {
            return Err(ConfigError::TypeMismatch(
                path.to_string(),
                "string, number or boolean".to_string(),
            ))
        }
    };
    let item = config_item(path).ok_or_else(|| ConfigError::UnknownKey(path.to_string()))?;
    if item.value_type != found {
        return Err(ConfigError::TypeMismatch(
            path.to_string(),
            item.value_type.as_str().to_string(),
        ));
    }
    output.insert(path.to_string(), raw);
    Ok(())
}

fn config_item(key: &str) -> Option<&'static StaticConfigItem> {
    STATIC_CONFIG_TABLE.iter().find(|item| item.key == key)
}

fn default_value(key: &str) -> Option<String> {
    config_item(key).map(|item| item.default_value.to_string())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}
