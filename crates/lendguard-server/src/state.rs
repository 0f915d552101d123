use std::path::Path;
use std::sync::Arc;

use lendguard_control::{load_from_system_config, SystemConfig, SystemConfigLoader};
use lendguard_kernel::{GeoLookup, HttpGeoLookup, HttpGeoLookupConfig, KernelConfig, SecurityKernel};

use tracing::warn;

use crate::error::AppError;

pub struct AppState {
    pub admin_token: String,
    pub kernel: Arc<SecurityKernel>,
}

impl AppState {
    pub fn new(config: &SystemConfig, kernel: Arc<SecurityKernel>) -> Self {
        let admin_token = config.get_string("security.admin_token").trim().to_string();
        if admin_token.is_empty() {
            warn!("security.admin_token is empty, bearer-protected routes will reject every request");
        }
        Self { admin_token, kernel }
    }
}

pub fn load_config(path: &Path) -> Result<(String, SystemConfig), AppError> {
    let raw = std::fs::read_to_string(path)?;
    let config = SystemConfigLoader::from_str(&raw)?;
    Ok((raw, config))
}

pub fn create_default_config(path: &Path) -> Result<String, AppError> {
    let content = SystemConfigLoader::default_template();
    std::fs::write(path, content.as_bytes())?;
    Ok(content)
}

pub fn kernel_config(config: &SystemConfig) -> KernelConfig {
    KernelConfig {
        webhook_secret: config.get_string("security.webhook_secret"),
        master_key: config.get_string("security.master_key"),
    }
}

pub fn geo_lookup(config: &SystemConfig) -> Arc<dyn GeoLookup> {
    let defaults = HttpGeoLookupConfig::default();
    let endpoint = config.get_string("geo.endpoint");
    let timeout_ms = config.get_number("geo.timeout_ms");
    Arc::new(HttpGeoLookup::new(HttpGeoLookupConfig {
        endpoint: if endpoint.trim().is_empty() {
            defaults.endpoint
        } else {
            endpoint
        },
        timeout_ms: if timeout_ms <= 0 {
            defaults.timeout_ms
        } else {
            timeout_ms as u64
        },
        user_agent: defaults.user_agent,
    }))
}

pub fn build_kernel(config: &SystemConfig) -> Result<SecurityKernel, AppError> {
    let bundle = load_from_system_config(config)?;
    Ok(SecurityKernel::new(kernel_config(config), bundle, geo_lookup(config)))
}
