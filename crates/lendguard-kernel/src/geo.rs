use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lendguard_control::GeoPolicy;
use parking_lot::RwLock;
use reqwest::header::{HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum GeoError {
    #[error("geolocation request failed: {0}")]
    Request(String),
    #[error("geolocation service returned status {0}")]
    Status(u16),
    #[error("geolocation response could not be decoded: {0}")]
    Decode(String),
    #[error("geolocation service could not resolve {0}")]
    Unresolved(String),
}

/// Resolves an IP address to an ISO country code.
#[async_trait]
pub trait GeoLookup: Send + Sync {
    async fn country_code(&self, ip: IpAddr) -> Result<String, GeoError>;
}

#[derive(Clone, Debug)]
pub struct HttpGeoLookupConfig {
    /// `{ip}` is replaced with the address being resolved.
    pub endpoint: String,
    pub timeout_ms: u64,
    pub user_agent: String,
}

impl Default for HttpGeoLookupConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://ip-api.com/json/{ip}?fields=status,countryCode".to_string(),
            timeout_ms: 3_000,
            user_agent: "lendguard".to_string(),
        }
    }
}

#[derive(Deserialize)]
struct GeoApiResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default, rename = "countryCode", alias = "country_code")]
    country_code: Option<String>,
}

#[derive(Clone)]
pub struct HttpGeoLookup {
    client: reqwest::Client,
    timeout: Duration,
    config: HttpGeoLookupConfig,
}

impl HttpGeoLookup {
    pub fn new(config: HttpGeoLookupConfig) -> Self {
        let timeout = Duration::from_millis(config.timeout_ms.max(1));
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|err| {
                warn!(error = %err, "geo http client build failed, using default client");
                reqwest::Client::new()
            });
        Self {
            client,
            timeout,
            config,
        }
    }

    fn url_for(&self, ip: IpAddr) -> String {
        self.config.endpoint.replace("{ip}", &ip.to_string())
    }
}

#[async_trait]
impl GeoLookup for HttpGeoLookup {
    async fn country_code(&self, ip: IpAddr) -> Result<String, GeoError> {
        let mut request = self.client.get(self.url_for(ip)).timeout(self.timeout);
        if let Ok(value) = HeaderValue::from_str(&self.config.user_agent) {
            request = request.header(USER_AGENT, value);
        }
        let response = request
            .send()
            .await
            .map_err(|err| GeoError::Request(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(GeoError::Status(status.as_u16()));
        }
        let body: GeoApiResponse = response
            .json()
            .await
            .map_err(|err| GeoError::Decode(err.to_string()))?;
        if body.status.as_deref().is_some_and(|status| status != "success") {
            return Err(GeoError::Unresolved(ip.to_string()));
        }
        body.country_code
            .filter(|code| !code.trim().is_empty())
            .map(|code| code.trim().to_uppercase())
            .ok_or_else(|| GeoError::Unresolved(ip.to_string()))
    }
}

/// Fixed address table, falling back to a default country.
#[derive(Default)]
pub struct StaticGeoLookup {
    countries: RwLock<HashMap<IpAddr, String>>,
    fallback: Option<String>,
}

impl StaticGeoLookup {
    pub fn new(fallback: Option<&str>) -> Self {
        Self {
            countries: RwLock::new(HashMap::new()),
            fallback: fallback.map(str::to_string),
        }
    }

    pub fn shared(fallback: Option<&str>) -> Arc<Self> {
        Arc::new(Self::new(fallback))
    }

    pub fn insert(&self, ip: IpAddr, country: &str) {
        self.countries.write().insert(ip, country.to_uppercase());
    }
}

#[async_trait]
impl GeoLookup for StaticGeoLookup {
    async fn country_code(&self, ip: IpAddr) -> Result<String, GeoError> {
        self.countries
            .read()
            .get(&ip)
            .cloned()
            .or_else(|| self.fallback.clone())
            .ok_or_else(|| GeoError::Unresolved(ip.to_string()))
    }
}

pub fn is_private_or_loopback(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_private() || v4.is_loopback() || v4.is_link_local() || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_private_or_loopback(IpAddr::V4(mapped));
            }
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                || (first & 0xfe00) == 0xfc00
                || (first & 0xffc0) == 0xfe80
        }
    }
}

const USER_AGENT_INDICATORS: &[&str] = &[
    "bot", "crawler", "spider", "scraper", "proxy", "vpn", "tor", "headless",
];
const PROXY_HEADERS: &[&str] = &["via", "x-proxy-id", "proxy-connection"];

/// Bot or proxy markers found in the request. Header names are matched
/// case-insensitively; the user agent is read from the `user-agent` header.
pub fn suspicious_indicators(headers: &HashMap<String, String>) -> Vec<String> {
    let mut found = Vec::new();
    let user_agent = headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("user-agent"))
        .map(|(_, value)| value.to_lowercase())
        .unwrap_or_default();
    for indicator in USER_AGENT_INDICATORS {
        if user_agent_has(&user_agent, indicator) {
            found.push(format!("user_agent:{indicator}"));
        }
    }
    for header in PROXY_HEADERS {
        if headers.keys().any(|name| name.eq_ignore_ascii_case(header)) {
            found.push(format!("header:{header}"));
        }
    }
    found
}

// "tor" must not fire on "Director" or "Navigator"; it is matched as a word.
fn user_agent_has(user_agent: &str, indicator: &str) -> bool {
    if indicator != "tor" {
        return user_agent.contains(indicator);
    }
    user_agent
        .split(|c: char| !c.is_ascii_alphanumeric())
        .any(|word| word == indicator)
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeoReason {
    PrivateNetwork,
    AllowedCountry,
    CountryBlocked,
    SuspiciousIndicators,
    LookupFailed,
    InvalidAddress,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoDecision {
    pub allowed: bool,
    pub reason: GeoReason,
    pub ip_address: String,
    pub country_code: Option<String>,
    pub indicators: Vec<String>,
}

#[derive(Clone)]
pub struct GeoGate {
    lookup: Arc<dyn GeoLookup>,
}

impl GeoGate {
    pub fn new(lookup: Arc<dyn GeoLookup>) -> Self {
        Self { lookup }
    }

    pub async fn check(
        &self,
        policy: &GeoPolicy,
        ip_address: &str,
        headers: &HashMap<String, String>,
    ) -> GeoDecision {
        let indicators = suspicious_indicators(headers);
        let decision = |allowed, reason, country_code: Option<String>, indicators| GeoDecision {
            allowed,
            reason,
            ip_address: ip_address.to_string(),
            country_code,
            indicators,
        };

        let Ok(ip) = ip_address.trim().parse::<IpAddr>() else {
            warn!(ip = %ip_address, "geo check on unparseable address");
            return decision(policy.fail_open, GeoReason::InvalidAddress, None, indicators);
        };

        if is_private_or_loopback(ip) {
            return if indicators.is_empty() {
                decision(true, GeoReason::PrivateNetwork, None, indicators)
            } else {
                decision(false, GeoReason::SuspiciousIndicators, None, indicators)
            };
        }

        match self.lookup.country_code(ip).await {
            Ok(country) => {
                let country = country.to_uppercase();
                if !country.eq_ignore_ascii_case(policy.allowed_country.trim()) {
                    debug!(ip = %ip, country = %country, "geo check: country blocked");
                    decision(false, GeoReason::CountryBlocked, Some(country), indicators)
                } else if !indicators.is_empty() {
                    decision(false, GeoReason::SuspiciousIndicators, Some(country), indicators)
                } else {
                    decision(true, GeoReason::AllowedCountry, Some(country), indicators)
                }
            }
            Err(err) => {
                warn!(ip = %ip, error = %err, fail_open = policy.fail_open, "geo lookup failed");
                let allowed = policy.fail_open && indicators.is_empty();
                decision(allowed, GeoReason::LookupFailed, None, indicators)
            }
        }
    }
}
