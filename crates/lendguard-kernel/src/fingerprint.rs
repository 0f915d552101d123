use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Browser traits collected on the client. The digest only changes when one
/// of these does.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceFingerprint {
    pub user_agent: String,
    pub language: String,
    pub platform: String,
    pub screen_resolution: String,
    pub timezone: String,
    pub color_depth: Option<u32>,
    pub hardware_concurrency: Option<u32>,
    pub touch_support: bool,
}

impl DeviceFingerprint {
    pub fn canonical(&self) -> String {
        let optional = |value: Option<u32>| value.map(|v| v.to_string()).unwrap_or_default();
        [
            self.user_agent.trim().to_string(),
            self.language.trim().to_lowercase(),
            self.platform.trim().to_string(),
            self.screen_resolution.trim().to_string(),
            self.timezone.trim().to_string(),
            optional(self.color_depth),
            optional(self.hardware_concurrency),
            self.touch_support.to_string(),
        ]
        .join("|")
    }

    /// Lowercase hex SHA-256 of the canonical form.
    pub fn hash(&self) -> String {
        hex::encode(Sha256::digest(self.canonical().as_bytes()))
    }

    pub fn short_id(&self) -> String {
        let mut digest = self.hash();
        digest.truncate(16);
        digest
    }

    pub fn differs_from(&self, other: &DeviceFingerprint) -> bool {
        self.hash() != other.hash()
    }
}
