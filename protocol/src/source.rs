use serde::Deserialize;
use serde::Serialize;

/// Credential representing the current device, with its expiry in unix
/// milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceIdentity {
    pub token: String,
    pub expiry: i64,
}

impl SourceIdentity {
    pub fn is_valid_at(&self, now_ms: i64) -> bool {
        self.expiry > now_ms
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FingerprintSource {
    Dodgeball,
    Fingerprintjs,
    Kount,
    Sift,
    #[serde(other)]
    Other,
}

/// Evidence gathered by an identify-capable integration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Fingerprint {
    pub source: FingerprintSource,
    #[serde(default)]
    pub props: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Fingerprint {
    pub fn new(source: FingerprintSource) -> Self {
        Self {
            source,
            props: serde_json::Map::new(),
            hash: None,
            error: None,
        }
    }

    pub fn failed(source: FingerprintSource, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(source)
        }
    }
}
