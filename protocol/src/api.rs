//! Request and response envelopes of the decision service's HTTP API.

use serde::Deserialize;
use serde::Serialize;

use crate::source::Fingerprint;
use crate::verification::Verification;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiError {
    pub code: i64,
    pub message: String,
}

/// Envelope returned by `GET verification/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VerifyResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub errors: Vec<ApiError>,
    #[serde(default)]
    pub version: Option<String>,
    pub verification: Verification,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceTokenRequest {
    pub fingerprints: Vec<Fingerprint>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceTokenMetadataRequest {
    pub metadata: serde_json::Map<String, serde_json::Value>,
}
