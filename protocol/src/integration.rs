use serde::Deserialize;
use serde::Serialize;
use strum_macros::Display;
use strum_macros::EnumString;

/// Closed set of integrations the SDK knows how to construct.
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumString,
)]
pub enum IntegrationName {
    #[serde(rename = "SIFT")]
    #[strum(serialize = "SIFT")]
    Sift,
    #[serde(rename = "SIFT SCORE")]
    #[strum(serialize = "SIFT SCORE")]
    SiftScore,
    #[serde(rename = "FINGERPRINTJS")]
    #[strum(serialize = "FINGERPRINTJS")]
    Fingerprintjs,
    #[serde(rename = "STRIPE_IDENTITY")]
    #[strum(serialize = "STRIPE_IDENTITY")]
    StripeIdentity,
    #[serde(rename = "MFA_TWILIO")]
    #[strum(serialize = "MFA_TWILIO")]
    MfaTwilio,
    #[serde(rename = "MFA")]
    #[strum(serialize = "MFA")]
    Mfa,
    #[serde(rename = "KOUNT")]
    #[strum(serialize = "KOUNT")]
    Kount,
}

#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum IntegrationPurpose {
    Identify,
    Observe,
    Qualify,
    Execute,
}

/// Load request for a single integration, either from the init config or
/// derived from a verification step.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LibConfig {
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Per-integration load timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_timeout: Option<u64>,
    /// Restricts the instance to these purposes. Empty keeps every
    /// capability it implements.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub purposes: Vec<IntegrationPurpose>,
}

/// Response of `GET init`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InitConfig {
    pub request_id: String,
    #[serde(default)]
    pub libs: Vec<LibConfig>,
}
