use serde::Deserialize;
use serde::Serialize;
use strum_macros::Display;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationErrorType {
    /// Something broke, locally or on the decision service.
    System,
    /// The user dismissed a challenge.
    Cancelled,
}

/// Descriptor delivered to `on_error`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VerificationError {
    pub error_type: VerificationErrorType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl VerificationError {
    pub fn system(details: Option<String>) -> Self {
        Self {
            error_type: VerificationErrorType::System,
            details,
        }
    }

    pub fn cancelled(details: Option<String>) -> Self {
        Self {
            error_type: VerificationErrorType::Cancelled,
            details,
        }
    }
}

impl std::fmt::Display for VerificationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.details {
            Some(details) => write!(f, "{}: {details}", self.error_type),
            None => write!(f, "{}", self.error_type),
        }
    }
}
