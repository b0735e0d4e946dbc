use serde::Deserialize;
use serde::Serialize;
use strum_macros::Display;

use crate::integration::LibConfig;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationStatus {
    Pending,
    Blocked,
    Complete,
    Failed,
    /// Any status this client does not understand.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationOutcome {
    Approved,
    Denied,
    Pending,
    Error,
    #[serde(other)]
    Unknown,
}

/// Classification of a verification snapshot. Derived from
/// `(status, outcome)` on every evaluation and never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VerificationState {
    Running,
    Allowed,
    Denied,
    Undecided,
    Errored,
    Unknown,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VerificationStepData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_message: Option<String>,
}

/// A unit of client-side work requested by the decision service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VerificationStep {
    /// Identity of the underlying workflow step, used for de-duplication.
    pub id: String,
    /// Identity to submit a step response against.
    pub verification_step_id: String,
    /// Integration name. Kept as a raw string so a single unknown
    /// integration cannot make the whole verification unreadable.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_timeout: Option<u64>,
}

impl VerificationStep {
    pub fn lib_config(&self) -> LibConfig {
        LibConfig {
            name: self.name.clone(),
            url: self.url.clone().unwrap_or_default(),
            config: self.config.clone(),
            method: self.method.clone(),
            load_timeout: self.load_timeout,
            purposes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Verification {
    pub id: String,
    pub status: VerificationStatus,
    pub outcome: VerificationOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_data: Option<VerificationStepData>,
    #[serde(default)]
    pub next_steps: Vec<VerificationStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Verification {
    pub fn new(
        id: impl Into<String>,
        status: VerificationStatus,
        outcome: VerificationOutcome,
    ) -> Self {
        Self {
            id: id.into(),
            status,
            outcome,
            step_data: None,
            next_steps: Vec::new(),
            error: None,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(
            self.status,
            VerificationStatus::Pending | VerificationStatus::Blocked
        )
    }

    pub fn is_allowed(&self) -> bool {
        self.status == VerificationStatus::Complete
            && self.outcome == VerificationOutcome::Approved
    }

    pub fn is_denied(&self) -> bool {
        self.status == VerificationStatus::Complete && self.outcome == VerificationOutcome::Denied
    }

    pub fn is_undecided(&self) -> bool {
        self.status == VerificationStatus::Complete
            && self.outcome == VerificationOutcome::Pending
    }

    pub fn has_error(&self) -> bool {
        self.status == VerificationStatus::Failed && self.outcome == VerificationOutcome::Error
    }

    /// Classifies the snapshot. Running takes precedence, matching the order
    /// in which the poll loop evaluates outcomes.
    pub fn state(&self) -> VerificationState {
        if self.is_running() {
            VerificationState::Running
        } else if self.is_allowed() {
            VerificationState::Allowed
        } else if self.is_denied() {
            VerificationState::Denied
        } else if self.is_undecided() {
            VerificationState::Undecided
        } else if self.has_error() {
            VerificationState::Errored
        } else {
            VerificationState::Unknown
        }
    }
}

/// Structured response an integration posts back for a step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepResponse {
    pub plugin_name: String,
    pub method_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl StepResponse {
    pub fn new(plugin_name: impl Into<String>, method_name: impl Into<String>) -> Self {
        Self {
            plugin_name: plugin_name.into(),
            method_name: method_name.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}
