use std::time::Duration;

use dodgeball_protocol::IntegrationName;
use thiserror::Error;

/// Raised while constructing a client. Never silently defaulted.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration `{field}`")]
    MissingConfig { field: &'static str },
    #[error(
        "invalid value `{value}` for `{field}`; expected one of: {}",
        .allowed.join(", ")
    )]
    InvalidConfig {
        field: &'static str,
        value: String,
        allowed: Vec<String>,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to read configuration file: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to build backend client: {0:#}")]
    BackendClient(anyhow::Error),
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, value: &str, allowed: &[&str]) -> Self {
        Self::InvalidConfig {
            field,
            value: value.to_string(),
            allowed: allowed.iter().map(ToString::to_string).collect(),
        }
    }
}

#[derive(Debug, Error)]
pub enum IntegrationError {
    #[error("unknown integration `{0}`")]
    Unknown(String),
    #[error("no factory registered for integration {0}")]
    NotRegistered(IntegrationName),
    #[error("integration {name} did not load within {timeout:?}")]
    LoadTimeout {
        name: IntegrationName,
        timeout: Duration,
    },
    #[error("integration {name} failed to {stage}: {error:#}")]
    Lifecycle {
        name: IntegrationName,
        stage: &'static str,
        #[source]
        error: anyhow::Error,
    },
}

impl IntegrationError {
    pub(crate) fn lifecycle(
        name: IntegrationName,
        stage: &'static str,
        error: anyhow::Error,
    ) -> Self {
        Self::Lifecycle { name, stage, error }
    }
}

/// Failure of a source token generation. Cloneable so that every caller
/// attached to the same in-flight generation receives it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceTokenError {
    #[error("source token exchange failed: {0}")]
    Exchange(String),
}
