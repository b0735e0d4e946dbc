use anyhow::Context;
use anyhow::Result;
use dodgeball_protocol::Fingerprint;
use dodgeball_protocol::InitConfig;
use dodgeball_protocol::SourceIdentity;
use dodgeball_protocol::StepResponse;
use dodgeball_protocol::api::SourceTokenMetadataRequest;
use dodgeball_protocol::api::SourceTokenRequest;
use dodgeball_protocol::api::VerifyResponse;
use serde::de::DeserializeOwned;
use tracing::debug;
use tracing::warn;

use crate::retry::RetryPolicy;

pub const DEFAULT_API_URL: &str = "https://api.dodgeballhq.com/";

pub const PUBLIC_KEY_HEADER: &str = "Dodgeball-Public-Key";
pub const SOURCE_TOKEN_HEADER: &str = "Dodgeball-Source-Token";
pub const PLUGIN_NAME_HEADER: &str = "Dodgeball-Plugin-Name";
pub const METHOD_NAME_HEADER: &str = "Dodgeball-Method-Name";

/// HTTP client for the Dodgeball decision service.
#[derive(Clone, Debug)]
pub struct Client {
    base_url: String,
    public_key: String,
    http: reqwest::Client,
    retry: RetryPolicy,
}

impl Client {
    pub fn new(api_url: &str, api_version: &str, public_key: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self::with_http_client(http, api_url, api_version, public_key))
    }

    pub fn with_http_client(
        http: reqwest::Client,
        api_url: &str,
        api_version: &str,
        public_key: impl Into<String>,
    ) -> Self {
        Self {
            base_url: versioned_base_url(api_url, api_version),
            public_key: public_key.into(),
            http,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `GET init`: the integrations to load at startup.
    pub async fn get_init_config(&self) -> Result<InitConfig> {
        let url = format!("{}init", self.base_url);
        self.execute("init", || {
            self.http
                .get(&url)
                .header(PUBLIC_KEY_HEADER, &self.public_key)
        })
        .await
    }

    /// `GET verification/{id}`.
    pub async fn get_verification(&self, verification_id: &str) -> Result<VerifyResponse> {
        if verification_id.is_empty() {
            anyhow::bail!("verification has no id");
        }
        let url = format!("{}verification/{verification_id}", self.base_url);
        self.execute("query verification", || {
            self.http
                .get(&url)
                .header(PUBLIC_KEY_HEADER, &self.public_key)
        })
        .await
    }

    /// `POST verification/{id}/{verification_step_id}` with the step
    /// response's `data` (or `{}`) as the body.
    pub async fn set_verification_response(
        &self,
        verification_id: &str,
        verification_step_id: &str,
        source_token: &str,
        response: &StepResponse,
    ) -> Result<serde_json::Value> {
        if verification_id.is_empty() {
            anyhow::bail!("verification has no id");
        }
        let url = format!(
            "{}verification/{verification_id}/{verification_step_id}",
            self.base_url
        );
        let body = response
            .data
            .clone()
            .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new()));
        self.execute("submit step response", || {
            self.http
                .post(&url)
                .header(PUBLIC_KEY_HEADER, &self.public_key)
                .header(SOURCE_TOKEN_HEADER, source_token)
                .header(PLUGIN_NAME_HEADER, &response.plugin_name)
                .header(METHOD_NAME_HEADER, &response.method_name)
                .json(&body)
        })
        .await
    }

    /// `POST sourceToken`: exchange fingerprints (and any previous token) for
    /// a fresh source token.
    pub async fn get_source_token(
        &self,
        previous_token: Option<&str>,
        fingerprints: &[Fingerprint],
    ) -> Result<SourceIdentity> {
        let url = format!("{}sourceToken", self.base_url);
        let request = SourceTokenRequest {
            fingerprints: fingerprints.to_vec(),
        };
        self.execute("source token", || {
            let builder = self
                .http
                .post(&url)
                .header(PUBLIC_KEY_HEADER, &self.public_key)
                .json(&request);
            match previous_token {
                Some(token) => builder.header(SOURCE_TOKEN_HEADER, token),
                None => builder,
            }
        })
        .await
    }

    /// `POST sourceToken/meta`.
    pub async fn attach_source_token_metadata(
        &self,
        source_token: &str,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Result<serde_json::Value> {
        let url = format!("{}sourceToken/meta", self.base_url);
        let request = SourceTokenMetadataRequest { metadata };
        self.execute("source token metadata", || {
            self.http
                .post(&url)
                .header(PUBLIC_KEY_HEADER, &self.public_key)
                .header(SOURCE_TOKEN_HEADER, source_token)
                .json(&request)
        })
        .await
    }

    /// `POST sourceToken/expire`.
    pub async fn expire_source_token(&self, source_token: &str) -> Result<serde_json::Value> {
        let url = format!("{}sourceToken/expire", self.base_url);
        self.execute("expire source token", || {
            self.http
                .post(&url)
                .header(PUBLIC_KEY_HEADER, &self.public_key)
                .header(SOURCE_TOKEN_HEADER, source_token)
                .json(&serde_json::json!({}))
        })
        .await
    }

    async fn execute<T, F>(&self, label: &str, build: F) -> Result<T>
    where
        T: DeserializeOwned,
        F: Fn() -> reqwest::RequestBuilder,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match send_once(build()).await {
                Ok(value) => {
                    debug!(request = label, attempt, "request succeeded");
                    return Ok(value);
                }
                Err(err) if attempt < max_attempts => {
                    warn!(request = label, attempt, error = %err, "request failed; retrying");
                    tokio::time::sleep(self.retry.delay_after(attempt)).await;
                }
                Err(err) => {
                    return Err(err.context(format!("{label} failed after {attempt} attempt(s)")));
                }
            }
        }
    }
}

async fn send_once<T: DeserializeOwned>(request: reqwest::RequestBuilder) -> Result<T> {
    let response = request.send().await.context("request could not be sent")?;
    let status = response.status();
    let body = response
        .text()
        .await
        .context("failed to read response body")?;
    if !status.is_success() {
        anyhow::bail!("unexpected status {status}: {body}");
    }
    let body = if body.trim().is_empty() { "null" } else { body.as_str() };
    serde_json::from_str(body).with_context(|| format!("failed to decode response: {body}"))
}

/// `https://host/` + `v1` -> `https://host/v1/`.
fn versioned_base_url(api_url: &str, api_version: &str) -> String {
    let mut base = api_url.to_string();
    if !base.ends_with('/') {
        base.push('/');
    }
    format!("{base}{api_version}/")
}
