//! The remote calls the verification engine depends on.

use anyhow::Context;
use anyhow::Result;
use async_trait::async_trait;
use dodgeball_backend_client::Client;
use dodgeball_protocol::Fingerprint;
use dodgeball_protocol::InitConfig;
use dodgeball_protocol::SourceIdentity;
use dodgeball_protocol::StepResponse;
use dodgeball_protocol::Verification;

/// Transport seam between the engine and the decision service.
#[async_trait]
pub trait VerificationApi: Send + Sync {
    async fn init_config(&self) -> Result<InitConfig>;

    async fn query_verification(&self, verification_id: &str) -> Result<Verification>;

    async fn submit_step_response(
        &self,
        verification_id: &str,
        verification_step_id: &str,
        source_token: &str,
        response: &StepResponse,
    ) -> Result<()>;

    async fn exchange_source_token(
        &self,
        previous_token: Option<&str>,
        fingerprints: &[Fingerprint],
    ) -> Result<SourceIdentity>;

    async fn attach_source_metadata(
        &self,
        source_token: &str,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Result<()>;

    async fn expire_source_token(&self, source_token: &str) -> Result<()>;
}

#[async_trait]
impl VerificationApi for Client {
    async fn init_config(&self) -> Result<InitConfig> {
        self.get_init_config().await
    }

    async fn query_verification(&self, verification_id: &str) -> Result<Verification> {
        let response = self.get_verification(verification_id).await?;
        if !response.success && !response.errors.is_empty() {
            let messages: Vec<_> = response
                .errors
                .iter()
                .map(|e| e.message.as_str())
                .collect();
            anyhow::bail!("verification query rejected: {}", messages.join("; "));
        }
        Ok(response.verification)
    }

    async fn submit_step_response(
        &self,
        verification_id: &str,
        verification_step_id: &str,
        source_token: &str,
        response: &StepResponse,
    ) -> Result<()> {
        self.set_verification_response(
            verification_id,
            verification_step_id,
            source_token,
            response,
        )
        .await
            .with_context(|| format!("failed to submit response for step {verification_step_id}"))?;
        Ok(())
    }

    async fn exchange_source_token(
        &self,
        previous_token: Option<&str>,
        fingerprints: &[Fingerprint],
    ) -> Result<SourceIdentity> {
        self.get_source_token(previous_token, fingerprints).await
    }

    async fn attach_source_metadata(
        &self,
        source_token: &str,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Result<()> {
        self.attach_source_token_metadata(source_token, metadata)
            .await?;
        Ok(())
    }

    async fn expire_source_token(&self, source_token: &str) -> Result<()> {
        Client::expire_source_token(self, source_token).await?;
        Ok(())
    }
}
