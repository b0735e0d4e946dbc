//! The caller-facing handle.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use dodgeball_backend_client::Client;
use dodgeball_protocol::IntegrationName;
use dodgeball_protocol::IntegrationPurpose;
use dodgeball_protocol::Verification;
use dodgeball_utils_readiness::Readiness;
use dodgeball_utils_readiness::ReadinessFlag;
use futures::FutureExt;
use futures::future::BoxFuture;
use futures::future::Shared;
use tokio::task::JoinHandle;
use tracing::error;
use tracing::info;
use tracing::trace;
use tracing::warn;

use crate::api::VerificationApi;
use crate::config::DISABLED_SOURCE_TOKEN;
use crate::config::DodgeballConfig;
use crate::config::HandleVerificationOptions;
use crate::config::VerificationOptions;
use crate::error::ConfigError;
use crate::error::SourceTokenError;
use crate::integration::IntegrationHandle;
use crate::integration::IntegrationLoader;
use crate::integration::IntegrationProps;
use crate::integration::IntegrationRegistry;
use crate::integration::Observation;
use crate::integration::SessionContext;
use crate::source_identity::FileSourceStore;
use crate::source_identity::MemorySourceStore;
use crate::source_identity::SourceIdentityManager;
use crate::source_identity::SourceStore;
use crate::verification::LoopSummary;
use crate::verification::PollLoop;
use crate::verification::VerificationContext;

type InitFuture = Shared<BoxFuture<'static, ()>>;

/// Entry point for embedding applications. Cheap to clone; clones share
/// the integration registry, the source identity and the readiness flag.
#[derive(Clone)]
pub struct Dodgeball {
    inner: Arc<Inner>,
}

struct Inner {
    config: DodgeballConfig,
    api: Arc<dyn VerificationApi>,
    registry: Arc<IntegrationRegistry>,
    identity: SourceIdentityManager,
    sourced: ReadinessFlag,
    init: Mutex<Option<InitFuture>>,
    session: Mutex<Option<SessionContext>>,
}

impl Dodgeball {
    /// Validate the configuration and build an HTTP-backed client.
    pub fn new(public_key: &str, config: DodgeballConfig) -> Result<Self, ConfigError> {
        validate_public_key(public_key)?;
        config.validate()?;
        let client = Client::new(&config.api_url, config.api_version.as_str(), public_key)
            .map_err(ConfigError::BackendClient)?;
        Self::with_api(public_key, config, Arc::new(client))
    }

    /// Build a client on top of an existing [`VerificationApi`].
    pub fn with_api(
        public_key: &str,
        config: DodgeballConfig,
        api: Arc<dyn VerificationApi>,
    ) -> Result<Self, ConfigError> {
        validate_public_key(public_key)?;
        config.validate()?;

        let loader = Arc::new(IntegrationLoader::new(config.integration_timeout));
        let registry = Arc::new(IntegrationRegistry::new(loader));
        let store: Arc<dyn SourceStore> = match &config.source_store_path {
            Some(path) => Arc::new(FileSourceStore::new(path.clone())),
            None => Arc::new(MemorySourceStore::default()),
        };
        let identity = SourceIdentityManager::new(
            Arc::clone(&api),
            Arc::clone(&registry),
            store,
            config.min_token_refresh_interval,
        );
        trace!(api_url = %config.api_url, "dodgeball client constructed");

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                api,
                registry,
                identity,
                sourced: ReadinessFlag::new(),
                init: Mutex::new(None),
                session: Mutex::new(None),
            }),
        })
    }

    pub fn config(&self) -> &DodgeballConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &Arc<IntegrationRegistry> {
        &self.inner.registry
    }

    pub fn source_identity(&self) -> &SourceIdentityManager {
        &self.inner.identity
    }

    pub fn is_sourced(&self) -> bool {
        self.inner.sourced.is_ready()
    }

    pub fn register_integration<F>(&self, name: IntegrationName, factory: F)
    where
        F: Fn(IntegrationProps) -> anyhow::Result<IntegrationHandle> + Send + Sync + 'static,
    {
        self.inner.registry.loader().register(name, factory);
    }

    /// Load the integrations the service asks for, mint the source token
    /// and release everyone waiting on it. Only the first call does work;
    /// later calls join it. The work runs on its own task, so dropping the
    /// returned future does not leave the client unsourced.
    pub async fn initialize(&self) {
        self.init_future().await;
    }

    fn init_future(&self) -> InitFuture {
        let mut slot = self
            .inner
            .init
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(init) = slot.as_ref() {
            return init.clone();
        }

        let this = self.clone();
        let task = tokio::spawn(async move { this.run_initialization().await });
        let future = async move {
            if let Err(err) = task.await {
                error!(error = %err, "client initialization task failed");
            }
        }
        .boxed()
        .shared();
        *slot = Some(future.clone());
        future
    }

    async fn run_initialization(self) {
        let token = match self.inner.sourced.subscribe().await {
            Ok(token) => Some(token),
            Err(err) => {
                warn!(error = %err, "could not subscribe to readiness");
                None
            }
        };

        if self.inner.config.is_enabled {
            // Panics stay inside this task so readiness is still marked below.
            let this = self.clone();
            if let Err(err) = tokio::spawn(async move { this.load_and_source().await }).await {
                error!(error = %err, "client initialization failed");
            }
        }

        let token = match token {
            Some(token) => Ok(token),
            None => self.inner.sourced.subscribe().await,
        };
        match token {
            Ok(token) => {
                if let Err(err) = self.inner.sourced.mark_ready(token).await {
                    warn!(error = %err, "could not mark client as sourced");
                }
            }
            Err(err) => warn!(error = %err, "could not mark client as sourced"),
        }
    }

    async fn load_and_source(self) {
        let init = match self.inner.api.init_config().await {
            Ok(init) => init,
            Err(err) => {
                error!(error = %format!("{err:#}"), "could not fetch initialization config");
                Default::default()
            }
        };
        let loaded = self
            .inner
            .registry
            .load_all(&init.libs, &init.request_id)
            .await;
        info!(
            requested = init.libs.len(),
            loaded = loaded.len(),
            "integrations initialized"
        );

        match self.inner.identity.get_token().await {
            Ok(source_token) => {
                let observation = Observation {
                    session_id: source_token.clone(),
                    user_id: None,
                    source_token,
                };
                self.observe_all(&observation).await;
            }
            Err(err) => error!(error = %err, "could not generate source token"),
        }
    }

    /// The current source token, once the client is sourced.
    pub async fn get_source_token(&self) -> Result<String, SourceTokenError> {
        if !self.inner.config.is_enabled {
            return Ok(DISABLED_SOURCE_TOKEN.to_string());
        }
        self.initialize().await;
        self.inner.sourced.wait_ready().await;
        self.inner.identity.get_token().await
    }

    pub async fn expire_source_token(&self) -> anyhow::Result<()> {
        self.inner.identity.expire().await
    }

    /// Record the session used by OBSERVE integrations and notify them, now
    /// if the client is sourced, otherwise as soon as it is.
    pub async fn track(&self, session_id: impl Into<String>, user_id: Option<String>) {
        let session = SessionContext {
            session_id: session_id.into(),
            user_id,
        };
        *self
            .inner
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(session.clone());

        if self.is_sourced() {
            self.observe_session(&session).await;
        } else {
            let this = self.clone();
            tokio::spawn(async move {
                this.inner.sourced.wait_ready().await;
                this.observe_session(&session).await;
            });
        }
    }

    pub fn session(&self) -> Option<SessionContext> {
        self.inner
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Read the current state of a verification from the decision service.
    pub async fn fetch_verification(&self, verification_id: &str) -> anyhow::Result<Verification> {
        self.inner.api.query_verification(verification_id).await
    }

    /// Spawn the poll loop for `verification` on the current runtime.
    pub fn begin_verification(
        &self,
        verification: Verification,
        context: VerificationContext,
        options: HandleVerificationOptions,
    ) -> JoinHandle<LoopSummary> {
        let this = self.clone();
        tokio::spawn(async move {
            this.run_verification(verification, context, options)
                .await
        })
    }

    pub async fn run_verification(
        &self,
        verification: Verification,
        context: VerificationContext,
        options: HandleVerificationOptions,
    ) -> LoopSummary {
        self.run_verification_with_options(verification, context, options.into_options())
            .await
    }

    /// Like [`Dodgeball::run_verification`] with full control over polling.
    pub async fn run_verification_with_options(
        &self,
        verification: Verification,
        context: VerificationContext,
        options: VerificationOptions,
    ) -> LoopSummary {
        PollLoop::new(
            Arc::clone(&self.inner.api),
            Arc::clone(&self.inner.registry),
            self.inner.identity.clone(),
            self.session(),
            options,
        )
        .run(verification, context)
        .await
    }

    async fn observe_session(&self, session: &SessionContext) {
        match self.inner.identity.get_token().await {
            Ok(source_token) => self.observe_all(&session.observation(source_token)).await,
            Err(err) => error!(error = %err, "no source token to observe session with"),
        }
    }

    async fn observe_all(&self, observation: &Observation) {
        for handle in self
            .inner
            .registry
            .with_purpose(IntegrationPurpose::Observe)
            .await
        {
            let Some(observe) = handle.observe() else {
                continue;
            };
            if let Err(err) = observe.observe(observation).await {
                error!(integration = %handle.name(), error = %format!("{err:#}"), "observe failed");
            }
        }
    }
}

fn validate_public_key(public_key: &str) -> Result<(), ConfigError> {
    if public_key.trim().is_empty() {
        return Err(ConfigError::MissingConfig {
            field: "public_key",
        });
    }
    Ok(())
}
