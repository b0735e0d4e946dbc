//! Generation, caching and proactive refresh of the source token.
//!
//! At most one token exchange is in flight at a time. Concurrent callers
//! attach to the same [`Shared`] future and all observe its result. A
//! successful exchange persists the identity through the [`SourceStore`] and
//! re-arms a single refresh task that fires shortly before expiry.

mod fingerprint;
mod store;

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::Weak;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use dodgeball_protocol::Fingerprint;
use dodgeball_protocol::IntegrationPurpose;
use dodgeball_protocol::SourceIdentity;
use futures::FutureExt;
use futures::future::BoxFuture;
use futures::future::Shared;
use tokio::task::AbortHandle;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

pub use store::FileSourceStore;
pub use store::MemorySourceStore;
pub use store::SourceStore;

use crate::api::VerificationApi;
use crate::config::TOKEN_REFRESH_LEAD;
use crate::error::SourceTokenError;
use crate::integration::IntegrationRegistry;

type TokenResult = Result<SourceIdentity, SourceTokenError>;
type TokenFuture = Shared<BoxFuture<'static, TokenResult>>;

#[derive(Clone)]
pub struct SourceIdentityManager {
    inner: Arc<Inner>,
}

struct Inner {
    api: Arc<dyn VerificationApi>,
    registry: Arc<IntegrationRegistry>,
    store: Arc<dyn SourceStore>,
    min_refresh_interval: Duration,
    state: Mutex<TokenState>,
}

#[derive(Default)]
struct TokenState {
    in_flight: Option<TokenFuture>,
    refresh: Option<ScheduledRefresh>,
    next_refresh_id: u64,
}

struct ScheduledRefresh {
    id: u64,
    handle: AbortHandle,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(refresh) = state.refresh.take() {
            refresh.handle.abort();
        }
    }
}

impl SourceIdentityManager {
    pub fn new(
        api: Arc<dyn VerificationApi>,
        registry: Arc<IntegrationRegistry>,
        store: Arc<dyn SourceStore>,
        min_refresh_interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                api,
                registry,
                store,
                min_refresh_interval,
                state: Mutex::new(TokenState::default()),
            }),
        }
    }

    /// The persisted identity if it has not expired. An expired identity is
    /// removed from the store.
    pub fn current(&self) -> Option<SourceIdentity> {
        let identity = self.inner.store.load()?;
        if identity.is_valid_at(now_ms()) {
            Some(identity)
        } else {
            debug!("discarding expired source identity");
            self.inner.store.save(None);
            None
        }
    }

    /// Return the cached token or wait for a generation to finish.
    pub async fn get_token(&self) -> Result<String, SourceTokenError> {
        self.token_future(false)
            .await
            .map(|identity| identity.token)
    }

    /// Mint a new identity, joining one that is already being generated.
    pub async fn generate(&self) -> TokenResult {
        self.token_future(true).await
    }

    pub fn has_scheduled_refresh(&self) -> bool {
        self.lock_state().refresh.is_some()
    }

    /// Expire the current token remotely, clear it locally and cancel the
    /// pending refresh.
    pub async fn expire(&self) -> anyhow::Result<()> {
        let current = self.inner.store.load();
        self.cancel_refresh();
        self.inner.store.save(None);
        if let Some(identity) = current {
            info!("expiring source token");
            self.inner.api.expire_source_token(&identity.token).await?;
        }
        Ok(())
    }

    fn lock_state(&self) -> MutexGuard<'_, TokenState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn token_future(&self, force: bool) -> TokenFuture {
        let mut state = self.lock_state();
        if let Some(in_flight) = &state.in_flight {
            return in_flight.clone();
        }
        if !force && let Some(identity) = self.current() {
            return futures::future::ready(Ok(identity)).boxed().shared();
        }

        let manager = self.clone();
        let future = async move { manager.run_generation().await }
            .boxed()
            .shared();
        state.in_flight = Some(future.clone());
        future
    }

    async fn run_generation(self) -> TokenResult {
        let result = self.exchange().await;
        let outcome = match result {
            Ok(identity) => {
                info!("source token generated");
                self.inner.store.save(Some(&identity));
                self.schedule_refresh(&identity);
                self.spawn_metadata_attach(identity.token.clone());
                Ok(identity)
            }
            Err(err) => {
                error!(error = %format!("{err:#}"), "source token generation failed");
                Err(SourceTokenError::Exchange(format!("{err:#}")))
            }
        };
        self.lock_state().in_flight = None;
        outcome
    }

    async fn exchange(&self) -> anyhow::Result<SourceIdentity> {
        let mut fingerprints = self.gather_fingerprints().await;
        fingerprints.push(fingerprint::host_fingerprint());
        let previous = self.current().map(|identity| identity.token);
        self.inner
            .api
            .exchange_source_token(previous.as_deref(), &fingerprints)
            .await
    }

    async fn gather_fingerprints(&self) -> Vec<Fingerprint> {
        let mut fingerprints = Vec::new();
        for handle in self
            .inner
            .registry
            .with_purpose(IntegrationPurpose::Identify)
            .await
        {
            let Some(identify) = handle.identify() else {
                continue;
            };
            match identify.identify().await {
                Ok(fingerprint) => fingerprints.push(fingerprint),
                Err(err) => {
                    error!(
                        integration = %handle.name(),
                        error = %err,
                        "fingerprint gathering failed; skipping"
                    );
                }
            }
        }
        fingerprints
    }

    fn schedule_refresh(&self, identity: &SourceIdentity) {
        let delay = refresh_delay(identity.expiry, now_ms(), self.inner.min_refresh_interval);
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);

        let mut state = self.lock_state();
        state.next_refresh_id += 1;
        let id = state.next_refresh_id;
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let manager = SourceIdentityManager { inner };
            manager.clear_refresh(id);
            debug!("refreshing source token ahead of expiry");
            if let Err(err) = manager.generate().await {
                warn!(error = %err, "scheduled source token refresh failed");
            }
        });
        debug!(
            delay_ms = delay.as_millis() as u64,
            "source token refresh scheduled"
        );
        if let Some(previous) = state.refresh.replace(ScheduledRefresh {
            id,
            handle: task.abort_handle(),
        }) {
            previous.handle.abort();
        }
    }

    fn clear_refresh(&self, id: u64) {
        let mut state = self.lock_state();
        if state.refresh.as_ref().is_some_and(|refresh| refresh.id == id) {
            state.refresh = None;
        }
    }

    fn cancel_refresh(&self) {
        if let Some(refresh) = self.lock_state().refresh.take() {
            refresh.handle.abort();
        }
    }

    fn spawn_metadata_attach(&self, token: String) {
        let manager = self.clone();
        tokio::spawn(async move {
            manager.attach_metadata(&token).await;
        });
    }

    /// Best effort: failures are logged.
    async fn attach_metadata(&self, token: &str) {
        let mut metadata = serde_json::Map::new();
        for handle in self
            .inner
            .registry
            .with_purpose(IntegrationPurpose::Identify)
            .await
        {
            let Some(identify) = handle.identify() else {
                continue;
            };
            match identify.metadata().await {
                Ok(props) if !props.is_empty() => {
                    metadata.insert(handle.name().to_string(), serde_json::Value::Object(props));
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(integration = %handle.name(), error = %err, "metadata collection failed");
                }
            }
        }
        if metadata.is_empty() {
            return;
        }
        if let Err(err) = self.inner.api.attach_source_metadata(token, metadata).await {
            warn!(error = %format!("{err:#}"), "failed to attach source token metadata");
        }
    }
}

/// Delay until the next proactive refresh: shortly before expiry, but never
/// sooner than `floor`.
pub(crate) fn refresh_delay(expiry_ms: i64, now_ms: i64, floor: Duration) -> Duration {
    let lead_ms = TOKEN_REFRESH_LEAD.as_millis() as i64;
    let until_refresh = expiry_ms.saturating_sub(now_ms).saturating_sub(lead_ms);
    let until_refresh = Duration::from_millis(u64::try_from(until_refresh).unwrap_or(0));
    until_refresh.max(floor)
}

pub(crate) fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or_default()
}
