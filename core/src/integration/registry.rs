use std::sync::Arc;
use std::time::Duration;

use dodgeball_protocol::IntegrationName;
use dodgeball_protocol::IntegrationPurpose;
use dodgeball_protocol::LibConfig;
use tokio::sync::Mutex;
use tracing::error;
use tracing::info;

use super::IntegrationHandle;
use super::IntegrationLoader;
use super::IntegrationProps;
use crate::error::IntegrationError;

/// Live integration instances, at most one per name.
///
/// Every mutation goes through [`IntegrationRegistry::load_or_reconfigure`]
/// so an instance holding a loaded SDK client is never replaced.
pub struct IntegrationRegistry {
    loader: Arc<IntegrationLoader>,
    loaded: Mutex<Vec<Arc<IntegrationHandle>>>,
}

impl IntegrationRegistry {
    pub fn new(loader: Arc<IntegrationLoader>) -> Self {
        Self {
            loader,
            loaded: Mutex::new(Vec::new()),
        }
    }

    pub fn loader(&self) -> &Arc<IntegrationLoader> {
        &self.loader
    }

    /// Return the live instance for `lib.name`, reconfiguring it, or build a
    /// new one. The registry lock is held across the load so two concurrent
    /// requests for the same name cannot both instantiate it.
    pub async fn load_or_reconfigure(
        &self,
        lib: &LibConfig,
        request_id: &str,
    ) -> Result<Arc<IntegrationHandle>, IntegrationError> {
        let name: IntegrationName = lib
            .name
            .parse()
            .map_err(|_| IntegrationError::Unknown(lib.name.clone()))?;
        let props = IntegrationProps {
            url: lib.url.clone(),
            config: lib.config.clone(),
            request_id: request_id.to_string(),
            method: lib.method.clone(),
            purposes: lib.purposes.clone(),
        };

        let mut loaded = self.loaded.lock().await;
        if let Some(existing) = loaded.iter().find(|handle| handle.name() == name) {
            info!(integration = %name, "reconfiguring loaded integration");
            existing
                .reconfigure(&props)
                .await
                .map_err(|err| IntegrationError::lifecycle(name, "reconfigure", err))?;
            return Ok(Arc::clone(existing));
        }

        let load_timeout = lib.load_timeout.map(Duration::from_millis);
        let handle = Arc::new(self.loader.instantiate(name, props, load_timeout).await?);
        info!(integration = %name, "integration loaded");
        loaded.push(Arc::clone(&handle));
        Ok(handle)
    }

    /// Load every lib, logging and skipping the ones that fail.
    pub async fn load_all(
        &self,
        libs: &[LibConfig],
        request_id: &str,
    ) -> Vec<Arc<IntegrationHandle>> {
        let mut handles = Vec::with_capacity(libs.len());
        for lib in libs {
            match self.load_or_reconfigure(lib, request_id).await {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    error!(integration = %lib.name, error = %err, "could not load integration");
                }
            }
        }
        handles
    }

    pub async fn get(&self, name: IntegrationName) -> Option<Arc<IntegrationHandle>> {
        self.loaded
            .lock()
            .await
            .iter()
            .find(|handle| handle.name() == name)
            .cloned()
    }

    pub async fn with_purpose(
        &self,
        purpose: IntegrationPurpose,
    ) -> Vec<Arc<IntegrationHandle>> {
        self.loaded
            .lock()
            .await
            .iter()
            .filter(|handle| handle.has_purpose(purpose))
            .cloned()
            .collect()
    }

    pub async fn all(&self) -> Vec<Arc<IntegrationHandle>> {
        self.loaded.lock().await.clone()
    }
}
