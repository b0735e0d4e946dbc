use std::collections::HashMap;
use std::sync::Arc;
use std::sync::PoisonError;
use std::sync::RwLock;
use std::time::Duration;

use anyhow::Result;
use dodgeball_protocol::IntegrationName;
use tracing::debug;
use tracing::info;

use super::IntegrationHandle;
use super::IntegrationProps;
use crate::config::MAX_INTEGRATION_LOAD_TIMEOUT;
use crate::error::IntegrationError;

/// Constructs an integration instance from its props.
pub type IntegrationFactory =
    Arc<dyn Fn(IntegrationProps) -> Result<IntegrationHandle> + Send + Sync>;

/// Static table from integration name to factory, populated at startup.
pub struct IntegrationLoader {
    factories: RwLock<HashMap<IntegrationName, IntegrationFactory>>,
    default_timeout: Duration,
}

impl Default for IntegrationLoader {
    fn default() -> Self {
        Self::new(MAX_INTEGRATION_LOAD_TIMEOUT)
    }
}

impl IntegrationLoader {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
            default_timeout,
        }
    }

    /// Register (or replace) the factory for `name`.
    pub fn register<F>(&self, name: IntegrationName, factory: F)
    where
        F: Fn(IntegrationProps) -> Result<IntegrationHandle> + Send + Sync + 'static,
    {
        let mut guard = self
            .factories
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        guard.insert(name, Arc::new(factory));
    }

    pub fn is_registered(&self, name: IntegrationName) -> bool {
        self.factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&name)
    }

    /// Build, load and configure a fresh instance within the load budget.
    pub(crate) async fn instantiate(
        &self,
        name: IntegrationName,
        props: IntegrationProps,
        load_timeout: Option<Duration>,
    ) -> Result<IntegrationHandle, IntegrationError> {
        let factory = self
            .factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&name)
            .cloned()
            .ok_or(IntegrationError::NotRegistered(name))?;

        let handle = factory(props.clone())
            .map_err(|err| IntegrationError::lifecycle(name, "construct", err))?;
        handle.set_purposes(&props.purposes);

        let timeout = load_timeout.unwrap_or(self.default_timeout);
        let setup = async {
            let lifecycle = handle.lifecycle();
            if !lifecycle.has_loaded() {
                debug!(integration = %name, "loading integration dependencies");
                lifecycle
                    .load()
                    .await
                    .map_err(|err| IntegrationError::lifecycle(name, "load", err))?;
            }
            info!(integration = %name, "configuring integration");
            lifecycle
                .configure()
                .await
                .map_err(|err| IntegrationError::lifecycle(name, "configure", err))
        };

        match tokio::time::timeout(timeout, setup).await {
            Ok(Ok(())) => Ok(handle),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(IntegrationError::LoadTimeout { name, timeout }),
        }
    }
}
