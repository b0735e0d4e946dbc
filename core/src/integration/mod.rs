//! Capability contracts for pluggable integrations.
//!
//! An integration is one concrete type that implements
//! [`IntegrationLifecycle`] plus any subset of [`Identify`], [`Observe`],
//! [`Qualify`] and [`Execute`]. The subset is recorded in [`Capabilities`] so
//! dispatch is a property check rather than a cast.

mod loader;
mod registry;

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::sync::PoisonError;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;
use dodgeball_protocol::Fingerprint;
use dodgeball_protocol::IntegrationName;
use dodgeball_protocol::IntegrationPurpose;
use dodgeball_protocol::VerificationStep;

pub use loader::IntegrationFactory;
pub use loader::IntegrationLoader;
pub use registry::IntegrationRegistry;

use crate::verification::CancelHandle;
use crate::verification::StepResponder;
use crate::verification::VerificationContext;

/// Properties an integration is constructed or reconfigured with.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntegrationProps {
    pub url: String,
    pub config: serde_json::Value,
    pub request_id: String,
    pub method: Option<String>,
    /// Empty means "keep what the integration declares".
    pub purposes: Vec<IntegrationPurpose>,
}

#[async_trait]
pub trait IntegrationLifecycle: Send + Sync {
    /// Whether the underlying client is already usable without `load`.
    fn has_loaded(&self) -> bool {
        true
    }

    async fn load(&self) -> Result<()> {
        Ok(())
    }

    async fn configure(&self) -> Result<()>;

    async fn reconfigure(&self, props: &IntegrationProps) -> Result<()>;
}

#[async_trait]
pub trait Identify: Send + Sync {
    /// Failures are best reported through [`Fingerprint::failed`]; an `Err`
    /// is logged and the fingerprint skipped.
    async fn identify(&self) -> Result<Fingerprint>;

    /// Extra properties attached to the source token once it is minted.
    async fn metadata(&self) -> Result<serde_json::Map<String, serde_json::Value>> {
        Ok(serde_json::Map::new())
    }
}

/// Session context handed to [`Observe`] integrations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub session_id: String,
    pub user_id: Option<String>,
    pub source_token: String,
}

/// Session recorded by `Dodgeball::track`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub session_id: String,
    pub user_id: Option<String>,
}

impl SessionContext {
    pub fn observation(&self, source_token: String) -> Observation {
        Observation {
            session_id: self.session_id.clone(),
            user_id: self.user_id.clone(),
            source_token,
        }
    }
}

#[async_trait]
pub trait Observe: Send + Sync {
    async fn observe(&self, observation: &Observation) -> Result<()>;
}

#[async_trait]
pub trait Qualify: Send + Sync {
    async fn qualify(&self, context: VerificationContext) -> Result<()>;
}

#[async_trait]
pub trait Execute: Send + Sync {
    /// Drive a challenge. The returned future may stay pending for as long
    /// as the user interacts; progress is reported through `responder`.
    async fn execute(
        &self,
        step: VerificationStep,
        context: VerificationContext,
        responder: StepResponder,
        cancel: CancelHandle,
    ) -> Result<()>;

    /// Dismiss any open challenge once the verification has been approved.
    async fn cleanup(&self) -> Result<()> {
        Ok(())
    }
}

/// The capabilities an integration instance implements.
#[derive(Clone, Default)]
pub struct Capabilities {
    pub identify: Option<Arc<dyn Identify>>,
    pub observe: Option<Arc<dyn Observe>>,
    pub qualify: Option<Arc<dyn Qualify>>,
    pub execute: Option<Arc<dyn Execute>>,
}

impl Capabilities {
    pub fn with_identify(mut self, identify: Arc<dyn Identify>) -> Self {
        self.identify = Some(identify);
        self
    }

    pub fn with_observe(mut self, observe: Arc<dyn Observe>) -> Self {
        self.observe = Some(observe);
        self
    }

    pub fn with_qualify(mut self, qualify: Arc<dyn Qualify>) -> Self {
        self.qualify = Some(qualify);
        self
    }

    pub fn with_execute(mut self, execute: Arc<dyn Execute>) -> Self {
        self.execute = Some(execute);
        self
    }

    pub fn supports(&self, purpose: IntegrationPurpose) -> bool {
        match purpose {
            IntegrationPurpose::Identify => self.identify.is_some(),
            IntegrationPurpose::Observe => self.observe.is_some(),
            IntegrationPurpose::Qualify => self.qualify.is_some(),
            IntegrationPurpose::Execute => self.execute.is_some(),
        }
    }

    fn supported(&self) -> BTreeSet<IntegrationPurpose> {
        [
            IntegrationPurpose::Identify,
            IntegrationPurpose::Observe,
            IntegrationPurpose::Qualify,
            IntegrationPurpose::Execute,
        ]
        .into_iter()
        .filter(|purpose| self.supports(*purpose))
        .collect()
    }
}

/// A live integration instance owned by the [`IntegrationRegistry`].
pub struct IntegrationHandle {
    name: IntegrationName,
    lifecycle: Arc<dyn IntegrationLifecycle>,
    capabilities: Capabilities,
    purposes: RwLock<BTreeSet<IntegrationPurpose>>,
}

impl IntegrationHandle {
    /// Active purposes start as every capability the instance implements.
    pub fn new(
        name: IntegrationName,
        lifecycle: Arc<dyn IntegrationLifecycle>,
        capabilities: Capabilities,
    ) -> Self {
        let purposes = capabilities.supported();
        Self {
            name,
            lifecycle,
            capabilities,
            purposes: RwLock::new(purposes),
        }
    }

    pub fn name(&self) -> IntegrationName {
        self.name
    }

    pub fn lifecycle(&self) -> &Arc<dyn IntegrationLifecycle> {
        &self.lifecycle
    }

    pub fn purposes(&self) -> BTreeSet<IntegrationPurpose> {
        self.purposes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn has_purpose(&self, purpose: IntegrationPurpose) -> bool {
        self.purposes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&purpose)
    }

    /// Replace the active purposes. Purposes the instance cannot serve are
    /// dropped; an empty list leaves the current set untouched.
    pub fn set_purposes(&self, purposes: &[IntegrationPurpose]) {
        if purposes.is_empty() {
            return;
        }
        let next: BTreeSet<_> = purposes
            .iter()
            .copied()
            .filter(|purpose| self.capabilities.supports(*purpose))
            .collect();
        *self
            .purposes
            .write()
            .unwrap_or_else(PoisonError::into_inner) = next;
    }

    pub fn identify(&self) -> Option<Arc<dyn Identify>> {
        self.active(IntegrationPurpose::Identify, &self.capabilities.identify)
    }

    pub fn observe(&self) -> Option<Arc<dyn Observe>> {
        self.active(IntegrationPurpose::Observe, &self.capabilities.observe)
    }

    pub fn qualify(&self) -> Option<Arc<dyn Qualify>> {
        self.active(IntegrationPurpose::Qualify, &self.capabilities.qualify)
    }

    pub fn execute(&self) -> Option<Arc<dyn Execute>> {
        self.active(IntegrationPurpose::Execute, &self.capabilities.execute)
    }

    pub(crate) async fn reconfigure(&self, props: &IntegrationProps) -> Result<()> {
        self.set_purposes(&props.purposes);
        self.lifecycle.reconfigure(props).await
    }

    fn active<T: ?Sized>(
        &self,
        purpose: IntegrationPurpose,
        slot: &Option<Arc<T>>,
    ) -> Option<Arc<T>> {
        if self.has_purpose(purpose) {
            slot.clone()
        } else {
            None
        }
    }
}

impl fmt::Debug for IntegrationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntegrationHandle")
            .field("name", &self.name)
            .field("purposes", &self.purposes())
            .finish_non_exhaustive()
    }
}
