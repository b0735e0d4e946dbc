use std::fmt;
use std::future::Future;
use std::sync::Arc;

use dodgeball_protocol::Verification;
use dodgeball_protocol::VerificationError;
use futures::FutureExt;
use futures::future::BoxFuture;

pub type VerificationCallback = Arc<dyn Fn(Verification) -> BoxFuture<'static, ()> + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(VerificationError) -> BoxFuture<'static, ()> + Send + Sync>;

/// Which caller callback an iteration resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextCallback {
    Approved,
    Verified,
    Denied,
    Blocked,
    Pending,
    Undecided,
    Error,
}

/// Outcome callbacks supplied by the embedding application. Every callback
/// is optional; a missing one is skipped.
#[derive(Clone, Default)]
pub struct VerificationContext {
    on_approved: Option<VerificationCallback>,
    on_verified: Option<VerificationCallback>,
    on_denied: Option<VerificationCallback>,
    on_blocked: Option<VerificationCallback>,
    on_pending: Option<VerificationCallback>,
    on_undecided: Option<VerificationCallback>,
    on_error: Option<ErrorCallback>,
}

fn verification_callback<F, Fut>(callback: F) -> VerificationCallback
where
    F: Fn(Verification) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |verification| callback(verification).boxed())
}

impl VerificationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Approved on the first evaluation, with no challenge shown.
    pub fn on_approved<F, Fut>(mut self, callback: F) -> Self
    where
        F: Fn(Verification) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_approved = Some(verification_callback(callback));
        self
    }

    /// Approved after one or more steps were completed.
    pub fn on_verified<F, Fut>(mut self, callback: F) -> Self
    where
        F: Fn(Verification) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_verified = Some(verification_callback(callback));
        self
    }

    pub fn on_denied<F, Fut>(mut self, callback: F) -> Self
    where
        F: Fn(Verification) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_denied = Some(verification_callback(callback));
        self
    }

    pub fn on_blocked<F, Fut>(mut self, callback: F) -> Self
    where
        F: Fn(Verification) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_blocked = Some(verification_callback(callback));
        self
    }

    pub fn on_pending<F, Fut>(mut self, callback: F) -> Self
    where
        F: Fn(Verification) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_pending = Some(verification_callback(callback));
        self
    }

    pub fn on_undecided<F, Fut>(mut self, callback: F) -> Self
    where
        F: Fn(Verification) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_undecided = Some(verification_callback(callback));
        self
    }

    pub fn on_error<F, Fut>(mut self, callback: F) -> Self
    where
        F: Fn(VerificationError) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_error = Some(Arc::new(move |error| callback(error).boxed()));
        self
    }

    /// Report an error to the caller. Returns whether `on_error` was set.
    pub async fn error(&self, error: VerificationError) -> bool {
        match &self.on_error {
            Some(on_error) => {
                on_error(error).await;
                true
            }
            None => false,
        }
    }

    /// Invoke `callback` for `verification`. Returns whether it was set.
    pub(crate) async fn fire(
        &self,
        callback: ContextCallback,
        verification: &Verification,
    ) -> bool {
        let slot = match callback {
            ContextCallback::Approved => &self.on_approved,
            ContextCallback::Verified => &self.on_verified,
            ContextCallback::Denied => &self.on_denied,
            ContextCallback::Blocked => &self.on_blocked,
            ContextCallback::Pending => &self.on_pending,
            ContextCallback::Undecided => &self.on_undecided,
            ContextCallback::Error => {
                return self
                    .error(VerificationError::system(verification.error.clone()))
                    .await;
            }
        };
        match slot {
            Some(on_outcome) => {
                on_outcome(verification.clone()).await;
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for VerificationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationContext")
            .field("on_approved", &self.on_approved.is_some())
            .field("on_verified", &self.on_verified.is_some())
            .field("on_denied", &self.on_denied.is_some())
            .field("on_blocked", &self.on_blocked.is_some())
            .field("on_pending", &self.on_pending.is_some())
            .field("on_undecided", &self.on_undecided.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}
