//! Broadcast-once readiness flag.
//!
//! A [`ReadinessFlag`] starts not-ready. Parties that own the work being
//! waited on [`subscribe`](Readiness::subscribe) for a [`Token`]; only a
//! subscribed token may flip the flag with
//! [`mark_ready`](Readiness::mark_ready). Any number of tasks may
//! [`wait_ready`](Readiness::wait_ready) concurrently and are all released
//! together when the flag flips. Once ready, the flag never goes back.

use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicI32;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::sync::watch;
use tokio::time;

pub mod errors {
    use thiserror::Error;

    #[derive(Debug, Error, PartialEq, Eq)]
    pub enum ReadinessError {
        #[error("timed out acquiring the readiness token lock")]
        TokenLockFailed,
        #[error("flag is already ready")]
        FlagAlreadyReady,
    }
}

use errors::ReadinessError;

/// Opaque authorization to mark a flag ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token(i32);

const LOCK_TIMEOUT: Duration = Duration::from_millis(1000);

#[async_trait::async_trait]
pub trait Readiness: Send + Sync + 'static {
    /// Current state without waiting.
    fn is_ready(&self) -> bool;

    /// Registers a new authorizer. Fails once the flag is ready.
    async fn subscribe(&self) -> Result<Token, ReadinessError>;

    /// Flips the flag if `token` is subscribed. Returns `Ok(false)` for an
    /// unknown token or when the flag was already ready.
    async fn mark_ready(&self, token: Token) -> Result<bool, ReadinessError>;

    /// Resolves once the flag is ready.
    async fn wait_ready(&self);
}

#[derive(Debug)]
pub struct ReadinessFlag {
    ready: AtomicBool,
    next_id: AtomicI32,
    tokens: Mutex<HashSet<Token>>,
    tx: watch::Sender<bool>,
}

impl ReadinessFlag {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            ready: AtomicBool::new(false),
            next_id: AtomicI32::new(1),
            tokens: Mutex::new(HashSet::new()),
            tx,
        }
    }

    async fn with_tokens<R>(
        &self,
        f: impl FnOnce(&mut HashSet<Token>) -> R,
    ) -> Result<R, ReadinessError> {
        let mut guard = time::timeout(LOCK_TIMEOUT, self.tokens.lock())
            .await
            .map_err(|_| ReadinessError::TokenLockFailed)?;
        Ok(f(&mut guard))
    }
}

impl Default for ReadinessFlag {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Readiness for ReadinessFlag {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    async fn subscribe(&self) -> Result<Token, ReadinessError> {
        if self.is_ready() {
            return Err(ReadinessError::FlagAlreadyReady);
        }
        let token = Token(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.with_tokens(|tokens| {
            tokens.insert(token);
        })
        .await?;
        // A concurrent mark_ready may have drained the set between the check
        // above and the insert.
        if self.is_ready() {
            return Err(ReadinessError::FlagAlreadyReady);
        }
        Ok(token)
    }

    async fn mark_ready(&self, token: Token) -> Result<bool, ReadinessError> {
        if self.is_ready() {
            return Ok(false);
        }
        let authorized = self
            .with_tokens(|tokens| {
                if tokens.remove(&token) {
                    tokens.clear();
                    true
                } else {
                    false
                }
            })
            .await?;
        if !authorized {
            return Ok(false);
        }
        self.ready.store(true, Ordering::Release);
        self.tx.send_replace(true);
        Ok(true)
    }

    async fn wait_ready(&self) {
        if self.is_ready() {
            return;
        }
        let mut rx = self.tx.subscribe();
        // wait_for checks the current value first, so a flip between the
        // fast path and subscribe is not missed.
        let _ = rx.wait_for(|ready| *ready).await;
    }
}
