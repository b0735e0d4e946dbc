use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use anyhow::Result;
use async_trait::async_trait;
use dodgeball_core::ContextCallback;
use dodgeball_core::Dodgeball;
use dodgeball_core::DodgeballConfig;
use dodgeball_core::VerificationApi;
use dodgeball_core::VerificationContext;
use dodgeball_core::VerificationOptions;
use dodgeball_core::integration::Capabilities;
use dodgeball_core::integration::Execute;
use dodgeball_core::integration::Identify;
use dodgeball_core::integration::IntegrationHandle;
use dodgeball_core::integration::IntegrationLifecycle;
use dodgeball_core::integration::IntegrationProps;
use dodgeball_core::integration::Observation;
use dodgeball_core::integration::Observe;
use dodgeball_core::integration::Qualify;
use dodgeball_core::verification::CancelHandle;
use dodgeball_core::verification::StepResponder;
use dodgeball_protocol::Fingerprint;
use dodgeball_protocol::FingerprintSource;
use dodgeball_protocol::InitConfig;
use dodgeball_protocol::IntegrationName;
use dodgeball_protocol::SourceIdentity;
use dodgeball_protocol::StepResponse;
use dodgeball_protocol::Verification;
use dodgeball_protocol::VerificationError;
use dodgeball_protocol::VerificationOutcome;
use dodgeball_protocol::VerificationStatus;
use dodgeball_protocol::VerificationStep;

pub const TEST_PUBLIC_KEY: &str = "test-public-key";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or_default()
}

pub fn verification(
    id: &str,
    status: VerificationStatus,
    outcome: VerificationOutcome,
    next_steps: Vec<VerificationStep>,
) -> Verification {
    let mut verification = Verification::new(id, status, outcome);
    verification.next_steps = next_steps;
    verification
}

pub fn pending(id: &str, next_steps: Vec<VerificationStep>) -> Verification {
    verification(id, VerificationStatus::Pending, VerificationOutcome::Pending, next_steps)
}

pub fn approved(id: &str) -> Verification {
    verification(id, VerificationStatus::Complete, VerificationOutcome::Approved, Vec::new())
}

pub fn step(id: &str, name: IntegrationName) -> VerificationStep {
    VerificationStep {
        id: id.to_string(),
        verification_step_id: format!("vs-{id}"),
        name: name.to_string(),
        method: Some("challenge".to_string()),
        url: None,
        config: serde_json::json!({}),
        load_timeout: None,
    }
}

/// Fast polling for paused-clock tests.
pub fn fast_options(max_duration: Duration) -> VerificationOptions {
    VerificationOptions {
        max_duration,
        polling_interval: Duration::from_millis(100),
        num_at_initial_polling_interval: 3,
        max_polling_interval: Duration::from_millis(1_000),
    }
}

pub fn dodgeball(api: Arc<FakeApi>) -> Dodgeball {
    Dodgeball::with_api(TEST_PUBLIC_KEY, DodgeballConfig::default(), api)
        .expect("default config is valid")
}

enum QueryReply {
    Verification(Verification),
    Failure(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub verification_id: String,
    pub verification_step_id: String,
    pub source_token: String,
    pub response: StepResponse,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TokenExchange {
    pub previous_token: Option<String>,
    pub fingerprints: Vec<Fingerprint>,
}

struct FakeState {
    replies: VecDeque<QueryReply>,
    last: Option<Verification>,
    queries: usize,
    init: InitConfig,
    init_fails: bool,
    exchanges: Vec<TokenExchange>,
    token_delay: Duration,
    token_ttl: Duration,
    exchange_fails: bool,
    submissions: Vec<Submission>,
    metadata: Vec<serde_json::Map<String, serde_json::Value>>,
    expired: Vec<String>,
}

/// Scripted in-memory decision service.
///
/// Verification queries pop scripted replies in order; once the script is
/// exhausted the last successful snapshot is returned again.
pub struct FakeApi {
    state: Mutex<FakeState>,
}

impl Default for FakeApi {
    fn default() -> Self {
        Self {
            state: Mutex::new(FakeState {
                replies: VecDeque::new(),
                last: None,
                queries: 0,
                init: InitConfig::default(),
                init_fails: false,
                exchanges: Vec::new(),
                token_delay: Duration::ZERO,
                token_ttl: Duration::from_secs(60 * 60),
                exchange_fails: false,
                submissions: Vec::new(),
                metadata: Vec::new(),
                expired: Vec::new(),
            }),
        }
    }
}

impl FakeApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_verification(&self, verification: Verification) {
        lock(&self.state)
            .replies
            .push_back(QueryReply::Verification(verification));
    }

    pub fn push_query_error(&self, message: &str) {
        lock(&self.state)
            .replies
            .push_back(QueryReply::Failure(message.to_string()));
    }

    pub fn set_init_config(&self, init: InitConfig) {
        lock(&self.state).init = init;
    }

    pub fn fail_init(&self) {
        lock(&self.state).init_fails = true;
    }

    pub fn set_token_delay(&self, delay: Duration) {
        lock(&self.state).token_delay = delay;
    }

    pub fn set_token_ttl(&self, ttl: Duration) {
        lock(&self.state).token_ttl = ttl;
    }

    pub fn set_exchange_fails(&self, fails: bool) {
        lock(&self.state).exchange_fails = fails;
    }

    pub fn query_count(&self) -> usize {
        lock(&self.state).queries
    }

    pub fn exchange_count(&self) -> usize {
        lock(&self.state).exchanges.len()
    }

    pub fn exchanges(&self) -> Vec<TokenExchange> {
        lock(&self.state).exchanges.clone()
    }

    pub fn submissions(&self) -> Vec<Submission> {
        lock(&self.state).submissions.clone()
    }

    pub fn attached_metadata(&self) -> Vec<serde_json::Map<String, serde_json::Value>> {
        lock(&self.state).metadata.clone()
    }

    pub fn expired_tokens(&self) -> Vec<String> {
        lock(&self.state).expired.clone()
    }
}

#[async_trait]
impl VerificationApi for FakeApi {
    async fn init_config(&self) -> Result<InitConfig> {
        let state = lock(&self.state);
        if state.init_fails {
            anyhow::bail!("init unavailable");
        }
        Ok(state.init.clone())
    }

    async fn query_verification(&self, verification_id: &str) -> Result<Verification> {
        let mut state = lock(&self.state);
        state.queries += 1;
        match state.replies.pop_front() {
            Some(QueryReply::Verification(verification)) => {
                state.last = Some(verification.clone());
                Ok(verification)
            }
            Some(QueryReply::Failure(message)) => anyhow::bail!("{message}"),
            None => state
                .last
                .clone()
                .ok_or_else(|| anyhow::anyhow!("no scripted reply for {verification_id}")),
        }
    }

    async fn submit_step_response(
        &self,
        verification_id: &str,
        verification_step_id: &str,
        source_token: &str,
        response: &StepResponse,
    ) -> Result<()> {
        lock(&self.state).submissions.push(Submission {
            verification_id: verification_id.to_string(),
            verification_step_id: verification_step_id.to_string(),
            source_token: source_token.to_string(),
            response: response.clone(),
        });
        Ok(())
    }

    async fn exchange_source_token(
        &self,
        previous_token: Option<&str>,
        fingerprints: &[Fingerprint],
    ) -> Result<SourceIdentity> {
        let (delay, ttl) = {
            let mut state = lock(&self.state);
            state.exchanges.push(TokenExchange {
                previous_token: previous_token.map(str::to_string),
                fingerprints: fingerprints.to_vec(),
            });
            (state.token_delay, state.token_ttl)
        };
        tokio::time::sleep(delay).await;

        let state = lock(&self.state);
        if state.exchange_fails {
            anyhow::bail!("token service unavailable");
        }
        Ok(SourceIdentity {
            token: format!("token-{}", state.exchanges.len()),
            expiry: now_ms() + ttl.as_millis() as i64,
        })
    }

    async fn attach_source_metadata(
        &self,
        _source_token: &str,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Result<()> {
        lock(&self.state).metadata.push(metadata);
        Ok(())
    }

    async fn expire_source_token(&self, source_token: &str) -> Result<()> {
        lock(&self.state).expired.push(source_token.to_string());
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    Outcome(ContextCallback, Verification),
    Error(VerificationError),
    Note(String),
}

/// Shared, ordered log of callbacks and integration side effects.
#[derive(Clone, Default)]
pub struct CallbackLog {
    events: Arc<Mutex<Vec<Recorded>>>,
}

impl CallbackLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn note(&self, note: impl Into<String>) {
        lock(&self.events).push(Recorded::Note(note.into()));
    }

    pub fn events(&self) -> Vec<Recorded> {
        lock(&self.events).clone()
    }

    /// Callbacks in invocation order; errors appear as [`ContextCallback::Error`].
    pub fn callbacks(&self) -> Vec<ContextCallback> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Recorded::Outcome(callback, _) => Some(callback),
                Recorded::Error(_) => Some(ContextCallback::Error),
                Recorded::Note(_) => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<VerificationError> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Recorded::Error(error) => Some(error),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, callback: ContextCallback) -> usize {
        self.callbacks()
            .into_iter()
            .filter(|recorded| *recorded == callback)
            .count()
    }

    /// A context whose every callback appends to this log.
    pub fn context(&self) -> VerificationContext {
        VerificationContext::new()
            .on_approved(self.recorder(ContextCallback::Approved))
            .on_verified(self.recorder(ContextCallback::Verified))
            .on_denied(self.recorder(ContextCallback::Denied))
            .on_blocked(self.recorder(ContextCallback::Blocked))
            .on_pending(self.recorder(ContextCallback::Pending))
            .on_undecided(self.recorder(ContextCallback::Undecided))
            .on_error({
                let events = Arc::clone(&self.events);
                move |error| {
                    let events = Arc::clone(&events);
                    async move {
                        lock(&events).push(Recorded::Error(error));
                    }
                }
            })
    }

    fn recorder(
        &self,
        callback: ContextCallback,
    ) -> impl Fn(Verification) -> std::future::Ready<()> + Send + Sync + 'static {
        let events = Arc::clone(&self.events);
        move |verification| {
            lock(&events).push(Recorded::Outcome(callback, verification));
            std::future::ready(())
        }
    }
}

#[derive(Debug, Clone)]
pub enum ExecuteMode {
    /// Never finishes; the challenge stays open.
    Hang,
    /// Posts the response right away.
    Respond(StepResponse),
    /// Signals "continue polling" `times` times, `every` apart, then posts.
    ContinueThenRespond {
        times: usize,
        every: Duration,
        response: StepResponse,
    },
    /// The user dismisses the challenge.
    Cancel(Option<String>),
}

pub struct FakeExecutor {
    mode: ExecuteMode,
    log: CallbackLog,
    executions: AtomicUsize,
    cleanups: AtomicUsize,
    reconfigures: AtomicUsize,
}

impl FakeExecutor {
    pub fn new(mode: ExecuteMode, log: CallbackLog) -> Arc<Self> {
        Arc::new(Self {
            mode,
            log,
            executions: AtomicUsize::new(0),
            cleanups: AtomicUsize::new(0),
            reconfigures: AtomicUsize::new(0),
        })
    }

    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }

    pub fn cleanups(&self) -> usize {
        self.cleanups.load(Ordering::SeqCst)
    }

    pub fn reconfigures(&self) -> usize {
        self.reconfigures.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IntegrationLifecycle for FakeExecutor {
    async fn configure(&self) -> Result<()> {
        Ok(())
    }

    async fn reconfigure(&self, _props: &IntegrationProps) -> Result<()> {
        self.reconfigures.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl Execute for FakeExecutor {
    async fn execute(
        &self,
        step: VerificationStep,
        _context: VerificationContext,
        responder: StepResponder,
        cancel: CancelHandle,
    ) -> Result<()> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        self.log.note(format!("execute:{}", step.id));
        match &self.mode {
            ExecuteMode::Hang => std::future::pending().await,
            ExecuteMode::Respond(response) => responder.respond(response.clone()).await,
            ExecuteMode::ContinueThenRespond {
                times,
                every,
                response,
            } => {
                for _ in 0..*times {
                    tokio::time::sleep(*every).await;
                    responder.continue_polling();
                }
                responder.respond(response.clone()).await
            }
            ExecuteMode::Cancel(details) => {
                cancel.cancel(details.clone()).await;
                Ok(())
            }
        }
    }

    async fn cleanup(&self) -> Result<()> {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
        self.log.note("cleanup");
        Ok(())
    }
}

pub struct FakeIdentifier {
    source: FingerprintSource,
    fails: bool,
    hangs: bool,
    metadata: serde_json::Map<String, serde_json::Value>,
    calls: AtomicUsize,
}

impl FakeIdentifier {
    pub fn new(source: FingerprintSource) -> Arc<Self> {
        Arc::new(Self {
            source,
            fails: false,
            hangs: false,
            metadata: serde_json::Map::new(),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing(source: FingerprintSource) -> Arc<Self> {
        Arc::new(Self {
            source,
            fails: true,
            hangs: false,
            metadata: serde_json::Map::new(),
            calls: AtomicUsize::new(0),
        })
    }

    /// `identify` never resolves.
    pub fn hanging(source: FingerprintSource) -> Arc<Self> {
        Arc::new(Self {
            source,
            fails: false,
            hangs: true,
            metadata: serde_json::Map::new(),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn with_metadata(
        source: FingerprintSource,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Arc<Self> {
        Arc::new(Self {
            source,
            fails: false,
            hangs: false,
            metadata,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IntegrationLifecycle for FakeIdentifier {
    async fn configure(&self) -> Result<()> {
        Ok(())
    }

    async fn reconfigure(&self, _props: &IntegrationProps) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl Identify for FakeIdentifier {
    async fn identify(&self) -> Result<Fingerprint> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hangs {
            std::future::pending::<()>().await;
        }
        if self.fails {
            anyhow::bail!("fingerprint provider unreachable");
        }
        let mut fingerprint = Fingerprint::new(self.source);
        fingerprint.hash = Some(format!("{:?}-hash", self.source));
        Ok(fingerprint)
    }

    async fn metadata(&self) -> Result<serde_json::Map<String, serde_json::Value>> {
        Ok(self.metadata.clone())
    }
}

#[derive(Default)]
pub struct FakeObserver {
    observations: Mutex<Vec<Observation>>,
}

impl FakeObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn observations(&self) -> Vec<Observation> {
        lock(&self.observations).clone()
    }
}

#[async_trait]
impl IntegrationLifecycle for FakeObserver {
    async fn configure(&self) -> Result<()> {
        Ok(())
    }

    async fn reconfigure(&self, _props: &IntegrationProps) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl Observe for FakeObserver {
    async fn observe(&self, observation: &Observation) -> Result<()> {
        lock(&self.observations).push(observation.clone());
        Ok(())
    }
}

/// Qualifier that optionally reports an error through the context.
pub struct FakeQualifier {
    reports: Option<String>,
    calls: AtomicUsize,
}

impl FakeQualifier {
    pub fn new(reports: Option<String>) -> Arc<Self> {
        Arc::new(Self {
            reports,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IntegrationLifecycle for FakeQualifier {
    async fn configure(&self) -> Result<()> {
        Ok(())
    }

    async fn reconfigure(&self, _props: &IntegrationProps) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl Qualify for FakeQualifier {
    async fn qualify(&self, context: VerificationContext) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(details) = &self.reports {
            context
                .error(VerificationError::system(Some(details.clone())))
                .await;
        }
        Ok(())
    }
}

pub fn register_executor(
    dodgeball: &Dodgeball,
    name: IntegrationName,
    executor: Arc<FakeExecutor>,
) {
    dodgeball.register_integration(name, move |_props| {
        Ok(IntegrationHandle::new(
            name,
            executor.clone(),
            Capabilities::default().with_execute(executor.clone()),
        ))
    });
}

pub fn register_identifier(
    dodgeball: &Dodgeball,
    name: IntegrationName,
    identifier: Arc<FakeIdentifier>,
) {
    dodgeball.register_integration(name, move |_props| {
        Ok(IntegrationHandle::new(
            name,
            identifier.clone(),
            Capabilities::default().with_identify(identifier.clone()),
        ))
    });
}

pub fn register_observer(
    dodgeball: &Dodgeball,
    name: IntegrationName,
    observer: Arc<FakeObserver>,
) {
    dodgeball.register_integration(name, move |_props| {
        Ok(IntegrationHandle::new(
            name,
            observer.clone(),
            Capabilities::default().with_observe(observer.clone()),
        ))
    });
}

pub fn register_qualifier(
    dodgeball: &Dodgeball,
    name: IntegrationName,
    qualifier: Arc<FakeQualifier>,
) {
    dodgeball.register_integration(name, move |_props| {
        Ok(IntegrationHandle::new(
            name,
            qualifier.clone(),
            Capabilities::default().with_qualify(qualifier.clone()),
        ))
    });
}
