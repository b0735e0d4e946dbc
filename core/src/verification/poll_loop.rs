use std::collections::HashSet;
use std::sync::Arc;

use dodgeball_protocol::IntegrationPurpose;
use dodgeball_protocol::Verification;
use dodgeball_protocol::VerificationState;
use dodgeball_protocol::VerificationStatus;
use tokio::sync::mpsc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::ContextCallback;
use super::PollingBackoff;
use super::StepActivity;
use super::VerificationContext;
use super::dispatcher::DispatchScope;
use super::dispatcher::StepDispatcher;
use crate::api::VerificationApi;
use crate::config::VerificationOptions;
use crate::integration::IntegrationRegistry;
use crate::integration::SessionContext;
use crate::source_identity::SourceIdentityManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// The verification reached a terminal state.
    Resolved(VerificationState),
    /// `max_duration` elapsed without user activity.
    TimedOut,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoopSummary {
    pub exit: LoopExit,
    /// Last known snapshot.
    pub verification: Verification,
    pub iterations: u64,
    pub last_callback: Option<ContextCallback>,
}

/// Drives one verification to a terminal callback.
///
/// Each iteration after the first sleeps for the backoff delay and re-reads
/// the verification. Unseen steps of a running verification are dispatched
/// in order; any activity they signal resets both the backoff schedule and
/// the `max_duration` clock. A failed query keeps the previous snapshot.
pub struct PollLoop {
    api: Arc<dyn VerificationApi>,
    registry: Arc<IntegrationRegistry>,
    dispatcher: StepDispatcher,
    options: VerificationOptions,
}

impl PollLoop {
    pub fn new(
        api: Arc<dyn VerificationApi>,
        registry: Arc<IntegrationRegistry>,
        identity: SourceIdentityManager,
        session: Option<SessionContext>,
        options: VerificationOptions,
    ) -> Self {
        let dispatcher =
            StepDispatcher::new(Arc::clone(&api), Arc::clone(&registry), identity, session);
        Self {
            api,
            registry,
            dispatcher,
            options,
        }
    }

    pub async fn run(
        self,
        mut verification: Verification,
        context: VerificationContext,
    ) -> LoopSummary {
        let (activity_tx, mut activity_rx) = mpsc::unbounded_channel();
        let mut tasks = JoinSet::new();
        let mut seen_steps = HashSet::new();
        let mut backoff = PollingBackoff::new(&self.options);
        let mut started = Instant::now();
        let mut iteration: u64 = 0;
        let mut last_callback = None;

        info!(verification_id = %verification.id, "verification loop started");

        let exit = loop {
            if iteration > 0 {
                reap(&mut tasks);
                if drain_activity(&mut activity_rx) {
                    backoff.reset();
                    started = Instant::now();
                }
                if started.elapsed() >= self.options.max_duration {
                    warn!(
                        verification_id = %verification.id,
                        iterations = iteration,
                        "verification loop timed out"
                    );
                    break LoopExit::TimedOut;
                }

                let delay = backoff.next_delay();
                trace!(
                    verification_id = %verification.id,
                    delay_ms = delay.as_millis() as u64,
                    "waiting before next poll"
                );
                tokio::time::sleep(delay).await;

                match self.api.query_verification(&verification.id).await {
                    Ok(latest) => verification = latest,
                    Err(err) => {
                        error!(
                            verification_id = %verification.id,
                            error = %format!("{err:#}"),
                            "error querying verification status; keeping last known state"
                        );
                    }
                }
            }
            iteration += 1;

            if verification.is_running() {
                for step in verification.next_steps.clone() {
                    if !seen_steps.insert(step.id.clone()) {
                        continue;
                    }
                    let scope = DispatchScope {
                        tasks: &mut tasks,
                        activity: &activity_tx,
                    };
                    self.dispatcher
                        .dispatch(&verification, step, &context, scope)
                        .await;
                    if drain_activity(&mut activity_rx) {
                        backoff.reset();
                        started = Instant::now();
                    }
                }
            }

            let state = verification.state();
            if let Some(callback) = callback_for(state, verification.status, iteration) {
                if callback == ContextCallback::Verified {
                    self.cleanup_executors().await;
                }
                if context.fire(callback, &verification).await {
                    last_callback = Some(callback);
                }
            } else {
                error!(
                    verification_id = %verification.id,
                    status = %verification.status,
                    outcome = %verification.outcome,
                    "unknown verification state"
                );
            }

            if is_terminal(state) {
                info!(
                    verification_id = %verification.id,
                    state = ?state,
                    iterations = iteration,
                    "verification resolved"
                );
                break LoopExit::Resolved(state);
            }
        };

        tasks.shutdown().await;
        LoopSummary {
            exit,
            verification,
            iterations: iteration,
            last_callback,
        }
    }

    /// Dismiss open challenges before reporting approval.
    async fn cleanup_executors(&self) {
        for handle in self
            .registry
            .with_purpose(IntegrationPurpose::Execute)
            .await
        {
            let Some(execute) = handle.execute() else {
                continue;
            };
            if let Err(err) = execute.cleanup().await {
                warn!(
                    integration = %handle.name(),
                    error = %format!("{err:#}"),
                    "cleanup failed"
                );
            }
        }
    }
}

fn callback_for(
    state: VerificationState,
    status: VerificationStatus,
    iteration: u64,
) -> Option<ContextCallback> {
    match state {
        VerificationState::Allowed if iteration == 1 => Some(ContextCallback::Approved),
        VerificationState::Allowed => Some(ContextCallback::Verified),
        VerificationState::Denied => Some(ContextCallback::Denied),
        VerificationState::Running if status == VerificationStatus::Blocked => {
            Some(ContextCallback::Blocked)
        }
        VerificationState::Running => Some(ContextCallback::Pending),
        VerificationState::Undecided => Some(ContextCallback::Undecided),
        VerificationState::Errored => Some(ContextCallback::Error),
        VerificationState::Unknown => None,
    }
}

fn is_terminal(state: VerificationState) -> bool {
    matches!(
        state,
        VerificationState::Allowed
            | VerificationState::Denied
            | VerificationState::Undecided
            | VerificationState::Errored
    )
}

fn drain_activity(activity: &mut UnboundedReceiver<StepActivity>) -> bool {
    let mut active = false;
    while let Ok(signal) = activity.try_recv() {
        debug!(step_id = %signal.step_id, kind = ?signal.kind, "step activity");
        active = true;
    }
    active
}

fn reap(tasks: &mut JoinSet<()>) {
    while let Some(result) = tasks.try_join_next() {
        if let Err(err) = result
            && err.is_panic()
        {
            error!(error = %err, "integration task panicked");
        }
    }
}
