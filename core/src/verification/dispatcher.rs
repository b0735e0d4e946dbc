use std::sync::Arc;

use dodgeball_protocol::StepResponse;
use dodgeball_protocol::Verification;
use dodgeball_protocol::VerificationError;
use dodgeball_protocol::VerificationStep;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinSet;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::VerificationContext;
use crate::api::VerificationApi;
use crate::integration::IntegrationHandle;
use crate::integration::IntegrationRegistry;
use crate::integration::SessionContext;
use crate::source_identity::SourceIdentityManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityKind {
    Observed,
    Identified,
    Qualified,
    Responded,
    ContinuePolling,
}

/// Signal that a step produced user-observable activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepActivity {
    pub step_id: String,
    pub kind: ActivityKind,
}

/// Where a dispatched step reports to: long-running capability calls are
/// spawned onto `tasks`, activity goes to the loop through `activity`.
pub(crate) struct DispatchScope<'a> {
    pub(crate) tasks: &'a mut JoinSet<()>,
    pub(crate) activity: &'a UnboundedSender<StepActivity>,
}

pub(crate) struct StepDispatcher {
    api: Arc<dyn VerificationApi>,
    registry: Arc<IntegrationRegistry>,
    identity: SourceIdentityManager,
    session: Option<SessionContext>,
}

impl StepDispatcher {
    pub(crate) fn new(
        api: Arc<dyn VerificationApi>,
        registry: Arc<IntegrationRegistry>,
        identity: SourceIdentityManager,
        session: Option<SessionContext>,
    ) -> Self {
        Self {
            api,
            registry,
            identity,
            session,
        }
    }

    /// Hand one step to the integration it names. Failures are logged with
    /// the step attached and never propagate.
    pub(crate) async fn dispatch(
        &self,
        verification: &Verification,
        step: VerificationStep,
        context: &VerificationContext,
        scope: DispatchScope<'_>,
    ) {
        if step.name.is_empty() {
            debug!(step_id = %step.id, "step names no integration; skipping");
            return;
        }
        trace!(step_id = %step.id, integration = %step.name, "dispatching verification step");

        let handle = match self
            .registry
            .load_or_reconfigure(&step.lib_config(), &step.id)
            .await
        {
            Ok(handle) => handle,
            Err(err) => {
                error!(
                    step_id = %step.id,
                    integration = %step.name,
                    error = %err,
                    "could not process step"
                );
                return;
            }
        };
        info!(step_id = %step.id, integration = %handle.name(), "loaded integration for step");

        self.observe(&handle, &step, scope.tasks, scope.activity);
        Self::identify(&handle, &step, scope.tasks, scope.activity);
        Self::qualify(&handle, &step, context, scope.tasks, scope.activity);
        self.execute(&handle, verification, step, context, scope);
    }

    fn observe(
        &self,
        handle: &IntegrationHandle,
        step: &VerificationStep,
        tasks: &mut JoinSet<()>,
        activity: &UnboundedSender<StepActivity>,
    ) {
        let Some(observe) = handle.observe() else {
            return;
        };
        let Some(session) = self.session.clone() else {
            debug!(step_id = %step.id, "no tracked session; skipping observe");
            return;
        };
        signal(activity, &step.id, ActivityKind::Observed);
        let identity = self.identity.clone();
        let step_id = step.id.clone();
        let name = handle.name();
        tasks.spawn(async move {
            let token = match identity.get_token().await {
                Ok(token) => token,
                Err(err) => {
                    error!(step_id = %step_id, error = %err, "no source token for observe");
                    return;
                }
            };
            if let Err(err) = observe.observe(&session.observation(token)).await {
                error!(
                    step_id = %step_id,
                    integration = %name,
                    error = %format!("{err:#}"),
                    "observe failed"
                );
            }
        });
    }

    fn identify(
        handle: &IntegrationHandle,
        step: &VerificationStep,
        tasks: &mut JoinSet<()>,
        activity: &UnboundedSender<StepActivity>,
    ) {
        let Some(identify) = handle.identify() else {
            return;
        };
        signal(activity, &step.id, ActivityKind::Identified);
        let step_id = step.id.clone();
        let name = handle.name();
        tasks.spawn(async move {
            match identify.identify().await {
                Ok(fingerprint) => {
                    debug!(step_id = %step_id, source = ?fingerprint.source, "re-identified");
                }
                Err(err) => {
                    error!(
                        step_id = %step_id,
                        integration = %name,
                        error = %format!("{err:#}"),
                        "identify failed"
                    );
                }
            }
        });
    }

    fn qualify(
        handle: &IntegrationHandle,
        step: &VerificationStep,
        context: &VerificationContext,
        tasks: &mut JoinSet<()>,
        activity: &UnboundedSender<StepActivity>,
    ) {
        let Some(qualify) = handle.qualify() else {
            return;
        };
        signal(activity, &step.id, ActivityKind::Qualified);
        let context = context.clone();
        let step_id = step.id.clone();
        let name = handle.name();
        tasks.spawn(async move {
            if let Err(err) = qualify.qualify(context).await {
                error!(
                    step_id = %step_id,
                    integration = %name,
                    error = %format!("{err:#}"),
                    "qualify failed"
                );
            }
        });
    }

    fn execute(
        &self,
        handle: &IntegrationHandle,
        verification: &Verification,
        step: VerificationStep,
        context: &VerificationContext,
        scope: DispatchScope<'_>,
    ) {
        let Some(execute) = handle.execute() else {
            return;
        };
        let responder = StepResponder {
            api: Arc::clone(&self.api),
            identity: self.identity.clone(),
            verification_id: verification.id.clone(),
            verification_step_id: step.verification_step_id.clone(),
            step_id: step.id.clone(),
            activity: scope.activity.clone(),
        };
        let cancel = CancelHandle {
            context: context.clone(),
            step_id: step.id.clone(),
        };
        let context = context.clone();
        let name = handle.name();
        scope.tasks.spawn(async move {
            let step_id = step.id.clone();
            if let Err(err) = execute.execute(step, context, responder, cancel).await {
                error!(
                    step_id = %step_id,
                    integration = %name,
                    error = %format!("{err:#}"),
                    "execute failed"
                );
            }
        });
    }
}

fn signal(activity: &UnboundedSender<StepActivity>, step_id: &str, kind: ActivityKind) {
    // The loop may already have exited; nothing left to reset then.
    let _ = activity.send(StepActivity {
        step_id: step_id.to_string(),
        kind,
    });
}

/// Posts an integration's response for one step.
#[derive(Clone)]
pub struct StepResponder {
    api: Arc<dyn VerificationApi>,
    identity: SourceIdentityManager,
    verification_id: String,
    verification_step_id: String,
    step_id: String,
    activity: UnboundedSender<StepActivity>,
}

impl StepResponder {
    pub fn verification_step_id(&self) -> &str {
        &self.verification_step_id
    }

    pub async fn respond(&self, response: StepResponse) -> anyhow::Result<()> {
        self.respond_with(response, true).await
    }

    /// With `send_to_server == false` only the activity signal is emitted.
    pub async fn respond_with(
        &self,
        response: StepResponse,
        send_to_server: bool,
    ) -> anyhow::Result<()> {
        signal(&self.activity, &self.step_id, ActivityKind::Responded);
        if !send_to_server {
            return Ok(());
        }
        let source_token = self.identity.get_token().await?;
        let result = self
            .api
            .submit_step_response(
                &self.verification_id,
                &self.verification_step_id,
                &source_token,
                &response,
            )
            .await;
        if let Err(err) = &result {
            warn!(
                step_id = %self.step_id,
                error = %format!("{err:#}"),
                "step response was not delivered"
            );
        }
        result
    }

    /// Keep the verification alive while the user is still interacting,
    /// e.g. after requesting a new code.
    pub fn continue_polling(&self) {
        signal(&self.activity, &self.step_id, ActivityKind::ContinuePolling);
    }
}

/// Lets an integration report that the user dismissed its challenge.
#[derive(Clone)]
pub struct CancelHandle {
    context: VerificationContext,
    step_id: String,
}

impl CancelHandle {
    pub async fn cancel(&self, details: Option<String>) {
        info!(step_id = %self.step_id, "step cancelled by user");
        self.context.error(VerificationError::cancelled(details)).await;
    }
}
