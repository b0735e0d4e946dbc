use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use dodgeball_core::ContextCallback;
use dodgeball_core::Dodgeball;
use dodgeball_core::DodgeballConfig;
use dodgeball_core::LoopExit;
use dodgeball_core::VerificationContext;
use dodgeball_core::VerificationOptions;
use dodgeball_protocol::Verification;
use dodgeball_protocol::VerificationState;
use tracing::info;

#[derive(Debug, Parser)]
pub struct PollArgs {
    /// Verification to follow.
    #[arg(value_name = "VERIFICATION_ID")]
    pub verification_id: String,

    /// Give up after this long without user activity.
    #[arg(long = "max-duration-ms", value_name = "MS")]
    pub max_duration_ms: Option<u64>,

    /// Initial delay between polls.
    #[arg(long = "interval-ms", value_name = "MS")]
    pub interval_ms: Option<u64>,
}

impl PollArgs {
    fn options(&self) -> VerificationOptions {
        let defaults = VerificationOptions::default();
        VerificationOptions {
            max_duration: self
                .max_duration_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_duration),
            polling_interval: self
                .interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.polling_interval),
            ..defaults
        }
    }
}

pub(crate) async fn run(
    public_key: &str,
    config: DodgeballConfig,
    args: PollArgs,
) -> Result<ExitCode> {
    let dodgeball = Dodgeball::new(public_key, config)?;
    let initial = dodgeball
        .fetch_verification(&args.verification_id)
        .await
        .with_context(|| format!("could not fetch verification {}", args.verification_id))?;

    let summary = dodgeball
        .run_verification_with_options(initial, printing_context(), args.options())
        .await;
    info!(iterations = summary.iterations, "poll finished");

    Ok(exit_code(summary.exit))
}

fn printing_context() -> VerificationContext {
    VerificationContext::new()
        .on_approved(printer(ContextCallback::Approved))
        .on_verified(printer(ContextCallback::Verified))
        .on_denied(printer(ContextCallback::Denied))
        .on_blocked(printer(ContextCallback::Blocked))
        .on_pending(printer(ContextCallback::Pending))
        .on_undecided(printer(ContextCallback::Undecided))
        .on_error(|error| async move {
            let details = error.details.unwrap_or_default();
            println!("error: {:?} {details}", error.error_type);
        })
}

fn printer(
    callback: ContextCallback,
) -> impl Fn(Verification) -> std::future::Ready<()> + Send + Sync + 'static {
    move |verification| {
        println!(
            "{}: {} ({}/{})",
            label(callback),
            verification.id,
            verification.status,
            verification.outcome
        );
        std::future::ready(())
    }
}

fn label(callback: ContextCallback) -> &'static str {
    match callback {
        ContextCallback::Approved => "approved",
        ContextCallback::Verified => "verified",
        ContextCallback::Denied => "denied",
        ContextCallback::Blocked => "blocked",
        ContextCallback::Pending => "pending",
        ContextCallback::Undecided => "undecided",
        ContextCallback::Error => "error",
    }
}

/// 0 approved, 1 denied or undecided, 2 errored, 3 timed out.
pub(crate) fn exit_code(exit: LoopExit) -> ExitCode {
    match exit {
        LoopExit::Resolved(VerificationState::Allowed) => ExitCode::SUCCESS,
        LoopExit::Resolved(VerificationState::Denied | VerificationState::Undecided) => {
            ExitCode::from(1)
        }
        LoopExit::Resolved(_) => ExitCode::from(2),
        LoopExit::TimedOut => ExitCode::from(3),
    }
}
