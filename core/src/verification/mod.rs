mod backoff;
mod context;
mod dispatcher;
mod poll_loop;

pub use backoff::PollingBackoff;
pub use context::ContextCallback;
pub use context::ErrorCallback;
pub use context::VerificationCallback;
pub use context::VerificationContext;
pub use dispatcher::ActivityKind;
pub use dispatcher::CancelHandle;
pub use dispatcher::StepActivity;
pub use dispatcher::StepResponder;
pub use poll_loop::LoopExit;
pub use poll_loop::LoopSummary;
pub use poll_loop::PollLoop;
