//! Client-side verification engine for the Dodgeball decision service.
//!
//! A [`Dodgeball`] handle loads the integrations the service asks for,
//! keeps a source token for the current device fresh, and drives
//! verifications to a terminal callback through the [`PollLoop`].

pub mod api;
mod client;
pub mod config;
pub mod error;
pub mod integration;
pub mod source_identity;
pub mod verification;

pub use api::VerificationApi;
pub use client::Dodgeball;
pub use config::ApiVersion;
pub use config::DodgeballConfig;
pub use config::HandleVerificationOptions;
pub use config::LogLevel;
pub use config::VerificationOptions;
pub use error::ConfigError;
pub use error::IntegrationError;
pub use error::SourceTokenError;
pub use source_identity::SourceIdentityManager;
pub use verification::ContextCallback;
pub use verification::LoopExit;
pub use verification::LoopSummary;
pub use verification::PollLoop;
pub use verification::VerificationContext;

pub use dodgeball_protocol as protocol;
