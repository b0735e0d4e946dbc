//! Wire types shared between the Dodgeball backend client and the
//! verification engine.

pub mod api;
pub mod error;
pub mod integration;
pub mod source;
pub mod verification;

pub use error::VerificationError;
pub use error::VerificationErrorType;
pub use integration::InitConfig;
pub use integration::IntegrationName;
pub use integration::IntegrationPurpose;
pub use integration::LibConfig;
pub use source::Fingerprint;
pub use source::FingerprintSource;
pub use source::SourceIdentity;
pub use verification::StepResponse;
pub use verification::Verification;
pub use verification::VerificationOutcome;
pub use verification::VerificationState;
pub use verification::VerificationStatus;
pub use verification::VerificationStep;
pub use verification::VerificationStepData;
