//! IAM Key Rotator Library
//!
//! Finds aged access keys, rotates them and purges retired keys once their
//! grace period has passed.

pub mod config;
pub mod discovery;
pub mod identity;
pub mod notify;
pub mod report;
pub mod retirement;
pub mod rotation;
pub mod workflow;

pub use config::Config;
pub use discovery::{discover_stale_credentials, StaleCredential};
pub use identity::IdentityService;
pub use report::{OutputFormat, RunReport, RunSummary};
pub use retirement::{sweep_retired_credentials, RetirementOutcome};
pub use rotation::{rotate_credential, RotationError, RotationOptions, RotationOutcome};
pub use workflow::{CredentialRotationWorkflow, RunPlan};
