//! Identity service clients
//!
//! This module provides the abstraction over the remote identity system whose
//! principals and access keys get rotated, plus its implementations.

mod iam;
mod memory;

pub use iam::{AwsSettings, IamClient};
pub use memory::{InMemoryIdentityService, ServiceCall};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Hard cap the identity service places on access keys per principal
pub const MAX_CREDENTIALS_PER_PRINCIPAL: usize = 2;

/// An account (user or service identity) that can hold access keys
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Lifecycle status of an access key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialStatus {
    Active,
    Inactive,
}

impl fmt::Display for CredentialStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialStatus::Active => write!(f, "active"),
            CredentialStatus::Inactive => write!(f, "inactive"),
        }
    }
}

/// Metadata of an access key; the secret is never part of it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub id: String,
    pub principal: String,
    pub created_at: DateTime<Utc>,
    pub status: CredentialStatus,
}

impl Credential {
    pub fn is_active(&self) -> bool {
        self.status == CredentialStatus::Active
    }
}

/// A freshly created access key together with its secret.
///
/// The secret is only returned once by the identity service, so this is the
/// single place it exists in memory.
#[derive(Clone)]
pub struct IssuedCredential {
    pub credential: Credential,
    pub secret: String,
}

impl fmt::Debug for IssuedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedCredential")
            .field("credential", &self.credential)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// One page of a principal listing
#[derive(Debug, Clone, Default)]
pub struct PrincipalPage {
    pub principals: Vec<Principal>,
    /// Marker to pass to the next `list_principals` call, `None` on the last page
    pub next_marker: Option<String>,
}

/// Trait for identity services whose access keys can be rotated (AWS IAM, test doubles)
#[async_trait::async_trait]
pub trait IdentityService: Send + Sync {
    /// Verify that the caller can reach the service and is authorized to use it
    async fn check_access(&self) -> Result<()>;

    /// List one page of principals, starting after `marker`
    async fn list_principals(&self, marker: Option<String>, page_size: i32)
        -> Result<PrincipalPage>;

    /// List every access key held by a principal
    async fn list_credentials(&self, principal: &str) -> Result<Vec<Credential>>;

    /// Create a new access key for a principal
    async fn create_credential(&self, principal: &str) -> Result<IssuedCredential>;

    /// Change the status of an access key
    async fn set_credential_status(
        &self,
        principal: &str,
        credential_id: &str,
        status: CredentialStatus,
    ) -> Result<()>;

    /// Permanently delete an access key
    async fn delete_credential(&self, principal: &str, credential_id: &str) -> Result<()>;

    /// Get the service name for display purposes
    fn service_name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display_matches_wire_name() {
        assert_eq!(CredentialStatus::Active.to_string(), "active");
        let json = serde_json::to_string(&CredentialStatus::Inactive).unwrap();
        assert_eq!(json, format!("\"{}\"", CredentialStatus::Inactive));
    }

    #[test]
    fn test_issued_credential_debug_redacts_secret() {
        let issued = IssuedCredential {
            credential: Credential {
                id: "AKIANEW".to_string(),
                principal: "alice".to_string(),
                created_at: Utc::now(),
                status: CredentialStatus::Active,
            },
            secret: "wJalrXUtnFEMI".to_string(),
        };

        let debug = format!("{:?}", issued);
        assert!(debug.contains("AKIANEW"));
        assert!(!debug.contains("wJalrXUtnFEMI"));
    }
}
