use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{
    Credential, CredentialStatus, IdentityService, IssuedCredential, Principal, PrincipalPage,
    MAX_CREDENTIALS_PER_PRINCIPAL,
};

/// A remote call observed by [`InMemoryIdentityService`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceCall {
    CheckAccess,
    ListPrincipals { marker: Option<String> },
    ListCredentials { principal: String },
    CreateCredential { principal: String },
    SetCredentialStatus {
        principal: String,
        credential_id: String,
        status: CredentialStatus,
    },
    DeleteCredential {
        principal: String,
        credential_id: String,
    },
}

impl ServiceCall {
    /// Whether the call changes state in the identity service
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            ServiceCall::CreateCredential { .. }
                | ServiceCall::SetCredentialStatus { .. }
                | ServiceCall::DeleteCredential { .. }
        )
    }
}

#[derive(Default)]
struct State {
    principals: Vec<Principal>,
    credentials: BTreeMap<String, Vec<Credential>>,
    calls: Vec<ServiceCall>,
    next_key: u64,
    deny_access: bool,
    fail_principal_listing: bool,
    failing_lookups: HashSet<String>,
    failing_creations: HashSet<String>,
    failing_status_updates: HashSet<String>,
    failing_deletions: HashSet<String>,
}

/// Identity service kept entirely in process memory.
///
/// Enforces the same per-principal key cap as IAM, records every call and
/// can be told to fail individual operations.
#[derive(Default)]
pub struct InMemoryIdentityService {
    state: Mutex<State>,
}

impl InMemoryIdentityService {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_principal(&self, name: &str, created_at: DateTime<Utc>) {
        let mut state = self.state();
        state.principals.push(Principal {
            name: name.to_string(),
            created_at,
        });
        state.credentials.entry(name.to_string()).or_default();
    }

    /// Seed an existing access key. Does not enforce the key cap so tests can
    /// model accounts that are already over it.
    pub fn add_credential(
        &self,
        principal: &str,
        id: &str,
        created_at: DateTime<Utc>,
        status: CredentialStatus,
    ) {
        self.state()
            .credentials
            .entry(principal.to_string())
            .or_default()
            .push(Credential {
                id: id.to_string(),
                principal: principal.to_string(),
                created_at,
                status,
            });
    }

    pub fn deny_access(&self) {
        self.state().deny_access = true;
    }

    pub fn fail_principal_listing(&self) {
        self.state().fail_principal_listing = true;
    }

    pub fn fail_credential_lookup(&self, principal: &str) {
        self.state().failing_lookups.insert(principal.to_string());
    }

    pub fn fail_creation(&self, principal: &str) {
        self.state().failing_creations.insert(principal.to_string());
    }

    pub fn fail_status_update(&self, principal: &str) {
        self.state()
            .failing_status_updates
            .insert(principal.to_string());
    }

    pub fn fail_deletion(&self, credential_id: &str) {
        self.state()
            .failing_deletions
            .insert(credential_id.to_string());
    }

    /// Every call made so far, in order
    pub fn calls(&self) -> Vec<ServiceCall> {
        self.state().calls.clone()
    }

    pub fn mutation_calls(&self) -> Vec<ServiceCall> {
        self.state()
            .calls
            .iter()
            .filter(|call| call.is_mutation())
            .cloned()
            .collect()
    }

    /// Current access keys of a principal
    pub fn credentials(&self, principal: &str) -> Vec<Credential> {
        self.state()
            .credentials
            .get(principal)
            .cloned()
            .unwrap_or_default()
    }

    pub fn credential(&self, principal: &str, credential_id: &str) -> Option<Credential> {
        self.credentials(principal)
            .into_iter()
            .find(|c| c.id == credential_id)
    }
}

#[async_trait::async_trait]
impl IdentityService for InMemoryIdentityService {
    async fn check_access(&self) -> Result<()> {
        let mut state = self.state();
        state.calls.push(ServiceCall::CheckAccess);
        if state.deny_access {
            anyhow::bail!("AccessDenied: caller is not authorized to perform GetAccountSummary");
        }
        Ok(())
    }

    async fn list_principals(
        &self,
        marker: Option<String>,
        page_size: i32,
    ) -> Result<PrincipalPage> {
        let mut state = self.state();
        state.calls.push(ServiceCall::ListPrincipals {
            marker: marker.clone(),
        });
        if state.fail_principal_listing {
            anyhow::bail!("AccessDenied: caller is not authorized to perform ListUsers");
        }

        let start = match marker {
            Some(ref m) => m
                .parse::<usize>()
                .map_err(|_| anyhow::anyhow!("Invalid marker: {}", m))?,
            None => 0,
        };
        let page_size = usize::try_from(page_size.max(1)).unwrap_or(1);
        let end = (start + page_size).min(state.principals.len());
        let principals = state.principals.get(start..end).unwrap_or_default().to_vec();
        let next_marker = (end < state.principals.len()).then(|| end.to_string());

        Ok(PrincipalPage {
            principals,
            next_marker,
        })
    }

    async fn list_credentials(&self, principal: &str) -> Result<Vec<Credential>> {
        let mut state = self.state();
        state.calls.push(ServiceCall::ListCredentials {
            principal: principal.to_string(),
        });
        if state.failing_lookups.contains(principal) {
            anyhow::bail!("NoSuchEntity: the user with name {} cannot be found", principal);
        }

        state
            .credentials
            .get(principal)
            .cloned()
            .ok_or_else(|| {
                anyhow::anyhow!("NoSuchEntity: the user with name {} cannot be found", principal)
            })
    }

    async fn create_credential(&self, principal: &str) -> Result<IssuedCredential> {
        let mut state = self.state();
        state.calls.push(ServiceCall::CreateCredential {
            principal: principal.to_string(),
        });
        if state.failing_creations.contains(principal) {
            anyhow::bail!("ServiceFailure: CreateAccessKey failed for {}", principal);
        }

        let held = state
            .credentials
            .get(principal)
            .map(Vec::len)
            .ok_or_else(|| {
                anyhow::anyhow!("NoSuchEntity: the user with name {} cannot be found", principal)
            })?;
        if held >= MAX_CREDENTIALS_PER_PRINCIPAL {
            anyhow::bail!(
                "LimitExceeded: cannot exceed quota for AccessKeysPerUser: {}",
                MAX_CREDENTIALS_PER_PRINCIPAL
            );
        }

        state.next_key += 1;
        let n = state.next_key;
        let credential = Credential {
            id: format!("AKIAMEM{:013}", n),
            principal: principal.to_string(),
            created_at: Utc::now(),
            status: CredentialStatus::Active,
        };
        state
            .credentials
            .entry(principal.to_string())
            .or_default()
            .push(credential.clone());

        Ok(IssuedCredential {
            credential,
            secret: format!("memory-secret-{:08}", n),
        })
    }

    async fn set_credential_status(
        &self,
        principal: &str,
        credential_id: &str,
        status: CredentialStatus,
    ) -> Result<()> {
        let mut state = self.state();
        state.calls.push(ServiceCall::SetCredentialStatus {
            principal: principal.to_string(),
            credential_id: credential_id.to_string(),
            status,
        });
        if state.failing_status_updates.contains(principal) {
            anyhow::bail!("ServiceFailure: UpdateAccessKey failed for {}", credential_id);
        }

        let credential = state
            .credentials
            .get_mut(principal)
            .and_then(|keys| keys.iter_mut().find(|c| c.id == credential_id))
            .ok_or_else(|| {
                anyhow::anyhow!("NoSuchEntity: the access key {} cannot be found", credential_id)
            })?;
        credential.status = status;
        Ok(())
    }

    async fn delete_credential(&self, principal: &str, credential_id: &str) -> Result<()> {
        let mut state = self.state();
        state.calls.push(ServiceCall::DeleteCredential {
            principal: principal.to_string(),
            credential_id: credential_id.to_string(),
        });
        if state.failing_deletions.contains(credential_id) {
            anyhow::bail!("ServiceFailure: DeleteAccessKey failed for {}", credential_id);
        }

        let keys = state.credentials.get_mut(principal).ok_or_else(|| {
            anyhow::anyhow!("NoSuchEntity: the user with name {} cannot be found", principal)
        })?;
        let before = keys.len();
        keys.retain(|c| c.id != credential_id);
        if keys.len() == before {
            anyhow::bail!("NoSuchEntity: the access key {} cannot be found", credential_id);
        }
        Ok(())
    }

    fn service_name(&self) -> &'static str {
        "in-memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pagination_walks_every_principal() {
        let service = InMemoryIdentityService::new();
        for name in ["a", "b", "c", "d", "e"] {
            service.add_principal(name, Utc::now());
        }

        let first = service.list_principals(None, 2).await.unwrap();
        assert_eq!(first.principals.len(), 2);
        assert_eq!(first.next_marker.as_deref(), Some("2"));

        let second = service.list_principals(first.next_marker, 2).await.unwrap();
        let third = service.list_principals(second.next_marker, 2).await.unwrap();
        assert_eq!(third.principals.len(), 1);
        assert_eq!(third.principals[0].name, "e");
        assert!(third.next_marker.is_none());
    }

    #[tokio::test]
    async fn test_create_enforces_key_cap() {
        let service = InMemoryIdentityService::new();
        service.add_principal("alice", Utc::now());
        service.create_credential("alice").await.unwrap();
        service.create_credential("alice").await.unwrap();

        let err = service.create_credential("alice").await.unwrap_err();
        assert!(err.to_string().contains("LimitExceeded"));
        assert_eq!(service.credentials("alice").len(), 2);
    }

    #[tokio::test]
    async fn test_records_calls_in_order() {
        let service = InMemoryIdentityService::new();
        service.add_principal("alice", Utc::now());
        let issued = service.create_credential("alice").await.unwrap();
        service
            .set_credential_status("alice", &issued.credential.id, CredentialStatus::Inactive)
            .await
            .unwrap();
        service
            .delete_credential("alice", &issued.credential.id)
            .await
            .unwrap();

        let calls = service.mutation_calls();
        assert_eq!(calls.len(), 3);
        assert!(matches!(calls[0], ServiceCall::CreateCredential { .. }));
        assert!(matches!(calls[1], ServiceCall::SetCredentialStatus { .. }));
        assert!(matches!(calls[2], ServiceCall::DeleteCredential { .. }));
        assert!(service.credentials("alice").is_empty());
    }

    #[tokio::test]
    async fn test_delete_unknown_key_fails() {
        let service = InMemoryIdentityService::new();
        service.add_principal("alice", Utc::now());
        assert!(service.delete_credential("alice", "AKIAMISSING").await.is_err());
    }
}
