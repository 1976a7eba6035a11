//! Permanent deletion of access keys that stayed inactive past a grace period

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info};

use crate::identity::{Credential, CredentialStatus, IdentityService};

/// Default number of days a deactivated key is kept before deletion
pub const DEFAULT_GRACE_DAYS: u32 = 30;

#[derive(Debug, Error)]
pub enum RetirementError {
    #[error("Grace period of {grace_days} days is out of range")]
    GracePeriod { grace_days: u32 },

    #[error("Failed to list access keys of principal {principal}: {cause:#}")]
    Lookup {
        principal: String,
        #[source]
        cause: anyhow::Error,
    },

    #[error("Failed to delete access key {credential_id} of principal {principal}: {cause:#}")]
    Delete {
        principal: String,
        credential_id: String,
        #[source]
        cause: anyhow::Error,
    },
}

/// Result of sweeping one principal
#[derive(Debug, Serialize)]
pub struct RetirementOutcome {
    pub principal: String,
    /// Keys deleted (or, in a dry run, that would be deleted)
    pub deleted_credentials: Vec<String>,
    pub success: bool,
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<RetirementError>,
    pub dry_run: bool,
}

fn serialize_error<S: serde::Serializer>(
    error: &Option<RetirementError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match error {
        Some(e) => serializer.serialize_some(&e.to_string()),
        None => serializer.serialize_none(),
    }
}

impl RetirementOutcome {
    /// Whether the sweep touched anything worth reporting
    pub fn acted(&self) -> bool {
        !self.deleted_credentials.is_empty() || self.error.is_some()
    }
}

/// Instant before which an inactive key is eligible for deletion
pub fn retirement_cutoff(
    grace_days: u32,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, RetirementError> {
    now.checked_sub_signed(Duration::days(i64::from(grace_days)))
        .ok_or(RetirementError::GracePeriod { grace_days })
}

/// Check if a key can be purged: inactive and created strictly before the cutoff
pub fn is_retirable(credential: &Credential, cutoff: DateTime<Utc>) -> bool {
    credential.status == CredentialStatus::Inactive && credential.created_at < cutoff
}

/// Delete every inactive key of `principal` older than the grace period.
///
/// The first failure stops the sweep for this principal. Keys deleted before
/// it stay deleted and are still listed in the outcome.
pub async fn sweep_retired_credentials(
    service: &dyn IdentityService,
    principal: &str,
    grace_days: u32,
    now: DateTime<Utc>,
    dry_run: bool,
) -> RetirementOutcome {
    let mut outcome = RetirementOutcome {
        principal: principal.to_string(),
        deleted_credentials: Vec::new(),
        success: false,
        error: None,
        dry_run,
    };

    let deleted = &mut outcome.deleted_credentials;
    match sweep(service, principal, grace_days, now, dry_run, deleted).await {
        Ok(()) => outcome.success = true,
        Err(err) => {
            error!("{}", err);
            outcome.error = Some(err);
        }
    }

    outcome
}

async fn sweep(
    service: &dyn IdentityService,
    principal: &str,
    grace_days: u32,
    now: DateTime<Utc>,
    dry_run: bool,
    deleted: &mut Vec<String>,
) -> Result<(), RetirementError> {
    let cutoff = retirement_cutoff(grace_days, now)?;
    let credentials = service
        .list_credentials(principal)
        .await
        .map_err(|cause| RetirementError::Lookup {
            principal: principal.to_string(),
            cause,
        })?;

    for credential in credentials.iter().filter(|c| is_retirable(c, cutoff)) {
        if dry_run {
            info!(
                "DRY RUN: Would delete inactive key {} for principal {}",
                credential.id, principal
            );
        } else {
            info!("Deleting inactive key {} for principal {}", credential.id, principal);
            service
                .delete_credential(principal, &credential.id)
                .await
                .map_err(|cause| RetirementError::Delete {
                    principal: principal.to_string(),
                    credential_id: credential.id.clone(),
                    cause,
                })?;
        }
        deleted.push(credential.id.clone());
    }

    Ok(())
}
