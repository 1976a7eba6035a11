//! Discovery of access keys that are due for rotation
//!
//! Principals are walked one page at a time; only the matching keys are kept.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::identity::{Credential, IdentityService, Principal, MAX_CREDENTIALS_PER_PRINCIPAL};

/// An active access key older than the rotation threshold
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StaleCredential {
    pub principal: String,
    pub credential_id: String,
    pub created_at: DateTime<Utc>,
    pub age_days: i64,
}

impl StaleCredential {
    fn new(credential: &Credential, now: DateTime<Utc>) -> Self {
        Self {
            principal: credential.principal.clone(),
            credential_id: credential.id.clone(),
            created_at: credential.created_at,
            age_days: (now - credential.created_at).num_days(),
        }
    }
}

/// Instant before which an active key counts as stale
pub fn rotation_cutoff(threshold_days: u32, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    now.checked_sub_signed(Duration::days(i64::from(threshold_days)))
        .ok_or_else(|| anyhow!("Rotation threshold of {} days is out of range", threshold_days))
}

/// Check if a key needs rotation: active and created strictly before the cutoff
pub fn needs_rotation(credential: &Credential, cutoff: DateTime<Utc>) -> bool {
    credential.is_active() && credential.created_at < cutoff
}

/// Iterates over every principal in the identity service, one page per call
pub struct PrincipalPager<'a> {
    service: &'a dyn IdentityService,
    page_size: i32,
    marker: Option<String>,
    exhausted: bool,
}

impl<'a> PrincipalPager<'a> {
    pub fn new(service: &'a dyn IdentityService, page_size: i32) -> Self {
        Self {
            service,
            page_size,
            marker: None,
            exhausted: false,
        }
    }

    /// Fetch the next page; `None` once every principal has been returned
    pub async fn next_page(&mut self) -> Result<Option<Vec<Principal>>> {
        if self.exhausted {
            return Ok(None);
        }

        let page = self
            .service
            .list_principals(self.marker.take(), self.page_size)
            .await
            .with_context(|| {
                format!("Failed to list principals in {}", self.service.service_name())
            })?;

        debug!(
            "Fetched {} principal(s), more pages: {}",
            page.principals.len(),
            page.next_marker.is_some()
        );

        self.marker = page.next_marker;
        self.exhausted = self.marker.is_none();
        Ok(Some(page.principals))
    }
}

/// Stale keys of a single principal.
///
/// Errors are returned to the caller, which decides whether a failed lookup is
/// fatal (single-principal runs) or skippable (full scans).
pub async fn stale_credentials_for(
    service: &dyn IdentityService,
    principal: &str,
    threshold_days: u32,
    now: DateTime<Utc>,
) -> Result<Vec<StaleCredential>> {
    let cutoff = rotation_cutoff(threshold_days, now)?;
    stale_before(service, principal, cutoff, now).await
}

async fn stale_before(
    service: &dyn IdentityService,
    principal: &str,
    cutoff: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<Vec<StaleCredential>> {
    let credentials = service
        .list_credentials(principal)
        .await
        .with_context(|| format!("Failed to list access keys for '{}'", principal))?;

    if credentials.len() > MAX_CREDENTIALS_PER_PRINCIPAL {
        warn!(
            "Principal {} holds {} access keys, above the limit of {}",
            principal,
            credentials.len(),
            MAX_CREDENTIALS_PER_PRINCIPAL
        );
    }

    Ok(credentials
        .iter()
        .filter(|c| needs_rotation(c, cutoff))
        .map(|c| StaleCredential::new(c, now))
        .collect())
}

/// Scan every principal for active keys older than `threshold_days`.
///
/// Failing to enumerate principals or an out-of-range threshold aborts the
/// scan. Failing to read one principal's keys is logged and that principal is
/// skipped.
pub async fn discover_stale_credentials(
    service: &dyn IdentityService,
    threshold_days: u32,
    now: DateTime<Utc>,
    page_size: i32,
) -> Result<Vec<StaleCredential>> {
    info!(
        "Scanning {} for access keys older than {} days",
        service.service_name(),
        threshold_days
    );

    let cutoff = rotation_cutoff(threshold_days, now)?;
    let mut pager = PrincipalPager::new(service, page_size);
    let mut stale = Vec::new();
    let mut scanned = 0usize;

    while let Some(principals) = pager.next_page().await? {
        for principal in principals {
            scanned += 1;
            match stale_before(service, &principal.name, cutoff, now).await {
                Ok(found) => stale.extend(found),
                Err(e) => {
                    warn!("Could not retrieve keys for principal {}: {:#}", principal.name, e);
                }
            }
        }
    }

    info!(
        "Scanned {} principal(s), found {} access key(s) due for rotation",
        scanned,
        stale.len()
    );
    Ok(stale)
}
