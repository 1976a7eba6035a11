//! Credential rotation workflow
//!
//! Ties discovery, rotation and the retirement sweep together over one
//! identity service session and drives them for a whole run.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::discovery::{self, PrincipalPager, StaleCredential};
use crate::identity::IdentityService;
use crate::report::RunReport;
use crate::retirement::{self, RetirementOutcome};
use crate::rotation::{self, RotationOptions, RotationOutcome};

/// Default number of principals requested per listing page
pub const DEFAULT_PAGE_SIZE: i32 = 100;

/// Largest page the identity service accepts
pub const MAX_PAGE_SIZE: i32 = 1000;

/// What a single run should do
#[derive(Debug, Clone)]
pub struct RunPlan {
    /// Reference time every age is measured against
    pub now: DateTime<Utc>,
    pub dry_run: bool,
    pub threshold_days: u32,
    pub propagation_delay: Duration,
    /// Restrict the run to one principal instead of scanning all of them
    pub principal: Option<String>,
    /// Rotate stale keys; `false` runs the retirement sweep only
    pub rotate: bool,
    /// Sweep inactive keys older than this many days
    pub cleanup_grace_days: Option<u32>,
}

impl RunPlan {
    fn rotation_options(&self) -> RotationOptions {
        RotationOptions {
            dry_run: self.dry_run,
            propagation_delay: self.propagation_delay,
        }
    }
}

/// Access key rotation over a connected identity service
pub struct CredentialRotationWorkflow {
    service: Arc<dyn IdentityService>,
    page_size: i32,
}

impl CredentialRotationWorkflow {
    /// Verify access to the identity service and build the workflow.
    ///
    /// Fails fast when the caller cannot reach or is not authorized to use
    /// the service.
    pub async fn connect(service: Arc<dyn IdentityService>, page_size: i32) -> Result<Self> {
        service
            .check_access()
            .await
            .with_context(|| format!("Failed to connect to {}", service.service_name()))?;
        info!("Successfully connected to {}", service.service_name());

        Ok(Self { service, page_size })
    }

    pub fn service(&self) -> &dyn IdentityService {
        self.service.as_ref()
    }

    /// All active keys older than `threshold_days`, across every principal
    pub async fn discover(
        &self,
        threshold_days: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<StaleCredential>> {
        discovery::discover_stale_credentials(self.service(), threshold_days, now, self.page_size)
            .await
    }

    /// Active keys of one principal older than `threshold_days`
    pub async fn discover_for(
        &self,
        principal: &str,
        threshold_days: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<StaleCredential>> {
        discovery::stale_credentials_for(self.service(), principal, threshold_days, now).await
    }

    pub async fn rotate(
        &self,
        principal: &str,
        old_credential_id: &str,
        options: &RotationOptions,
    ) -> RotationOutcome {
        rotation::rotate_credential(self.service(), principal, old_credential_id, options).await
    }

    pub async fn sweep(
        &self,
        principal: &str,
        grace_days: u32,
        now: DateTime<Utc>,
        dry_run: bool,
    ) -> RetirementOutcome {
        retirement::sweep_retired_credentials(self.service(), principal, grace_days, now, dry_run)
            .await
    }

    /// Execute a full run and collect every outcome.
    ///
    /// Per-key and per-principal failures are recorded and the run continues.
    /// A fatal error (principals cannot be listed, the requested principal
    /// cannot be read, or an age limit reaches past the calendar) stops the
    /// run and lands in `RunReport::errors`.
    pub async fn run(&self, plan: &RunPlan) -> RunReport {
        let mut report = RunReport::new(plan.now, plan.dry_run, plan.threshold_days);

        if let Err(e) = self.execute(plan, &mut report).await {
            error!("Run aborted: {:#}", e);
            report.errors.push(format!("{:#}", e));
        }

        report.finalize();
        info!(
            "Run finished: {} processed, {} succeeded, {} failed, {} cleanup operation(s)",
            report.summary.total_keys_processed,
            report.summary.successful_rotations,
            report.summary.failed_rotations,
            report.summary.cleanup_operations
        );
        report
    }

    async fn execute(&self, plan: &RunPlan, report: &mut RunReport) -> Result<()> {
        if plan.rotate {
            let stale = match plan.principal {
                Some(ref principal) => {
                    info!("Rotating keys for specific principal: {}", principal);
                    self.discover_for(principal, plan.threshold_days, plan.now)
                        .await?
                }
                None => self.discover(plan.threshold_days, plan.now).await?,
            };

            if stale.is_empty() {
                info!("No access keys found that need rotation");
            } else {
                info!("Found {} access key(s) that need rotation", stale.len());
            }

            let options = plan.rotation_options();
            for item in &stale {
                let outcome = self
                    .rotate(&item.principal, &item.credential_id, &options)
                    .await;
                report.rotated_keys.push(outcome);
            }
        }

        if let Some(grace_days) = plan.cleanup_grace_days {
            retirement::retirement_cutoff(grace_days, plan.now)?;
            info!("Cleaning up inactive keys older than {} days...", grace_days);
            match plan.principal {
                Some(ref principal) => {
                    let outcome = self.sweep(principal, grace_days, plan.now, plan.dry_run).await;
                    report.record_cleanup(outcome);
                }
                None => {
                    let mut pager = PrincipalPager::new(self.service(), self.page_size);
                    while let Some(principals) = pager.next_page().await? {
                        for principal in principals {
                            let outcome = self
                                .sweep(&principal.name, grace_days, plan.now, plan.dry_run)
                                .await;
                            report.record_cleanup(outcome);
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{CredentialStatus, InMemoryIdentityService, ServiceCall};
    use chrono::Duration as ChronoDuration;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-06-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn days_ago(days: i64) -> DateTime<Utc> {
        now() - ChronoDuration::days(days)
    }

    fn plan() -> RunPlan {
        RunPlan {
            now: now(),
            dry_run: false,
            threshold_days: 90,
            propagation_delay: Duration::ZERO,
            principal: None,
            rotate: true,
            cleanup_grace_days: None,
        }
    }

    async fn workflow(service: &Arc<InMemoryIdentityService>) -> CredentialRotationWorkflow {
        let shared: Arc<dyn IdentityService> = service.clone();
        CredentialRotationWorkflow::connect(shared, 2).await.unwrap()
    }

    #[tokio::test]
    async fn test_connect_fails_without_access() {
        let service = Arc::new(InMemoryIdentityService::new());
        service.deny_access();

        let shared: Arc<dyn IdentityService> = service.clone();
        let result = CredentialRotationWorkflow::connect(shared, 2).await;

        assert!(result.is_err());
        assert_eq!(service.calls(), vec![ServiceCall::CheckAccess]);
    }

    #[tokio::test]
    async fn test_principal_listing_failure_aborts_run() {
        let service = Arc::new(InMemoryIdentityService::new());
        service.add_principal("alice", days_ago(400));
        service.fail_principal_listing();

        let report = workflow(&service).await.run(&plan()).await;

        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("AccessDenied"));
        assert!(report.rotated_keys.is_empty());
        assert!(report.is_failure());
    }

    #[tokio::test]
    async fn test_single_principal_run() {
        let service = Arc::new(InMemoryIdentityService::new());
        for name in ["alice", "bob"] {
            service.add_principal(name, days_ago(400));
            let id = format!("AKIA{}", name);
            service.add_credential(name, &id, days_ago(120), CredentialStatus::Active);
        }

        let report = workflow(&service)
            .await
            .run(&RunPlan {
                principal: Some("bob".to_string()),
                ..plan()
            })
            .await;

        assert_eq!(report.summary.total_keys_processed, 1);
        assert_eq!(report.rotated_keys[0].principal, "bob");
        assert_eq!(
            service.credential("alice", "AKIAalice").unwrap().status,
            CredentialStatus::Active
        );
    }

    #[tokio::test]
    async fn test_unknown_principal_is_fatal() {
        let service = Arc::new(InMemoryIdentityService::new());

        let report = workflow(&service)
            .await
            .run(&RunPlan {
                principal: Some("ghost".to_string()),
                ..plan()
            })
            .await;

        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("ghost"));
    }

    #[tokio::test]
    async fn test_cleanup_only_run_sweeps_every_principal() {
        let service = Arc::new(InMemoryIdentityService::new());
        for name in ["alice", "bob", "carol"] {
            service.add_principal(name, days_ago(400));
            let (off, on) = (format!("AKIA{}OFF", name), format!("AKIA{}ON", name));
            service.add_credential(name, &off, days_ago(60), CredentialStatus::Inactive);
            service.add_credential(name, &on, days_ago(200), CredentialStatus::Active);
        }
        service.fail_credential_lookup("bob");

        let report = workflow(&service)
            .await
            .run(&RunPlan {
                rotate: false,
                cleanup_grace_days: Some(30),
                ..plan()
            })
            .await;

        assert!(report.rotated_keys.is_empty());
        assert_eq!(report.summary.cleanup_operations, 3);
        assert!(!report.cleanup_results[1].success);
        assert_eq!(report.cleanup_results[2].deleted_credentials, vec!["AKIAcarolOFF"]);
        assert!(!report.is_failure());
        assert!(service
            .mutation_calls()
            .iter()
            .all(|c| matches!(c, ServiceCall::DeleteCredential { .. })));
    }

    #[tokio::test]
    async fn test_out_of_range_age_limits_abort_run() {
        let service = Arc::new(InMemoryIdentityService::new());
        service.add_principal("alice", days_ago(400));
        service.add_credential("alice", "AKIAOFF", days_ago(60), CredentialStatus::Inactive);

        let rotate = workflow(&service)
            .await
            .run(&RunPlan {
                threshold_days: 100_000_000,
                ..plan()
            })
            .await;
        assert_eq!(rotate.errors.len(), 1);
        assert!(rotate.errors[0].contains("out of range"));
        assert!(rotate.is_failure());

        let cleanup = workflow(&service)
            .await
            .run(&RunPlan {
                rotate: false,
                cleanup_grace_days: Some(100_000_000),
                ..plan()
            })
            .await;
        assert_eq!(cleanup.errors.len(), 1);
        assert!(cleanup.cleanup_results.is_empty());
        assert!(service.mutation_calls().is_empty());
    }
}
