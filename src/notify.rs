use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::NotifyConfig;
use crate::report::{RunReport, RunSummary};

/// Per-key line of a notification. Carries ids only, never secrets.
#[derive(Debug, Serialize)]
struct RotationNotice<'a> {
    principal: &'a str,
    old_credential_id: &'a str,
    new_credential_id: Option<&'a str>,
    success: bool,
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct Notification<'a> {
    execution_time: DateTime<Utc>,
    dry_run: bool,
    summary: &'a RunSummary,
    rotations: Vec<RotationNotice<'a>>,
    errors: &'a [String],
}

impl<'a> Notification<'a> {
    fn from_report(report: &'a RunReport) -> Self {
        Self {
            execution_time: report.execution_time,
            dry_run: report.dry_run,
            summary: &report.summary,
            rotations: report
                .rotated_keys
                .iter()
                .map(|r| RotationNotice {
                    principal: &r.principal,
                    old_credential_id: &r.old_credential_id,
                    new_credential_id: r.new_credential_id.as_deref(),
                    success: r.success,
                    error: r.error.as_ref().map(|e| e.to_string()),
                })
                .collect(),
            errors: &report.errors,
        }
    }
}

/// Posts run results to a webhook
pub struct WebhookNotifier {
    config: NotifyConfig,
    client: Client,
}

impl WebhookNotifier {
    /// Create a new WebhookNotifier
    pub fn new(config: &NotifyConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            config: config.clone(),
            client,
        })
    }

    pub async fn send(&self, report: &RunReport) -> Result<()> {
        debug!("Posting rotation results to {}", self.config.webhook_url);

        let mut request = self
            .client
            .post(&self.config.webhook_url)
            .json(&Notification::from_report(report));

        if let Some(ref auth_header) = self.config.auth_header {
            request = request.header("Authorization", auth_header);
        }

        let response = request
            .send()
            .await
            .context("Failed to send webhook notification")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            anyhow::bail!(
                "Webhook notification failed with status {}: {}",
                status,
                error_text
            );
        }

        info!("Sent rotation results to webhook");
        Ok(())
    }
}
