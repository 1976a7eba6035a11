//! Run report: aggregated outcomes, exit code and output rendering

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Write as _;
use std::process::ExitCode;

use crate::discovery::StaleCredential;
use crate::retirement::RetirementOutcome;
use crate::rotation::RotationOutcome;

/// Output format for reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    Json,
    #[default]
    Text,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "text" => Ok(OutputFormat::Text),
            _ => Err(format!("Unknown output format: {}. Supported: json, text", s)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub total_keys_processed: usize,
    pub successful_rotations: usize,
    pub failed_rotations: usize,
    pub cleanup_operations: usize,
}

/// Everything a run did, in the shape automation consumes
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub execution_time: DateTime<Utc>,
    pub dry_run: bool,
    pub days_threshold: u32,
    pub rotated_keys: Vec<RotationOutcome>,
    pub cleanup_results: Vec<RetirementOutcome>,
    /// Fatal errors that stopped the run
    pub errors: Vec<String>,
    pub summary: RunSummary,
}

impl RunReport {
    pub fn new(execution_time: DateTime<Utc>, dry_run: bool, days_threshold: u32) -> Self {
        Self {
            execution_time,
            dry_run,
            days_threshold,
            rotated_keys: Vec::new(),
            cleanup_results: Vec::new(),
            errors: Vec::new(),
            summary: RunSummary::default(),
        }
    }

    /// Record a sweep outcome; sweeps that neither deleted nor failed are dropped
    pub fn record_cleanup(&mut self, outcome: RetirementOutcome) {
        if outcome.acted() {
            self.cleanup_results.push(outcome);
        }
    }

    /// Recompute the summary counters from the recorded outcomes
    pub fn finalize(&mut self) {
        let successful = self.rotated_keys.iter().filter(|r| r.success).count();
        self.summary = RunSummary {
            total_keys_processed: self.rotated_keys.len(),
            successful_rotations: successful,
            failed_rotations: self.rotated_keys.len() - successful,
            cleanup_operations: self.cleanup_results.len(),
        };
    }

    /// Failure if any rotation failed or the run was aborted
    pub fn exit_code(&self) -> ExitCode {
        if self.is_failure() {
            ExitCode::FAILURE
        } else {
            ExitCode::SUCCESS
        }
    }

    pub fn is_failure(&self) -> bool {
        self.rotated_keys.iter().any(|r| !r.success) || !self.errors.is_empty()
    }

    pub fn render(&self, format: OutputFormat) -> Result<String> {
        match format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(self).context("Failed to serialize run report")
            }
            OutputFormat::Text => Ok(self.render_text()),
        }
    }

    /// Human-readable summary. Never includes secrets.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "\n=== IAM Key Rotation Summary ===");
        let _ = writeln!(out, "Execution Time: {}", self.execution_time.to_rfc3339());
        let _ = writeln!(out, "Dry Run: {}", self.dry_run);
        let _ = writeln!(out, "Days Threshold: {}", self.days_threshold);
        let _ = writeln!(out, "Total Keys Processed: {}", self.summary.total_keys_processed);
        let _ = writeln!(out, "Successful Rotations: {}", self.summary.successful_rotations);
        let _ = writeln!(out, "Failed Rotations: {}", self.summary.failed_rotations);
        let _ = writeln!(out, "Cleanup Operations: {}", self.summary.cleanup_operations);

        if !self.rotated_keys.is_empty() {
            let _ = writeln!(out, "\n=== Rotation Details ===");
            for result in &self.rotated_keys {
                let status = if result.success { "SUCCESS" } else { "FAILED" };
                let _ = writeln!(
                    out,
                    "User: {}, Old Key: {}, New Key: {}, Status: {}",
                    result.principal,
                    result.old_credential_id,
                    result.new_credential_id.as_deref().unwrap_or("-"),
                    status
                );
                if let Some(ref err) = result.error {
                    let _ = writeln!(out, "  Error: {}", err);
                }
                if let Some(ref orphan) = result.orphaned_credential_id {
                    let _ = writeln!(out, "  Orphaned Key: {} (manual cleanup required)", orphan);
                }
            }
        }

        if !self.cleanup_results.is_empty() {
            let _ = writeln!(out, "\n=== Cleanup Details ===");
            for result in &self.cleanup_results {
                let verb = if result.dry_run { "Would delete" } else { "Deleted" };
                let _ = writeln!(
                    out,
                    "User: {}, {}: [{}]",
                    result.principal,
                    verb,
                    result.deleted_credentials.join(", ")
                );
                if let Some(ref err) = result.error {
                    let _ = writeln!(out, "  Error: {}", err);
                }
            }
        }

        for err in &self.errors {
            let _ = writeln!(out, "ERROR: {}", err);
        }

        out
    }
}

/// Render a discovery listing for `scan`
pub fn render_scan(stale: &[StaleCredential], format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => {
            serde_json::to_string_pretty(stale).context("Failed to serialize scan results")
        }
        OutputFormat::Text => {
            if stale.is_empty() {
                return Ok("No access keys found that need rotation\n".to_string());
            }
            let mut out = format!("Found {} access key(s) that need rotation:\n", stale.len());
            for item in stale {
                let _ = writeln!(
                    out,
                    "  - {} {} (created {}, {} days old)",
                    item.principal,
                    item.credential_id,
                    item.created_at.format("%Y-%m-%d"),
                    item.age_days
                );
            }
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rotation::RotationError;

    fn outcome(principal: &str, success: bool) -> RotationOutcome {
        RotationOutcome {
            principal: principal.to_string(),
            old_credential_id: format!("AKIA{}OLD", principal.to_uppercase()),
            new_credential_id: success.then(|| format!("AKIA{}NEW", principal.to_uppercase())),
            new_secret: success.then(|| "s3cr3t-value".to_string()),
            success,
            error: (!success).then(|| RotationError::CapacityExceeded {
                principal: principal.to_string(),
                held: 2,
                limit: 2,
            }),
            orphaned_credential_id: None,
            dry_run: false,
        }
    }

    fn report() -> RunReport {
        let mut report = RunReport::new(Utc::now(), false, 90);
        report.rotated_keys.push(outcome("alice", true));
        report.rotated_keys.push(outcome("bob", false));
        report.finalize();
        report
    }

    #[test]
    fn test_summary_counts() {
        let report = report();
        assert_eq!(
            report.summary,
            RunSummary {
                total_keys_processed: 2,
                successful_rotations: 1,
                failed_rotations: 1,
                cleanup_operations: 0,
            }
        );
        assert!(report.is_failure());
    }

    #[test]
    fn test_exit_code_success_when_nothing_failed() {
        let mut report = RunReport::new(Utc::now(), false, 90);
        report.rotated_keys.push(outcome("alice", true));
        report.finalize();
        assert!(!report.is_failure());
    }

    #[test]
    fn test_fatal_error_fails_run() {
        let mut report = RunReport::new(Utc::now(), false, 90);
        report.errors.push("AccessDenied".to_string());
        report.finalize();
        assert!(report.is_failure());
        assert_eq!(report.summary.failed_rotations, 0);
    }

    #[test]
    fn test_idle_sweeps_are_not_recorded() {
        let mut report = RunReport::new(Utc::now(), true, 90);
        report.record_cleanup(RetirementOutcome {
            principal: "alice".to_string(),
            deleted_credentials: Vec::new(),
            success: true,
            error: None,
            dry_run: true,
        });
        report.record_cleanup(RetirementOutcome {
            principal: "bob".to_string(),
            deleted_credentials: vec!["AKIABOB".to_string()],
            success: true,
            error: None,
            dry_run: true,
        });
        report.finalize();
        assert_eq!(report.summary.cleanup_operations, 1);
        assert_eq!(report.cleanup_results[0].principal, "bob");
    }

    #[test]
    fn test_text_output_hides_secrets() {
        let text = report().render_text();
        assert!(text.contains("Successful Rotations: 1"));
        assert!(text.contains("User: bob, Old Key: AKIABOBOLD, New Key: -, Status: FAILED"));
        assert!(text.contains("Error: Principal bob already holds 2 access keys"));
        assert!(!text.contains("s3cr3t-value"));
    }

    #[test]
    fn test_json_output_shape() {
        let json: serde_json::Value =
            serde_json::from_str(&report().render(OutputFormat::Json).unwrap()).unwrap();
        assert_eq!(json["days_threshold"], 90);
        assert_eq!(json["summary"]["failed_rotations"], 1);
        assert_eq!(json["rotated_keys"][0]["new_secret"], "s3cr3t-value");
        assert_eq!(json["rotated_keys"][1]["error_code"], "capacity_exceeded");
        assert!(json["errors"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!("text".parse::<OutputFormat>().unwrap(), OutputFormat::Text);
        assert!("yaml".parse::<OutputFormat>().is_err());
    }
}
