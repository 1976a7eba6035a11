//! CLI parsing and command execution
//!
//! This module handles command-line argument parsing and routes commands to the workflow.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};

use iam_key_rotator::config::Config;
use iam_key_rotator::identity::{IamClient, IdentityService};
use iam_key_rotator::notify::WebhookNotifier;
use iam_key_rotator::report::{self, OutputFormat, RunReport};
use iam_key_rotator::workflow::{CredentialRotationWorkflow, RunPlan};

#[derive(Parser)]
#[command(name = "ikr")]
#[command(about = "Rotates aged AWS IAM access keys and purges retired ones", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "IKR_CONFIG")]
    pub config: Option<PathBuf>,

    /// AWS profile to use (overrides config file)
    #[arg(long, env = "AWS_PROFILE")]
    pub profile: Option<String>,

    /// AWS region (overrides config file)
    #[arg(long, env = "AWS_REGION")]
    pub region: Option<String>,

    /// Output format (json or text)
    #[arg(long, default_value = "text", global = true)]
    pub output_format: OutputFormat,

    /// Write log lines to this file instead of stderr
    #[arg(long, env = "IKR_LOG_FILE", global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a sample configuration file
    Init {
        /// Output path for the configuration file
        #[arg(short, long, default_value = "ikr-config.toml")]
        output: PathBuf,
    },

    /// List active access keys older than the threshold
    Scan {
        /// Age threshold in days
        #[arg(long)]
        days_threshold: Option<u32>,

        /// Only inspect this user
        #[arg(long)]
        user: Option<String>,
    },

    /// Rotate every access key older than the threshold
    Rotate {
        /// Age threshold in days
        #[arg(long)]
        days_threshold: Option<u32>,

        /// Dry run - only show what would be rotated
        #[arg(long)]
        dry_run: bool,

        /// Only rotate keys of this user
        #[arg(long)]
        user: Option<String>,

        /// Also delete inactive keys older than the grace period
        #[arg(long)]
        cleanup_inactive: bool,

        /// Days an inactive key is kept before deletion
        #[arg(long)]
        grace_days: Option<u32>,
    },

    /// Delete inactive keys older than the grace period
    Cleanup {
        /// Days an inactive key is kept before deletion
        #[arg(long)]
        grace_days: Option<u32>,

        /// Dry run - only show what would be deleted
        #[arg(long)]
        dry_run: bool,

        /// Only clean up keys of this user
        #[arg(long)]
        user: Option<String>,
    },
}

/// Execute a CLI command
pub async fn execute(cli: Cli) -> Result<ExitCode> {
    // Handle init command separately as it doesn't need AWS
    if let Commands::Init { output } = cli.command {
        Config::create_sample(&output)
            .with_context(|| format!("Failed to create sample config at {:?}", output))?;
        info!("Sample configuration created at {:?}", output);
        return Ok(ExitCode::SUCCESS);
    }

    // Load configuration
    let mut config = if let Some(config_path) = cli.config {
        Config::from_file(&config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        Config::from_env().context("Failed to load config from environment")?
    };

    // Override with CLI arguments if provided
    if let Some(profile) = cli.profile {
        config.aws.profile = Some(profile);
    }
    if let Some(region) = cli.region {
        config.aws.region = region;
    }

    let now = Utc::now();
    let format = cli.output_format;

    let plan = match cli.command {
        Commands::Init { .. } => unreachable!(), // Handled above

        Commands::Scan {
            days_threshold,
            user,
        } => {
            let workflow = connect(&config).await?;
            let threshold = days_threshold.unwrap_or(config.rotation.threshold_days);
            let stale = match user {
                Some(ref user) => workflow.discover_for(user, threshold, now).await?,
                None => workflow.discover(threshold, now).await?,
            };
            print!("{}", report::render_scan(&stale, format)?);
            return Ok(ExitCode::SUCCESS);
        }

        Commands::Rotate {
            days_threshold,
            dry_run,
            user,
            cleanup_inactive,
            grace_days,
        } => RunPlan {
            now,
            dry_run,
            threshold_days: days_threshold.unwrap_or(config.rotation.threshold_days),
            propagation_delay: config.rotation_options(dry_run).propagation_delay,
            principal: user,
            rotate: true,
            cleanup_grace_days: (cleanup_inactive || config.cleanup.enabled)
                .then(|| grace_days.unwrap_or(config.cleanup.grace_days)),
        },

        Commands::Cleanup {
            grace_days,
            dry_run,
            user,
        } => RunPlan {
            now,
            dry_run,
            threshold_days: config.rotation.threshold_days,
            propagation_delay: config.rotation_options(dry_run).propagation_delay,
            principal: user,
            rotate: false,
            cleanup_grace_days: Some(grace_days.unwrap_or(config.cleanup.grace_days)),
        },
    };

    let report = match connect(&config).await {
        Ok(workflow) => workflow.run(&plan).await,
        Err(e) => {
            // Still emit a report so automation sees the failure in its usual shape
            let mut report = RunReport::new(now, plan.dry_run, plan.threshold_days);
            report.errors.push(format!("{:#}", e));
            report.finalize();
            report
        }
    };

    if !report.dry_run {
        if let Some(ref notify_config) = config.notify {
            let sent = match WebhookNotifier::new(notify_config) {
                Ok(notifier) => notifier.send(&report).await,
                Err(e) => Err(e),
            };
            if let Err(e) = sent {
                warn!("Failed to send rotation notification: {:#}", e);
            }
        }
    }

    if format == OutputFormat::Json {
        eprintln!("WARNING: JSON output contains new secret keys. Ensure this output is secured.");
    }
    print!("{}", report.render(format)?);

    Ok(report.exit_code())
}

async fn connect(config: &Config) -> Result<CredentialRotationWorkflow> {
    let client = IamClient::new(&config.aws_settings())
        .await
        .context("Failed to create AWS IAM client")?;
    let service: Arc<dyn IdentityService> = Arc::new(client);

    CredentialRotationWorkflow::connect(service, config.rotation.page_size).await
}
