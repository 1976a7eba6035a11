use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::identity::AwsSettings;
use crate::retirement::DEFAULT_GRACE_DAYS;
use crate::rotation::{RotationOptions, DEFAULT_PROPAGATION_DELAY};
use crate::workflow::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub aws: AwsConfig,
    #[serde(default)]
    pub rotation: RotationConfig,
    #[serde(default)]
    pub cleanup: CleanupConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify: Option<NotifyConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwsConfig {
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationConfig {
    #[serde(default = "default_threshold_days")]
    pub threshold_days: u32,
    #[serde(default = "default_propagation_delay_secs")]
    pub propagation_delay_secs: u64,
    #[serde(default = "default_page_size")]
    pub page_size: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_grace_days")]
    pub grace_days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    pub webhook_url: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_header: Option<String>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_threshold_days() -> u32 {
    90
}

fn default_propagation_delay_secs() -> u64 {
    DEFAULT_PROPAGATION_DELAY.as_secs()
}

fn default_page_size() -> i32 {
    DEFAULT_PAGE_SIZE
}

fn default_grace_days() -> u32 {
    DEFAULT_GRACE_DAYS
}

fn default_timeout_seconds() -> u64 {
    30
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            profile: None,
        }
    }
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            threshold_days: default_threshold_days(),
            propagation_delay_secs: default_propagation_delay_secs(),
            page_size: default_page_size(),
        }
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            grace_days: default_grace_days(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: Self = toml::from_str(&contents).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let aws = AwsConfig {
            region: std::env::var("AWS_REGION").unwrap_or_else(|_| default_region()),
            profile: std::env::var("AWS_PROFILE").ok(),
        };

        let rotation = RotationConfig {
            threshold_days: env_parse("IKR_THRESHOLD_DAYS").unwrap_or_else(default_threshold_days),
            propagation_delay_secs: env_parse("IKR_PROPAGATION_DELAY_SECS")
                .unwrap_or_else(default_propagation_delay_secs),
            page_size: env_parse("IKR_PAGE_SIZE").unwrap_or_else(default_page_size),
        };

        let cleanup = CleanupConfig {
            enabled: env_parse("IKR_CLEANUP_ENABLED").unwrap_or(false),
            grace_days: env_parse("IKR_GRACE_DAYS").unwrap_or_else(default_grace_days),
        };

        let notify = std::env::var("IKR_WEBHOOK_URL").ok().map(|webhook_url| NotifyConfig {
            webhook_url,
            timeout_seconds: env_parse("IKR_WEBHOOK_TIMEOUT_SECONDS")
                .unwrap_or_else(default_timeout_seconds),
            auth_header: std::env::var("IKR_WEBHOOK_AUTH_HEADER").ok(),
        });

        let config = Self {
            aws,
            rotation,
            cleanup,
            notify,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values the identity service would refuse
    pub fn validate(&self) -> Result<()> {
        let page_size = self.rotation.page_size;
        if !(1..=MAX_PAGE_SIZE).contains(&page_size) {
            bail!(
                "Invalid page_size {}: must be between 1 and {}",
                page_size,
                MAX_PAGE_SIZE
            );
        }
        Ok(())
    }

    /// Create a sample configuration file
    pub fn create_sample<P: AsRef<Path>>(path: P) -> Result<()> {
        let sample = Self {
            aws: AwsConfig {
                region: default_region(),
                profile: Some("default".to_string()),
            },
            rotation: RotationConfig::default(),
            cleanup: CleanupConfig::default(),
            notify: Some(NotifyConfig {
                webhook_url: "https://hooks.example.com/iam-rotation".to_string(),
                timeout_seconds: default_timeout_seconds(),
                auth_header: None,
            }),
        };

        let toml_string =
            toml::to_string_pretty(&sample).context("Failed to serialize sample config")?;
        fs::write(path.as_ref(), toml_string)
            .with_context(|| format!("Failed to write sample config to {:?}", path.as_ref()))?;

        Ok(())
    }

    pub fn aws_settings(&self) -> AwsSettings {
        AwsSettings {
            region: Some(self.aws.region.clone()),
            profile: self.aws.profile.clone(),
        }
    }

    pub fn rotation_options(&self, dry_run: bool) -> RotationOptions {
        RotationOptions {
            dry_run,
            propagation_delay: Duration::from_secs(self.rotation.propagation_delay_secs),
        }
    }
}
