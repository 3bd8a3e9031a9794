//! `settings.yaml` schema

use crate::error::{ConfigError, Result};
use neodeploy_core::CleanupMode;
use neodeploy_core::params::MAX_PREFIX_LEN;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_REGION: &str = "eastus";
pub const DEFAULT_PREFIX: &str = "neo4j-test";
pub const DEFAULT_TEMPLATE_DIR: &str = "templates";

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

fn default_prefix() -> String {
    DEFAULT_PREFIX.to_string()
}

fn default_template_dir() -> PathBuf {
    PathBuf::from(DEFAULT_TEMPLATE_DIR)
}

fn default_true() -> bool {
    true
}

/// Workspace settings. Unknown keys are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Stable identifier feeding the resource naming suffix.
    pub workspace_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,
    #[serde(default = "default_region")]
    pub default_region: String,
    #[serde(default = "default_prefix")]
    pub resource_group_prefix: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// Relative paths are resolved against the workspace root.
    #[serde(default = "default_template_dir")]
    pub template_dir: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_vault: Option<KeyVaultSettings>,
    #[serde(default)]
    pub timeouts: TimeoutSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub cleanup_mode: CleanupMode,
}

/// Workspace-wide Key Vault holding the admin password.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeyVaultSettings {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_group: Option<String>,
    pub secret_name: String,
    #[serde(default = "default_true")]
    pub generate_if_missing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct TimeoutSettings {
    pub deployment_secs: u64,
    pub poll_interval_secs: u64,
    /// Per probe attempt. Independent of `deployment_secs`.
    pub probe_attempt_secs: u64,
    pub secret_store_secs: u64,
    /// Per az invocation
    pub az_command_secs: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            deployment_secs: 1800,
            poll_interval_secs: 30,
            probe_attempt_secs: 30,
            secret_store_secs: 10,
            az_command_secs: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RetrySettings {
    pub provisioning_max_retries: u32,
    pub provisioning_initial_delay_secs: u64,
    pub provisioning_max_delay_secs: u64,
    pub probe_max_retries: u32,
    pub probe_delay_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            provisioning_max_retries: 3,
            provisioning_initial_delay_secs: 5,
            provisioning_max_delay_secs: 60,
            probe_max_retries: 5,
            probe_delay_secs: 10,
        }
    }
}

impl Settings {
    /// Fresh settings with a new workspace id and defaults elsewhere.
    pub fn new() -> Self {
        Self {
            workspace_id: uuid::Uuid::new_v4().to_string(),
            subscription_id: None,
            default_region: default_region(),
            resource_group_prefix: default_prefix(),
            owner: None,
            template_dir: default_template_dir(),
            key_vault: None,
            timeouts: TimeoutSettings::default(),
            retry: RetrySettings::default(),
            cleanup_mode: CleanupMode::default(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "Loading settings");
        let content = std::fs::read_to_string(path)?;
        let settings: Settings =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::Settings {
                path: path.to_path_buf(),
                source,
            })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        self.validate()?;
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.workspace_id.trim().is_empty() {
            return Err(ConfigError::Invalid("workspace_id must not be empty".into()));
        }
        if self.default_region.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "default_region must not be empty".into(),
            ));
        }
        let prefix_ok = !self.resource_group_prefix.is_empty()
            && self.resource_group_prefix.len() <= MAX_PREFIX_LEN
            && self
                .resource_group_prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !prefix_ok {
            return Err(ConfigError::Invalid(format!(
                "resource_group_prefix '{}' must be 1-{} characters of [A-Za-z0-9_-]",
                self.resource_group_prefix, MAX_PREFIX_LEN
            )));
        }
        if self.timeouts.poll_interval_secs == 0
            || self.timeouts.deployment_secs == 0
            || self.timeouts.az_command_secs == 0
        {
            return Err(ConfigError::Invalid(
                "timeouts must be greater than zero".into(),
            ));
        }
        if self.timeouts.poll_interval_secs >= self.timeouts.deployment_secs {
            return Err(ConfigError::Invalid(format!(
                "poll_interval_secs ({}) must be less than deployment_secs ({})",
                self.timeouts.poll_interval_secs, self.timeouts.deployment_secs
            )));
        }
        if let Some(kv) = &self.key_vault {
            if kv.name.trim().is_empty() || kv.secret_name.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "key_vault.name and key_vault.secret_name are required".into(),
                ));
            }
        }
        Ok(())
    }

    pub fn deployment_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.deployment_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.timeouts.poll_interval_secs)
    }

    pub fn probe_attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.probe_attempt_secs)
    }

    pub fn az_command_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.az_command_secs)
    }

    pub fn secret_store_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.secret_store_secs)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::new()
    }
}
