//! Provisioning boundary trait definition

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use neodeploy_core::{Backoff, ResolvedDeployment, RetryPolicy, SecretValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Errors reported by a provisioning boundary
///
/// `Transient` and `Throttled` are retried by the caller; `Rejected` and
/// `Failed` are surfaced immediately.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProvisioningError {
    #[error("transient error: {0}")]
    Transient(String),

    #[error("throttled: {0}")]
    Throttled(String),

    #[error("rejected ({code}): {message}")]
    Rejected { code: String, message: String },

    #[error("provisioning failed: {0}")]
    Failed(String),
}

impl ProvisioningError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProvisioningError::Transient(_) | ProvisioningError::Throttled(_)
        )
    }
}

/// Default policy for submission and polling: 3 retries, 5 s doubling.
pub fn provisioning_retry_policy() -> RetryPolicy<ProvisioningError> {
    RetryPolicy::new(
        3,
        Backoff::exponential(Duration::from_secs(5), 2.0, Duration::from_secs(60)),
        ProvisioningError::is_transient,
    )
}

/// Provisioning boundary abstraction
///
/// Implementations turn a resolved parameter set into running
/// infrastructure. Secure parameters must only travel through the
/// implementation's secure channel, never argv or logs.
#[async_trait]
pub trait ProvisioningBoundary: Send + Sync {
    /// Returns the boundary name (e.g., "azure-arm")
    fn name(&self) -> &str;

    /// Create the resource group if it does not exist
    async fn ensure_resource_group(
        &self,
        deployment: &ResolvedDeployment,
    ) -> Result<(), ProvisioningError>;

    /// Check the template and parameters against the target without deploying
    ///
    /// A template the boundary refuses comes back as `Rejected`.
    async fn validate_template(
        &self,
        deployment: &ResolvedDeployment,
    ) -> Result<TemplateValidation, ProvisioningError>;

    /// Submit the deployment without waiting for completion
    async fn submit(
        &self,
        deployment: &ResolvedDeployment,
    ) -> Result<OperationHandle, ProvisioningError>;

    /// Query the current status of a submitted operation
    async fn poll(&self, handle: &OperationHandle) -> Result<OperationStatus, ProvisioningError>;

    /// Whether a resource group exists and carries this tool's ownership tag
    async fn resource_group_ownership(
        &self,
        resource_group: &str,
    ) -> Result<GroupOwnership, ProvisioningError>;

    /// Delete a resource group; an absent group is not an error
    async fn delete_resource_group(
        &self,
        resource_group: &str,
    ) -> Result<DeleteOutcome, ProvisioningError>;
}

/// Outcome of a successful template check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateValidation {
    /// The boundary validated template and parameters against the target
    Validated,

    /// Only the local template could be checked; the reason says why
    Deferred(String),
}

/// Ownership of an existing resource group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupOwnership {
    /// Tagged `managed-by=neodeploy`
    Managed,

    /// Exists without the ownership tag
    Foreign,

    Absent,
}

/// Identifies a submitted operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationHandle {
    /// Resource group the deployment targets
    pub resource_group: String,

    /// Deployment name within the resource group
    pub deployment_name: String,

    /// When the boundary accepted the submission
    pub submitted_at: DateTime<Utc>,
}

impl OperationHandle {
    pub fn new(resource_group: impl Into<String>, deployment_name: impl Into<String>) -> Self {
        Self {
            resource_group: resource_group.into(),
            deployment_name: deployment_name.into(),
            submitted_at: Utc::now(),
        }
    }
}

/// Status of a submitted operation
#[derive(Debug, Clone, PartialEq)]
pub enum OperationStatus {
    Running,
    Succeeded(DeploymentOutputs),
    Failed(String),
}

/// Named outputs of a completed deployment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeploymentOutputs {
    /// Externally reachable host of the database
    pub endpoint_host: String,

    /// Browser URL, when the template exposes one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser_url: Option<String>,

    /// Every other named output
    #[serde(default)]
    pub values: BTreeMap<String, serde_json::Value>,
}

impl DeploymentOutputs {
    /// Copy with every string occurrence of the secret replaced.
    pub fn scrubbed(&self, secret: &SecretValue) -> Self {
        Self {
            endpoint_host: secret.scrub(&self.endpoint_host),
            browser_url: self.browser_url.as_deref().map(|u| secret.scrub(u)),
            values: self
                .values
                .iter()
                .map(|(k, v)| (k.clone(), scrub_value(v, secret)))
                .collect(),
        }
    }
}

fn scrub_value(value: &serde_json::Value, secret: &SecretValue) -> serde_json::Value {
    use serde_json::Value;
    match value {
        Value::String(s) => Value::String(secret.scrub(s)),
        Value::Array(items) => Value::Array(items.iter().map(|v| scrub_value(v, secret)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), scrub_value(v, secret)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Result of a resource group deletion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeleteOutcome {
    Deleted,
    AlreadyAbsent,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_transient_classification() {
        assert!(ProvisioningError::Transient("reset".into()).is_transient());
        assert!(ProvisioningError::Throttled("429".into()).is_transient());
        assert!(
            !ProvisioningError::Rejected {
                code: "QuotaExceeded".into(),
                message: "cores".into()
            }
            .is_transient()
        );
        assert!(!ProvisioningError::Failed("boom".into()).is_transient());
    }

    #[test]
    fn test_default_policy_delays() {
        let policy = provisioning_retry_policy();
        assert_eq!(
            policy.delays(),
            vec![
                Duration::from_secs(5),
                Duration::from_secs(10),
                Duration::from_secs(20)
            ]
        );
    }

    #[test]
    fn test_outputs_scrubbed_recursively() {
        let secret = SecretValue::new("Sup3r-Secret-Value");
        let mut values = BTreeMap::new();
        values.insert(
            "connection".into(),
            json!({ "password": "Sup3r-Secret-Value", "nested": ["x Sup3r-Secret-Value"] }),
        );
        let outputs = DeploymentOutputs {
            endpoint_host: "db.example".into(),
            browser_url: Some("http://db.example:7474".into()),
            values,
        };
        let text = serde_json::to_string(&outputs.scrubbed(&secret)).unwrap();
        assert!(!text.contains("Sup3r-Secret-Value"));
        assert!(text.contains("[REDACTED]"));
    }
}
