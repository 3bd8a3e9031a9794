//! Azure Resource Manager provisioning boundary

use crate::az::AzCli;
use crate::error::AzureError;
use async_trait::async_trait;
use neodeploy_cloud::{
    DeleteOutcome, DeploymentOutputs, GroupOwnership, OperationHandle, OperationStatus,
    ProvisioningBoundary, ProvisioningError, TemplateValidation,
};
use neodeploy_core::params::MANAGED_BY;
use neodeploy_core::{ResolvedDeployment, TemplateKind};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Template entry point inside each template directory
pub const TEMPLATE_FILE: &str = "main.bicep";

const PARAMETERS_SCHEMA: &str =
    "https://schema.management.azure.com/schemas/2019-04-01/deploymentParameters.json#";

/// Outputs carrying the database endpoint, most specific first
const ENDPOINT_OUTPUTS: &[&str] = &["neo4jClusterBrowserURL", "neo4jBrowserURL"];

const BLOOM_OUTPUT: &str = "neo4jBloomURL";

/// `properties` of `az deployment group show`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeploymentProperties {
    provisioning_state: String,
    #[serde(default)]
    outputs: Option<Map<String, Value>>,
    #[serde(default)]
    error: Option<Value>,
}

/// Drives `az group` and `az deployment group`
pub struct ArmProvider {
    az: AzCli,
    template_dir: PathBuf,
}

impl ArmProvider {
    pub fn new(az: AzCli, template_dir: impl Into<PathBuf>) -> Self {
        Self {
            az,
            template_dir: template_dir.into(),
        }
    }

    pub fn template_file(&self, kind: TemplateKind) -> PathBuf {
        self.template_dir.join(kind.dir_name()).join(TEMPLATE_FILE)
    }

    async fn group_exists(&self, resource_group: &str) -> Result<bool, ProvisioningError> {
        let output = self
            .az
            .run(&["group", "exists", "--name", resource_group])
            .await?;
        match output.trim() {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(AzureError::UnexpectedOutput(other.to_string()).into()),
        }
    }

    fn existing_template(&self, deployment: &ResolvedDeployment) -> Result<PathBuf, ProvisioningError> {
        let template = self.template_file(deployment.template);
        if !template.is_file() {
            return Err(AzureError::TemplateNotFound(template).into());
        }
        Ok(template)
    }

    /// Private parameters file, removed when the returned handle drops
    async fn write_parameters(
        &self,
        deployment: &ResolvedDeployment,
    ) -> Result<NamedTempFile, ProvisioningError> {
        let params_file = tempfile::Builder::new()
            .prefix("neodeploy-params-")
            .suffix(".json")
            .tempfile()
            .map_err(AzureError::from)?;
        let document = serde_json::to_vec(&parameters_document(deployment))
            .map_err(AzureError::from)?;
        tokio::fs::write(params_file.path(), document)
            .await
            .map_err(AzureError::from)?;
        Ok(params_file)
    }
}

/// Ownership of an existing group from its `tags` object
pub fn ownership_from_tags(tags: &Value) -> GroupOwnership {
    match tags.get("managed-by").and_then(Value::as_str) {
        Some(owner) if owner == MANAGED_BY => GroupOwnership::Managed,
        _ => GroupOwnership::Foreign,
    }
}

/// ARM parameters document, secure values included.
///
/// Only ever written to a private temporary file.
pub fn parameters_document(deployment: &ResolvedDeployment) -> Value {
    let mut parameters = Map::new();
    for (name, value) in &deployment.parameters {
        parameters.insert(name.clone(), json!({ "value": value }));
    }
    for (name, value) in deployment.secure_parameters.iter() {
        parameters.insert(name.clone(), json!({ "value": value.expose() }));
    }
    json!({
        "$schema": PARAMETERS_SCHEMA,
        "contentVersion": "1.0.0.0",
        "parameters": parameters,
    })
}

/// Host part of a URL like `http://host:7474/browser`
pub fn host_of(url: &str) -> Option<&str> {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    let authority = rest.split(['/', '?', '#']).next().unwrap_or(rest);
    let host = match authority.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => authority,
    };
    (!host.is_empty()).then_some(host)
}

fn output_str<'a>(outputs: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    outputs.get(key)?.get("value")?.as_str()
}

/// Turn ARM outputs into deployment outputs
pub fn parse_outputs(outputs: &Map<String, Value>) -> Result<DeploymentOutputs, ProvisioningError> {
    let browser_url = ENDPOINT_OUTPUTS
        .iter()
        .find_map(|key| output_str(outputs, key))
        .ok_or_else(|| {
            ProvisioningError::Failed(format!(
                "deployment outputs contain none of {}",
                ENDPOINT_OUTPUTS.join(", ")
            ))
        })?;
    let endpoint_host = host_of(browser_url)
        .ok_or_else(|| ProvisioningError::Failed(format!("no host in {}", browser_url)))?;

    let values: BTreeMap<String, Value> = outputs
        .iter()
        .map(|(k, v)| (k.clone(), v.get("value").cloned().unwrap_or(Value::Null)))
        .collect();
    if let Some(bloom) = output_str(outputs, BLOOM_OUTPUT) {
        debug!(bloom_url = bloom, "Bloom endpoint reported");
    }

    Ok(DeploymentOutputs {
        endpoint_host: endpoint_host.to_string(),
        browser_url: Some(browser_url.to_string()),
        values,
    })
}

fn status_from(properties: DeploymentProperties) -> Result<OperationStatus, ProvisioningError> {
    match properties.provisioning_state.as_str() {
        "Succeeded" => {
            let outputs = properties.outputs.unwrap_or_default();
            Ok(OperationStatus::Succeeded(parse_outputs(&outputs)?))
        }
        "Failed" | "Canceled" => {
            let detail = properties
                .error
                .as_ref()
                .and_then(|e| {
                    let code = e.get("code").and_then(Value::as_str);
                    let message = e.get("message").and_then(Value::as_str);
                    match (code, message) {
                        (Some(c), Some(m)) => Some(format!("{}: {}", c, m)),
                        (c, m) => c.or(m).map(str::to_string),
                    }
                })
                .unwrap_or_else(|| format!("deployment {}", properties.provisioning_state));
            Ok(OperationStatus::Failed(detail))
        }
        _ => Ok(OperationStatus::Running),
    }
}

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}

#[async_trait]
impl ProvisioningBoundary for ArmProvider {
    fn name(&self) -> &str {
        "azure-arm"
    }

    async fn ensure_resource_group(
        &self,
        deployment: &ResolvedDeployment,
    ) -> Result<(), ProvisioningError> {
        if self.group_exists(&deployment.resource_group).await? {
            debug!(resource_group = %deployment.resource_group, "Resource group exists");
            return Ok(());
        }

        let tags: Vec<String> = deployment
            .tags
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        let mut args = vec![
            "group",
            "create",
            "--name",
            deployment.resource_group.as_str(),
            "--location",
            deployment.region.as_str(),
            "--output",
            "none",
        ];
        if !tags.is_empty() {
            args.push("--tags");
            args.extend(tags.iter().map(String::as_str));
        }
        self.az.run(&args).await?;

        info!(
            resource_group = %deployment.resource_group,
            region = %deployment.region,
            "Resource group created"
        );
        Ok(())
    }

    async fn validate_template(
        &self,
        deployment: &ResolvedDeployment,
    ) -> Result<TemplateValidation, ProvisioningError> {
        let template = self.existing_template(deployment)?;
        // ARM validates against an existing resource group only
        if !self.group_exists(&deployment.resource_group).await? {
            return Ok(TemplateValidation::Deferred(format!(
                "resource group {} does not exist yet",
                deployment.resource_group
            )));
        }

        let params_file = self.write_parameters(deployment).await?;
        let template_arg = path_arg(&template);
        let params_arg = format!("@{}", path_arg(params_file.path()));
        self.az
            .run(&[
                "deployment",
                "group",
                "validate",
                "--resource-group",
                deployment.resource_group.as_str(),
                "--template-file",
                template_arg.as_str(),
                "--parameters",
                params_arg.as_str(),
                "--output",
                "none",
            ])
            .await?;
        drop(params_file);

        debug!(
            resource_group = %deployment.resource_group,
            template = %deployment.template.dir_name(),
            "Template validated"
        );
        Ok(TemplateValidation::Validated)
    }

    async fn submit(
        &self,
        deployment: &ResolvedDeployment,
    ) -> Result<OperationHandle, ProvisioningError> {
        let template = self.existing_template(deployment)?;
        // Removed on drop right after submission
        let params_file = self.write_parameters(deployment).await?;

        let template_arg = path_arg(&template);
        let params_arg = format!("@{}", path_arg(params_file.path()));
        self.az
            .run(&[
                "deployment",
                "group",
                "create",
                "--resource-group",
                deployment.resource_group.as_str(),
                "--name",
                deployment.deployment_name.as_str(),
                "--template-file",
                template_arg.as_str(),
                "--parameters",
                params_arg.as_str(),
                "--no-wait",
            ])
            .await?;
        drop(params_file);

        info!(
            resource_group = %deployment.resource_group,
            deployment = %deployment.deployment_name,
            template = %deployment.template.dir_name(),
            "Deployment submitted"
        );
        Ok(OperationHandle::new(
            &deployment.resource_group,
            &deployment.deployment_name,
        ))
    }

    async fn poll(&self, handle: &OperationHandle) -> Result<OperationStatus, ProvisioningError> {
        let output = self
            .az
            .run(&[
                "deployment",
                "group",
                "show",
                "--resource-group",
                handle.resource_group.as_str(),
                "--name",
                handle.deployment_name.as_str(),
                "--query",
                "properties",
                "--output",
                "json",
            ])
            .await?;
        let properties: DeploymentProperties =
            serde_json::from_str(&output).map_err(AzureError::from)?;
        debug!(
            deployment = %handle.deployment_name,
            state = %properties.provisioning_state,
            "Polled deployment"
        );
        status_from(properties)
    }

    async fn resource_group_ownership(
        &self,
        resource_group: &str,
    ) -> Result<GroupOwnership, ProvisioningError> {
        if !self.group_exists(resource_group).await? {
            return Ok(GroupOwnership::Absent);
        }
        let output = self
            .az
            .run(&[
                "group",
                "show",
                "--name",
                resource_group,
                "--query",
                "tags",
                "--output",
                "json",
            ])
            .await?;
        // an untagged group prints nothing or `null`
        let tags: Value = match output.trim() {
            "" => Value::Null,
            text => serde_json::from_str(text).map_err(AzureError::from)?,
        };
        Ok(ownership_from_tags(&tags))
    }

    async fn delete_resource_group(
        &self,
        resource_group: &str,
    ) -> Result<DeleteOutcome, ProvisioningError> {
        if !self.group_exists(resource_group).await? {
            return Ok(DeleteOutcome::AlreadyAbsent);
        }
        self.az
            .run(&[
                "group",
                "delete",
                "--name",
                resource_group,
                "--yes",
                "--no-wait",
            ])
            .await?;
        info!(resource_group, "Resource group deletion started");
        Ok(DeleteOutcome::Deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use neodeploy_core::params::resolve;
    use neodeploy_core::{
        DeploymentContext, ResolvedSecret, ScenarioRegistry, SecretHandle, SecretMode,
        SecretValue,
    };

    fn deployment() -> ResolvedDeployment {
        let registry = ScenarioRegistry::from_yaml_str(
            r#"
scenarios:
  - name: cluster-v5
    edition: enterprise-cluster
    node_count: 3
    version: "5"
    sizing: { vm_size: Standard_E4s_v5, disk_size_gb: 64 }
"#,
        )
        .unwrap();
        let context = DeploymentContext {
            workspace_id: "ws".into(),
            resource_group_prefix: "neo4j-test".into(),
            default_region: "eastus".into(),
            owner: None,
            region_override: None,
        };
        let secret = ResolvedSecret {
            value: SecretValue::new("Arm-Test-Passw0rd"),
            handle: SecretHandle {
                mode: SecretMode::Generated,
                reference: "generated:x".into(),
            },
            location: None,
        };
        resolve(registry.get("cluster-v5").unwrap(), &context, &secret).unwrap()
    }

    fn outputs(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_host_of() {
        assert_eq!(host_of("http://10.0.1.4:7474"), Some("10.0.1.4"));
        assert_eq!(
            host_of("http://vm0.eastus.cloudapp.azure.com:7474/browser/"),
            Some("vm0.eastus.cloudapp.azure.com")
        );
        assert_eq!(host_of("db.example"), Some("db.example"));
        assert_eq!(host_of("http://"), None);
    }

    #[test]
    fn test_parameters_document_includes_secure_values() {
        let deployment = deployment();
        let doc = parameters_document(&deployment);

        assert_eq!(doc["contentVersion"], "1.0.0.0");
        assert_eq!(doc["parameters"]["adminPassword"]["value"], "Arm-Test-Passw0rd");
        assert_eq!(doc["parameters"]["nodeCount"]["value"], 3);
    }

    #[test]
    fn test_template_file_per_kind() {
        let provider = ArmProvider::new(AzCli::new(None), "/templates");
        assert_eq!(
            provider.template_file(TemplateKind::EnterpriseAks),
            PathBuf::from("/templates/neo4j-enterprise-aks/main.bicep")
        );
    }

    #[test]
    fn test_parse_outputs_prefers_cluster_url() {
        let parsed = parse_outputs(&outputs(json!({
            "neo4jBrowserURL": { "type": "String", "value": "http://node0:7474" },
            "neo4jClusterBrowserURL": { "type": "String", "value": "http://lb.example:7474" },
            "neo4jBloomURL": { "type": "String", "value": "http://lb.example:7474/bloom" },
        })))
        .unwrap();

        assert_eq!(parsed.endpoint_host, "lb.example");
        assert_eq!(parsed.browser_url.as_deref(), Some("http://lb.example:7474"));
        assert_eq!(parsed.values["neo4jBloomURL"], "http://lb.example:7474/bloom");
    }

    #[test]
    fn test_parse_outputs_without_endpoint() {
        let result = parse_outputs(&outputs(json!({ "other": { "value": 1 } })));
        assert!(matches!(result, Err(ProvisioningError::Failed(_))));
    }

    #[test]
    fn test_status_mapping() {
        let running: DeploymentProperties =
            serde_json::from_value(json!({ "provisioningState": "Accepted" })).unwrap();
        assert_eq!(status_from(running).unwrap(), OperationStatus::Running);

        let failed: DeploymentProperties = serde_json::from_value(json!({
            "provisioningState": "Failed",
            "error": { "code": "DeploymentFailed", "message": "VM extension failed" }
        }))
        .unwrap();
        assert_eq!(
            status_from(failed).unwrap(),
            OperationStatus::Failed("DeploymentFailed: VM extension failed".into())
        );

        let done: DeploymentProperties = serde_json::from_value(json!({
            "provisioningState": "Succeeded",
            "outputs": { "neo4jBrowserURL": { "value": "http://db.example:7474" } }
        }))
        .unwrap();
        match status_from(done).unwrap() {
            OperationStatus::Succeeded(outputs) => assert_eq!(outputs.endpoint_host, "db.example"),
            other => panic!("unexpected status {:?}", other),
        }
    }

    #[test]
    fn test_ownership_from_tags() {
        assert_eq!(
            ownership_from_tags(&json!({ "managed-by": "neodeploy", "scenario": "x" })),
            GroupOwnership::Managed
        );
        assert_eq!(
            ownership_from_tags(&json!({ "managed-by": "terraform" })),
            GroupOwnership::Foreign
        );
        assert_eq!(ownership_from_tags(&json!({})), GroupOwnership::Foreign);
        assert_eq!(ownership_from_tags(&Value::Null), GroupOwnership::Foreign);
    }

    #[tokio::test]
    async fn test_validate_without_template_is_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let provider = ArmProvider::new(
            AzCli::new(None).with_program("neodeploy-az-does-not-exist"),
            temp_dir.path(),
        );

        let result = provider.validate_template(&deployment()).await;
        assert!(matches!(
            result,
            Err(ProvisioningError::Rejected { ref code, .. }) if code == "TemplateNotFound"
        ));
    }

    /// Stand-in az that knows the group and fails template validation
    #[cfg(unix)]
    fn rejecting_az(dir: &Path) -> AzCli {
        use std::os::unix::fs::PermissionsExt;
        let script = dir.join("az");
        std::fs::write(
            &script,
            "#!/bin/sh\n\
             case \"$*\" in\n\
             \"group exists\"*) echo true ;;\n\
             \"deployment group validate\"*) echo \"ERROR: (InvalidTemplate) Deployment template validation failed\" >&2; exit 1 ;;\n\
             *) exit 2 ;;\n\
             esac\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        AzCli::new(None).with_program(script.display().to_string())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_validation_failure_is_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let deployment = deployment();
        let provider = ArmProvider::new(rejecting_az(temp_dir.path()), temp_dir.path());
        let template = provider.template_file(deployment.template);
        std::fs::create_dir_all(template.parent().unwrap()).unwrap();
        std::fs::write(&template, "param nodeCount int\n").unwrap();

        let result = provider.validate_template(&deployment).await;
        assert_eq!(
            result,
            Err(ProvisioningError::Rejected {
                code: "InvalidTemplate".into(),
                message: "(InvalidTemplate) Deployment template validation failed".into(),
            })
        );
    }

    #[tokio::test]
    async fn test_missing_template_is_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let provider = ArmProvider::new(AzCli::new(None), temp_dir.path());

        let result = provider.submit(&deployment()).await;
        assert!(matches!(
            result,
            Err(ProvisioningError::Rejected { ref code, .. }) if code == "TemplateNotFound"
        ));
    }
}
