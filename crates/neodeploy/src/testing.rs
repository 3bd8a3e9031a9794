//! Fixtures shared by the command tests.

use async_trait::async_trait;
use neodeploy_cloud::{
    DeleteOutcome, GroupOwnership, OperationHandle, OperationStatus, ProvisioningBoundary,
    ProvisioningError, TemplateValidation,
};
use neodeploy_core::{
    DeploymentContext, ResolvedDeployment, ResolvedSecret, ScenarioRegistry, SecretHandle,
    SecretMode, SecretValue, params,
};

pub const SCENARIOS: &str = r#"
scenarios:
  - name: standalone-v5
    edition: enterprise-standalone
    node_count: 1
    version: "5"
    sizing: { vm_size: Standard_E4s_v5, disk_size_gb: 32 }
  - name: cluster-v5
    edition: enterprise-cluster
    node_count: 3
    version: "5"
    sizing: { vm_size: Standard_E4s_v5, disk_size_gb: 64 }
"#;

pub fn registry() -> ScenarioRegistry {
    ScenarioRegistry::from_yaml_str(SCENARIOS).unwrap()
}

pub fn context() -> DeploymentContext {
    DeploymentContext {
        workspace_id: "ws".into(),
        resource_group_prefix: "neo4j-test".into(),
        default_region: "eastus".into(),
        owner: None,
        region_override: None,
    }
}

pub fn deployment(scenario: &str) -> ResolvedDeployment {
    let secret = ResolvedSecret {
        value: SecretValue::new("Command-Test-Passw0rd"),
        handle: SecretHandle {
            mode: SecretMode::Generated,
            reference: "generated".into(),
        },
        location: None,
    };
    params::resolve(registry().get(scenario).unwrap(), &context(), &secret).unwrap()
}

/// Boundary that only answers template validation
pub struct TemplateVerdict(pub Result<TemplateValidation, ProvisioningError>);

impl TemplateVerdict {
    pub fn accepting() -> Self {
        Self(Ok(TemplateValidation::Validated))
    }
}

#[async_trait]
impl ProvisioningBoundary for TemplateVerdict {
    fn name(&self) -> &str {
        "template-verdict"
    }

    async fn ensure_resource_group(&self, _: &ResolvedDeployment) -> Result<(), ProvisioningError> {
        unreachable!("commands under test never create resource groups")
    }

    async fn validate_template(
        &self,
        _: &ResolvedDeployment,
    ) -> Result<TemplateValidation, ProvisioningError> {
        self.0.clone()
    }

    async fn submit(&self, _: &ResolvedDeployment) -> Result<OperationHandle, ProvisioningError> {
        unreachable!("commands under test never submit")
    }

    async fn poll(&self, _: &OperationHandle) -> Result<OperationStatus, ProvisioningError> {
        unreachable!("commands under test never poll")
    }

    async fn resource_group_ownership(&self, _: &str) -> Result<GroupOwnership, ProvisioningError> {
        unreachable!("commands under test never inspect ownership")
    }

    async fn delete_resource_group(&self, _: &str) -> Result<DeleteOutcome, ProvisioningError> {
        unreachable!("commands under test never delete")
    }
}
