//! Provisioning parameter resolution and deterministic resource naming.

use crate::error::Result;
use crate::model::{Edition, LicenseType, Platform, Scenario};
use crate::protocol::{self, NetworkPlan, ProtocolSelection};
use crate::secret::{ResolvedSecret, SecretHandle, SecretMode, SecretValue};
use serde::Serialize;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

pub const SUFFIX_LEN: usize = 10;
pub const RESOURCE_GROUP_MAX: usize = 90;
/// Scenario characters a resource group name always has room for
pub const MIN_SCENARIO_SEGMENT: usize = 38;
/// Longest `resource_group_prefix` accepted by workspace settings
pub const MAX_PREFIX_LEN: usize = RESOURCE_GROUP_MAX - SUFFIX_LEN - 2 - MIN_SCENARIO_SEGMENT;
pub const DEPLOYMENT_NAME_MAX: usize = 64;
pub const DEPLOYMENT_NAME_PREFIX: &str = "neo4j-deploy";
pub const MANAGED_BY: &str = "neodeploy";
pub const ADMIN_PASSWORD_PARAM: &str = "adminPassword";

/// Stable per-(workspace, scenario) suffix. Never depends on time.
pub fn naming_suffix(workspace_id: &str, scenario_name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(workspace_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(scenario_name.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<String>()[..SUFFIX_LEN]
        .to_string()
}

/// Scenario name as it may appear inside Azure resource names.
fn safe_segment(scenario_name: &str, max_len: usize) -> String {
    let safe: String = scenario_name
        .chars()
        .filter(|c| *c != '.')
        .map(|c| if c == '_' { '-' } else { c })
        .take(max_len)
        .collect();
    safe.trim_end_matches('-').to_string()
}

pub fn resource_group_name(prefix: &str, scenario_name: &str, suffix: &str) -> String {
    let budget = RESOURCE_GROUP_MAX.saturating_sub(prefix.len() + suffix.len() + 2);
    format!("{}-{}-{}", prefix, safe_segment(scenario_name, budget), suffix)
}

pub fn deployment_name(scenario_name: &str, suffix: &str) -> String {
    let budget = DEPLOYMENT_NAME_MAX.saturating_sub(DEPLOYMENT_NAME_PREFIX.len() + suffix.len() + 2);
    format!(
        "{}-{}-{}",
        DEPLOYMENT_NAME_PREFIX,
        safe_segment(scenario_name, budget),
        suffix
    )
}

/// Workspace-level inputs to resolution.
#[derive(Debug, Clone)]
pub struct DeploymentContext {
    pub workspace_id: String,
    pub resource_group_prefix: String,
    pub default_region: String,
    pub owner: Option<String>,
    /// Overrides both the workspace default and the scenario region.
    pub region_override: Option<String>,
}

impl DeploymentContext {
    pub fn region_for(&self, scenario: &Scenario) -> String {
        self.region_override
            .clone()
            .or_else(|| scenario.region.clone())
            .unwrap_or_else(|| self.default_region.clone())
    }
}

/// Which provisioning template a scenario needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TemplateKind {
    Community,
    Enterprise,
    EnterpriseAks,
}

impl TemplateKind {
    pub fn for_scenario(scenario: &Scenario) -> Self {
        match (scenario.edition, scenario.platform) {
            (Edition::Community, _) => TemplateKind::Community,
            (_, Platform::Vm) => TemplateKind::Enterprise,
            (_, Platform::Aks) => TemplateKind::EnterpriseAks,
        }
    }

    pub fn dir_name(&self) -> &'static str {
        match self {
            TemplateKind::Community => "neo4j-community",
            TemplateKind::Enterprise => "neo4j-enterprise",
            TemplateKind::EnterpriseAks => "neo4j-enterprise-aks",
        }
    }
}

/// Non-secret template parameters keyed by name.
pub type ParameterSet = BTreeMap<String, Value>;

/// Secret template parameters. Only ever formatted redacted.
#[derive(Clone, Default)]
pub struct SecureParameters(BTreeMap<String, SecretValue>);

impl SecureParameters {
    pub fn insert(&mut self, name: impl Into<String>, value: SecretValue) {
        self.0.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&SecretValue> {
        self.0.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &SecretValue)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecureParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.keys()).finish()
    }
}

/// Everything needed to submit one deployment of a scenario.
#[derive(Debug, Clone)]
pub struct ResolvedDeployment {
    pub scenario: String,
    pub node_count: u8,
    pub naming_suffix: String,
    pub resource_group: String,
    pub deployment_name: String,
    pub region: String,
    pub template: TemplateKind,
    pub protocol: ProtocolSelection,
    pub network: NetworkPlan,
    pub parameters: ParameterSet,
    pub secure_parameters: SecureParameters,
    pub tags: BTreeMap<String, String>,
    pub secret_handle: SecretHandle,
    pub secret: SecretValue,
}

impl ResolvedDeployment {
    /// Enterprise edition running on an evaluation license
    pub fn is_evaluation(&self) -> bool {
        self.parameters.get("licenseType").and_then(Value::as_str)
            == Some(LicenseType::Evaluation.as_param())
    }
}

fn yes_no(flag: bool) -> Value {
    Value::from(if flag { "Yes" } else { "No" })
}

pub fn resolve(
    scenario: &Scenario,
    context: &DeploymentContext,
    secret: &ResolvedSecret,
) -> Result<ResolvedDeployment> {
    let protocol = protocol::select(scenario.edition, scenario.node_count)?;
    let network = protocol::network_plan(scenario.edition, scenario.node_count)?;
    let suffix = naming_suffix(&context.workspace_id, &scenario.name);
    let region = context.region_for(scenario);

    let mut p = ParameterSet::new();
    p.insert("location".into(), json!(region));
    p.insert("nodeCount".into(), json!(scenario.node_count));
    p.insert(
        "graphDatabaseVersion".into(),
        json!(scenario.version.as_str()),
    );
    p.insert("diskSize".into(), json!(scenario.sizing.disk_size_gb));

    match scenario.platform {
        Platform::Vm => {
            p.insert("vmSize".into(), json!(scenario.sizing.vm_size));
        }
        Platform::Aks => {
            p.insert("userNodeSize".into(), json!(scenario.sizing.vm_size));
            if let Some(k8s) = &scenario.kubernetes {
                p.insert("kubernetesVersion".into(), json!(k8s.version));
                p.insert("userNodeCountMin".into(), json!(k8s.min_nodes));
                p.insert("userNodeCountMax".into(), json!(k8s.max_nodes));
            }
        }
    }

    if scenario.edition.is_enterprise() {
        let license = scenario.license.unwrap_or(LicenseType::Enterprise);
        p.insert("licenseType".into(), json!(license.as_param()));

        let gds = scenario.plugins.graph_data_science.as_ref();
        p.insert("installGraphDataScience".into(), yes_no(gds.is_some()));
        if let Some(key) = gds.and_then(|c| c.license_key.as_ref()) {
            p.insert("graphDataScienceLicenseKey".into(), json!(key));
        }

        let bloom = scenario.plugins.bloom.as_ref();
        p.insert("installBloom".into(), yes_no(bloom.is_some()));
        if let Some(key) = bloom.and_then(|c| c.license_key.as_ref()) {
            p.insert("bloomLicenseKey".into(), json!(key));
        }
    }

    let replicas = &scenario.read_replicas;
    if replicas.count > 0 {
        p.insert("readReplicaCount".into(), json!(replicas.count));
        p.insert(
            "readReplicaVmSize".into(),
            json!(
                replicas
                    .vm_size
                    .clone()
                    .unwrap_or_else(|| scenario.sizing.vm_size.clone())
            ),
        );
        p.insert("readReplicaDiskSize".into(), json!(replicas.disk_size_gb));
    }

    p.insert("publicPorts".into(), json!(network.public_ports));
    if !network.cluster_ports.is_empty() {
        p.insert("clusterPorts".into(), json!(network.cluster_ports));
    }

    if secret.handle.mode == SecretMode::StoreBacked {
        if let Some(location) = &secret.location {
            p.insert("keyVaultName".into(), json!(location.store));
            if let Some(rg) = &location.resource_group {
                p.insert("keyVaultResourceGroup".into(), json!(rg));
            }
            p.insert(
                "adminPasswordSecretName".into(),
                json!(location.secret_name),
            );
        }
    }

    let mut secure_parameters = SecureParameters::default();
    secure_parameters.insert(ADMIN_PASSWORD_PARAM, secret.value.clone());

    let mut tags = BTreeMap::new();
    tags.insert("managed-by".to_string(), MANAGED_BY.to_string());
    tags.insert("scenario".to_string(), scenario.name.clone());
    tags.insert("workspace".to_string(), context.workspace_id.clone());
    if let Some(owner) = &context.owner {
        tags.insert("owner".to_string(), owner.clone());
    }

    Ok(ResolvedDeployment {
        scenario: scenario.name.clone(),
        node_count: scenario.node_count,
        resource_group: resource_group_name(&context.resource_group_prefix, &scenario.name, &suffix),
        deployment_name: deployment_name(&scenario.name, &suffix),
        naming_suffix: suffix,
        region,
        template: TemplateKind::for_scenario(scenario),
        protocol,
        network,
        parameters: p,
        secure_parameters,
        tags,
        secret_handle: secret.handle.clone(),
        secret: secret.value.clone(),
    })
}
