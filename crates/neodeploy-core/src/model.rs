//! Scenario model
//!
//! `ScenarioSpec` is the on-disk schema (strict, unknown fields rejected).
//! `Scenario` is the validated, immutable form handed to the rest of the
//! system. The only way from one to the other is [`ScenarioSpec::validate`].

use crate::error::ScenarioIssue;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::sync::LazyLock;

pub const MIN_DISK_GB: u32 = 32;
pub const CLUSTER_MIN_NODES: u8 = 3;
pub const CLUSTER_MAX_NODES: u8 = 10;
pub const MAX_READ_REPLICAS: u8 = 10;
pub const DEFAULT_KUBERNETES_VERSION: &str = "1.30";

static SCENARIO_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9._-]{0,47}$").expect("static regex"));

/// Licensing tier, which constrains the allowed topology shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Edition {
    Community,
    EnterpriseStandalone,
    EnterpriseCluster,
}

impl Edition {
    pub fn is_enterprise(&self) -> bool {
        !matches!(self, Edition::Community)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Edition::Community => "community",
            Edition::EnterpriseStandalone => "enterprise-standalone",
            Edition::EnterpriseCluster => "enterprise-cluster",
        }
    }
}

impl fmt::Display for Edition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the database runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[default]
    Vm,
    Aks,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Vm => write!(f, "vm"),
            Platform::Aks => write!(f, "aks"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DatabaseVersion {
    #[serde(rename = "5")]
    V5,
    #[serde(rename = "4.4")]
    V4_4,
}

impl DatabaseVersion {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "5" => Some(Self::V5),
            "4.4" => Some(Self::V4_4),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::V5 => "5",
            Self::V4_4 => "4.4",
        }
    }
}

impl fmt::Display for DatabaseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LicenseType {
    Enterprise,
    Evaluation,
}

impl LicenseType {
    /// Value expected by the provisioning template.
    pub fn as_param(&self) -> &'static str {
        match self {
            LicenseType::Enterprise => "Enterprise",
            LicenseType::Evaluation => "Evaluation",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Sizing {
    pub vm_size: String,
    pub disk_size_gb: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReadReplicas {
    pub count: u8,
    pub vm_size: Option<String>,
    pub disk_size_gb: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PluginConfig {
    #[serde(default)]
    pub license_key: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Plugins {
    #[serde(default)]
    pub graph_data_science: Option<PluginConfig>,
    #[serde(default)]
    pub bloom: Option<PluginConfig>,
}

impl Plugins {
    pub fn is_empty(&self) -> bool {
        self.graph_data_science.is_none() && self.bloom.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KubernetesConfig {
    pub version: String,
    pub min_nodes: u8,
    pub max_nodes: u8,
}

/// Explicit credential binding for a scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "lowercase", deny_unknown_fields)]
pub enum CredentialBinding {
    /// Value supplied through an environment variable.
    Environment { variable: String },
    /// Value held in the secret store under this reference.
    Store { reference: String },
}

/// What happens to a deployment's resources once a run ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CleanupMode {
    /// Delete after every run.
    Immediate,
    /// Delete only when the run succeeded; keep failures for inspection.
    OnSuccess,
    /// Never delete automatically.
    #[default]
    Manual,
}

impl CleanupMode {
    pub fn should_clean(&self, succeeded: bool) -> bool {
        match self {
            CleanupMode::Immediate => true,
            CleanupMode::OnSuccess => succeeded,
            CleanupMode::Manual => false,
        }
    }
}

impl fmt::Display for CleanupMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CleanupMode::Immediate => write!(f, "immediate"),
            CleanupMode::OnSuccess => write!(f, "on-success"),
            CleanupMode::Manual => write!(f, "manual"),
        }
    }
}

impl std::str::FromStr for CleanupMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "immediate" => Ok(CleanupMode::Immediate),
            "on-success" => Ok(CleanupMode::OnSuccess),
            "manual" => Ok(CleanupMode::Manual),
            other => Err(format!(
                "unknown cleanup mode '{}' (expected immediate, on-success or manual)",
                other
            )),
        }
    }
}

/// Validated scenario. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Scenario {
    pub name: String,
    pub edition: Edition,
    pub platform: Platform,
    pub node_count: u8,
    pub version: DatabaseVersion,
    pub sizing: Sizing,
    pub read_replicas: ReadReplicas,
    pub license: Option<LicenseType>,
    pub plugins: Plugins,
    pub kubernetes: Option<KubernetesConfig>,
    pub region: Option<String>,
    pub credential: Option<CredentialBinding>,
}

impl Scenario {
    pub fn is_cluster(&self) -> bool {
        self.node_count > 1
    }
}

// ---------------------------------------------------------------------------
// On-disk schema
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SizingSpec {
    #[serde(default)]
    pub vm_size: Option<String>,
    #[serde(default)]
    pub disk_size_gb: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReadReplicaSpec {
    #[serde(default)]
    pub count: u8,
    #[serde(default)]
    pub vm_size: Option<String>,
    #[serde(default)]
    pub disk_size_gb: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KubernetesSpec {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub min_nodes: Option<u8>,
    #[serde(default)]
    pub max_nodes: Option<u8>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioSpec {
    pub name: String,
    pub edition: Edition,
    #[serde(default)]
    pub platform: Platform,
    pub node_count: u8,
    #[serde(deserialize_with = "version_string")]
    pub version: String,
    #[serde(default)]
    pub sizing: Option<SizingSpec>,
    #[serde(default)]
    pub read_replicas: Option<ReadReplicaSpec>,
    #[serde(default)]
    pub license: Option<LicenseType>,
    #[serde(default)]
    pub plugins: Plugins,
    #[serde(default)]
    pub kubernetes: Option<KubernetesSpec>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub credential: Option<CredentialBinding>,
}

/// Accepts both `version: 5` and `version: "5"`.
fn version_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    match serde_yaml::Value::deserialize(deserializer)? {
        serde_yaml::Value::String(s) => Ok(s),
        serde_yaml::Value::Number(n) => Ok(n.to_string()),
        other => Err(D::Error::custom(format!(
            "version must be a string or number, got {:?}",
            other
        ))),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

impl ScenarioSpec {
    /// Check every invariant and build the immutable scenario.
    ///
    /// All violations are reported; nothing is silently defaulted except the
    /// documented optional fields (platform, kubernetes version, replica disk).
    pub fn validate(self) -> std::result::Result<Scenario, Vec<ScenarioIssue>> {
        let name = self.name.clone();
        let mut issues = Vec::new();
        let mut issue = |reason: String| issues.push(ScenarioIssue::new(name.clone(), reason));

        if !SCENARIO_NAME.is_match(&self.name) {
            issue(format!(
                "name '{}' must match [a-z0-9][a-z0-9._-]* and be at most 48 characters",
                self.name
            ));
        }

        match self.edition {
            Edition::Community | Edition::EnterpriseStandalone => {
                if self.node_count != 1 {
                    issue(format!(
                        "{} supports only node_count = 1, got {}",
                        self.edition, self.node_count
                    ));
                }
            }
            Edition::EnterpriseCluster => {
                if !(CLUSTER_MIN_NODES..=CLUSTER_MAX_NODES).contains(&self.node_count) {
                    issue(format!(
                        "enterprise-cluster requires node_count in {}..={}, got {}",
                        CLUSTER_MIN_NODES, CLUSTER_MAX_NODES, self.node_count
                    ));
                }
            }
        }

        let version = DatabaseVersion::parse(&self.version);
        if version.is_none() {
            issue(format!(
                "version must be \"5\" or \"4.4\", got \"{}\"",
                self.version
            ));
        }

        let sizing = self.sizing.unwrap_or_default();
        let vm_size = non_blank(sizing.vm_size);
        if vm_size.is_none() {
            issue("sizing.vm_size is required".to_string());
        }
        match sizing.disk_size_gb {
            None => issue("sizing.disk_size_gb is required".to_string()),
            Some(d) if d < MIN_DISK_GB => issue(format!(
                "sizing.disk_size_gb must be at least {}, got {}",
                MIN_DISK_GB, d
            )),
            Some(_) => {}
        }

        let replicas = self.read_replicas.unwrap_or_default();
        if replicas.count > 0 {
            if self.edition != Edition::EnterpriseCluster {
                issue(format!(
                    "{} does not support read replicas (read_replicas.count must be 0)",
                    self.edition
                ));
            } else if self.platform != Platform::Vm {
                issue("read replicas are only supported on the vm platform".to_string());
            } else if version != Some(DatabaseVersion::V4_4) {
                issue("read replicas are only supported with version 4.4".to_string());
            }
            if replicas.count > MAX_READ_REPLICAS {
                issue(format!(
                    "read_replicas.count must be at most {}, got {}",
                    MAX_READ_REPLICAS, replicas.count
                ));
            }
        }
        let replica_disk = replicas.disk_size_gb.unwrap_or(MIN_DISK_GB);
        if replica_disk < MIN_DISK_GB {
            issue(format!(
                "read_replicas.disk_size_gb must be at least {}, got {}",
                MIN_DISK_GB, replica_disk
            ));
        }

        if self.edition == Edition::Community {
            if self.license.is_some() {
                issue("license is not applicable to community".to_string());
            }
            if !self.plugins.is_empty() {
                issue("plugins are not available for community".to_string());
            }
            if self.platform != Platform::Vm {
                issue("community is only available on the vm platform".to_string());
            }
        }

        let kubernetes = match (self.platform, self.kubernetes) {
            (Platform::Vm, Some(_)) => {
                issue("kubernetes settings are only valid on the aks platform".to_string());
                None
            }
            (Platform::Vm, None) => None,
            (Platform::Aks, spec) => {
                let spec = spec.unwrap_or_default();
                let min_nodes = spec.min_nodes.unwrap_or(1);
                let max_nodes = spec.max_nodes.unwrap_or(CLUSTER_MAX_NODES);
                if !(1..=CLUSTER_MAX_NODES).contains(&min_nodes)
                    || !(1..=CLUSTER_MAX_NODES).contains(&max_nodes)
                {
                    issue(format!(
                        "kubernetes node counts must be within 1..={}",
                        CLUSTER_MAX_NODES
                    ));
                } else if min_nodes > max_nodes {
                    issue(format!(
                        "kubernetes.min_nodes ({}) exceeds kubernetes.max_nodes ({})",
                        min_nodes, max_nodes
                    ));
                }
                Some(KubernetesConfig {
                    version: non_blank(spec.version)
                        .unwrap_or_else(|| DEFAULT_KUBERNETES_VERSION.to_string()),
                    min_nodes,
                    max_nodes,
                })
            }
        };

        if let Some(binding) = &self.credential {
            let blank = match binding {
                CredentialBinding::Environment { variable } => variable.trim().is_empty(),
                CredentialBinding::Store { reference } => reference.trim().is_empty(),
            };
            if blank {
                issue("credential binding must name a variable or reference".to_string());
            }
        }

        if !issues.is_empty() {
            return Err(issues);
        }

        // Both are guaranteed present when no issue was recorded.
        let (Some(version), Some(vm_size), Some(disk_size_gb)) =
            (version, vm_size, sizing.disk_size_gb)
        else {
            return Err(vec![ScenarioIssue::new(
                self.name,
                "incomplete scenario".to_string(),
            )]);
        };

        Ok(Scenario {
            name: self.name,
            edition: self.edition,
            platform: self.platform,
            node_count: self.node_count,
            version,
            sizing: Sizing {
                vm_size,
                disk_size_gb,
            },
            read_replicas: ReadReplicas {
                count: replicas.count,
                vm_size: non_blank(replicas.vm_size),
                disk_size_gb: replica_disk,
            },
            license: self.license,
            plugins: self.plugins,
            kubernetes,
            region: non_blank(self.region),
            credential: self.credential,
        })
    }
}
