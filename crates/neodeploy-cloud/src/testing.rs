//! Scripted boundaries shared by the unit tests in this crate.

use crate::probe::{ConnectTarget, DatabaseClient, DatabaseError, DatabaseSession};
use crate::provider::{
    DeleteOutcome, DeploymentOutputs, GroupOwnership, OperationHandle, OperationStatus,
    ProvisioningBoundary, ProvisioningError, TemplateValidation,
};
use async_trait::async_trait;
use neodeploy_core::{
    DeploymentContext, ResolvedDeployment, ResolvedSecret, ScenarioRegistry, SecretHandle,
    SecretMode, SecretValue,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub const TEST_PASSWORD: &str = "Test-Admin-Passw0rd";

const SCENARIOS: &str = r#"
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

pub fn resolved(scenario: &str) -> ResolvedDeployment {
    resolved_with_password(scenario, TEST_PASSWORD)
}

pub fn resolved_with_password(scenario: &str, password: &str) -> ResolvedDeployment {
    let registry = ScenarioRegistry::from_yaml_str(SCENARIOS).unwrap();
    let context = DeploymentContext {
        workspace_id: "test-workspace".into(),
        resource_group_prefix: "neo4j-test".into(),
        default_region: "eastus".into(),
        owner: None,
        region_override: None,
    };
    let secret = ResolvedSecret {
        value: SecretValue::new(password),
        handle: SecretHandle {
            mode: SecretMode::Generated,
            reference: "generated:test".into(),
        },
        location: None,
    };
    neodeploy_core::params::resolve(registry.get(scenario).unwrap(), &context, &secret).unwrap()
}

pub fn outputs(host: &str) -> DeploymentOutputs {
    DeploymentOutputs {
        endpoint_host: host.to_string(),
        browser_url: Some(format!("http://{}:7474", host)),
        values: Default::default(),
    }
}

#[derive(Default)]
pub struct ScriptedBoundary {
    submits: Mutex<VecDeque<Result<(), ProvisioningError>>>,
    polls: Mutex<VecDeque<Result<OperationStatus, ProvisioningError>>>,
    validation: Mutex<Option<ProvisioningError>>,
    groups: Mutex<HashSet<String>>,
    foreign_groups: Mutex<HashSet<String>>,
    failing_deletes: Mutex<HashSet<String>>,
    pub validate_calls: AtomicUsize,
    pub submit_calls: AtomicUsize,
    pub poll_calls: AtomicUsize,
    pub delete_calls: AtomicUsize,
}

impl ScriptedBoundary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Outcomes of successive submit calls; afterwards submits succeed.
    pub fn with_submits(self, submits: Vec<Result<(), ProvisioningError>>) -> Self {
        *self.submits.lock().unwrap() = submits.into();
        self
    }

    /// Outcomes of successive polls; afterwards polls report success.
    pub fn with_polls(self, polls: Vec<Result<OperationStatus, ProvisioningError>>) -> Self {
        *self.polls.lock().unwrap() = polls.into();
        self
    }

    /// Template validation fails with this error.
    pub fn rejecting_template(self, error: ProvisioningError) -> Self {
        *self.validation.lock().unwrap() = Some(error);
        self
    }

    pub fn with_group(self, resource_group: &str) -> Self {
        self.groups.lock().unwrap().insert(resource_group.to_string());
        self
    }

    /// An existing group without the ownership tag.
    pub fn with_foreign_group(self, resource_group: &str) -> Self {
        self.foreign_groups
            .lock()
            .unwrap()
            .insert(resource_group.to_string());
        self.with_group(resource_group)
    }

    pub fn failing_delete(self, resource_group: &str) -> Self {
        self.failing_deletes
            .lock()
            .unwrap()
            .insert(resource_group.to_string());
        self
    }

    pub fn has_group(&self, resource_group: &str) -> bool {
        self.groups.lock().unwrap().contains(resource_group)
    }
}

#[async_trait]
impl ProvisioningBoundary for ScriptedBoundary {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn ensure_resource_group(
        &self,
        deployment: &ResolvedDeployment,
    ) -> Result<(), ProvisioningError> {
        self.groups
            .lock()
            .unwrap()
            .insert(deployment.resource_group.clone());
        Ok(())
    }

    async fn validate_template(
        &self,
        _deployment: &ResolvedDeployment,
    ) -> Result<TemplateValidation, ProvisioningError> {
        self.validate_calls.fetch_add(1, Ordering::SeqCst);
        match self.validation.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(TemplateValidation::Validated),
        }
    }

    async fn submit(
        &self,
        deployment: &ResolvedDeployment,
    ) -> Result<OperationHandle, ProvisioningError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        let next = self.submits.lock().unwrap().pop_front();
        next.unwrap_or(Ok(()))?;
        Ok(OperationHandle::new(
            &deployment.resource_group,
            &deployment.deployment_name,
        ))
    }

    async fn poll(&self, _handle: &OperationHandle) -> Result<OperationStatus, ProvisioningError> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        let next = self.polls.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(OperationStatus::Succeeded(outputs("db.example"))))
    }

    async fn resource_group_ownership(
        &self,
        resource_group: &str,
    ) -> Result<GroupOwnership, ProvisioningError> {
        if !self.groups.lock().unwrap().contains(resource_group) {
            Ok(GroupOwnership::Absent)
        } else if self.foreign_groups.lock().unwrap().contains(resource_group) {
            Ok(GroupOwnership::Foreign)
        } else {
            Ok(GroupOwnership::Managed)
        }
    }

    async fn delete_resource_group(
        &self,
        resource_group: &str,
    ) -> Result<DeleteOutcome, ProvisioningError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_deletes.lock().unwrap().contains(resource_group) {
            return Err(ProvisioningError::Failed(format!(
                "cannot delete {}",
                resource_group
            )));
        }
        if self.groups.lock().unwrap().remove(resource_group) {
            Ok(DeleteOutcome::Deleted)
        } else {
            Ok(DeleteOutcome::AlreadyAbsent)
        }
    }
}

/// Behaviour of one scripted session.
#[derive(Debug, Clone, Default)]
pub struct SessionScript {
    members: Option<usize>,
    corrupt: bool,
    fail_delete: bool,
    stall: bool,
    license: Option<String>,
}

impl SessionScript {
    pub fn healthy() -> Self {
        Self::default()
    }

    pub fn with_members(mut self, members: usize) -> Self {
        self.members = Some(members);
        self
    }

    pub fn corrupting(mut self) -> Self {
        self.corrupt = true;
        self
    }

    pub fn failing_delete(mut self) -> Self {
        self.fail_delete = true;
        self
    }

    pub fn stalling(mut self) -> Self {
        self.stall = true;
        self
    }

    pub fn with_license(mut self, license: &str) -> Self {
        self.license = Some(license.to_string());
        self
    }
}

pub struct ScriptedClient {
    script: Mutex<VecDeque<Result<SessionScript, DatabaseError>>>,
}

impl ScriptedClient {
    pub fn new(script: Vec<Result<SessionScript, DatabaseError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
        }
    }
}

#[async_trait]
impl DatabaseClient for ScriptedClient {
    async fn connect(
        &self,
        _target: &ConnectTarget,
    ) -> Result<Box<dyn DatabaseSession>, DatabaseError> {
        let next = self.script.lock().unwrap().pop_front();
        let script = next.unwrap_or_else(|| Err(DatabaseError::Connect("script exhausted".into())))?;
        if script.stall {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        Ok(Box::new(ScriptedSession {
            script,
            stored: HashMap::new(),
        }))
    }
}

struct ScriptedSession {
    script: SessionScript,
    stored: HashMap<String, String>,
}

#[async_trait]
impl DatabaseSession for ScriptedSession {
    async fn write_marker(&mut self, marker: &str, value: &str) -> Result<(), DatabaseError> {
        let value = if self.script.corrupt {
            format!("{}-corrupted", value)
        } else {
            value.to_string()
        };
        self.stored.insert(marker.to_string(), value);
        Ok(())
    }

    async fn read_marker(&mut self, marker: &str) -> Result<Option<String>, DatabaseError> {
        Ok(self.stored.get(marker).cloned())
    }

    async fn delete_marker(&mut self, marker: &str) -> Result<(), DatabaseError> {
        if self.script.fail_delete {
            return Err(DatabaseError::Query("delete not permitted".into()));
        }
        self.stored.remove(marker);
        Ok(())
    }

    async fn cluster_members(&mut self) -> Result<Option<usize>, DatabaseError> {
        Ok(self.script.members)
    }

    async fn accepted_license(&mut self) -> Result<Option<String>, DatabaseError> {
        Ok(self.script.license.clone())
    }

    async fn close(self: Box<Self>) -> Result<(), DatabaseError> {
        Ok(())
    }
}
