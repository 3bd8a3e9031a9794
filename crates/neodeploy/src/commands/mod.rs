pub mod cleanup;
pub mod deploy;
pub mod setup;
pub mod status;
pub mod validate;

use crate::cypher::CypherShellClient;
use anyhow::Context as _;
use colored::Colorize;
use neodeploy_cloud::{
    DeploymentRecord, DeploymentState, FileStateStore, MachineConfig, ValidationProbe,
    probe_retry_policy, provisioning_retry_policy,
};
use neodeploy_cloud_azure::{ArmProvider, AzCli, KeyVaultStore};
use neodeploy_config::{Settings, Workspace};
use neodeploy_core::{
    Backoff, CredentialBinding, DefaultStoreReference, DeploymentContext, ResolvedDeployment,
    ResolvedSecret, Scenario, ScenarioRegistry, SecretHandle, SecretLifecycleManager, SecretMode,
    SecretValue, StoreLocation,
};
use std::sync::Arc;
use std::time::Duration;

/// How a command finished when it did not error out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// A deployment, credential or cleanup failed
    Failed,
}

/// Discovered workspace and its settings
pub struct Context {
    pub workspace: Workspace,
    pub settings: Settings,
}

impl Context {
    pub fn load() -> anyhow::Result<Self> {
        let workspace = Workspace::discover()?;
        let settings = workspace.load_settings()?;
        settings.validate()?;
        tracing::debug!(workspace = %workspace.dir().display(), "Workspace loaded");
        Ok(Self {
            workspace,
            settings,
        })
    }

    pub fn registry(&self) -> anyhow::Result<ScenarioRegistry> {
        let path = self.workspace.scenarios_path();
        let registry = ScenarioRegistry::load(&path)?;
        tracing::debug!(scenarios = registry.len(), "Scenarios loaded");
        Ok(registry)
    }

    pub fn deployment_context(&self, region_override: Option<String>) -> DeploymentContext {
        DeploymentContext {
            workspace_id: self.settings.workspace_id.clone(),
            resource_group_prefix: self.settings.resource_group_prefix.clone(),
            default_region: self.settings.default_region.clone(),
            owner: self.settings.owner.clone(),
            region_override,
        }
    }

    pub fn state_store(&self) -> Arc<FileStateStore> {
        Arc::new(FileStateStore::new(self.workspace.deployments_dir()))
    }

    pub fn az(&self) -> AzCli {
        AzCli::new(self.settings.subscription_id.clone())
            .with_timeout(self.settings.az_command_timeout())
    }

    pub fn boundary(&self, az: AzCli) -> Arc<ArmProvider> {
        Arc::new(ArmProvider::new(
            az,
            self.workspace.template_dir(&self.settings),
        ))
    }

    pub fn machine_config(&self) -> MachineConfig {
        let retry = &self.settings.retry;
        MachineConfig {
            poll_interval: self.settings.poll_interval(),
            deployment_timeout: self.settings.deployment_timeout(),
            retry: provisioning_retry_policy()
                .with_max_retries(retry.provisioning_max_retries)
                .with_backoff(Backoff::exponential(
                    Duration::from_secs(retry.provisioning_initial_delay_secs),
                    2.0,
                    Duration::from_secs(retry.provisioning_max_delay_secs),
                )),
        }
    }

    pub fn probe(&self, client: CypherShellClient) -> ValidationProbe {
        let retry = &self.settings.retry;
        ValidationProbe::new(Arc::new(client))
            .with_policy(
                probe_retry_policy()
                    .with_max_retries(retry.probe_max_retries)
                    .with_backoff(Backoff::fixed(Duration::from_secs(retry.probe_delay_secs))),
            )
            .with_attempt_timeout(self.settings.probe_attempt_timeout())
    }

    pub fn secret_manager(&self, az: &AzCli) -> SecretLifecycleManager {
        let manager =
            SecretLifecycleManager::new().with_timeout(self.settings.secret_store_timeout());
        let Some(vault) = &self.settings.key_vault else {
            return manager;
        };

        let mut store = KeyVaultStore::new(az.clone(), &vault.name);
        if let Some(resource_group) = &vault.resource_group {
            store = store.with_resource_group(resource_group);
        }
        manager
            .with_store(Arc::new(store))
            .with_default_reference(DefaultStoreReference {
                reference: vault.secret_name.clone(),
                generate_if_missing: vault.generate_if_missing,
            })
    }

    /// Stand-in credential for planning; carries the mode and store location
    /// a real resolution would produce, but no value.
    pub fn plan_secret(&self, scenario: &Scenario) -> ResolvedSecret {
        let vault_location = |reference: &str| {
            self.settings.key_vault.as_ref().map(|vault| StoreLocation {
                store: vault.name.clone(),
                resource_group: vault.resource_group.clone(),
                secret_name: reference.to_string(),
            })
        };
        let vault_reference = |reference: &str| match &self.settings.key_vault {
            Some(vault) => format!("keyvault://{}/{}", vault.name, reference),
            None => reference.to_string(),
        };

        let (mode, reference, location) = match (&scenario.credential, &self.settings.key_vault) {
            (Some(CredentialBinding::Environment { variable }), _) => {
                (SecretMode::Supplied, format!("env:{}", variable), None)
            }
            (Some(CredentialBinding::Store { reference }), _) => (
                SecretMode::StoreBacked,
                vault_reference(reference),
                vault_location(reference),
            ),
            (None, Some(vault)) => (
                SecretMode::StoreBacked,
                vault_reference(&vault.secret_name),
                vault_location(&vault.secret_name),
            ),
            (None, None) => (SecretMode::Generated, "generated".to_string(), None),
        };

        ResolvedSecret {
            value: SecretValue::new(String::new()),
            handle: SecretHandle { mode, reference },
            location,
        }
    }
}

/// Describe what a deployment would create
pub fn print_plan(plan: &ResolvedDeployment) {
    println!();
    println!("{} {}", "Scenario:".bold(), plan.scenario.cyan().bold());
    println!("  Resource group:  {}", plan.resource_group);
    println!("  Deployment:      {}", plan.deployment_name);
    println!("  Region:          {}", plan.region);
    println!("  Template:        {}", plan.template.dir_name());
    println!(
        "  Connection:      {} ({})",
        plan.protocol.scheme.to_string().cyan(),
        plan.protocol.scheme.uri_scheme()
    );
    println!(
        "  Public ports:    {}",
        join_ports(&plan.network.public_ports)
    );
    if !plan.network.cluster_ports.is_empty() {
        println!(
            "  Cluster ports:   {}",
            join_ports(&plan.network.cluster_ports)
        );
    }
    println!(
        "  Credential:      {} ({})",
        plan.secret_handle.reference, plan.secret_handle.mode
    );
    println!("  Parameters:");
    for (name, value) in &plan.parameters {
        println!("    {} = {}", name, value);
    }
    for (name, value) in plan.secure_parameters.iter() {
        println!("    {} = {}", name, value.to_string().dimmed());
    }
}

fn join_ports(ports: &[u16]) -> String {
    ports
        .iter()
        .map(u16::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn colored_state(state: DeploymentState) -> colored::ColoredString {
    let text = state.to_string();
    match state {
        DeploymentState::Succeeded => text.green(),
        DeploymentState::Failed => text.red(),
        DeploymentState::Cleaned => text.dimmed(),
        _ => text.yellow(),
    }
}

/// One-block summary of a record
pub fn print_record(record: &DeploymentRecord) {
    println!(
        "{} {} [{}] {}",
        record.short_id().bold(),
        record.scenario.cyan(),
        colored_state(record.state),
        record.resource_group.dimmed()
    );
    if let Some(connection) = &record.connection {
        println!("    uri:     {}", connection.uri);
        if let Some(browser) = &connection.browser_url {
            println!("    browser: {}", browser);
        }
    }
    if let Some(last) = record.validations.last() {
        println!(
            "    probe:   {} after {} attempt(s)",
            last.class, last.attempt
        );
    }
    if let Some(failure) = &record.failure {
        println!("    {} {}", "failure:".red(), failure);
    }
}

/// Build the Azure CLI wrapper, failing early if az is missing
pub async fn checked_az(ctx: &Context) -> anyhow::Result<AzCli> {
    let az = ctx.az();
    let version = az
        .check_installed()
        .await
        .context("the Azure CLI (az) is required")?;
    tracing::debug!(version = %version, "Azure CLI found");
    Ok(az)
}
