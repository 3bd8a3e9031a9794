use super::Outcome;
use clap::Args;
use colored::Colorize;
use neodeploy_config::{KeyVaultSettings, Settings, Workspace};
use std::path::PathBuf;

const DEFAULT_SECRET_NAME: &str = "neo4j-admin-password";

/// Starter scenarios written by `setup`
pub const SAMPLE_SCENARIOS: &str = r#"# Deployment scenarios. Each entry is validated when loaded.
scenarios:
  - name: standalone-v5
    edition: enterprise-standalone
    node_count: 1
    version: "5"
    license: evaluation
    sizing:
      vm_size: Standard_E4s_v5
      disk_size_gb: 32

  - name: cluster-v5
    edition: enterprise-cluster
    node_count: 3
    version: "5"
    license: evaluation
    sizing:
      vm_size: Standard_E4s_v5
      disk_size_gb: 64

  - name: cluster-v44-replicas
    edition: enterprise-cluster
    node_count: 3
    version: "4.4"
    license: evaluation
    sizing:
      vm_size: Standard_E4s_v5
      disk_size_gb: 64
    read_replicas:
      count: 1
      vm_size: Standard_E4s_v5

  - name: community-v5
    edition: community
    node_count: 1
    version: "5"
    sizing:
      vm_size: Standard_B2s
      disk_size_gb: 32
"#;

#[derive(Args, Debug)]
pub struct SetupArgs {
    /// Azure subscription id
    #[arg(long, env = "AZURE_SUBSCRIPTION_ID")]
    pub subscription: Option<String>,

    /// Default Azure region
    #[arg(long)]
    pub region: Option<String>,

    /// Resource group name prefix
    #[arg(long)]
    pub prefix: Option<String>,

    /// Owner recorded in resource tags
    #[arg(long)]
    pub owner: Option<String>,

    /// Directory holding the provisioning templates
    #[arg(long)]
    pub template_dir: Option<PathBuf>,

    /// Key Vault holding the admin password
    #[arg(long)]
    pub key_vault: Option<String>,

    /// Resource group of the Key Vault
    #[arg(long, requires = "key_vault")]
    pub key_vault_resource_group: Option<String>,

    /// Overwrite an existing workspace
    #[arg(long)]
    pub force: bool,
}

fn settings_from(args: SetupArgs) -> Settings {
    let mut settings = Settings::new();
    settings.subscription_id = args.subscription;
    if let Some(region) = args.region {
        settings.default_region = region;
    }
    if let Some(prefix) = args.prefix {
        settings.resource_group_prefix = prefix;
    }
    settings.owner = args.owner;
    if let Some(dir) = args.template_dir {
        settings.template_dir = dir;
    }
    settings.key_vault = args.key_vault.map(|name| KeyVaultSettings {
        name,
        resource_group: args.key_vault_resource_group,
        secret_name: DEFAULT_SECRET_NAME.to_string(),
        generate_if_missing: true,
    });
    settings
}

pub fn handle(args: SetupArgs) -> anyhow::Result<Outcome> {
    let force = args.force;
    let settings = settings_from(args);
    settings.validate()?;

    let parent = std::env::current_dir()?;
    let workspace = Workspace::init(&parent, &settings, SAMPLE_SCENARIOS, force)?;

    println!(
        "{} {}",
        "✓ Workspace created:".green().bold(),
        workspace.dir().display().to_string().cyan()
    );
    println!("  workspace id: {}", settings.workspace_id);
    println!("  settings:     {}", workspace.settings_path().display());
    println!("  scenarios:    {}", workspace.scenarios_path().display());
    println!();
    println!("{}", "Next steps:".bold());
    println!("  {} validate", "neodeploy".cyan());
    println!("  {} deploy --scenario standalone-v5", "neodeploy".cyan());
    Ok(Outcome::Success)
}
