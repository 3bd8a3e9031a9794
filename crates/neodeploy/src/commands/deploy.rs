use super::{Context, Outcome, checked_az, print_plan, print_record};
use crate::cypher::CypherShellClient;
use crate::progress::DeployProgress;
use anyhow::Context as _;
use clap::Args;
use colored::Colorize;
use futures_util::future::join_all;
use neodeploy_cloud::{
    CleanupCoordinator, CleanupMode, CleanupSelector, DeploymentRecord, DeploymentState,
    DeploymentStateMachine, StateStore,
};
use neodeploy_core::{
    DeploymentContext, ResolvedDeployment, Scenario, SecretLifecycleManager, params,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Args, Debug)]
pub struct DeployArgs {
    /// Scenario to deploy
    #[arg(short, long, conflicts_with = "all")]
    pub scenario: Option<String>,

    /// Deploy every scenario concurrently
    #[arg(long)]
    pub all: bool,

    /// Region for all selected scenarios
    #[arg(long)]
    pub region: Option<String>,

    /// immediate, on-success or manual (default from settings)
    #[arg(long, value_name = "MODE")]
    pub cleanup_mode: Option<CleanupMode>,

    /// Skip the database validation probe
    #[arg(long)]
    pub no_validate: bool,

    /// Resolve and print the plan without creating anything
    #[arg(long)]
    pub dry_run: bool,
}

pub async fn handle(args: DeployArgs) -> anyhow::Result<Outcome> {
    let ctx = Context::load()?;
    let registry = ctx.registry()?;
    let scenarios = registry.select(args.scenario.as_deref(), args.all)?;
    let deployment_context = ctx.deployment_context(args.region.clone());
    let cleanup_mode = args.cleanup_mode.unwrap_or(ctx.settings.cleanup_mode);

    if args.dry_run {
        println!("{}", "Dry run: nothing will be created".yellow());
        for scenario in &scenarios {
            let plan =
                params::resolve(scenario, &deployment_context, &ctx.plan_secret(scenario))?;
            print_plan(&plan);
        }
        return Ok(Outcome::Success);
    }

    let az = checked_az(&ctx).await?;
    let probe = if args.no_validate {
        None
    } else {
        let client = CypherShellClient::new();
        client
            .check_installed()
            .await
            .context("cypher-shell is required for validation (use --no-validate to skip)")?;
        Some(Arc::new(ctx.probe(client)))
    };

    let secrets = ctx.secret_manager(&az);
    let store = ctx.state_store();
    let boundary = ctx.boundary(az);
    let mut machine = DeploymentStateMachine::new(boundary.clone(), store.clone())
        .with_config(ctx.machine_config());
    if let Some(probe) = probe {
        machine = machine.with_probe(probe);
    }
    let machine = Arc::new(machine);

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "Interrupted, cancelling deployments...".yellow());
            interrupt.cancel();
        }
    });

    println!(
        "{} {} scenario(s), cleanup mode {}",
        "Deploying".blue().bold(),
        scenarios.len(),
        cleanup_mode.to_string().cyan()
    );

    let progress = DeployProgress::new();
    let mut failed = false;
    let mut tasks = Vec::new();
    for scenario in scenarios {
        let prepared = prepare(
            &machine,
            &secrets,
            scenario,
            &deployment_context,
            cleanup_mode,
        )
        .await;
        let (deployment, record) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                eprintln!("{} {}: {:#}", "✗".red(), scenario.name, e);
                failed = true;
                continue;
            }
        };
        info!(
            deployment_id = %record.deployment_id,
            credential = %record.secret.reference,
            "Deployment started"
        );

        let spinner = progress.add(&scenario.name, &deployment.resource_group);
        let machine = machine.clone();
        let cancel = cancel.clone();
        tasks.push(tokio::spawn(async move {
            let result = machine
                .run(&deployment, &record.deployment_id, &cancel)
                .await;
            match &result {
                Ok(record) => spinner.finish(record),
                Err(e) => spinner.finish_error(&e.to_string()),
            }
            result
        }));
    }

    let mut records: Vec<DeploymentRecord> = Vec::new();
    for joined in join_all(tasks).await {
        match joined {
            Ok(Ok(record)) => records.push(record),
            Ok(Err(e)) => {
                eprintln!("{} {:#}", "✗".red(), e);
                failed = true;
            }
            Err(e) => {
                eprintln!("{} deployment task panicked: {}", "✗".red(), e);
                failed = true;
            }
        }
    }

    let coordinator =
        CleanupCoordinator::new(boundary, store.clone()).with_retry(ctx.machine_config().retry);
    for record in &mut records {
        let succeeded = record.state == DeploymentState::Succeeded;
        if record.state == DeploymentState::Cleaned || !record.cleanup_mode.should_clean(succeeded)
        {
            continue;
        }
        info!(deployment_id = %record.deployment_id, mode = %record.cleanup_mode, "Automatic cleanup");
        let report = coordinator
            .cleanup(&CleanupSelector::Deployment(record.deployment_id.clone()), false)
            .await?;
        for failure in &report.failures {
            warn!(error = %failure, "Automatic cleanup failed");
            eprintln!("{} {}", "✗".red(), failure);
            failed = true;
        }
        *record = store.get(&record.deployment_id).await?;
    }

    println!();
    println!("{}", "Summary".bold());
    for record in &records {
        print_record(record);
        failed |= record.failure.is_some();
    }

    if failed {
        Ok(Outcome::Failed)
    } else {
        println!();
        println!("{}", "✓ All deployments succeeded".green().bold());
        Ok(Outcome::Success)
    }
}

/// Resolve the credential and parameters of one scenario and record it as
/// `Pending`. An error here concerns this scenario only.
async fn prepare(
    machine: &DeploymentStateMachine,
    secrets: &SecretLifecycleManager,
    scenario: &Scenario,
    context: &DeploymentContext,
    cleanup_mode: CleanupMode,
) -> anyhow::Result<(ResolvedDeployment, DeploymentRecord)> {
    let secret = secrets.resolve(scenario).await?;
    let deployment = params::resolve(scenario, context, &secret)?;
    let record = machine.start(&deployment, cleanup_mode).await?;
    Ok((deployment, record))
}
