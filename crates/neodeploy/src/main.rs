mod commands;
mod cypher;
mod progress;
#[cfg(test)]
mod testing;

use clap::{Parser, Subcommand};
use colored::Colorize;
use commands::Outcome;
use neodeploy_cloud::{CleanupError, CloudError};
use neodeploy_config::ConfigError;
use neodeploy_core::CoreError;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

const EXIT_UNEXPECTED: u8 = 1;
const EXIT_INVALID: u8 = 3;
const EXIT_FAILED: u8 = 4;

#[derive(Parser)]
#[command(name = "neodeploy")]
#[command(about = "Deploy Neo4j scenarios to Azure and prove they work", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace). RUST_LOG takes precedence
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a .neodeploy/ workspace in the current directory
    Setup(commands::setup::SetupArgs),
    /// Check settings and scenarios and print the resolved plan
    Validate(commands::validate::ValidateArgs),
    /// Provision scenarios and validate the running databases
    Deploy(commands::deploy::DeployArgs),
    /// Show recorded deployments
    Status(commands::status::StatusArgs),
    /// Delete the resources of recorded deployments
    Cleanup(commands::cleanup::CleanupArgs),
    /// Show version information
    Version,
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Exit code for an error that ended a command
fn exit_code_for(error: &anyhow::Error) -> u8 {
    for cause in error.chain() {
        if let Some(e) = cause.downcast_ref::<CoreError>() {
            return if e.is_scenario_invalid() {
                EXIT_INVALID
            } else {
                EXIT_FAILED
            };
        }
        if let Some(e) = cause.downcast_ref::<CloudError>() {
            match e {
                CloudError::Core(core) if core.is_scenario_invalid() => return EXIT_INVALID,
                CloudError::Core(_) => return EXIT_FAILED,
                CloudError::DeploymentNotFound(_) | CloudError::AmbiguousDeployment { .. } => {
                    return EXIT_INVALID;
                }
                _ => {}
            }
        }
        if let Some(e) = cause.downcast_ref::<ConfigError>() {
            if !matches!(e, ConfigError::Io(_)) {
                return EXIT_INVALID;
            }
        }
        if cause.downcast_ref::<CleanupError>().is_some() {
            return EXIT_FAILED;
        }
    }
    EXIT_UNEXPECTED
}

async fn run(command: Commands) -> anyhow::Result<Outcome> {
    match command {
        Commands::Setup(args) => commands::setup::handle(args),
        Commands::Validate(args) => commands::validate::handle(args).await,
        Commands::Deploy(args) => commands::deploy::handle(args).await,
        Commands::Status(args) => commands::status::handle(args).await,
        Commands::Cleanup(args) => commands::cleanup::handle(args).await,
        Commands::Version => {
            println!("neodeploy {}", env!("CARGO_PKG_VERSION"));
            Ok(Outcome::Success)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli.command).await {
        Ok(Outcome::Success) => ExitCode::SUCCESS,
        Ok(Outcome::Failed) => ExitCode::from(EXIT_FAILED),
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            ExitCode::from(exit_code_for(&e))
        }
    }
}
