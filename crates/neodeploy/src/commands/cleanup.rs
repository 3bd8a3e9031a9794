use super::{Context, Outcome, checked_az};
use clap::{ArgGroup, Args};
use colored::Colorize;
use neodeploy_cloud::{CleanupCoordinator, CleanupReport, CleanupSelector};

#[derive(Args, Debug)]
#[command(group(
    ArgGroup::new("target")
        .required(true)
        .args(["scenario", "deployment", "older_than", "all"])
))]
pub struct CleanupArgs {
    /// Every deployment of this scenario
    #[arg(short, long)]
    pub scenario: Option<String>,

    /// One deployment, by id or unique id prefix
    #[arg(short, long)]
    pub deployment: Option<String>,

    /// Deployments created at least this many hours ago
    #[arg(long, value_name = "HOURS")]
    pub older_than: Option<u64>,

    /// Every recorded deployment
    #[arg(long)]
    pub all: bool,

    /// List what would be deleted without deleting it
    #[arg(long)]
    pub dry_run: bool,

    /// Also delete resource groups missing the managed-by tag
    #[arg(long)]
    pub force: bool,
}

fn selector_from(args: &CleanupArgs) -> CleanupSelector {
    if let Some(id) = &args.deployment {
        CleanupSelector::Deployment(id.clone())
    } else if let Some(scenario) = &args.scenario {
        CleanupSelector::Scenario(scenario.clone())
    } else if let Some(hours) = args.older_than {
        CleanupSelector::OlderThan(hours)
    } else {
        CleanupSelector::All
    }
}

pub async fn handle(args: CleanupArgs) -> anyhow::Result<Outcome> {
    let ctx = Context::load()?;
    let selector = selector_from(&args);

    let az = if args.dry_run {
        ctx.az()
    } else {
        checked_az(&ctx).await?
    };
    let coordinator = CleanupCoordinator::new(ctx.boundary(az), ctx.state_store())
        .with_retry(ctx.machine_config().retry)
        .with_force(args.force);

    tracing::debug!(
        selector = ?selector,
        dry_run = args.dry_run,
        force = args.force,
        "Cleanup requested"
    );
    let report = coordinator.cleanup(&selector, args.dry_run).await?;
    print_report(&report);

    if report.is_success() {
        Ok(Outcome::Success)
    } else {
        Ok(Outcome::Failed)
    }
}

fn print_report(report: &CleanupReport) {
    if report.cleaned.is_empty() && report.failures.is_empty() {
        println!("{}", "Nothing to clean up".dimmed());
        return;
    }

    for cleaned in &report.cleaned {
        let note = if report.dry_run {
            "would delete".yellow()
        } else if cleaned.already_cleaned {
            "already cleaned".dimmed()
        } else if cleaned.already_absent {
            "already gone".dimmed()
        } else {
            "deleted".green()
        };
        println!(
            "  {} {} {} ({})",
            "✓".green(),
            cleaned.scenario.cyan(),
            cleaned.resource_group,
            note
        );
    }
    for failure in &report.failures {
        println!("  {} {}", "✗".red(), failure);
    }

    println!();
    if report.dry_run {
        println!(
            "{}",
            format!("Dry run: {} deployment(s) selected", report.cleaned.len()).yellow()
        );
    } else if report.is_success() {
        println!(
            "{}",
            format!("✓ {} deployment(s) cleaned up", report.cleaned.len())
                .green()
                .bold()
        );
    } else {
        println!(
            "{}",
            format!("✗ {} cleanup(s) failed", report.failures.len())
                .red()
                .bold()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> CleanupArgs {
        CleanupArgs {
            scenario: None,
            deployment: None,
            older_than: None,
            all: false,
            dry_run: false,
            force: false,
        }
    }

    #[test]
    fn test_selector_from_args() {
        let selector = selector_from(&CleanupArgs {
            deployment: Some("3f2a".into()),
            ..args()
        });
        assert!(matches!(selector, CleanupSelector::Deployment(id) if id == "3f2a"));

        let selector = selector_from(&CleanupArgs {
            older_than: Some(24),
            ..args()
        });
        assert!(matches!(selector, CleanupSelector::OlderThan(24)));

        let selector = selector_from(&CleanupArgs {
            all: true,
            ..args()
        });
        assert!(matches!(selector, CleanupSelector::All));
    }

    #[test]
    fn test_force_flag_parses() {
        use clap::Parser;

        #[derive(Parser)]
        struct Cli {
            #[command(flatten)]
            cleanup: CleanupArgs,
        }

        let cli = Cli::try_parse_from(["cleanup", "--scenario", "standalone-v5", "--force"]).unwrap();
        assert!(cli.cleanup.force);
        let cli = Cli::try_parse_from(["cleanup", "--all"]).unwrap();
        assert!(!cli.cleanup.force);
    }
}
