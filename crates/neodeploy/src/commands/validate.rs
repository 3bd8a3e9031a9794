use super::{Context, Outcome, print_plan};
use clap::Args;
use colored::Colorize;
use neodeploy_cloud::{ProvisioningBoundary, TemplateValidation};
use neodeploy_core::secret::generate_password;
use neodeploy_core::{ResolvedDeployment, ResolvedSecret, params};

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Only this scenario (default: all)
    #[arg(short, long)]
    pub scenario: Option<String>,

    /// Skip template validation against Azure
    #[arg(long)]
    pub offline: bool,
}

pub async fn handle(args: ValidateArgs) -> anyhow::Result<Outcome> {
    println!("{}", "Validating workspace...".blue());

    let ctx = Context::load()?;
    println!(
        "Workspace: {}",
        ctx.workspace.dir().display().to_string().cyan()
    );

    let registry = ctx.registry()?;
    let scenarios = registry.select(args.scenario.as_deref(), true)?;
    let deployment_context = ctx.deployment_context(None);

    for scenario in &scenarios {
        let plan = params::resolve(scenario, &deployment_context, &ctx.plan_secret(scenario))?;
        print_plan(&plan);
    }

    let template_dir = ctx.workspace.template_dir(&ctx.settings);
    if !template_dir.is_dir() {
        println!();
        println!(
            "{} template directory {} does not exist yet",
            "⚠".yellow(),
            template_dir.display()
        );
    }

    let mut rejected = 0;
    if !args.offline {
        let az = ctx.az();
        match az.check_installed().await {
            Err(e) => {
                println!();
                println!("{} skipping template validation: {}", "⚠".yellow(), e);
            }
            Ok(_) => {
                println!();
                println!("{}", "Validating templates against Azure...".blue());
                let boundary = ctx.boundary(az);
                for scenario in &scenarios {
                    // ARM checks the password policy; a throwaway value is never stored
                    let secret = ResolvedSecret {
                        value: generate_password(),
                        ..ctx.plan_secret(scenario)
                    };
                    let deployment = params::resolve(scenario, &deployment_context, &secret)?;
                    if !check_template(boundary.as_ref(), &deployment).await {
                        rejected += 1;
                    }
                }
            }
        }
    }

    println!();
    if rejected > 0 {
        println!(
            "{}",
            format!("✗ {} scenario template(s) rejected", rejected)
                .red()
                .bold()
        );
        return Ok(Outcome::Failed);
    }
    println!(
        "{}",
        format!("✓ {} scenario(s) valid", scenarios.len())
            .green()
            .bold()
    );
    Ok(Outcome::Success)
}

/// Print the boundary's verdict on one scenario; false when rejected
async fn check_template(boundary: &dyn ProvisioningBoundary, deployment: &ResolvedDeployment) -> bool {
    match boundary.validate_template(deployment).await {
        Ok(TemplateValidation::Validated) => {
            println!("  {} {}", "✓".green(), deployment.scenario.cyan());
            true
        }
        Ok(TemplateValidation::Deferred(reason)) => {
            println!(
                "  {} {} ({}; validated at deploy time)",
                "-".dimmed(),
                deployment.scenario.cyan(),
                reason
            );
            true
        }
        Err(e) => {
            let message = deployment.secret.scrub(&e.to_string());
            tracing::warn!(scenario = %deployment.scenario, error = %message, "Template rejected");
            println!("  {} {}: {}", "✗".red(), deployment.scenario.cyan(), message);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{TemplateVerdict, deployment};
    use neodeploy_cloud::ProvisioningError;

    #[tokio::test]
    async fn test_check_template_verdicts() {
        let deployment = deployment("standalone-v5");

        assert!(check_template(&TemplateVerdict::accepting(), &deployment).await);

        let deferred = TemplateVerdict(Ok(TemplateValidation::Deferred("no group".into())));
        assert!(check_template(&deferred, &deployment).await);

        let rejected = TemplateVerdict(Err(ProvisioningError::Rejected {
            code: "InvalidTemplate".into(),
            message: "parameter 'nodeCount' is not defined".into(),
        }));
        assert!(!check_template(&rejected, &deployment).await);
    }
}
