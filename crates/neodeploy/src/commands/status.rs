use super::{Context, Outcome, print_record};
use chrono::Utc;
use clap::Args;
use colored::Colorize;
use neodeploy_cloud::StateStore;

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Only deployments of this scenario
    #[arg(short, long)]
    pub scenario: Option<String>,

    /// Print records as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn handle(args: StatusArgs) -> anyhow::Result<Outcome> {
    let ctx = Context::load()?;
    let store = ctx.state_store();

    let mut records = store.list().await?;
    if let Some(scenario) = &args.scenario {
        records.retain(|r| &r.scenario == scenario);
    }
    records.sort_by(|a, b| a.created_at.cmp(&b.created_at));

    if args.json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(Outcome::Success);
    }

    if records.is_empty() {
        println!("{}", "No deployments recorded".dimmed());
        return Ok(Outcome::Success);
    }

    let now = Utc::now();
    println!("{}", "Deployments".bold());
    for record in &records {
        println!();
        print_record(record);
        println!(
            "    age:     {}h, cleanup {}",
            record.age_hours(now),
            record.cleanup_mode
        );
    }
    Ok(Outcome::Success)
}
