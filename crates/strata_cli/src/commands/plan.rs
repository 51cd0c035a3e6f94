//! Plan command - Show what apply would change.

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use strata_core::Planner;
use strata_state::StateStore;

use super::{build_stack, GlobalArgs, Workspace};
use crate::ExitCodes;

#[derive(Args)]
pub struct PlanArgs {
    /// Print the plan as JSON
    #[arg(long)]
    json: bool,
}

pub async fn execute(global: &GlobalArgs, args: &PlanArgs) -> Result<u8> {
    let workspace = Workspace::load(global)?;
    let composition = build_stack(global)?;
    info!("Planning stack '{}' ({})", global.stack, composition.name());

    let applied = workspace
        .store()
        .load()
        .with_context(|| format!("Failed to read state {:?}", workspace.state_path))?;
    let plan = Planner::new()
        .plan(&composition, &applied)
        .context("Planning failed")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else if plan.has_changes() {
        println!("{}", plan);
    } else {
        println!("No changes. Infrastructure matches the composition.");
    }

    Ok(ExitCodes::SUCCESS)
}
