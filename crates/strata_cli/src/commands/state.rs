//! State command - Inspect the state file.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use strata_state::StateStore;

use super::{GlobalArgs, UsageError, Workspace};
use crate::ExitCodes;

#[derive(Args)]
pub struct StateArgs {
    #[command(subcommand)]
    pub command: StateCommand,
}

#[derive(Subcommand)]
pub enum StateCommand {
    /// List every resource in the state file
    List,

    /// Show the applied state of one resource
    Show {
        /// Logical path, e.g. Network/Vpc
        path: String,
    },
}

pub async fn execute(global: &GlobalArgs, args: &StateArgs) -> Result<u8> {
    let workspace = Workspace::load(global)?;
    let states = workspace
        .store()
        .load()
        .with_context(|| format!("Failed to read state {:?}", workspace.state_path))?;

    match &args.command {
        StateCommand::List => {
            if states.is_empty() {
                println!("State is empty.");
            }
            for (path, state) in &states {
                println!("{:<48} {:<28} {}", path, state.kind, state.provider_id);
            }
        }
        StateCommand::Show { path } => {
            let state = states
                .get(path)
                .ok_or_else(|| UsageError(format!("No resource '{}' in state", path)))?;
            println!("{}", serde_json::to_string_pretty(state)?);
        }
    }

    Ok(ExitCodes::SUCCESS)
}
