//! CLI command definitions.
//!
//! Every command works on a workspace: an engine config (`strata.yaml`),
//! a state file and a local provider inventory, plus the stack selected
//! with `--stack`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use thiserror::Error;
use tracing::debug;

use strata_core::Composition;
use strata_engine::{EngineConfig, Executor, LocalProvider, DEFAULT_CONFIG_FILE};
use strata_stacks::{StackRegistry, StackVars};
use strata_state::FileStateStore;

pub mod apply;
pub mod plan;
pub mod stacks;
pub mod state;

/// strata - declarative infrastructure composition
#[derive(Parser)]
#[command(name = "strata")]
#[command(version, about = "strata - declarative infrastructure composition")]
#[command(long_about = r#"
strata builds a tree of constructs, diffs it against the last applied state
and applies the difference in dependency order.

COMMANDS:
  plan          → Show what apply would do
  apply         → Apply the plan against the local provider
  state list    → List resources in the state file
  state show    → Show one resource's applied state
  stacks        → List built-in stacks

EXIT CODES:
  0 - Success
  1 - General error
  2 - Invalid arguments
  3 - Partial failure
"#)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Engine configuration file
    #[arg(long, global = true, env = "STRATA_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// State file (overrides `state_path` from the config)
    #[arg(long, global = true, env = "STRATA_STATE")]
    pub state: Option<PathBuf>,

    /// Built-in stack to work on
    #[arg(long, global = true, default_value = "finance")]
    pub stack: String,

    /// Stack variable as key=value (repeatable)
    #[arg(long = "var", global = true, value_name = "KEY=VALUE")]
    pub vars: Vec<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the plan for the selected stack
    Plan(plan::PlanArgs),

    /// Plan and apply the selected stack
    Apply(apply::ApplyArgs),

    /// Inspect the state file
    State(state::StateArgs),

    /// List built-in stacks
    Stacks,
}

/// A request the user can fix by changing arguments.
#[derive(Error, Debug)]
#[error("{0}")]
pub struct UsageError(pub String);

/// Config, state and provider resolved from the global arguments.
pub struct Workspace {
    pub config: EngineConfig,
    pub state_path: PathBuf,
}

impl Workspace {
    pub fn load(global: &GlobalArgs) -> Result<Self> {
        let mut config = EngineConfig::load_or_default(&global.config)
            .with_context(|| format!("Failed to load config {:?}", global.config))?;
        if let Some(state) = &global.state {
            config.state_path = state.clone();
        }
        let state_path = config.state_path.clone();
        debug!("Using state file {:?}", state_path);
        Ok(Self { config, state_path })
    }

    pub fn store(&self) -> FileStateStore {
        FileStateStore::new(&self.state_path)
    }

    pub fn provider_path(&self) -> &Path {
        &self.config.provider_path
    }

    /// Executor over the state file and the local provider inventory.
    pub fn executor(&self) -> Result<Executor> {
        let provider = LocalProvider::open(self.provider_path())
            .with_context(|| format!("Failed to open provider inventory {:?}", self.provider_path()))?;
        Ok(Executor::new(
            Arc::new(provider),
            Arc::new(self.store()),
            self.config.clone(),
        ))
    }
}

/// Build the stack named by `--stack` with the `--var` overrides.
pub fn build_stack(global: &GlobalArgs) -> Result<Composition> {
    let vars = StackVars::parse_pairs(global.vars.as_slice())?;
    let composition = StackRegistry::builtin().build(&global.stack, &vars)?;
    Ok(composition)
}
