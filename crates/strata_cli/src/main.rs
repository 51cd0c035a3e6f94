//! strata CLI - Main entry point.
//!
//! Exit codes:
//! - 0: Success
//! - 1: General error
//! - 2: Invalid arguments
//! - 3: Partial failure (some steps failed or were skipped)

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;

use commands::{Cli, Commands};

/// CI-friendly exit codes
pub struct ExitCodes;

impl ExitCodes {
    pub const SUCCESS: u8 = 0;
    pub const GENERAL_ERROR: u8 = 1;
    pub const INVALID_ARGS: u8 = 2;
    pub const PARTIAL_FAILURE: u8 = 3;
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "strata=debug,info"
    } else if cli.quiet {
        "warn"
    } else {
        "strata=info,warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let log_result = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();

    if log_result.is_err() {
        // Logging already initialized, continue
    }

    let result = match &cli.command {
        Commands::Plan(args) => commands::plan::execute(&cli.global, args).await,
        Commands::Apply(args) => commands::apply::execute(&cli.global, args).await,
        Commands::State(args) => commands::state::execute(&cli.global, args).await,
        Commands::Stacks => commands::stacks::execute().await,
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            let exit_code = categorize_error(&e);
            eprintln!("Error: {:#}", e);
            ExitCode::from(exit_code)
        }
    }
}

/// Categorize error to determine exit code
fn categorize_error(e: &anyhow::Error) -> u8 {
    use strata_stacks::StackError;

    match e.downcast_ref::<StackError>() {
        Some(StackError::StackNotFound(_)) | Some(StackError::InvalidVar { .. }) => {
            return ExitCodes::INVALID_ARGS
        }
        _ => {}
    }
    if e.downcast_ref::<commands::UsageError>().is_some() {
        ExitCodes::INVALID_ARGS
    } else {
        ExitCodes::GENERAL_ERROR
    }
}
