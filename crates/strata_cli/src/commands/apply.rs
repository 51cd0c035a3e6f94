//! Apply command - Plan and apply the selected stack.

use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};
use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{build_stack, GlobalArgs, Workspace};
use crate::ExitCodes;

#[derive(Args)]
pub struct ApplyArgs {
    /// Skip interactive approval of the plan
    #[arg(long)]
    pub auto_approve: bool,
}

pub async fn execute(global: &GlobalArgs, args: &ApplyArgs) -> Result<u8> {
    let workspace = Workspace::load(global)?;
    let composition = build_stack(global)?;
    let executor = workspace.executor()?;

    let plan = executor.plan(&composition).context("Planning failed")?;
    if !plan.has_changes() {
        println!("No changes. Infrastructure matches the composition.");
        return Ok(ExitCodes::SUCCESS);
    }
    println!("{}", plan);
    println!();

    if !args.auto_approve && !confirm()? {
        println!("Apply cancelled.");
        return Ok(ExitCodes::SUCCESS);
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; waiting for in-flight steps to finish");
            on_interrupt.cancel();
        }
    });

    info!("Applying stack '{}'", global.stack);
    let report = executor
        .apply(&plan, &cancel)
        .await
        .context("Apply failed")?;

    if report.is_success() {
        println!("{}", report);
        Ok(ExitCodes::SUCCESS)
    } else {
        eprintln!("{}", report);
        Ok(ExitCodes::PARTIAL_FAILURE)
    }
}

fn confirm() -> Result<bool> {
    print!("Apply these changes? Only 'yes' will be accepted: ");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(answer.trim() == "yes")
}
