//! Stacks command - List built-in stacks.

use anyhow::Result;

use strata_stacks::StackRegistry;

use crate::ExitCodes;

pub async fn execute() -> Result<u8> {
    let registry = StackRegistry::builtin();

    println!("Built-in stacks:");
    for stack in registry.list() {
        println!("  {:<12} {}", stack.name, stack.description);
    }

    Ok(ExitCodes::SUCCESS)
}
