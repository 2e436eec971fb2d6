//! `batchd abort` and `batchd cleanup`

use super::BatchContext;
use crate::state::CleanupOutcome;
use crate::Result;
use colored::Colorize;

pub fn run_abort(ctx: &BatchContext, reason: &str) -> Result<()> {
    let state = ctx.machine.abort(&ctx.state_path, reason)?;
    println!(
        "{}",
        format!("⛔ Aborted batch {}", state.batch_id).yellow()
    );
    Ok(())
}

pub fn run_cleanup(ctx: &BatchContext) -> Result<()> {
    match ctx.machine.cleanup(&ctx.state_path)? {
        CleanupOutcome::Removed => println!(
            "{}",
            format!("🧹 Removed {}", ctx.state_path.display()).green()
        ),
        CleanupOutcome::AlreadyAbsent => println!("{}", "Nothing to clean up.".bright_black()),
    }
    Ok(())
}
