//! `batchd status` and `batchd next`

use super::BatchContext;
use crate::models::{BatchStatus, AUTO_CLEAR_THRESHOLD};
use crate::state::BatchStateMachine;
use crate::Result;
use colored::Colorize;

pub fn run(ctx: &BatchContext, json: bool) -> Result<()> {
    let Some(state) = ctx.machine.try_load(&ctx.state_path)? else {
        if json {
            println!("{}", serde_json::json!({ "error": "batch_not_found" }));
        } else {
            println!(
                "{}",
                format!("No batch state at {}", ctx.state_path.display()).yellow()
            );
        }
        return Ok(());
    };

    let progress = BatchStateMachine::progress(&state);
    let next = BatchStateMachine::next_pending(&state);

    if json {
        let summary = serde_json::json!({
            "batch_id": state.batch_id,
            "status": state.status,
            "total": progress.total,
            "completed": progress.completed,
            "failed": progress.failed,
            "pending": progress.pending,
            "next_pending": next,
            "context_token_estimate": state.context_token_estimate,
            "should_auto_clear": state.should_auto_clear(),
            "auto_clear_count": state.auto_clear_count,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("{}", format!("Batch: {}", state.batch_id).cyan().bold());
    println!();

    let status = match state.status {
        BatchStatus::InProgress => state.status.to_string().blue(),
        BatchStatus::Completed => state.status.to_string().green(),
        BatchStatus::Failed => state.status.to_string().red(),
        BatchStatus::Aborted => state.status.to_string().bright_black(),
    };
    println!("   Status:    {}", status);
    println!(
        "   Progress:  {}/{} ({:.0}%), {} failed",
        progress.completed + progress.failed,
        progress.total,
        progress.percent_complete,
        progress.failed
    );
    println!(
        "   Context:   {} / {} tokens",
        state.context_token_estimate, AUTO_CLEAR_THRESHOLD
    );
    println!("   Clears:    {}", state.auto_clear_count);
    if let Some(next) = next {
        println!("   Next:      {} ({})", next, state.features[next].title());
    }
    if let Some(reason) = &state.abort_reason {
        println!("   Aborted:   {}", reason);
    }
    println!("   Updated:   {}", state.updated_at.format("%Y-%m-%d %H:%M:%S"));

    for (index, failure) in &state.failed {
        println!(
            "   {} {}: {}",
            "✗".red(),
            state.features[*index].title(),
            failure.error
        );
    }

    Ok(())
}

/// Print the next pending index, or nothing when every feature is accounted for
pub fn run_next(ctx: &BatchContext) -> Result<()> {
    let state = ctx.machine.load(&ctx.state_path)?;
    if let Some(next) = BatchStateMachine::next_pending(&state) {
        println!("{}", next);
    }
    Ok(())
}
