//! `batchd update` and `batchd record-clear`

use super::BatchContext;
use crate::models::{BatchState, BatchStatus, FeatureIndex, FeatureOutcome, AUTO_CLEAR_THRESHOLD};
use crate::state::BatchStateMachine;
use crate::Result;
use colored::Colorize;

pub fn run_update(
    ctx: &BatchContext,
    index: FeatureIndex,
    outcome: FeatureOutcome,
    tokens: u64,
) -> Result<()> {
    let succeeded = matches!(outcome, FeatureOutcome::Success { .. });
    let state = ctx
        .machine
        .update_progress(&ctx.state_path, index, outcome, tokens)?;

    if succeeded {
        println!("{}", format!("✅ Feature {} completed", index).green());
    } else {
        println!("{}", format!("❌ Feature {} failed", index).red());
    }
    println!(
        "   Context:  {} / {} tokens",
        state.context_token_estimate, AUTO_CLEAR_THRESHOLD
    );

    if BatchStateMachine::should_auto_clear(&state) {
        println!(
            "{}",
            format!(
                "⚠ Context budget reached. Clear context, then run: batchd record-clear {} --tokens {}",
                index, state.context_token_estimate
            )
            .yellow()
        );
    }

    print_outcome(&state);
    Ok(())
}

pub fn run_record_clear(ctx: &BatchContext, index: FeatureIndex, tokens: u64) -> Result<()> {
    let state = ctx
        .machine
        .record_auto_clear(&ctx.state_path, index, tokens)?;

    println!(
        "{}",
        format!(
            "🧹 Recorded context clear #{} after feature {} ({} tokens)",
            state.auto_clear_count, index, tokens
        )
        .cyan()
    );
    print_outcome(&state);
    Ok(())
}

fn print_outcome(state: &BatchState) {
    match state.status {
        BatchStatus::InProgress => match BatchStateMachine::next_pending(state) {
            Some(next) => println!("   Next:     {} ({})", next, state.features[next].title()),
            None => println!("   Next:     none"),
        },
        BatchStatus::Completed => {
            println!("{}", "🎉 All features completed".green().bold())
        }
        BatchStatus::Failed => println!(
            "{}",
            format!("Batch finished with {} failed feature(s)", state.failed.len()).red()
        ),
        BatchStatus::Aborted => println!("{}", "Batch aborted".bright_black()),
    }
}
