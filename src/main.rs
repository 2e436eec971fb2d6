use batchd::cli::BatchContext;
use batchd::{BatchStateError, FeatureOutcome, Result};
use clap::{ArgGroup, CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use colored::Colorize;
use std::io;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "batchd")]
#[command(author = "Chris Cheng <chris.cheng@shopee.com>")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Crash-safe batch state manager", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Project root; state files must live under it (default: current directory)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// State file path (default from .batchd/config.toml)
    #[arg(long, global = true)]
    state_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new batch from a feature file or tracker issues
    Create {
        /// File with one feature per line
        #[arg(long, conflicts_with = "issues")]
        features_file: Option<PathBuf>,

        /// Comma separated issue numbers (e.g. "72,73,74")
        #[arg(long)]
        issues: Option<String>,

        /// Feature description (repeatable; titles issues when used with --issues)
        #[arg(long = "feature")]
        features: Vec<String>,
    },

    /// Record the outcome of one feature
    #[command(group(ArgGroup::new("outcome").required(true).args(["success", "failed"])))]
    Update {
        /// Feature index
        index: usize,

        /// Feature succeeded
        #[arg(long)]
        success: bool,

        /// Feature failed with this error message
        #[arg(long, value_name = "MESSAGE")]
        failed: Option<String>,

        /// Output reference for a successful feature (commit, file, URL)
        #[arg(long, requires = "success")]
        output: Option<String>,

        /// Estimated tokens the feature consumed
        #[arg(long, default_value_t = 0)]
        tokens: u64,
    },

    /// Record that the context was cleared after a feature
    #[command(name = "record-clear")]
    RecordClear {
        /// Feature index the clear followed
        index: usize,

        /// Token estimate before the clear
        #[arg(long)]
        tokens: u64,
    },

    /// Show batch progress
    Status {
        /// Output in JSON format
        #[arg(short, long)]
        json: bool,
    },

    /// Print the next pending feature index
    Next,

    /// Abort the running batch
    Abort {
        /// Why the batch is being stopped
        reason: String,
    },

    /// Remove the state file of a finished batch
    Cleanup,

    /// Generate shell completions
    Completions {
        /// Shell type (bash, zsh, fish, powershell)
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        match e.downcast_ref::<BatchStateError>() {
            Some(state_err) => {
                eprintln!(
                    "{}",
                    format!("Error [{}]: {}", state_err.kind_name(), state_err).red()
                );
                if state_err.is_retryable() {
                    eprintln!("{}", "Another process holds the batch lock; retry shortly.".yellow());
                }
            }
            None => eprintln!("{}", format!("Error: {}", e).red()),
        }
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    if let Commands::Completions { shell } = cli.command {
        generate(shell, &mut Cli::command(), "batchd", &mut io::stdout());
        return Ok(());
    }

    let ctx = BatchContext::open(cli.root.as_deref(), cli.state_file.as_deref())?;

    match cli.command {
        Commands::Create {
            features_file,
            issues,
            features,
        } => {
            batchd::cli::create::run(&ctx, features_file.as_deref(), issues.as_deref(), features)?;
        }

        Commands::Update {
            index,
            success: _,
            failed,
            output,
            tokens,
        } => {
            let outcome = match failed {
                Some(error) => FeatureOutcome::Failure { error },
                None => FeatureOutcome::Success { output },
            };
            batchd::cli::progress::run_update(&ctx, index, outcome, tokens)?;
        }

        Commands::RecordClear { index, tokens } => {
            batchd::cli::progress::run_record_clear(&ctx, index, tokens)?;
        }

        Commands::Status { json } => {
            batchd::cli::status::run(&ctx, json)?;
        }

        Commands::Next => {
            batchd::cli::status::run_next(&ctx)?;
        }

        Commands::Abort { reason } => {
            batchd::cli::cleanup::run_abort(&ctx, &reason)?;
        }

        Commands::Cleanup => {
            batchd::cli::cleanup::run_cleanup(&ctx)?;
        }

        Commands::Completions { .. } => unreachable!("handled above"),
    }

    Ok(())
}
