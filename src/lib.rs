// batchd - crash-safe batch state manager
// Tracks multi-feature agent runs across restarts and context clears

pub mod cli;
pub mod config;
pub mod models;
pub mod state;

pub use anyhow::{Context, Result};
pub use colored::Colorize;

// Re-export commonly used types
pub use config::BatchdConfig;
pub use models::{
    BatchState, BatchStatus, Feature, FeatureIndex, FeatureOutcome, SourceDescriptor,
    AUTO_CLEAR_THRESHOLD,
};
pub use state::{
    BatchStateError, BatchStateMachine, CleanupOutcome, StateConfig, StateResult, StateStore,
};
