pub mod cleanup;
pub mod create;
pub mod progress;
pub mod status;

use crate::config::BatchdConfig;
use crate::state::BatchStateMachine;
use crate::Result;
use std::env;
use std::path::{Path, PathBuf};

/// Resolved state path and machine shared by every command
pub struct BatchContext {
    pub state_path: PathBuf,
    pub machine: BatchStateMachine,
}

impl BatchContext {
    /// Resolve `--root` / `--state-file` against the config defaults
    pub fn open(root: Option<&Path>, state_file: Option<&Path>) -> Result<Self> {
        let root = match root {
            Some(root) => root.to_path_buf(),
            None => env::current_dir()?,
        };
        let config = BatchdConfig::load(&root)?;

        let state_path = match state_file {
            Some(path) if path.is_absolute() => path.to_path_buf(),
            Some(path) => root.join(path),
            None => config.state_path(&root),
        };
        let machine = BatchStateMachine::new(&config.state_config(&root))?;

        Ok(Self {
            state_path,
            machine,
        })
    }
}
