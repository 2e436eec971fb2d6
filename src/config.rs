//! Project configuration (`.batchd/config.toml`)
//!
//! Only file locations and lock timing are configurable. The auto-clear
//! threshold is a fixed constant so resumed batches behave the same across
//! versions.

use crate::state::StateConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_PATH: &str = ".batchd/config.toml";

/// Settings read from `.batchd/config.toml`
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BatchdConfig {
    /// State file path, relative to the project root
    pub state_file: String,

    pub lock_timeout_ms: u64,

    pub lock_retry_interval_ms: u64,
}

impl Default for BatchdConfig {
    fn default() -> Self {
        Self {
            state_file: ".batchd/batch_state.json".to_string(),
            lock_timeout_ms: 10_000,
            lock_retry_interval_ms: 50,
        }
    }
}

impl BatchdConfig {
    /// Load config from .batchd/config.toml, falling back to defaults
    pub fn load(project_root: &Path) -> anyhow::Result<Self> {
        let config_path = project_root.join(CONFIG_PATH);
        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&config_path)?;
        let config: BatchdConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Default state file location under `project_root`
    pub fn state_path(&self, project_root: &Path) -> PathBuf {
        project_root.join(&self.state_file)
    }

    /// Store configuration rooted at `project_root`
    pub fn state_config(&self, project_root: &Path) -> StateConfig {
        StateConfig::new(project_root)
            .with_lock_timeout(Duration::from_millis(self.lock_timeout_ms))
            .with_lock_retry_interval(Duration::from_millis(self.lock_retry_interval_ms))
    }
}
