//! Explicit configuration for the state store

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Where state files may live and how long to wait for locks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateConfig {
    /// Every state path must resolve under this directory
    pub allowed_root: PathBuf,
    pub lock_timeout: Duration,
    /// Initial backoff between lock attempts (doubles per retry)
    pub lock_retry_interval: Duration,
}

impl StateConfig {
    pub fn new(allowed_root: impl Into<PathBuf>) -> Self {
        Self {
            allowed_root: allowed_root.into(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            lock_retry_interval: DEFAULT_LOCK_RETRY_INTERVAL,
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_lock_retry_interval(mut self, interval: Duration) -> Self {
        self.lock_retry_interval = interval;
        self
    }
}
