//! Cross-process advisory locking
//!
//! Locks are taken on a sibling `<state>.lock` file rather than the state
//! file itself, because the atomic rename replaces the state file's inode.
//! `fs2` picks the OS primitive at build time (`flock` on Unix,
//! `LockFileEx` on Windows).

use super::error::{BatchStateError, StateResult};
use super::path_guard::AuthorizedPath;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

/// Upper bound for the backoff between lock attempts
const MAX_RETRY_INTERVAL: Duration = Duration::from_millis(800);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Single writer, excludes everyone else
    Exclusive,
    /// Many readers, excluded by a writer
    Shared,
}

/// Acquires bounded-wait advisory locks
#[derive(Debug, Clone)]
pub struct ConcurrencyGuard {
    timeout: Duration,
    retry_interval: Duration,
}

impl ConcurrencyGuard {
    pub fn new(timeout: Duration, retry_interval: Duration) -> Self {
        Self {
            timeout,
            retry_interval: retry_interval.max(Duration::from_millis(1)),
        }
    }

    /// Lock `lock_path` in `mode`, polling until the timeout elapses
    ///
    /// Contention past the timeout is a retryable `Concurrency` error; any
    /// other failure is reported as `Io`.
    pub fn acquire(&self, lock_path: &AuthorizedPath, mode: LockMode) -> StateResult<StateLock> {
        let path = lock_path.as_path();
        let file = open_lock_file(path).map_err(|e| BatchStateError::io(path, e))?;

        let start = Instant::now();
        let mut delay = self.retry_interval;
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            let attempt = match mode {
                LockMode::Exclusive => FileExt::try_lock_exclusive(&file),
                LockMode::Shared => FileExt::try_lock_shared(&file),
            };

            match attempt {
                Ok(()) => {
                    tracing::debug!(
                        lock = %path.display(),
                        ?mode,
                        attempts,
                        "Acquired state lock"
                    );
                    return Ok(StateLock {
                        file,
                        path: path.to_path_buf(),
                        mode,
                        released: false,
                    });
                }
                Err(err) if is_contended(&err) => {
                    let waited = start.elapsed();
                    if waited >= self.timeout {
                        tracing::warn!(
                            lock = %path.display(),
                            ?mode,
                            waited_ms = waited.as_millis() as u64,
                            "Gave up waiting for state lock"
                        );
                        return Err(BatchStateError::Concurrency {
                            path: path.to_path_buf(),
                            waited,
                        });
                    }
                    tracing::debug!(lock = %path.display(), attempts, "State lock busy, retrying");
                    thread::sleep(delay.min(self.timeout - waited));
                    delay = (delay * 2).min(MAX_RETRY_INTERVAL);
                }
                Err(err) => return Err(BatchStateError::io(path, err)),
            }
        }
    }

    /// Release a lock explicitly, surfacing unlock failures
    pub fn release(&self, lock: StateLock) -> StateResult<()> {
        lock.release()
    }
}

fn open_lock_file(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.read(true).write(true).create(true).truncate(false);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// A held lock; released on drop if not released explicitly
#[derive(Debug)]
pub struct StateLock {
    file: File,
    path: PathBuf,
    mode: LockMode,
    released: bool,
}

impl StateLock {
    pub fn mode(&self) -> LockMode {
        self.mode
    }

    pub fn release(mut self) -> StateResult<()> {
        self.released = true;
        FileExt::unlock(&self.file).map_err(|e| BatchStateError::io(&self.path, e))?;
        tracing::debug!(lock = %self.path.display(), mode = ?self.mode, "Released state lock");
        Ok(())
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        // Closing the descriptor drops the lock anyway
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(lock = %self.path.display(), error = %e, "Failed to unlock state lock");
        }
    }
}
