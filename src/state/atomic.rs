//! Atomic file replacement
//!
//! Payloads land in a temp file in the target's own directory and are
//! renamed over the target. The rename is the only state transition, so a
//! reader (or a restarted process) sees either the old file or the new one.

use super::error::{BatchStateError, StateResult};
use super::path_guard::AuthorizedPath;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Writes state payloads via temp file + rename
pub struct AtomicFileWriter;

impl AtomicFileWriter {
    /// Replace `target` with `payload` atomically
    pub fn write(target: &AuthorizedPath, payload: &[u8]) -> StateResult<()> {
        Self::stage(target, payload)?.commit()
    }

    /// Write `payload` to a temp file next to `target` without publishing it
    ///
    /// The temp file is owner read/write only and fully synced before this
    /// returns. Dropping the [`StagedWrite`] without committing deletes it.
    pub fn stage(target: &AuthorizedPath, payload: &[u8]) -> StateResult<StagedWrite> {
        let target_path = target.as_path();
        let parent = target.parent().ok_or_else(|| {
            BatchStateError::path_security(target_path, "path has no parent directory")
        })?;
        fs::create_dir_all(parent).map_err(|e| BatchStateError::io(parent, e))?;

        let file_name = target_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "state".to_string());

        // Same directory as the target keeps the rename on one filesystem
        let mut temp = tempfile::Builder::new()
            .prefix(&format!(".{}.", file_name))
            .suffix(".tmp")
            .tempfile_in(parent)
            .map_err(|e| BatchStateError::io(target_path, e))?;

        if let Err(err) = fill_temp(&mut temp, payload) {
            let temp_path = temp.path().to_path_buf();
            if let Err(close_err) = temp.close() {
                tracing::warn!(
                    temp = %temp_path.display(),
                    error = %close_err,
                    "Failed to remove temp file after write error"
                );
            }
            return Err(BatchStateError::io(target_path, err));
        }

        Ok(StagedWrite {
            temp,
            target: target_path.to_path_buf(),
        })
    }
}

fn fill_temp(temp: &mut NamedTempFile, payload: &[u8]) -> io::Result<()> {
    restrict_permissions(temp.as_file())?;
    temp.write_all(payload)?;
    temp.flush()?;
    temp.as_file().sync_all()
}

#[cfg(unix)]
fn restrict_permissions(file: &fs::File) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_file: &fs::File) -> io::Result<()> {
    Ok(())
}

/// A fully written temp file waiting to be renamed onto its target
pub struct StagedWrite {
    temp: NamedTempFile,
    target: PathBuf,
}

impl StagedWrite {
    pub fn temp_path(&self) -> &Path {
        self.temp.path()
    }

    /// Rename the temp file onto the target
    pub fn commit(self) -> StateResult<()> {
        let target = self.target;
        self.temp.persist(&target).map_err(|e| {
            // e.file is dropped here, which removes the temp file
            BatchStateError::io(&target, e.error)
        })?;
        sync_parent_dir(&target);
        Ok(())
    }
}

/// Make the rename itself durable; failure only weakens crash durability
#[cfg(unix)]
fn sync_parent_dir(target: &Path) {
    let Some(parent) = target.parent() else {
        return;
    };
    if let Err(e) = fs::File::open(parent).and_then(|dir| dir.sync_all()) {
        tracing::warn!(dir = %parent.display(), error = %e, "Failed to sync state directory");
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_target: &Path) {}
