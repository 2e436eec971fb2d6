//! Path authorization for state files
//!
//! Every state file access goes through [`PathValidator::authorize`] first.
//! The result is an [`AuthorizedPath`], which is the only path type the
//! writer, lock, and store accept, so I/O cannot happen on an unchecked path.

use super::error::{BatchStateError, StateResult};
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// A canonical path proven to lie under the allowed root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizedPath {
    path: PathBuf,
}

impl AuthorizedPath {
    pub fn as_path(&self) -> &Path {
        &self.path
    }

    /// Directory holding the file
    pub fn parent(&self) -> Option<&Path> {
        self.path.parent()
    }

    /// Sibling path `<file>.lock`, still unauthorized
    pub fn lock_candidate(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| OsString::from("state"));
        name.push(".lock");
        self.path.with_file_name(name)
    }
}

impl AsRef<Path> for AuthorizedPath {
    fn as_ref(&self) -> &Path {
        &self.path
    }
}

/// Resolves candidate paths against a fixed root
#[derive(Debug, Clone)]
pub struct PathValidator {
    root: PathBuf,
}

impl PathValidator {
    /// Create a validator for `allowed_root`, which must exist
    pub fn new(allowed_root: &Path) -> StateResult<Self> {
        let root = allowed_root.canonicalize().map_err(|e| {
            BatchStateError::path_security(
                allowed_root,
                format!("allowed root cannot be resolved: {}", e),
            )
        })?;
        Ok(Self { root })
    }

    /// Resolve `candidate` and confirm it stays under the allowed root
    ///
    /// Relative candidates are taken relative to the root. The file itself
    /// may not exist yet; missing trailing components are appended to the
    /// canonical form of the deepest existing ancestor.
    pub fn authorize(&self, candidate: &Path) -> StateResult<AuthorizedPath> {
        let absolute = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        };

        let (existing, missing) = split_existing(&absolute)
            .map_err(|reason| BatchStateError::path_security(candidate, reason))?;

        self.check_symlinks(candidate, &existing)?;

        let mut resolved = existing.canonicalize().map_err(|e| {
            BatchStateError::path_security(candidate, format!("cannot resolve path: {}", e))
        })?;
        for name in missing.iter().rev() {
            resolved.push(name);
        }

        if !resolved.starts_with(&self.root) {
            return Err(BatchStateError::path_security(
                candidate,
                format!(
                    "resolves to {} outside allowed root {}",
                    resolved.display(),
                    self.root.display()
                ),
            ));
        }

        tracing::debug!(
            candidate = %candidate.display(),
            resolved = %resolved.display(),
            "Authorized state path"
        );
        Ok(AuthorizedPath { path: resolved })
    }

    /// Reject any symlink located inside the root whose target leaves it
    fn check_symlinks(&self, candidate: &Path, existing: &Path) -> StateResult<()> {
        let mut prefix = PathBuf::new();
        for component in existing.components() {
            prefix.push(component);

            let is_link = fs::symlink_metadata(&prefix)
                .map(|meta| meta.file_type().is_symlink())
                .unwrap_or(false);
            if !is_link {
                continue;
            }

            // Links above the root (e.g. /tmp -> /private/tmp) are not ours to police
            let location = match (prefix.parent(), prefix.file_name()) {
                (Some(parent), Some(name)) => match parent.canonicalize() {
                    Ok(parent) => parent.join(name),
                    Err(_) => continue,
                },
                _ => continue,
            };
            if !location.starts_with(&self.root) {
                continue;
            }

            let target = prefix.canonicalize().map_err(|e| {
                BatchStateError::path_security(
                    candidate,
                    format!("unresolvable symlink {}: {}", location.display(), e),
                )
            })?;
            if !target.starts_with(&self.root) {
                return Err(BatchStateError::path_security(
                    candidate,
                    format!(
                        "symlink {} points outside allowed root ({})",
                        location.display(),
                        target.display()
                    ),
                ));
            }
        }
        Ok(())
    }
}

/// Authorize `candidate_path` against `allowed_root` in one call
pub fn authorize(candidate_path: &Path, allowed_root: &Path) -> StateResult<AuthorizedPath> {
    PathValidator::new(allowed_root)?.authorize(candidate_path)
}

/// Split into the deepest existing ancestor and the missing names below it
///
/// Missing names are returned deepest first. A `..` inside the missing part
/// cannot be resolved safely and is rejected.
fn split_existing(path: &Path) -> Result<(PathBuf, Vec<OsString>), String> {
    let mut existing = path.to_path_buf();
    let mut missing = Vec::new();

    loop {
        match fs::symlink_metadata(&existing) {
            Ok(_) => return Ok((existing, missing)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let Some(name) = existing.file_name().map(|n| n.to_os_string()) else {
                    return Err(format!(
                        "parent reference in non-existent part of {}",
                        path.display()
                    ));
                };
                missing.push(name);
                if !existing.pop() {
                    return Err(format!("no existing ancestor for {}", path.display()));
                }
            }
            Err(e) => return Err(format!("cannot inspect {}: {}", existing.display(), e)),
        }
    }
}
