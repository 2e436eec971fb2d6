//! StateStore - locked, validated persistence of batch state documents
//!
//! Every call follows the same order: authorize the path, take the lock,
//! do the I/O, release the lock. Writers go through [`AtomicFileWriter`];
//! readers validate the document against the embedded schema and the
//! model's own invariants before handing it out.

use super::atomic::AtomicFileWriter;
use super::config::StateConfig;
use super::error::{BatchStateError, IoErrorKind, StateResult};
use super::lock::{ConcurrencyGuard, LockMode, StateLock};
use super::path_guard::{AuthorizedPath, PathValidator};
use super::schema::StateSchema;
use crate::models::BatchState;
use serde_json::Value as JsonValue;
use std::fs;
use std::io;
use std::path::Path;

/// Result of removing a state file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupOutcome {
    Removed,
    AlreadyAbsent,
}

/// Load/save of batch state under one allowed root
pub struct StateStore {
    validator: PathValidator,
    guard: ConcurrencyGuard,
    schema: StateSchema,
}

impl StateStore {
    pub fn new(config: &StateConfig) -> StateResult<Self> {
        let validator = PathValidator::new(&config.allowed_root)?;
        let guard = ConcurrencyGuard::new(config.lock_timeout, config.lock_retry_interval);
        let schema = StateSchema::compile()
            .map_err(|e| BatchStateError::corruption(Path::new("<state schema>"), e))?;

        Ok(Self {
            validator,
            guard,
            schema,
        })
    }

    pub fn authorize(&self, path: &Path) -> StateResult<AuthorizedPath> {
        self.validator.authorize(path)
    }

    /// Persist `state`, replacing whatever is at `path`
    pub fn save(&self, path: &Path, state: &BatchState) -> StateResult<()> {
        let target = self.authorize(path)?;
        let payload = encode(state)?;

        let lock = self.lock(&target, LockMode::Exclusive)?;
        AtomicFileWriter::write(&target, &payload)?;
        lock.release()
    }

    /// Load the state at `path`; a missing file is an `Io` error tagged `NotFound`
    pub fn load(&self, path: &Path) -> StateResult<BatchState> {
        self.try_load(path)?.ok_or_else(|| BatchStateError::Io {
            kind: IoErrorKind::NotFound,
            path: path.to_path_buf(),
            message: "no batch state file".to_string(),
        })
    }

    /// Load the state at `path`, or `None` if no state file exists
    pub fn try_load(&self, path: &Path) -> StateResult<Option<BatchState>> {
        let target = self.authorize(path)?;
        if !target.as_path().exists() {
            return Ok(None);
        }

        let lock = self.lock(&target, LockMode::Shared)?;
        let state = self.read(&target)?;
        lock.release()?;
        Ok(state)
    }

    /// Read-modify-write under one exclusive lock
    ///
    /// If `mutate` fails nothing is written and the file is left as it was.
    /// `updated_at` is bumped on success.
    pub fn modify<F>(&self, path: &Path, mutate: F) -> StateResult<BatchState>
    where
        F: FnOnce(&mut BatchState) -> StateResult<()>,
    {
        let target = self.authorize(path)?;
        let lock = self.lock(&target, LockMode::Exclusive)?;

        let mut state = self.read(&target)?.ok_or_else(|| BatchStateError::Io {
            kind: IoErrorKind::NotFound,
            path: target.as_path().to_path_buf(),
            message: "no batch state file".to_string(),
        })?;

        mutate(&mut state)?;
        state.touch();

        let payload = encode(&state)?;
        AtomicFileWriter::write(&target, &payload)?;
        lock.release()?;
        Ok(state)
    }

    /// Write a brand new batch, refusing to clobber one that is still running
    ///
    /// A terminal batch at the same path may be replaced. A corrupted file is
    /// reported rather than overwritten.
    pub fn create_new(&self, path: &Path, state: &BatchState) -> StateResult<()> {
        let target = self.authorize(path)?;
        let payload = encode(state)?;

        let lock = self.lock(&target, LockMode::Exclusive)?;
        if let Some(existing) = self.read(&target)? {
            if !existing.is_terminal() {
                return Err(BatchStateError::validation(format!(
                    "Batch '{}' is still in progress at {}",
                    existing.batch_id,
                    target.as_path().display()
                )));
            }
            tracing::info!(
                previous = %existing.batch_id,
                status = %existing.status,
                "Replacing finished batch state"
            );
        }

        AtomicFileWriter::write(&target, &payload)?;
        lock.release()
    }

    /// Remove the state file at `path` if `allow` accepts its current contents
    pub fn remove_if<F>(&self, path: &Path, allow: F) -> StateResult<CleanupOutcome>
    where
        F: FnOnce(&BatchState) -> StateResult<()>,
    {
        let target = self.authorize(path)?;
        if !target.as_path().exists() {
            return Ok(CleanupOutcome::AlreadyAbsent);
        }

        let lock = self.lock(&target, LockMode::Exclusive)?;
        let outcome = match self.read(&target)? {
            None => CleanupOutcome::AlreadyAbsent,
            Some(state) => {
                allow(&state)?;
                match fs::remove_file(target.as_path()) {
                    Ok(()) => CleanupOutcome::Removed,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => CleanupOutcome::AlreadyAbsent,
                    Err(e) => return Err(BatchStateError::io(target.as_path(), e)),
                }
            }
        };
        // The sibling lock file stays: a waiter may already hold it open
        lock.release()?;
        Ok(outcome)
    }

    fn lock(&self, target: &AuthorizedPath, mode: LockMode) -> StateResult<StateLock> {
        if mode == LockMode::Exclusive {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| BatchStateError::io(parent, e))?;
            }
        }
        let lock_path = self.validator.authorize(&target.lock_candidate())?;
        self.guard.acquire(&lock_path, mode)
    }

    /// Read and decode; caller must hold a lock
    fn read(&self, target: &AuthorizedPath) -> StateResult<Option<BatchState>> {
        let bytes = match fs::read(target.as_path()) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(BatchStateError::io(target.as_path(), e)),
        };
        self.decode(target.as_path(), &bytes).map(Some)
    }

    fn decode(&self, path: &Path, bytes: &[u8]) -> StateResult<BatchState> {
        let document: JsonValue = serde_json::from_slice(bytes)
            .map_err(|e| BatchStateError::corruption(path, format!("invalid JSON: {}", e)))?;

        let violations = self.schema.violations(&document);
        if !violations.is_empty() {
            return Err(BatchStateError::corruption(
                path,
                format!("schema violations: {}", violations.join("; ")),
            ));
        }

        let mut state: BatchState = serde_json::from_value(document)
            .map_err(|e| BatchStateError::corruption(path, e.to_string()))?;
        state.upgrade();
        state
            .validate()
            .map_err(|detail| BatchStateError::corruption(path, detail))?;
        Ok(state)
    }
}

/// Canonical on-disk form: pretty JSON with a trailing newline
fn encode(state: &BatchState) -> StateResult<Vec<u8>> {
    state
        .validate()
        .map_err(|detail| BatchStateError::validation(format!("Refusing to save: {}", detail)))?;

    let mut payload = serde_json::to_vec_pretty(state)
        .map_err(|e| BatchStateError::validation(format!("Failed to serialize state: {}", e)))?;
    payload.push(b'\n');
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Feature, SourceDescriptor, STATE_SCHEMA_VERSION};
    use crate::models::{BatchStatus, CompletedFeature, FeatureStatus, SourceType};
    use chrono::Utc;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn setup() -> (TempDir, StateStore, PathBuf) {
        let temp = TempDir::new().unwrap();
        let store = StateStore::new(&StateConfig::new(temp.path())).unwrap();
        let path = temp.path().join("batch_state.json");
        (temp, store, path)
    }

    fn sample_state() -> BatchState {
        let features = vec![Feature::from("one"), Feature::from("two"), Feature::from("three")];
        BatchState::new("batch-store-test", features, SourceDescriptor::file("features.txt"))
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let (_temp, store, path) = setup();
        let mut state = sample_state();
        state.completed.insert(
            0,
            CompletedFeature {
                status: FeatureStatus::Completed,
                output: Some("abc123".to_string()),
                timestamp: Utc::now(),
            },
        );
        state.current_index = 1;
        state.context_token_estimate = 4200;

        store.save(&path, &state).unwrap();
        let loaded = store.load(&path).unwrap();
        assert_eq!(loaded, state);
    }

    #[test]
    fn test_try_load_missing_is_none() {
        let (_temp, store, path) = setup();
        assert!(store.try_load(&path).unwrap().is_none());

        let err = store.load(&path).unwrap_err();
        assert_eq!(err.io_kind(), Some(IoErrorKind::NotFound));
    }

    #[test]
    fn test_invalid_json_is_corruption() {
        let (_temp, store, path) = setup();
        fs::write(&path, "{ not json").unwrap();

        let err = store.load(&path).unwrap_err();
        assert!(matches!(err, BatchStateError::Corruption { .. }));
        assert!(err.to_string().contains("batch_state.json"));
    }

    #[test]
    fn test_schema_violation_is_corruption() {
        let (_temp, store, path) = setup();
        fs::write(
            &path,
            r#"{"batch_id": "b", "features": [], "current_index": 0, "status": "in_progress",
                "created_at": "2026-01-01T00:00:00Z", "updated_at": "2026-01-01T00:00:00Z"}"#,
        )
        .unwrap();

        match store.load(&path).unwrap_err() {
            BatchStateError::Corruption { detail, .. } => assert!(detail.contains("/features")),
            other => panic!("expected Corruption, got {:?}", other),
        }
    }

    #[test]
    fn test_invariant_violation_is_corruption() {
        let (_temp, store, path) = setup();
        fs::write(
            &path,
            r#"{"batch_id": "b", "features": ["a"], "current_index": 1, "status": "in_progress",
                "completed": {"5": {"status": "completed", "timestamp": "2026-01-01T00:00:00Z"}},
                "created_at": "2026-01-01T00:00:00Z", "updated_at": "2026-01-01T00:00:00Z"}"#,
        )
        .unwrap();

        let err = store.load(&path).unwrap_err();
        assert!(matches!(err, BatchStateError::Corruption { .. }));
    }

    #[test]
    fn test_legacy_document_gets_defaults() {
        let (_temp, store, path) = setup();
        fs::write(
            &path,
            r#"{"batch_id": "batch-old", "features": ["a", "b"], "current_index": 1,
                "completed": {"0": {"status": "completed", "timestamp": "2025-06-01T10:00:00Z"}},
                "auto_clear_events": [{"feature_index": 0, "tokens_before_clear": 155000,
                                       "timestamp": "2025-06-01T10:05:00Z"}],
                "status": "in_progress",
                "created_at": "2025-06-01T09:00:00Z", "updated_at": "2025-06-01T10:05:00Z"}"#,
        )
        .unwrap();

        let state = store.load(&path).unwrap();
        assert_eq!(state.schema_version, STATE_SCHEMA_VERSION);
        assert_eq!(state.source.source_type, SourceType::File);
        assert!(state.source.path.is_none());
        assert!(state.failed.is_empty());
        assert_eq!(state.context_token_estimate, 0);
        assert_eq!(state.auto_clear_count, 1);
    }

    #[test]
    fn test_save_outside_root_rejected_without_writing() {
        let (temp, store, _path) = setup();
        let escape = temp.path().join("../escaped_state.json");

        let err = store.save(&escape, &sample_state()).unwrap_err();
        assert!(matches!(err, BatchStateError::PathSecurity { .. }));
        assert!(!escape.exists());
    }

    #[test]
    fn test_modify_failure_writes_nothing() {
        let (_temp, store, path) = setup();
        store.save(&path, &sample_state()).unwrap();
        let before = fs::read(&path).unwrap();

        let err = store
            .modify(&path, |state| {
                state.context_token_estimate = 99;
                Err(BatchStateError::validation("rejected"))
            })
            .unwrap_err();
        assert!(matches!(err, BatchStateError::Validation(_)));
        assert_eq!(fs::read(&path).unwrap(), before);
    }

    #[test]
    fn test_modify_persists_and_touches() {
        let (_temp, store, path) = setup();
        let state = sample_state();
        store.save(&path, &state).unwrap();

        let updated = store
            .modify(&path, |state| {
                state.context_token_estimate += 10;
                Ok(())
            })
            .unwrap();
        assert_eq!(updated.context_token_estimate, 10);
        assert!(updated.updated_at >= state.updated_at);
        assert_eq!(store.load(&path).unwrap(), updated);
    }

    #[test]
    fn test_modify_missing_file_is_not_found() {
        let (_temp, store, path) = setup();
        let err = store.modify(&path, |_| Ok(())).unwrap_err();
        assert_eq!(err.io_kind(), Some(IoErrorKind::NotFound));
    }

    #[test]
    fn test_create_new_refuses_running_batch() {
        let (_temp, store, path) = setup();
        store.create_new(&path, &sample_state()).unwrap();

        let err = store.create_new(&path, &sample_state()).unwrap_err();
        assert!(matches!(err, BatchStateError::Validation(_)));

        store
            .modify(&path, |state| {
                state.status = BatchStatus::Aborted;
                Ok(())
            })
            .unwrap();
        store.create_new(&path, &sample_state()).unwrap();
    }

    #[test]
    fn test_remove_if_respects_predicate() {
        let (_temp, store, path) = setup();
        store.save(&path, &sample_state()).unwrap();

        let err = store
            .remove_if(&path, |_| Err(BatchStateError::validation("keep it")))
            .unwrap_err();
        assert!(matches!(err, BatchStateError::Validation(_)));
        assert!(path.exists());

        assert_eq!(store.remove_if(&path, |_| Ok(())).unwrap(), CleanupOutcome::Removed);
        assert!(!path.exists());
        assert_eq!(
            store.remove_if(&path, |_| Ok(())).unwrap(),
            CleanupOutcome::AlreadyAbsent
        );
    }

    #[test]
    fn test_cleanup_keeps_lock_file_for_waiters() {
        use fs2::FileExt;
        use std::time::Duration;

        let temp = TempDir::new().unwrap();
        let config = StateConfig::new(temp.path()).with_lock_timeout(Duration::from_millis(100));
        let store = StateStore::new(&config).unwrap();
        let path = temp.path().join("batch_state.json");
        let lock_path = temp.path().join("batch_state.json.lock");
        store.save(&path, &sample_state()).unwrap();

        // A caller that opened the lock file before cleanup and is still waiting on it
        let waiter = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&lock_path)
            .unwrap();

        assert_eq!(store.remove_if(&path, |_| Ok(())).unwrap(), CleanupOutcome::Removed);
        assert!(lock_path.exists());

        FileExt::try_lock_exclusive(&waiter).unwrap();

        // Later callers must contend with the waiter rather than lock a fresh file
        let err = store.save(&path, &sample_state()).unwrap_err();
        assert!(err.is_retryable());
        assert!(!path.exists());

        FileExt::unlock(&waiter).unwrap();
        store.save(&path, &sample_state()).unwrap();
    }

    #[test]
    fn test_save_refuses_invalid_state() {
        let (_temp, store, path) = setup();
        let mut state = sample_state();
        state.current_index = 10;

        let err = store.save(&path, &state).unwrap_err();
        assert!(matches!(err, BatchStateError::Validation(_)));
        assert!(!path.exists());
    }
}
