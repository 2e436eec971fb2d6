//! BatchStateMachine - batch lifecycle on top of [`StateStore`]
//!
//! Each mutating operation is one exclusive-locked read-modify-write. The
//! transition functions below are pure so they can be checked without I/O;
//! a rejected transition never reaches the disk.

use super::config::StateConfig;
use super::error::{BatchStateError, StateResult};
use super::store::{CleanupOutcome, StateStore};
use crate::models::{
    AutoClearEvent, BatchProgress, BatchState, BatchStatus, CompletedFeature, FailedFeature,
    Feature, FeatureIndex, FeatureOutcome, FeatureStatus, SourceDescriptor,
};
use chrono::Utc;
use std::path::Path;
use uuid::Uuid;

/// Drives batch state transitions
pub struct BatchStateMachine {
    store: StateStore,
}

impl BatchStateMachine {
    pub fn new(config: &StateConfig) -> StateResult<Self> {
        Ok(Self {
            store: StateStore::new(config)?,
        })
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Start a new batch over `features` and persist it at `path`
    pub fn create(
        &self,
        path: &Path,
        features: Vec<Feature>,
        source: SourceDescriptor,
    ) -> StateResult<BatchState> {
        if features.is_empty() {
            return Err(BatchStateError::validation(
                "Cannot create a batch with no features",
            ));
        }

        let state = BatchState::new(generate_batch_id(), features, source);
        self.store.create_new(path, &state)?;

        tracing::info!(
            batch_id = %state.batch_id,
            features = state.total_features(),
            source = %state.source.source_type,
            "Created batch"
        );
        Ok(state)
    }

    /// Record the outcome of feature `index` and add its token cost
    pub fn update_progress(
        &self,
        path: &Path,
        index: FeatureIndex,
        outcome: FeatureOutcome,
        token_delta: u64,
    ) -> StateResult<BatchState> {
        let state = self
            .store
            .modify(path, |state| apply_progress(state, index, outcome, token_delta))?;

        if state.is_terminal() {
            tracing::info!(batch_id = %state.batch_id, status = %state.status, "Batch finished");
        }
        Ok(state)
    }

    /// Whether the caller should clear its context before the next feature
    pub fn should_auto_clear(state: &BatchState) -> bool {
        state.should_auto_clear()
    }

    /// Record that the caller cleared its context after feature `index`
    pub fn record_auto_clear(
        &self,
        path: &Path,
        index: FeatureIndex,
        tokens_before_clear: u64,
    ) -> StateResult<BatchState> {
        let state = self
            .store
            .modify(path, |state| apply_auto_clear(state, index, tokens_before_clear))?;

        tracing::info!(
            batch_id = %state.batch_id,
            feature_index = index,
            tokens_before_clear,
            auto_clear_count = state.auto_clear_count,
            "Recorded auto-clear"
        );
        Ok(state)
    }

    /// Lowest feature index still waiting for an outcome
    pub fn next_pending(state: &BatchState) -> Option<FeatureIndex> {
        state.next_pending()
    }

    pub fn progress(state: &BatchState) -> BatchProgress {
        state.progress()
    }

    /// Stop an in-progress batch for good
    pub fn abort(&self, path: &Path, reason: impl Into<String>) -> StateResult<BatchState> {
        let reason = reason.into();
        let state = self.store.modify(path, |state| apply_abort(state, reason))?;
        tracing::info!(batch_id = %state.batch_id, "Batch aborted");
        Ok(state)
    }

    /// Resume from `path`
    pub fn load(&self, path: &Path) -> StateResult<BatchState> {
        self.store.load(path)
    }

    pub fn try_load(&self, path: &Path) -> StateResult<Option<BatchState>> {
        self.store.try_load(path)
    }

    /// Delete the state file of a finished batch
    ///
    /// An in-progress batch is kept so it can still be resumed; abort it first.
    pub fn cleanup(&self, path: &Path) -> StateResult<CleanupOutcome> {
        let outcome = self.store.remove_if(path, |state| {
            if state.is_terminal() {
                Ok(())
            } else {
                Err(BatchStateError::validation(format!(
                    "Batch '{}' is still in progress; abort it before cleanup",
                    state.batch_id
                )))
            }
        })?;

        tracing::info!(path = %path.display(), ?outcome, "Cleaned up batch state");
        Ok(outcome)
    }
}

/// Process-unique batch identifier, e.g. `batch-20261019-143000-1a2b3c4d`
pub fn generate_batch_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "batch-{}-{}",
        Utc::now().format("%Y%m%d-%H%M%S"),
        &suffix[..8]
    )
}

fn ensure_mutable(state: &BatchState) -> StateResult<()> {
    if state.is_terminal() {
        return Err(BatchStateError::validation(format!(
            "Batch '{}' is {} and accepts no further changes",
            state.batch_id, state.status
        )));
    }
    Ok(())
}

fn ensure_in_range(state: &BatchState, index: FeatureIndex) -> StateResult<()> {
    if index >= state.total_features() {
        return Err(BatchStateError::validation(format!(
            "Feature index {} out of range (batch has {} features)",
            index,
            state.total_features()
        )));
    }
    Ok(())
}

pub(crate) fn apply_progress(
    state: &mut BatchState,
    index: FeatureIndex,
    outcome: FeatureOutcome,
    token_delta: u64,
) -> StateResult<()> {
    ensure_mutable(state)?;
    ensure_in_range(state, index)?;
    if state.is_accounted(index) {
        return Err(BatchStateError::validation(format!(
            "Feature {} already has a recorded outcome",
            index
        )));
    }

    let timestamp = Utc::now();
    match outcome {
        FeatureOutcome::Success { output } => {
            state.completed.insert(
                index,
                CompletedFeature {
                    status: FeatureStatus::Completed,
                    output,
                    timestamp,
                },
            );
        }
        FeatureOutcome::Failure { error } => {
            state.failed.insert(
                index,
                FailedFeature {
                    status: FeatureStatus::Failed,
                    error,
                    timestamp,
                },
            );
        }
    }

    state.context_token_estimate = state.context_token_estimate.saturating_add(token_delta);
    state.current_index = state.current_index.max(index + 1);

    if state.completed.len() + state.failed.len() == state.total_features() {
        state.status = if state.failed.is_empty() {
            BatchStatus::Completed
        } else {
            BatchStatus::Failed
        };
    }

    Ok(())
}

pub(crate) fn apply_auto_clear(
    state: &mut BatchState,
    index: FeatureIndex,
    tokens_before_clear: u64,
) -> StateResult<()> {
    ensure_mutable(state)?;
    ensure_in_range(state, index)?;

    state.auto_clear_events.push(AutoClearEvent {
        feature_index: index,
        tokens_before_clear,
        timestamp: Utc::now(),
    });
    state.auto_clear_count = state.auto_clear_events.len();
    state.context_token_estimate = 0;
    Ok(())
}

pub(crate) fn apply_abort(state: &mut BatchState, reason: String) -> StateResult<()> {
    ensure_mutable(state)?;
    state.status = BatchStatus::Aborted;
    state.abort_reason = Some(reason);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AUTO_CLEAR_THRESHOLD;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn features(count: usize) -> Vec<Feature> {
        (0..count).map(|i| Feature::Text(format!("feature {}", i))).collect()
    }

    fn sample_state(count: usize) -> BatchState {
        BatchState::new("batch-unit", features(count), SourceDescriptor::default())
    }

    fn setup() -> (TempDir, BatchStateMachine, PathBuf) {
        let temp = TempDir::new().unwrap();
        let machine = BatchStateMachine::new(&StateConfig::new(temp.path())).unwrap();
        let path = temp.path().join("batch_state.json");
        (temp, machine, path)
    }

    #[test]
    fn test_apply_progress_advances_cursor_and_tokens() {
        let mut state = sample_state(3);
        apply_progress(&mut state, 1, FeatureOutcome::success(), 500).unwrap();
        assert_eq!(state.current_index, 2);
        assert_eq!(state.context_token_estimate, 500);

        // Cursor never moves backwards
        apply_progress(&mut state, 0, FeatureOutcome::success(), 250).unwrap();
        assert_eq!(state.current_index, 2);
        assert_eq!(state.context_token_estimate, 750);
        assert_eq!(state.status, BatchStatus::InProgress);
    }

    #[test]
    fn test_apply_progress_rejects_bad_index() {
        let mut state = sample_state(2);
        assert!(apply_progress(&mut state, 2, FeatureOutcome::success(), 0).is_err());

        apply_progress(&mut state, 0, FeatureOutcome::success(), 0).unwrap();
        let err = apply_progress(&mut state, 0, FeatureOutcome::failure("again"), 0).unwrap_err();
        assert!(matches!(err, BatchStateError::Validation(_)));
        assert!(state.failed.is_empty());
    }

    #[test]
    fn test_all_success_completes_batch() {
        let mut state = sample_state(2);
        apply_progress(&mut state, 0, FeatureOutcome::success(), 0).unwrap();
        apply_progress(&mut state, 1, FeatureOutcome::success(), 0).unwrap();
        assert_eq!(state.status, BatchStatus::Completed);
        assert_eq!(state.current_index, 2);
    }

    #[test]
    fn test_any_failure_fails_batch() {
        let mut state = sample_state(2);
        apply_progress(&mut state, 0, FeatureOutcome::failure("tests red"), 0).unwrap();
        apply_progress(&mut state, 1, FeatureOutcome::success(), 0).unwrap();
        assert_eq!(state.status, BatchStatus::Failed);
        assert_eq!(state.failed[&0].error, "tests red");
    }

    #[test]
    fn test_terminal_state_rejects_everything() {
        let mut state = sample_state(1);
        apply_progress(&mut state, 0, FeatureOutcome::success(), 0).unwrap();

        assert!(apply_auto_clear(&mut state, 0, 10).is_err());
        assert!(apply_abort(&mut state, "late".to_string()).is_err());
        assert_eq!(state.status, BatchStatus::Completed);
    }

    #[test]
    fn test_auto_clear_resets_estimate() {
        let mut state = sample_state(3);
        state.context_token_estimate = AUTO_CLEAR_THRESHOLD + 1;
        apply_auto_clear(&mut state, 1, AUTO_CLEAR_THRESHOLD + 1).unwrap();

        assert_eq!(state.context_token_estimate, 0);
        assert_eq!(state.auto_clear_count, 1);
        assert_eq!(state.auto_clear_events[0].feature_index, 1);
        assert!(!BatchStateMachine::should_auto_clear(&state));
    }

    #[test]
    fn test_token_estimate_saturates() {
        let mut state = sample_state(2);
        state.context_token_estimate = u64::MAX - 1;
        apply_progress(&mut state, 0, FeatureOutcome::success(), 10).unwrap();
        assert_eq!(state.context_token_estimate, u64::MAX);
    }

    #[test]
    fn test_batch_ids_are_unique() {
        let a = generate_batch_id();
        let b = generate_batch_id();
        assert!(a.starts_with("batch-"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_create_rejects_empty_features() {
        let (_temp, machine, path) = setup();
        let err = machine
            .create(&path, Vec::new(), SourceDescriptor::default())
            .unwrap_err();
        assert!(matches!(err, BatchStateError::Validation(_)));
        assert!(!path.exists());
    }

    #[test]
    fn test_create_then_update_round_trip() {
        let (_temp, machine, path) = setup();
        let created = machine
            .create(&path, features(3), SourceDescriptor::file("features.txt"))
            .unwrap();

        machine
            .update_progress(&path, 0, FeatureOutcome::success(), 1000)
            .unwrap();
        let loaded = machine.load(&path).unwrap();

        assert_eq!(loaded.batch_id, created.batch_id);
        assert_eq!(loaded.context_token_estimate, 1000);
        assert_eq!(BatchStateMachine::next_pending(&loaded), Some(1));
    }

    #[test]
    fn test_abort_then_cleanup() {
        let (_temp, machine, path) = setup();
        machine
            .create(&path, features(2), SourceDescriptor::default())
            .unwrap();

        let err = machine.cleanup(&path).unwrap_err();
        assert!(matches!(err, BatchStateError::Validation(_)));
        assert!(path.exists());

        let aborted = machine.abort(&path, "operator stop").unwrap();
        assert_eq!(aborted.status, BatchStatus::Aborted);
        assert_eq!(aborted.abort_reason.as_deref(), Some("operator stop"));

        assert_eq!(machine.cleanup(&path).unwrap(), CleanupOutcome::Removed);
        assert_eq!(machine.cleanup(&path).unwrap(), CleanupOutcome::AlreadyAbsent);
    }
}
