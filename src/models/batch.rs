//! Batch state document
//!
//! Defines the persisted shape of one batch run. Field names are stable;
//! fields added after the first release carry serde defaults so older
//! documents keep loading.

use super::source::SourceDescriptor;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Estimated context tokens at which the caller should clear its context
pub const AUTO_CLEAR_THRESHOLD: u64 = 150_000;

/// Schema version written by this build
pub const STATE_SCHEMA_VERSION: u32 = 2;

/// Position of a feature within a batch
pub type FeatureIndex = usize;

fn legacy_schema_version() -> u32 {
    1
}

/// One unit of work: a bare description or a small record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Feature {
    Text(String),
    Record(FeatureRecord),
}

/// Structured feature, typically produced from a tracker issue
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeatureRecord {
    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_number: Option<u32>,
}

impl Feature {
    /// Display label for progress output
    pub fn title(&self) -> &str {
        match self {
            Feature::Text(text) => text,
            Feature::Record(record) => &record.title,
        }
    }
}

impl From<&str> for Feature {
    fn from(text: &str) -> Self {
        Feature::Text(text.to_string())
    }
}

impl From<String> for Feature {
    fn from(text: String) -> Self {
        Feature::Text(text)
    }
}

/// Lifecycle of a batch. Only `InProgress` accepts mutations.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    #[default]
    InProgress,
    Completed,
    Failed,
    Aborted,
}

impl BatchStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, BatchStatus::InProgress)
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            BatchStatus::InProgress => "in_progress",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
            BatchStatus::Aborted => "aborted",
        };
        f.write_str(label)
    }
}

/// Per-feature status tag stored alongside each result
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FeatureStatus {
    Completed,
    Failed,
}

/// Result of a successfully processed feature
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompletedFeature {
    pub status: FeatureStatus,

    /// Reference to the feature's output (commit, file, URL)
    #[serde(default)]
    pub output: Option<String>,

    pub timestamp: DateTime<Utc>,
}

/// Error record for a feature that failed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FailedFeature {
    pub status: FeatureStatus,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

/// What the executor reports for one feature
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeatureOutcome {
    Success { output: Option<String> },
    Failure { error: String },
}

impl FeatureOutcome {
    pub fn success() -> Self {
        FeatureOutcome::Success { output: None }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        FeatureOutcome::Failure {
            error: error.into(),
        }
    }
}

/// A recorded context clear
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AutoClearEvent {
    pub feature_index: FeatureIndex,
    pub tokens_before_clear: u64,
    pub timestamp: DateTime<Utc>,
}

/// Persistent state of one batch run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchState {
    #[serde(default = "legacy_schema_version")]
    pub schema_version: u32,

    pub batch_id: String,

    /// Where features came from (missing in v1 documents)
    #[serde(default)]
    pub source: SourceDescriptor,

    pub features: Vec<Feature>,

    /// Cursor into `features`; equals `features.len()` once all are dispatched
    pub current_index: FeatureIndex,

    #[serde(default)]
    pub completed: BTreeMap<FeatureIndex, CompletedFeature>,

    #[serde(default)]
    pub failed: BTreeMap<FeatureIndex, FailedFeature>,

    #[serde(default)]
    pub context_token_estimate: u64,

    #[serde(default)]
    pub auto_clear_count: usize,

    #[serde(default)]
    pub auto_clear_events: Vec<AutoClearEvent>,

    pub status: BatchStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BatchState {
    /// Fresh in-progress state with all counters at zero
    pub fn new(
        batch_id: impl Into<String>,
        features: Vec<Feature>,
        source: SourceDescriptor,
    ) -> Self {
        let now = Utc::now();
        Self {
            schema_version: STATE_SCHEMA_VERSION,
            batch_id: batch_id.into(),
            source,
            features,
            current_index: 0,
            completed: BTreeMap::new(),
            failed: BTreeMap::new(),
            context_token_estimate: 0,
            auto_clear_count: 0,
            auto_clear_events: Vec::new(),
            status: BatchStatus::InProgress,
            abort_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn total_features(&self) -> usize {
        self.features.len()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether a feature already has a recorded outcome
    pub fn is_accounted(&self, index: FeatureIndex) -> bool {
        self.completed.contains_key(&index) || self.failed.contains_key(&index)
    }

    /// Lowest feature index without a recorded outcome
    pub fn next_pending(&self) -> Option<FeatureIndex> {
        (0..self.features.len()).find(|index| !self.is_accounted(*index))
    }

    pub fn should_auto_clear(&self) -> bool {
        self.context_token_estimate >= AUTO_CLEAR_THRESHOLD
    }

    pub fn progress(&self) -> BatchProgress {
        let total = self.features.len();
        let completed = self.completed.len();
        let failed = self.failed.len();
        let done = completed + failed;
        let percent_complete = if total == 0 {
            0.0
        } else {
            done as f64 * 100.0 / total as f64
        };

        BatchProgress {
            total,
            completed,
            failed,
            pending: total.saturating_sub(done),
            percent_complete,
        }
    }

    /// Bring an older document up to the current schema version
    pub fn upgrade(&mut self) {
        if self.schema_version < STATE_SCHEMA_VERSION {
            // v1 documents had no separate counter
            self.auto_clear_count = self.auto_clear_events.len();
            self.schema_version = STATE_SCHEMA_VERSION;
        }
    }

    /// Bump `updated_at`, never letting it fall behind `created_at`
    pub fn touch(&mut self) {
        self.updated_at = Utc::now().max(self.created_at);
    }

    /// Check the semantic invariants that a JSON schema cannot express
    ///
    /// Returns a description of the first violation found.
    pub fn validate(&self) -> Result<(), String> {
        let total = self.features.len();

        if self.batch_id.trim().is_empty() {
            return Err("batch_id is empty".to_string());
        }
        if total == 0 {
            return Err("features list is empty".to_string());
        }
        if self.current_index > total {
            return Err(format!(
                "current_index {} exceeds feature count {}",
                self.current_index, total
            ));
        }
        if let Some(index) = self
            .completed
            .keys()
            .chain(self.failed.keys())
            .find(|index| **index >= total)
        {
            return Err(format!(
                "result recorded for index {} but only {} features exist",
                index, total
            ));
        }
        if let Some(index) = self.completed.keys().find(|i| self.failed.contains_key(i)) {
            return Err(format!(
                "index {} is recorded as both completed and failed",
                index
            ));
        }
        if self.auto_clear_count != self.auto_clear_events.len() {
            return Err(format!(
                "auto_clear_count {} does not match {} recorded events",
                self.auto_clear_count,
                self.auto_clear_events.len()
            ));
        }
        if self.updated_at < self.created_at {
            return Err("updated_at precedes created_at".to_string());
        }

        Ok(())
    }
}

/// Summary counts for status output
#[derive(Debug, Clone, PartialEq)]
pub struct BatchProgress {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub pending: usize,
    pub percent_complete: f64,
}
