pub mod batch;
pub mod source;

pub use batch::{
    AutoClearEvent, BatchProgress, BatchState, BatchStatus, CompletedFeature, FailedFeature,
    Feature, FeatureIndex, FeatureOutcome, FeatureRecord, FeatureStatus, AUTO_CLEAR_THRESHOLD,
    STATE_SCHEMA_VERSION,
};
pub use source::{
    parse_feature_file, parse_issue_list, SourceDescriptor, SourceType, MAX_ISSUES_PER_BATCH,
    MAX_ISSUE_NUMBER,
};
