//! Feature sources
//!
//! A batch is built from either a local feature file or a list of external
//! tracker issue numbers. The fetcher that turns issue numbers into feature
//! descriptions lives outside this crate; here we only validate identifiers
//! and record where features came from.

use crate::state::{BatchStateError, StateResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Maximum number of tracker issues accepted for one batch
pub const MAX_ISSUES_PER_BATCH: usize = 100;

/// Largest issue number accepted from the tracker
pub const MAX_ISSUE_NUMBER: u32 = 999_999;

/// Where the features of a batch came from
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    #[default]
    File,
    ExternalTracker,
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceType::File => f.write_str("file"),
            SourceType::ExternalTracker => f.write_str("external_tracker"),
        }
    }
}

/// Opaque reference to the origin of a batch's features
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceDescriptor {
    #[serde(default)]
    pub source_type: SourceType,

    /// Feature file path (file sources only)
    #[serde(default)]
    pub path: Option<String>,

    /// Tracker issue numbers (external tracker sources only)
    #[serde(default)]
    pub issue_numbers: Vec<u32>,
}

impl SourceDescriptor {
    /// Features read from a local file
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            source_type: SourceType::File,
            path: Some(path.into()),
            issue_numbers: Vec::new(),
        }
    }

    /// Features fetched from tracker issues
    ///
    /// Rejects an empty list, more than [`MAX_ISSUES_PER_BATCH`] identifiers,
    /// and any number outside `1..=MAX_ISSUE_NUMBER`. Duplicates are dropped
    /// while keeping the first occurrence.
    pub fn issues(numbers: &[u32]) -> StateResult<Self> {
        if numbers.is_empty() {
            return Err(BatchStateError::validation("No issue numbers provided"));
        }

        let mut seen = HashSet::new();
        let mut unique = Vec::with_capacity(numbers.len());
        for &number in numbers {
            if number == 0 || number > MAX_ISSUE_NUMBER {
                return Err(BatchStateError::validation(format!(
                    "Issue number {} out of range (1-{})",
                    number, MAX_ISSUE_NUMBER
                )));
            }
            if seen.insert(number) {
                unique.push(number);
            }
        }

        if unique.len() > MAX_ISSUES_PER_BATCH {
            return Err(BatchStateError::validation(format!(
                "Too many issues: {} (max {} per batch)",
                unique.len(),
                MAX_ISSUES_PER_BATCH
            )));
        }

        Ok(Self {
            source_type: SourceType::ExternalTracker,
            path: None,
            issue_numbers: unique,
        })
    }
}

/// Parse a comma separated issue list such as `"72, 73,74"` or `"#72,#73"`
pub fn parse_issue_list(input: &str) -> StateResult<Vec<u32>> {
    input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.trim_start_matches('#').parse::<u32>().map_err(|_| {
                BatchStateError::validation(format!("Invalid issue number: '{}'", s))
            })
        })
        .collect()
}

/// Extract feature descriptions from a feature file
///
/// One feature per line. Blank lines and `#` comments are skipped.
pub fn parse_feature_file(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issues_dedupes_preserving_order() {
        let source = SourceDescriptor::issues(&[72, 73, 72, 74]).unwrap();
        assert_eq!(source.source_type, SourceType::ExternalTracker);
        assert_eq!(source.issue_numbers, vec![72, 73, 74]);
        assert!(source.path.is_none());
    }

    #[test]
    fn test_issues_rejects_out_of_range() {
        assert!(SourceDescriptor::issues(&[0]).is_err());
        assert!(SourceDescriptor::issues(&[MAX_ISSUE_NUMBER + 1]).is_err());
        assert!(SourceDescriptor::issues(&[]).is_err());
        assert!(SourceDescriptor::issues(&[MAX_ISSUE_NUMBER]).is_ok());
    }

    #[test]
    fn test_issues_rejects_too_many() {
        let numbers: Vec<u32> = (1..=101).collect();
        let err = SourceDescriptor::issues(&numbers).unwrap_err();
        assert!(matches!(err, BatchStateError::Validation(_)));

        let numbers: Vec<u32> = (1..=100).collect();
        assert!(SourceDescriptor::issues(&numbers).is_ok());
    }

    #[test]
    fn test_parse_issue_list() {
        assert_eq!(parse_issue_list("72, 73,#74").unwrap(), vec![72, 73, 74]);
        assert_eq!(parse_issue_list("").unwrap(), Vec::<u32>::new());
        assert!(parse_issue_list("72,abc").is_err());
        assert!(parse_issue_list("-3").is_err());
    }

    #[test]
    fn test_parse_feature_file_skips_comments_and_blanks() {
        let content = "# Sprint features\n\nAdd login\n  Add logout  \n# trailing\n";
        assert_eq!(
            parse_feature_file(content),
            vec!["Add login".to_string(), "Add logout".to_string()]
        );
    }

    #[test]
    fn test_default_source_is_file() {
        let source = SourceDescriptor::default();
        assert_eq!(source.source_type, SourceType::File);
        assert!(source.path.is_none());
        assert!(source.issue_numbers.is_empty());
    }
}
