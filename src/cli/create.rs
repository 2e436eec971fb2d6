//! `batchd create` - start a new batch

use super::BatchContext;
use crate::models::{parse_feature_file, parse_issue_list, Feature, FeatureRecord, SourceDescriptor};
use crate::Result;
use colored::Colorize;
use std::path::Path;

pub fn run(
    ctx: &BatchContext,
    features_file: Option<&Path>,
    issues: Option<&str>,
    titles: Vec<String>,
) -> Result<()> {
    let (features, source) = match (features_file, issues) {
        (Some(file), None) => {
            let content = std::fs::read_to_string(file).map_err(|e| {
                anyhow::anyhow!("Failed to read features file {}: {}", file.display(), e)
            })?;
            let mut features: Vec<Feature> =
                parse_feature_file(&content).into_iter().map(Feature::from).collect();
            features.extend(titles.into_iter().map(Feature::from));
            (features, SourceDescriptor::file(file.display().to_string()))
        }
        (None, Some(issues)) => {
            let source = SourceDescriptor::issues(&parse_issue_list(issues)?)?;
            let features = issue_features(&source.issue_numbers, titles)?;
            (features, source)
        }
        (None, None) => {
            let features = titles.into_iter().map(Feature::from).collect();
            (features, SourceDescriptor::default())
        }
        (Some(_), Some(_)) => {
            anyhow::bail!("Use either --features-file or --issues, not both");
        }
    };

    let state = ctx.machine.create(&ctx.state_path, features, source)?;

    println!(
        "{}",
        format!("🚀 Created batch {}", state.batch_id).green().bold()
    );
    println!("   Features: {}", state.total_features());
    println!("   Source:   {}", state.source.source_type);
    println!("   State:    {}", ctx.state_path.display());
    for (index, feature) in state.features.iter().enumerate() {
        println!("   {:>3}. {}", index, feature.title());
    }

    Ok(())
}

/// One record per issue; titles, when given, must line up with the issues
fn issue_features(issue_numbers: &[u32], titles: Vec<String>) -> Result<Vec<Feature>> {
    if !titles.is_empty() && titles.len() != issue_numbers.len() {
        anyhow::bail!(
            "Got {} --feature titles for {} issues",
            titles.len(),
            issue_numbers.len()
        );
    }

    let mut titles = titles.into_iter();
    Ok(issue_numbers
        .iter()
        .map(|&number| {
            let title = titles
                .next()
                .unwrap_or_else(|| format!("Issue #{}", number));
            Feature::Record(FeatureRecord {
                title,
                description: None,
                issue_number: Some(number),
            })
        })
        .collect())
}
