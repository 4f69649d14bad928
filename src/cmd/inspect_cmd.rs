//! `pprof-lens inspect`.

use clap::Args;
use serde::Serialize;

use std::path::PathBuf;

use crate::{LensResult, ProfileSummary, SampleTypeIndices, parse_profile, read_profile};

#[derive(Debug, Clone, Args)]
pub struct InspectArgs {
    /// Profile file, gzipped or raw.
    #[arg(value_name = "PROFILE")]
    pub profile: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct InspectReport {
    pub profile: String,
    pub summary: ProfileSummary,
    #[serde(rename = "sampleTypeIndices")]
    pub indices: SampleTypeIndices,
    #[serde(rename = "defaultSampleType", skip_serializing_if = "Option::is_none")]
    pub default_sample_type: Option<String>,
    pub mappings: Vec<String>,
    pub comments: Vec<String>,
}

pub fn inspect_command(args: &InspectArgs) -> LensResult<InspectReport> {
    let profile = parse_profile(&read_profile(&args.profile)?)?;
    let mut mappings: Vec<String> = profile
        .mappings
        .values()
        .filter(|m| !m.filename.is_empty())
        .map(|m| m.filename.clone())
        .collect();
    mappings.sort();
    mappings.dedup();
    Ok(InspectReport {
        profile: args.profile.display().to_string(),
        summary: profile.summary(),
        indices: SampleTypeIndices::classify(&profile),
        default_sample_type: profile.default_sample_type.clone(),
        mappings,
        comments: profile.comments.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::fixture;

    #[test]
    fn inspect_summarizes_without_resolving() {
        let fx = fixture::workspace("cmd-inspect");
        let report = inspect_command(&InspectArgs {
            profile: fx.profile,
        })
        .expect("inspect");
        assert_eq!(report.summary.sample_count, 3);
        assert_eq!(report.summary.unique_files, 3);
        assert_eq!(report.summary.duration_ms, 10_000.0);
        assert!(report.summary.captured_at.is_some());
        assert_eq!(report.indices.cpu, Some(1));
        assert!(report.mappings.is_empty());
    }

    #[test]
    fn missing_profile_is_io_error() {
        let err = inspect_command(&InspectArgs {
            profile: PathBuf::from("/no/such/profile.pb.gz"),
        })
        .expect_err("missing");
        assert!(matches!(err, crate::LensError::Io(_)));
    }
}
