//! `pprof-lens lines`.

use clap::Args;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use std::path::PathBuf;
use std::sync::Arc;

use crate::{Config, Diagnostic, IngestOutcome, IngestStats, LensResult, LineHotspot, MetricTotals};

use super::load_profile;

#[derive(Debug, Clone, Args)]
pub struct LinesArgs {
    /// Profile file, gzipped or raw.
    #[arg(value_name = "PROFILE")]
    pub profile: PathBuf,
    /// Number of lines to show.
    #[arg(long, default_value_t = 20)]
    pub top: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadStatus {
    Loaded,
    NoFilesMatched,
}

#[derive(Debug, Clone, Serialize)]
pub struct LinesReport {
    pub profile: String,
    pub status: LoadStatus,
    pub stats: IngestStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub totals: Option<MetricTotals>,
    pub lines: Vec<LineHotspot>,
    pub diagnostics: Vec<Diagnostic>,
}

pub async fn lines_command(
    config: Arc<Config>,
    args: &LinesArgs,
    cancel: CancellationToken,
) -> LensResult<LinesReport> {
    let (outcome, diagnostics) = load_profile(config, &args.profile, cancel).await?;
    let profile = args.profile.display().to_string();
    Ok(match outcome {
        IngestOutcome::Loaded { metrics, stats } => LinesReport {
            profile,
            status: LoadStatus::Loaded,
            stats,
            totals: Some(metrics.totals),
            lines: metrics.top_lines(args.top),
            diagnostics,
        },
        IngestOutcome::NoFilesMatched { stats } => LinesReport {
            profile,
            status: LoadStatus::NoFilesMatched,
            stats,
            totals: None,
            lines: Vec::new(),
            diagnostics,
        },
    })
}
