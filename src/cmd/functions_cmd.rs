//! `pprof-lens functions`.

use clap::Args;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::{
    Config, Diagnostic, FunctionMetrics, IngestOutcome, LensError, LensResult, OutlineSymbol,
    ProfileMetrics, ProfileStore, normalize_lexically,
};

use super::{LoadStatus, load_profile};

#[derive(Debug, Clone, Args)]
pub struct FunctionsArgs {
    /// Profile file, gzipped or raw.
    #[arg(value_name = "PROFILE")]
    pub profile: PathBuf,
    /// Source file to report on, absolute or relative to a workspace root.
    #[arg(long)]
    pub file: PathBuf,
    /// JSON outline of the file: a list of `{name, kind, range, children}`.
    #[arg(long)]
    pub outline: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionsReport {
    pub profile: String,
    pub status: LoadStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    pub functions: Vec<FunctionMetrics>,
    pub diagnostics: Vec<Diagnostic>,
}

pub fn load_outline(path: &Path) -> LensResult<Vec<OutlineSymbol>> {
    let raw = std::fs::read_to_string(path)?;
    serde_json::from_str(&raw).map_err(|err| {
        LensError::InvalidArgument(format!("invalid outline {}: {err}", path.display()))
    })
}

pub async fn functions_command(
    config: Arc<Config>,
    args: &FunctionsArgs,
    cancel: CancellationToken,
) -> LensResult<FunctionsReport> {
    let outline = load_outline(&args.outline)?;
    let aggregation = config.aggregation();
    let roots = config.workspace_roots.clone();
    let (outcome, diagnostics) = load_profile(config, &args.profile, cancel).await?;
    let profile = args.profile.display().to_string();

    let metrics = match outcome {
        IngestOutcome::Loaded { metrics, .. } => metrics,
        IngestOutcome::NoFilesMatched { .. } => {
            return Ok(FunctionsReport {
                profile,
                status: LoadStatus::NoFilesMatched,
                file: None,
                functions: Vec::new(),
                diagnostics,
            });
        }
    };

    let file = locate_file(&metrics, &roots, &args.file);
    let mut store = ProfileStore::default();
    store.insert(profile.clone(), metrics);
    let functions = match &file {
        Some(file) => store.functions_for(&profile, file, &outline, &aggregation),
        None => {
            tracing::warn!(file = %args.file.display(), "file has no attributed samples");
            Vec::new()
        }
    };
    Ok(FunctionsReport {
        profile,
        status: LoadStatus::Loaded,
        file,
        functions,
        diagnostics,
    })
}

/// The metrics key for a user-supplied path.
fn locate_file(metrics: &ProfileMetrics, roots: &[PathBuf], file: &Path) -> Option<PathBuf> {
    let mut candidates = vec![normalize_lexically(file)];
    if file.is_relative() {
        candidates.extend(roots.iter().map(|root| normalize_lexically(&root.join(file))));
    }
    candidates.into_iter().find(|c| metrics.file(c).is_some())
}
