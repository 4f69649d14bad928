//! `pprof-lens resolve`.

use clap::Args;
use serde::Serialize;

use std::path::PathBuf;
use std::sync::Arc;

use crate::{
    Config, Diagnostic, LensResult, LocalFs, PathResolver, Resolution, ResolutionMode, ResolvedBy,
    UnresolvedReason, parse_profile, read_profile,
};

#[derive(Debug, Clone, Args)]
pub struct ResolveArgs {
    /// Profile file, gzipped or raw.
    #[arg(value_name = "PROFILE")]
    pub profile: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolveEntry {
    pub profiled: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub by: Option<ResolvedBy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unresolved: Option<UnresolvedReason>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolveReport {
    pub profile: String,
    pub mode: ResolutionMode,
    #[serde(rename = "resolvedCount")]
    pub resolved_count: usize,
    #[serde(rename = "unresolvedCount")]
    pub unresolved_count: usize,
    pub entries: Vec<ResolveEntry>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Resolves every distinct path in the profile once and reports the
/// strategy that matched, or why none did.
pub async fn resolve_command(config: Arc<Config>, args: &ResolveArgs) -> LensResult<ResolveReport> {
    let profile = parse_profile(&read_profile(&args.profile)?)?;
    let mut resolver = PathResolver::new(&config, Arc::new(LocalFs))?;
    resolver.build_index().await?;

    let mut entries = Vec::new();
    for name in profile.unique_filenames() {
        let entry = match resolver.resolve(name) {
            Resolution::Resolved { path, by } => ResolveEntry {
                profiled: name.to_string(),
                resolved: Some(path.to_path_buf()),
                by: Some(by),
                unresolved: None,
            },
            Resolution::Unresolved(reason) => ResolveEntry {
                profiled: name.to_string(),
                resolved: None,
                by: None,
                unresolved: Some(reason),
            },
        };
        entries.push(entry);
    }
    let resolved_count = entries.iter().filter(|e| e.resolved.is_some()).count();
    Ok(ResolveReport {
        profile: args.profile.display().to_string(),
        mode: resolver.mode(),
        resolved_count,
        unresolved_count: entries.len() - resolved_count,
        entries,
        diagnostics: resolver.take_diagnostics(),
    })
}
