//! End-to-end loading: bytes in, line metrics out.

use serde::Serialize;
use tracing::Instrument as _;

use std::collections::BTreeMap;
use std::path::Path;

use crate::{
    AggregationConfig, FileMetrics, FunctionMetrics, LensError, LensResult, LineMetrics,
    LoadContext, MetricsSet, OutlineSymbol, ParsedProfile, PathResolver, ProfileMetrics,
    aggregate_functions, attribute, function_ranges, parse_profile,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    pub samples: usize,
    pub frames: usize,
    #[serde(rename = "resolvedFrames")]
    pub resolved_frames: usize,
    #[serde(rename = "unresolvedFrames")]
    pub unresolved_frames: usize,
    #[serde(rename = "ignoredFrames")]
    pub ignored_frames: usize,
    #[serde(rename = "uniquePaths")]
    pub unique_paths: usize,
    #[serde(rename = "resolvedPaths")]
    pub resolved_paths: usize,
    #[serde(rename = "cacheHits")]
    pub cache_hits: usize,
    #[serde(rename = "cacheMisses")]
    pub cache_misses: usize,
    #[serde(rename = "basenameWalks")]
    pub basename_walks: usize,
}

/// Result of a load that got through decoding. Finding nothing on disk is
/// reported as its own outcome so callers can point the user at path
/// mappings instead of showing an empty view.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IngestOutcome {
    Loaded {
        metrics: ProfileMetrics,
        stats: IngestStats,
    },
    NoFilesMatched {
        stats: IngestStats,
    },
}

impl IngestOutcome {
    pub fn stats(&self) -> &IngestStats {
        match self {
            Self::Loaded { stats, .. } | Self::NoFilesMatched { stats } => stats,
        }
    }

    pub fn into_metrics(self) -> Option<ProfileMetrics> {
        match self {
            Self::Loaded { metrics, .. } => Some(metrics),
            Self::NoFilesMatched { .. } => None,
        }
    }
}

pub fn read_profile(path: &Path) -> LensResult<Vec<u8>> {
    std::fs::read(path).map_err(|err| {
        LensError::Io(std::io::Error::new(
            err.kind(),
            format!("failed to read profile {}: {err}", path.display()),
        ))
    })
}

/// Decompresses and decodes `raw`, then attributes it.
pub async fn ingest(
    raw: &[u8],
    resolver: &mut PathResolver,
    ctx: &mut LoadContext,
) -> LensResult<IngestOutcome> {
    let span = ctx.span().clone();
    let profile = span.in_scope(|| parse_profile(raw))?;
    ingest_parsed(&profile, resolver, ctx).await
}

/// Runs indexing, pre-warm and attribution over an already decoded profile.
/// Resolver diagnostics are moved into `ctx`. On error or cancellation no
/// partial metrics are returned.
pub async fn ingest_parsed(
    profile: &ParsedProfile,
    resolver: &mut PathResolver,
    ctx: &mut LoadContext,
) -> LensResult<IngestOutcome> {
    let span = ctx.span().clone();
    run_pipeline(profile, resolver, ctx).instrument(span).await
}

async fn run_pipeline(
    profile: &ParsedProfile,
    resolver: &mut PathResolver,
    ctx: &mut LoadContext,
) -> LensResult<IngestOutcome> {
    resolver.reset_for_roots(ctx.config());
    resolver.build_index().await?;
    if ctx.is_cancelled() {
        return Err(LensError::Cancelled);
    }
    let (unique_paths, resolved_paths) = resolver.prewarm(profile);
    let result = attribute(profile, resolver, ctx).await;
    ctx.extend_diagnostics(resolver.take_diagnostics());
    let attribution = result?;

    let resolver_stats = resolver.stats();
    let counts = attribution.counts;
    let stats = IngestStats {
        samples: counts.samples,
        frames: counts.frames,
        resolved_frames: counts.resolved_frames,
        unresolved_frames: counts.unresolved_frames,
        ignored_frames: counts.ignored_frames,
        unique_paths,
        resolved_paths,
        cache_hits: resolver_stats.cache_hits,
        cache_misses: resolver_stats.cache_misses,
        basename_walks: resolver_stats.basename_walks,
    };
    if stats.resolved_frames == 0 {
        tracing::warn!(
            unique_paths,
            "no profiled file matched the workspace; check workspace_roots and path_mappings"
        );
        return Ok(IngestOutcome::NoFilesMatched { stats });
    }
    tracing::info!(
        samples = stats.samples,
        files = attribution.metrics.files.len(),
        resolved_paths,
        unique_paths,
        "profile loaded"
    );
    Ok(IngestOutcome::Loaded {
        metrics: attribution.metrics,
        stats,
    })
}

/// Loaded metrics, keyed by profile name (`cpu`, `heap`, ...).
#[derive(Debug, Default)]
pub struct ProfileStore {
    profiles: BTreeMap<String, ProfileMetrics>,
}

impl ProfileStore {
    pub fn insert(&mut self, name: impl Into<String>, metrics: ProfileMetrics) {
        self.profiles.insert(name.into(), metrics);
    }

    pub fn remove(&mut self, name: &str) -> Option<ProfileMetrics> {
        self.profiles.remove(name)
    }

    pub fn clear(&mut self) {
        self.profiles.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }

    pub fn get(&self, name: &str) -> Option<&ProfileMetrics> {
        self.profiles.get(name)
    }

    pub fn to_set(&self) -> MetricsSet {
        MetricsSet::Named(self.profiles.clone())
    }

    /// Metrics for `line` of `file` in every profile that has them.
    pub fn line(&self, file: &Path, line: u32) -> Vec<(&str, &LineMetrics)> {
        self.profiles
            .iter()
            .filter_map(|(name, m)| m.line(file, line).map(|l| (name.as_str(), l)))
            .collect()
    }

    pub fn file(&self, file: &Path) -> Vec<(&str, &FileMetrics)> {
        self.profiles
            .iter()
            .filter_map(|(name, m)| m.file(file).map(|f| (name.as_str(), f)))
            .collect()
    }

    /// Function metrics for `file` in profile `name`, computed on demand.
    pub fn functions_for(
        &self,
        name: &str,
        file: &Path,
        outline: &[OutlineSymbol],
        cfg: &AggregationConfig,
    ) -> Vec<FunctionMetrics> {
        let Some(lines) = self.get(name).and_then(|m| m.file(file)) else {
            return Vec::new();
        };
        aggregate_functions(lines, &function_ranges(outline), cfg)
    }
}
