//! Maps file paths recorded in a profile onto files in the local workspace.
//!
//! Strategies run in a fixed order and stop at the first hit: cache,
//! configured prefix mappings, absolute path, workspace-relative join,
//! workspace index (indexed mode), and finally a bounded basename search.
//! Hits and misses are both cached, so each distinct profiled path costs at
//! most one pass through the strategies per session.

use serde::Serialize;

use std::collections::{BTreeSet, HashMap};
use std::ops::ControlFlow;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::{
    BasenamePolicy, Config, FileSystem, LensError, LensResult, ParsedProfile, PathMapping,
    ResolutionMode, WalkFilter,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolvedBy {
    Cache,
    Mapping,
    Absolute,
    WorkspaceRelative,
    Index,
    Basename,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum UnresolvedReason {
    EmptyPath,
    NotFound,
    Ambiguous { candidates: usize },
    /// A previous lookup already failed.
    Cached,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved { path: Arc<Path>, by: ResolvedBy },
    Unresolved(UnresolvedReason),
}

impl Resolution {
    pub fn path(&self) -> Option<&Arc<Path>> {
        match self {
            Self::Resolved { path, .. } => Some(path),
            Self::Unresolved(_) => None,
        }
    }
}

/// Non-fatal events worth surfacing to the user after a load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    UnresolvedPath { path: String },
    AmbiguousBasename { path: String, candidates: usize },
    LowConfidenceMatch { path: String, resolved: PathBuf },
    WalkTruncated { root: PathBuf },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResolverStats {
    #[serde(rename = "cacheHits")]
    pub cache_hits: usize,
    #[serde(rename = "cacheMisses")]
    pub cache_misses: usize,
    #[serde(rename = "basenameWalks")]
    pub basename_walks: usize,
}

/// Profiled path to resolved path, or `None` for a remembered miss.
#[derive(Debug, Default)]
pub struct ResolutionCache {
    entries: HashMap<String, Option<Arc<Path>>>,
}

impl ResolutionCache {
    pub fn get(&self, profiled: &str) -> Option<&Option<Arc<Path>>> {
        self.entries.get(profiled)
    }

    pub fn insert(&mut self, profiled: &str, resolved: Option<Arc<Path>>) {
        self.entries.insert(profiled.to_string(), resolved);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Workspace files keyed by basename and by root-relative path.
#[derive(Debug, Default)]
pub struct FileIndex {
    by_basename: HashMap<String, BTreeSet<PathBuf>>,
    by_relative: HashMap<String, PathBuf>,
    files: usize,
    truncated: bool,
}

enum IndexLookup {
    Relative(PathBuf),
    Unique(PathBuf),
    Ambiguous(Vec<PathBuf>),
    Missing,
}

impl FileIndex {
    pub fn build(fs: &dyn FileSystem, roots: &[PathBuf], filter: &WalkFilter) -> LensResult<Self> {
        let mut index = FileIndex::default();
        for root in roots {
            let walked = fs.walk_files(root, filter, &mut |path| {
                index.add(root, path);
                ControlFlow::Continue(())
            });
            // A missing root indexes nothing, the same as a sequential walk of it.
            match walked {
                Ok(stats) => index.truncated |= stats.truncated,
                Err(err) => tracing::warn!(root = %root.display(), "indexing failed: {err}"),
            }
        }
        tracing::info!(
            files = index.files,
            basenames = index.by_basename.len(),
            truncated = index.truncated,
            "built workspace file index"
        );
        Ok(index)
    }

    fn add(&mut self, root: &Path, path: &Path) {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return;
        };
        let inserted = self
            .by_basename
            .entry(name.to_string())
            .or_default()
            .insert(path.to_path_buf());
        if !inserted {
            return;
        }
        self.files += 1;
        if let Ok(rel) = path.strip_prefix(root) {
            self.by_relative
                .entry(slash_path(rel))
                .or_insert_with(|| path.to_path_buf());
        }
    }

    pub fn len(&self) -> usize {
        self.files
    }

    pub fn is_empty(&self) -> bool {
        self.files == 0
    }

    /// The build hit a walk limit, so a miss is not authoritative.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    fn lookup(&self, normalized: &str) -> IndexLookup {
        if let Some(path) = self.by_relative.get(normalized.trim_start_matches('/')) {
            return IndexLookup::Relative(path.clone());
        }
        let Some(name) = basename(normalized) else {
            return IndexLookup::Missing;
        };
        match self.by_basename.get(name) {
            Some(set) if set.len() == 1 => match set.iter().next() {
                Some(only) => IndexLookup::Unique(only.clone()),
                None => IndexLookup::Missing,
            },
            Some(set) if !set.is_empty() => IndexLookup::Ambiguous(set.iter().cloned().collect()),
            _ => IndexLookup::Missing,
        }
    }
}

/// Owns the cache and index for one loaded profile session. Not shared
/// across concurrent ingestion passes.
pub struct PathResolver {
    fs: Arc<dyn FileSystem>,
    roots: Vec<PathBuf>,
    mappings: Vec<PathMapping>,
    mode: ResolutionMode,
    policy: BasenamePolicy,
    filter: WalkFilter,
    cache: ResolutionCache,
    index: Option<Arc<FileIndex>>,
    diagnostics: Vec<Diagnostic>,
    stats: ResolverStats,
}

impl std::fmt::Debug for PathResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathResolver")
            .field("roots", &self.roots)
            .field("mode", &self.mode)
            .field("cached", &self.cache.len())
            .field("indexed", &self.index.as_ref().map(|i| i.len()))
            .finish()
    }
}

impl PathResolver {
    pub fn new(config: &Config, fs: Arc<dyn FileSystem>) -> LensResult<Self> {
        Ok(Self {
            fs,
            roots: config.workspace_roots.clone(),
            mappings: config.expanded_mappings(),
            mode: config.resolution_mode,
            policy: config.basename_policy,
            filter: WalkFilter::from_config(config)?,
            cache: ResolutionCache::default(),
            index: None,
            diagnostics: Vec::new(),
            stats: ResolverStats::default(),
        })
    }

    pub fn mode(&self) -> ResolutionMode {
        self.mode
    }

    pub fn stats(&self) -> ResolverStats {
        self.stats
    }

    pub fn cache(&self) -> &ResolutionCache {
        &self.cache
    }

    pub fn index(&self) -> Option<&FileIndex> {
        self.index.as_deref()
    }

    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }

    /// Drops cached results and the index.
    pub fn clear(&mut self) {
        self.cache.clear();
        self.index = None;
        self.diagnostics.clear();
        self.stats = ResolverStats::default();
    }

    /// Switches to a new set of workspace roots, invalidating everything
    /// derived from the old ones. Mappings are re-expanded from `config`.
    pub fn reset_for_roots(&mut self, config: &Config) {
        if self.roots == config.workspace_roots {
            return;
        }
        tracing::debug!(roots = ?config.workspace_roots, "workspace roots changed; clearing resolver");
        self.roots = config.workspace_roots.clone();
        self.mappings = config.expanded_mappings();
        self.clear();
    }

    /// Enumerates the workspace once, off the async executor. A no-op in
    /// sequential mode or when the index already exists.
    pub async fn build_index(&mut self) -> LensResult<()> {
        if self.mode != ResolutionMode::Indexed || self.index.is_some() {
            return Ok(());
        }
        let fs = Arc::clone(&self.fs);
        let roots = self.roots.clone();
        let filter = self.filter.clone();
        let index = tokio::task::spawn_blocking(move || FileIndex::build(fs.as_ref(), &roots, &filter))
            .await
            .map_err(|e| LensError::Io(std::io::Error::other(format!("index task failed: {e}"))))??;
        if index.is_truncated() {
            for root in &self.roots {
                self.diagnostics.push(Diagnostic::WalkTruncated { root: root.clone() });
            }
        }
        self.index = Some(Arc::new(index));
        Ok(())
    }

    /// Resolves every distinct filename the profile references, so the
    /// per-sample loop only ever hits the cache. Returns (unique, resolved).
    pub fn prewarm(&mut self, profile: &ParsedProfile) -> (usize, usize) {
        let unique = profile.unique_filenames();
        let mut resolved = 0;
        for name in &unique {
            if self.resolve(name).path().is_some() {
                resolved += 1;
            }
        }
        tracing::debug!(unique = unique.len(), resolved, "pre-warmed resolution cache");
        (unique.len(), resolved)
    }

    /// Cache-only lookup for the hot path.
    pub fn lookup_cached(&mut self, profiled: &str) -> Option<Option<Arc<Path>>> {
        let hit = self.cache.get(profiled).cloned();
        if hit.is_some() {
            self.stats.cache_hits += 1;
        }
        hit
    }

    pub fn resolve(&mut self, profiled: &str) -> Resolution {
        if let Some(entry) = self.cache.get(profiled) {
            self.stats.cache_hits += 1;
            return match entry {
                Some(path) => Resolution::Resolved {
                    path: Arc::clone(path),
                    by: ResolvedBy::Cache,
                },
                None => Resolution::Unresolved(UnresolvedReason::Cached),
            };
        }
        self.stats.cache_misses += 1;
        let outcome = self.resolve_uncached(profiled);
        match &outcome {
            Resolution::Resolved { path, by } => {
                tracing::trace!(profiled, resolved = %path.display(), ?by, "resolved path");
                self.cache.insert(profiled, Some(Arc::clone(path)));
            }
            Resolution::Unresolved(reason) => {
                tracing::debug!(profiled, ?reason, "could not resolve profiled path");
                if !matches!(reason, UnresolvedReason::Ambiguous { .. }) {
                    self.diagnostics.push(Diagnostic::UnresolvedPath {
                        path: profiled.to_string(),
                    });
                }
                self.cache.insert(profiled, None);
            }
        }
        outcome
    }

    fn resolve_uncached(&mut self, profiled: &str) -> Resolution {
        if profiled.is_empty() {
            return Resolution::Unresolved(UnresolvedReason::EmptyPath);
        }
        let normalized = normalize_profiled(profiled);

        for mapping in &self.mappings {
            if mapping.from.is_empty() {
                continue;
            }
            if let Some(rest) = strip_dir_prefix(&normalized, &mapping.from) {
                let candidate = normalize_lexically(&Path::new(&mapping.to).join(rest.trim_start_matches('/')));
                if self.fs.is_file(&candidate) {
                    return resolved(candidate, ResolvedBy::Mapping);
                }
            }
        }

        let as_path = Path::new(&normalized);
        if as_path.is_absolute() && self.fs.is_file(as_path) {
            return resolved(normalize_lexically(as_path), ResolvedBy::Absolute);
        }
        // `Path::join` would replace the root with an absolute path, so a
        // build path like `/app/pkg/x.go` is joined by its relative form.
        let relative = Path::new(normalized.trim_start_matches('/'));
        if !relative.as_os_str().is_empty() && !relative.is_absolute() {
            for root in &self.roots {
                let candidate = normalize_lexically(&root.join(relative));
                if self.fs.is_file(&candidate) {
                    return resolved(candidate, ResolvedBy::WorkspaceRelative);
                }
            }
        }

        if let Some(index) = self.index.clone() {
            match index.lookup(&normalized) {
                IndexLookup::Relative(path) => return resolved(path, ResolvedBy::Index),
                IndexLookup::Unique(path) => {
                    return self.accept_basename(profiled, path, ResolvedBy::Index);
                }
                IndexLookup::Ambiguous(candidates) => {
                    return self.ambiguous(profiled, candidates);
                }
                IndexLookup::Missing if !index.is_truncated() => {
                    return Resolution::Unresolved(UnresolvedReason::NotFound);
                }
                IndexLookup::Missing => {}
            }
        }

        self.basename_fallback(profiled, &normalized)
    }

    fn basename_fallback(&mut self, profiled: &str, normalized: &str) -> Resolution {
        let Some(name) = basename(normalized) else {
            return Resolution::Unresolved(UnresolvedReason::NotFound);
        };
        self.stats.basename_walks += 1;
        // Strict mode knows the answer as soon as a second match shows up.
        let stop_after = match self.policy {
            BasenamePolicy::Strict => 2,
            BasenamePolicy::FirstMatch => usize::MAX,
        };
        let mut matches = BTreeSet::new();
        for root in &self.roots {
            let walked = self.fs.walk_files(root, &self.filter, &mut |path| {
                if path.file_name().and_then(|n| n.to_str()) == Some(name) {
                    matches.insert(path.to_path_buf());
                    if matches.len() >= stop_after {
                        return ControlFlow::Break(());
                    }
                }
                ControlFlow::Continue(())
            });
            match walked {
                Ok(stats) => {
                    if stats.truncated {
                        self.diagnostics.push(Diagnostic::WalkTruncated { root: root.clone() });
                    }
                }
                Err(err) => tracing::warn!(root = %root.display(), "basename search failed: {err}"),
            }
            if matches.len() >= stop_after {
                break;
            }
        }
        match matches.len() {
            0 => Resolution::Unresolved(UnresolvedReason::NotFound),
            1 => match matches.pop_first() {
                Some(only) => self.accept_basename(profiled, only, ResolvedBy::Basename),
                None => Resolution::Unresolved(UnresolvedReason::NotFound),
            },
            _ => self.ambiguous(profiled, matches.into_iter().collect()),
        }
    }

    fn accept_basename(&mut self, profiled: &str, path: PathBuf, by: ResolvedBy) -> Resolution {
        tracing::warn!(
            profiled,
            resolved = %path.display(),
            "matched profiled path by file name only"
        );
        self.diagnostics.push(Diagnostic::LowConfidenceMatch {
            path: profiled.to_string(),
            resolved: path.clone(),
        });
        resolved(path, by)
    }

    fn ambiguous(&mut self, profiled: &str, candidates: Vec<PathBuf>) -> Resolution {
        // A strict walk stops at the second match, so this is a lower bound.
        let count = candidates.len();
        if self.policy == BasenamePolicy::FirstMatch
            && let Some(first) = candidates.into_iter().min()
        {
            let by = if self.index.is_some() {
                ResolvedBy::Index
            } else {
                ResolvedBy::Basename
            };
            return self.accept_basename(profiled, first, by);
        }
        tracing::debug!(profiled, candidates = count, "ambiguous file name; leaving unresolved");
        self.diagnostics.push(Diagnostic::AmbiguousBasename {
            path: profiled.to_string(),
            candidates: count,
        });
        Resolution::Unresolved(UnresolvedReason::Ambiguous { candidates: count })
    }
}

fn resolved(path: PathBuf, by: ResolvedBy) -> Resolution {
    Resolution::Resolved {
        path: Arc::from(path),
        by,
    }
}

/// `path` minus `prefix`, only when the prefix ends on a path component
/// boundary: `/build/app` strips from `/build/app/x.go` but not from
/// `/build/application/x.go`.
fn strip_dir_prefix<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = path.strip_prefix(prefix)?;
    if prefix.ends_with('/') || rest.is_empty() || rest.starts_with('/') {
        Some(rest)
    } else {
        None
    }
}

fn basename(normalized: &str) -> Option<&str> {
    normalized.rsplit('/').next().filter(|s| !s.is_empty())
}

/// Forward slashes, no leading `./`.
pub fn normalize_profiled(profiled: &str) -> String {
    let slashed = profiled.replace('\\', "/");
    let mut s = slashed.as_str();
    while let Some(rest) = s.strip_prefix("./") {
        s = rest;
    }
    s.to_string()
}

/// Removes `.` components and folds `..` without touching the disk.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn slash_path(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
