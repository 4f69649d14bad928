//! Walks every sample's stack and accumulates self and cumulative metrics
//! per resolved (file, line).
//!
//! Accumulation is a field-wise sum, so the order samples are visited in
//! does not change the result. The loop yields to the runtime every
//! `yield_every` samples and checks for cancellation at each yield.

use serde::Serialize;

use std::path::Path;
use std::sync::Arc;

use crate::{
    LensError, LensResult, LineMetrics, LoadContext, MetricTotals, ParsedProfile, PathResolver,
    ProfileMetrics, RepeatedLines, Sample,
};

const CPU_PATTERNS: &[&str] = &["cpu", "wall", "samples", "time"];
const ALLOC_BYTES_PATTERNS: &[&str] = &["alloc_space", "alloc_bytes", "allocated_bytes"];
const ALLOC_COUNT_PATTERNS: &[&str] = &["alloc_objects", "alloc_count", "allocations"];
const INUSE_BYTES_PATTERNS: &[&str] = &["inuse_space", "inuse_bytes", "in_use_bytes"];

/// Which sample-type columns feed each metric.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleTypeIndices {
    pub cpu: Option<usize>,
    pub alloc_bytes: Option<usize>,
    pub alloc_count: Option<usize>,
    pub inuse_bytes: Option<usize>,
}

impl SampleTypeIndices {
    /// Case-insensitive substring match over sample-type names. Patterns are
    /// tried in priority order and the first matching column wins. A CPU-like
    /// `default_sample_type` takes precedence for the CPU column.
    pub fn classify(profile: &ParsedProfile) -> Self {
        let names: Vec<String> = profile
            .sample_types
            .iter()
            .map(|vt| vt.r#type.to_ascii_lowercase())
            .collect();
        let find = |patterns: &[&str]| {
            patterns
                .iter()
                .find_map(|p| names.iter().position(|n| n.contains(p)))
        };

        let preferred_cpu = profile.default_sample_type.as_deref().and_then(|default| {
            let default = default.to_ascii_lowercase();
            if !CPU_PATTERNS.iter().any(|p| default.contains(p)) {
                return None;
            }
            names.iter().position(|n| *n == default)
        });

        Self {
            cpu: preferred_cpu.or_else(|| find(CPU_PATTERNS)),
            alloc_bytes: find(ALLOC_BYTES_PATTERNS),
            alloc_count: find(ALLOC_COUNT_PATTERNS),
            inuse_bytes: find(INUSE_BYTES_PATTERNS),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cpu.is_none()
            && self.alloc_bytes.is_none()
            && self.alloc_count.is_none()
            && self.inuse_bytes.is_none()
    }

    /// Column used for the memory metrics: allocated bytes, else in-use bytes.
    pub fn memory(&self) -> Option<usize> {
        self.alloc_bytes.or(self.inuse_bytes)
    }

    fn values(&self, sample: &Sample) -> SampleValues {
        let at = |idx: Option<usize>| idx.and_then(|i| sample.values.get(i)).copied().unwrap_or(0);
        SampleValues {
            cpu: at(self.cpu),
            memory_bytes: at(self.memory()),
            inuse_bytes: at(self.inuse_bytes),
            alloc_count: at(self.alloc_count),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SampleValues {
    cpu: i64,
    memory_bytes: i64,
    inuse_bytes: i64,
    alloc_count: i64,
}

impl SampleValues {
    // Sums saturate: pprof values are arbitrary int64s and a wrapped total
    // would corrupt every percent derived from it.
    fn add_to_totals(&self, totals: &mut MetricTotals) {
        totals.cpu = totals.cpu.saturating_add(self.cpu);
        totals.memory_bytes = totals.memory_bytes.saturating_add(self.memory_bytes);
        totals.inuse_bytes = totals.inuse_bytes.saturating_add(self.inuse_bytes);
        totals.allocation_count = totals.allocation_count.saturating_add(self.alloc_count);
        totals.samples = totals.samples.saturating_add(1);
    }

    fn add_to_line(&self, m: &mut LineMetrics, is_self: bool) {
        m.cumulative_cpu = m.cumulative_cpu.saturating_add(self.cpu);
        m.cumulative_memory_bytes = m.cumulative_memory_bytes.saturating_add(self.memory_bytes);
        m.cumulative_inuse_bytes = m.cumulative_inuse_bytes.saturating_add(self.inuse_bytes);
        m.cumulative_samples = m.cumulative_samples.saturating_add(1);
        if is_self {
            m.self_cpu = m.self_cpu.saturating_add(self.cpu);
            m.self_memory_bytes = m.self_memory_bytes.saturating_add(self.memory_bytes);
            m.self_inuse_bytes = m.self_inuse_bytes.saturating_add(self.inuse_bytes);
            m.allocation_count = m.allocation_count.saturating_add(self.alloc_count);
            m.self_samples = m.self_samples.saturating_add(1);
        }
    }
}

/// Frame bookkeeping for one attribution pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributionCounts {
    pub samples: usize,
    pub frames: usize,
    pub resolved_frames: usize,
    pub unresolved_frames: usize,
    /// Frames with no filename or no line number.
    pub ignored_frames: usize,
}

#[derive(Debug, Clone)]
pub struct Attribution {
    pub metrics: ProfileMetrics,
    pub indices: SampleTypeIndices,
    pub counts: AttributionCounts,
}

/// Attributes every sample in `profile` to resolved source lines.
///
/// Paths are looked up through `resolver`, which should already be
/// pre-warmed; a cold path is resolved on the spot and cached. Unresolved
/// frames are skipped individually. Every frame adds to its line's
/// cumulative fields, so a line repeated by recursion or inlining is counted
/// once per occurrence; [`RepeatedLines::OncePerSample`] counts it once per
/// sample instead.
pub async fn attribute(
    profile: &ParsedProfile,
    resolver: &mut PathResolver,
    ctx: &LoadContext,
) -> LensResult<Attribution> {
    let indices = SampleTypeIndices::classify(profile);
    if indices.is_empty() {
        tracing::warn!(
            sample_types = ?profile.sample_types.iter().map(|vt| vt.r#type.as_str()).collect::<Vec<_>>(),
            "no cpu or memory sample type recognised; metrics will be zero"
        );
    }

    let mut totals = MetricTotals::default();
    for sample in &profile.samples {
        indices.values(sample).add_to_totals(&mut totals);
    }

    let once_per_sample = ctx.config().repeated_lines == RepeatedLines::OncePerSample;
    let yield_every = ctx.config().yield_every.max(1);
    let mut metrics = ProfileMetrics::default();
    let mut counts = AttributionCounts::default();
    let mut hits: Vec<(Arc<Path>, u32, bool)> = Vec::new();

    for (i, sample) in profile.samples.iter().enumerate() {
        if i % yield_every == 0 {
            if i > 0 {
                tokio::task::yield_now().await;
            }
            if ctx.is_cancelled() {
                tracing::info!(processed = i, "attribution cancelled");
                return Err(LensError::Cancelled);
            }
        }
        counts.samples += 1;

        hits.clear();
        for frame in profile.frames(sample) {
            counts.frames += 1;
            let line = u32::try_from(frame.line).unwrap_or(0);
            if frame.filename.is_empty() || line == 0 {
                counts.ignored_frames += 1;
                continue;
            }
            let resolved = match resolver.lookup_cached(frame.filename) {
                Some(hit) => hit,
                None => resolver.resolve(frame.filename).path().cloned(),
            };
            let Some(path) = resolved else {
                counts.unresolved_frames += 1;
                continue;
            };
            counts.resolved_frames += 1;
            let is_self = frame.is_self();
            let seen = if once_per_sample {
                hits.iter_mut().find(|(p, l, _)| *l == line && **p == *path)
            } else {
                None
            };
            match seen {
                Some(hit) => hit.2 |= is_self,
                None => hits.push((path, line, is_self)),
            }
        }

        let v = indices.values(sample);
        for (path, line, is_self) in &hits {
            v.add_to_line(metrics.line_mut(path, *line), *is_self);
        }
    }

    metrics.totals = totals;
    metrics.finalize();
    tracing::debug!(
        samples = counts.samples,
        frames = counts.frames,
        resolved = counts.resolved_frames,
        unresolved = counts.unresolved_frames,
        files = metrics.files.len(),
        lines = metrics.line_count(),
        "attributed samples to source lines"
    );
    Ok(Attribution {
        metrics,
        indices,
        counts,
    })
}
