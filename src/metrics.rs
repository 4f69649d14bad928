//! Per-line metrics produced by attribution, and their containers.

use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Metrics for one (file, line). Raw values are additive; percents are
/// derived from them and the profile-wide [`MetricTotals`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineMetrics {
    pub self_cpu: i64,
    pub cumulative_cpu: i64,
    pub self_cpu_percent: f64,
    pub cumulative_cpu_percent: f64,
    pub self_memory_bytes: i64,
    pub cumulative_memory_bytes: i64,
    pub self_memory_percent: f64,
    pub cumulative_memory_percent: f64,
    pub self_inuse_bytes: i64,
    pub cumulative_inuse_bytes: i64,
    pub allocation_count: i64,
    pub self_samples: u64,
    pub cumulative_samples: u64,
}

impl LineMetrics {
    /// Field-wise sum of raw values, saturating at the `i64` bounds. Percents
    /// are left for [`Self::finalize`].
    pub fn add_raw(&mut self, other: &LineMetrics) {
        self.self_cpu = self.self_cpu.saturating_add(other.self_cpu);
        self.cumulative_cpu = self.cumulative_cpu.saturating_add(other.cumulative_cpu);
        self.self_memory_bytes = self.self_memory_bytes.saturating_add(other.self_memory_bytes);
        self.cumulative_memory_bytes = self
            .cumulative_memory_bytes
            .saturating_add(other.cumulative_memory_bytes);
        self.self_inuse_bytes = self.self_inuse_bytes.saturating_add(other.self_inuse_bytes);
        self.cumulative_inuse_bytes = self
            .cumulative_inuse_bytes
            .saturating_add(other.cumulative_inuse_bytes);
        self.allocation_count = self.allocation_count.saturating_add(other.allocation_count);
        self.self_samples = self.self_samples.saturating_add(other.self_samples);
        self.cumulative_samples = self.cumulative_samples.saturating_add(other.cumulative_samples);
    }

    pub fn finalize(&mut self, totals: &MetricTotals) {
        self.self_cpu_percent = percent(self.self_cpu, totals.cpu);
        self.cumulative_cpu_percent = percent(self.cumulative_cpu, totals.cpu);
        self.self_memory_percent = percent(self.self_memory_bytes, totals.memory_bytes);
        self.cumulative_memory_percent = percent(self.cumulative_memory_bytes, totals.memory_bytes);
    }

    pub fn max_percent(&self) -> f64 {
        self.self_cpu_percent
            .max(self.cumulative_cpu_percent)
            .max(self.self_memory_percent)
            .max(self.cumulative_memory_percent)
    }
}

/// Percent of `total`, or zero when there is nothing to divide by.
pub fn percent(value: i64, total: i64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    value as f64 / total as f64 * 100.0
}

/// Profile-wide sums used as percent denominators.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricTotals {
    pub cpu: i64,
    pub memory_bytes: i64,
    pub inuse_bytes: i64,
    pub allocation_count: i64,
    pub samples: u64,
}

impl MetricTotals {
    pub fn add(&mut self, other: &MetricTotals) {
        self.cpu = self.cpu.saturating_add(other.cpu);
        self.memory_bytes = self.memory_bytes.saturating_add(other.memory_bytes);
        self.inuse_bytes = self.inuse_bytes.saturating_add(other.inuse_bytes);
        self.allocation_count = self.allocation_count.saturating_add(other.allocation_count);
        self.samples = self.samples.saturating_add(other.samples);
    }
}

pub type FileMetrics = BTreeMap<u32, LineMetrics>;

/// Resolved file path to line to metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileMetrics {
    pub files: BTreeMap<PathBuf, FileMetrics>,
    pub totals: MetricTotals,
}

#[derive(Debug, Clone, Serialize)]
pub struct LineHotspot {
    pub file: PathBuf,
    pub line: u32,
    #[serde(flatten)]
    pub metrics: LineMetrics,
}

impl ProfileMetrics {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn file(&self, path: &Path) -> Option<&FileMetrics> {
        self.files.get(path)
    }

    pub fn line(&self, path: &Path, line: u32) -> Option<&LineMetrics> {
        self.files.get(path).and_then(|f| f.get(&line))
    }

    /// Entry for (path, line), created on first use.
    pub fn line_mut(&mut self, path: &Path, line: u32) -> &mut LineMetrics {
        self.files
            .entry(path.to_path_buf())
            .or_default()
            .entry(line)
            .or_default()
    }

    pub fn line_count(&self) -> usize {
        self.files.values().map(|f| f.len()).sum()
    }

    /// Folds `other` in by field-wise summation, then recomputes percents.
    pub fn merge(&mut self, other: &ProfileMetrics) {
        for (path, lines) in &other.files {
            for (line, metrics) in lines {
                self.line_mut(path, *line).add_raw(metrics);
            }
        }
        self.totals.add(&other.totals);
        self.finalize();
    }

    pub fn finalize(&mut self) {
        let totals = self.totals;
        for lines in self.files.values_mut() {
            for metrics in lines.values_mut() {
                metrics.finalize(&totals);
            }
        }
    }

    /// Hottest lines, ordered by self CPU, then cumulative CPU, then memory.
    pub fn top_lines(&self, limit: usize) -> Vec<LineHotspot> {
        let mut rows: Vec<LineHotspot> = self
            .files
            .iter()
            .flat_map(|(file, lines)| {
                lines.iter().map(move |(line, metrics)| LineHotspot {
                    file: file.clone(),
                    line: *line,
                    metrics: *metrics,
                })
            })
            .collect();
        rows.sort_by(|a, b| {
            let key = |m: &LineMetrics| (m.self_cpu, m.cumulative_cpu, m.self_memory_bytes, m.cumulative_memory_bytes);
            key(&b.metrics)
                .cmp(&key(&a.metrics))
                .then_with(|| a.file.cmp(&b.file))
                .then_with(|| a.line.cmp(&b.line))
        });
        rows.truncate(limit);
        rows
    }
}

/// Either one profile's metrics or several keyed by profile name
/// (e.g. `cpu`, `heap`), chosen explicitly rather than by shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "metrics", rename_all = "snake_case")]
pub enum MetricsSet {
    Single(ProfileMetrics),
    Named(BTreeMap<String, ProfileMetrics>),
}

impl MetricsSet {
    pub fn get(&self, name: &str) -> Option<&ProfileMetrics> {
        match self {
            Self::Single(metrics) => Some(metrics),
            Self::Named(map) => map.get(name),
        }
    }

    pub fn names(&self) -> Vec<&str> {
        match self {
            Self::Single(_) => Vec::new(),
            Self::Named(map) => map.keys().map(String::as_str).collect(),
        }
    }

    /// All metrics folded into one view.
    pub fn combined(&self) -> ProfileMetrics {
        match self {
            Self::Single(metrics) => metrics.clone(),
            Self::Named(map) => {
                let mut out = ProfileMetrics::default();
                for metrics in map.values() {
                    out.merge(metrics);
                }
                out
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(self_cpu: i64, cum_cpu: i64, self_mem: i64, cum_mem: i64) -> LineMetrics {
        LineMetrics {
            self_cpu,
            cumulative_cpu: cum_cpu,
            self_memory_bytes: self_mem,
            cumulative_memory_bytes: cum_mem,
            ..LineMetrics::default()
        }
    }

    #[test]
    fn percent_of_zero_total_is_zero() {
        assert_eq!(percent(10, 0), 0.0);
        assert_eq!(percent(10, 40), 25.0);
    }

    #[test]
    fn finalize_derives_percents_from_totals() {
        let mut m = raw(10, 30, 0, 0);
        m.finalize(&MetricTotals {
            cpu: 30,
            ..MetricTotals::default()
        });
        assert!((m.self_cpu_percent - 33.333).abs() < 0.01);
        assert_eq!(m.cumulative_cpu_percent, 100.0);
        assert_eq!(m.self_memory_percent, 0.0);
        assert_eq!(m.max_percent(), 100.0);
    }

    #[test]
    fn merge_sums_fields_and_recomputes_percents() {
        let mut cpu = ProfileMetrics::default();
        *cpu.line_mut(Path::new("/a.go"), 3) = raw(5, 10, 0, 0);
        cpu.totals.cpu = 10;
        cpu.finalize();

        let mut heap = ProfileMetrics::default();
        *heap.line_mut(Path::new("/a.go"), 3) = raw(0, 0, 64, 128);
        *heap.line_mut(Path::new("/b.go"), 1) = raw(0, 0, 64, 64);
        heap.totals.memory_bytes = 128;
        heap.finalize();

        let set = MetricsSet::Named(BTreeMap::from([
            ("cpu".to_string(), cpu),
            ("heap".to_string(), heap),
        ]));
        assert_eq!(set.names(), vec!["cpu", "heap"]);
        let combined = set.combined();
        let a3 = combined.line(Path::new("/a.go"), 3).expect("a:3");
        assert_eq!(a3.self_cpu_percent, 50.0);
        assert_eq!(a3.cumulative_memory_percent, 100.0);
        assert_eq!(combined.line_count(), 2);
        assert_eq!(combined.totals.cpu, 10);
        assert_eq!(combined.totals.memory_bytes, 128);
    }

    #[test]
    fn merge_saturates_instead_of_overflowing() {
        let mut a = ProfileMetrics::default();
        *a.line_mut(Path::new("/a.go"), 1) = raw(i64::MAX, i64::MAX, 0, 0);
        a.totals.cpu = i64::MAX;
        let b = a.clone();
        a.merge(&b);
        let line = a.line(Path::new("/a.go"), 1).expect("line");
        assert_eq!(line.cumulative_cpu, i64::MAX);
        assert_eq!(a.totals.cpu, i64::MAX);
        assert_eq!(line.cumulative_cpu_percent, 100.0);
    }

    #[test]
    fn single_set_ignores_name() {
        let set = MetricsSet::Single(ProfileMetrics::default());
        assert!(set.get("anything").is_some());
        assert!(set.names().is_empty());
    }

    #[test]
    fn top_lines_orders_by_self_then_cumulative() {
        let mut m = ProfileMetrics::default();
        *m.line_mut(Path::new("/a.go"), 1) = raw(1, 50, 0, 0);
        *m.line_mut(Path::new("/a.go"), 2) = raw(5, 5, 0, 0);
        *m.line_mut(Path::new("/b.go"), 1) = raw(1, 60, 0, 0);
        let top = m.top_lines(2);
        assert_eq!(top.len(), 2);
        assert_eq!((top[0].file.as_path(), top[0].line), (Path::new("/a.go"), 2));
        assert_eq!((top[1].file.as_path(), top[1].line), (Path::new("/b.go"), 1));
    }
}
