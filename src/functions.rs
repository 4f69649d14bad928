//! Rolls line metrics up into per-function totals using ranges taken from a
//! document outline.

use serde::{Deserialize, Serialize};

use crate::{AggregationConfig, FileMetrics, LineMetrics, NestedPolicy};

pub const ANONYMOUS_FUNCTION: &str = "(anonymous)";

/// 1-based, inclusive line range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRange {
    pub start: u32,
    pub end: u32,
}

impl LineRange {
    pub fn contains(&self, line: u32) -> bool {
        self.start <= line && line <= self.end
    }

    fn encloses(&self, other: &LineRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Function,
    Method,
    Constructor,
    Class,
    Struct,
    Interface,
    Module,
    Namespace,
    Enum,
    Field,
    Property,
    Variable,
    #[serde(other)]
    Other,
}

impl SymbolKind {
    pub fn is_callable(self) -> bool {
        matches!(self, Self::Function | Self::Method | Self::Constructor)
    }
}

/// One entry of a structural outline, as an editor's symbol provider
/// reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlineSymbol {
    #[serde(default)]
    pub name: String,
    pub kind: SymbolKind,
    pub range: LineRange,
    #[serde(default)]
    pub children: Vec<OutlineSymbol>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionRange {
    pub name: String,
    pub range: LineRange,
}

/// Callable symbols in pre-order, descending into every child so that
/// methods inside classes and closures inside functions are all found.
pub fn function_ranges(outline: &[OutlineSymbol]) -> Vec<FunctionRange> {
    fn walk(symbols: &[OutlineSymbol], out: &mut Vec<FunctionRange>) {
        for symbol in symbols {
            if symbol.kind.is_callable() {
                out.push(FunctionRange {
                    name: symbol.name.clone(),
                    range: symbol.range,
                });
            }
            walk(&symbol.children, out);
        }
    }
    let mut out = Vec::new();
    walk(outline, &mut out);
    out
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionMetrics {
    pub name: String,
    pub range: LineRange,
    #[serde(rename = "selfCpuPercent")]
    pub self_cpu_percent: f64,
    #[serde(rename = "cumulativeCpuPercent")]
    pub cumulative_cpu_percent: f64,
    #[serde(rename = "selfMemoryPercent")]
    pub self_memory_percent: f64,
    #[serde(rename = "cumulativeMemoryPercent")]
    pub cumulative_memory_percent: f64,
    #[serde(rename = "selfMemoryBytes")]
    pub self_memory_bytes: i64,
    #[serde(rename = "cumulativeMemoryBytes")]
    pub cumulative_memory_bytes: i64,
    #[serde(rename = "selfSamples")]
    pub self_samples: u64,
    #[serde(rename = "cumulativeSamples")]
    pub cumulative_samples: u64,
}

impl FunctionMetrics {
    fn empty(name: String, range: LineRange) -> Self {
        Self {
            name,
            range,
            self_cpu_percent: 0.0,
            cumulative_cpu_percent: 0.0,
            self_memory_percent: 0.0,
            cumulative_memory_percent: 0.0,
            self_memory_bytes: 0,
            cumulative_memory_bytes: 0,
            self_samples: 0,
            cumulative_samples: 0,
        }
    }

    fn add_line(&mut self, m: &LineMetrics) {
        self.self_cpu_percent += m.self_cpu_percent;
        self.cumulative_cpu_percent += m.cumulative_cpu_percent;
        self.self_memory_percent += m.self_memory_percent;
        self.cumulative_memory_percent += m.cumulative_memory_percent;
        self.self_memory_bytes = self.self_memory_bytes.saturating_add(m.self_memory_bytes);
        self.cumulative_memory_bytes = self
            .cumulative_memory_bytes
            .saturating_add(m.cumulative_memory_bytes);
        self.self_samples = self.self_samples.saturating_add(m.self_samples);
        self.cumulative_samples = self.cumulative_samples.saturating_add(m.cumulative_samples);
    }

    pub fn max_percent(&self) -> f64 {
        self.self_cpu_percent
            .max(self.self_memory_percent)
            .max(self.cumulative_cpu_percent)
            .max(self.cumulative_memory_percent)
    }
}

/// Sums each range's line metrics, self and cumulative independently.
///
/// Percents add directly because every line in a file shares the same
/// profile-wide denominators. Ranges with no contributing line are dropped,
/// as are ranges whose largest percent is below `cfg.threshold`.
pub fn aggregate_functions(
    file: &FileMetrics,
    ranges: &[FunctionRange],
    cfg: &AggregationConfig,
) -> Vec<FunctionMetrics> {
    let mut out = Vec::new();
    for (i, function) in ranges.iter().enumerate() {
        let range = function.range;
        if range.start > range.end {
            tracing::debug!(name = %function.name, ?range, "skipping inverted function range");
            continue;
        }
        let name = if function.name.trim().is_empty() {
            if !cfg.include_anonymous {
                continue;
            }
            ANONYMOUS_FUNCTION.to_string()
        } else {
            function.name.clone()
        };

        let nested: Vec<LineRange> = match cfg.nested {
            NestedPolicy::Independent => Vec::new(),
            NestedPolicy::Exclusive => ranges
                .iter()
                .enumerate()
                .filter(|(j, other)| *j != i && other.range != range && range.encloses(&other.range))
                .map(|(_, other)| other.range)
                .collect(),
        };

        let mut metrics = FunctionMetrics::empty(name, range);
        let mut contributing = 0usize;
        for (line, m) in file.range(range.start..=range.end) {
            if nested.iter().any(|r| r.contains(*line)) {
                continue;
            }
            metrics.add_line(m);
            contributing += 1;
        }
        if contributing == 0 {
            continue;
        }
        if metrics.max_percent() < cfg.threshold {
            continue;
        }
        out.push(metrics);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(self_cpu: f64, cum_cpu: f64) -> LineMetrics {
        LineMetrics {
            self_cpu_percent: self_cpu,
            cumulative_cpu_percent: cum_cpu,
            self_samples: u64::from(self_cpu > 0.0),
            cumulative_samples: 1,
            ..LineMetrics::default()
        }
    }

    fn func(name: &str, start: u32, end: u32) -> FunctionRange {
        FunctionRange {
            name: name.to_string(),
            range: LineRange { start, end },
        }
    }

    fn cfg(threshold: f64) -> AggregationConfig {
        AggregationConfig {
            threshold,
            ..AggregationConfig::default()
        }
    }

    #[test]
    fn threshold_applies_to_largest_percent() {
        let file = FileMetrics::from([(12, line(0.5, 2.0))]);
        let ranges = [func("handler", 10, 20)];
        let kept = aggregate_functions(&file, &ranges, &cfg(1.0));
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].self_cpu_percent, 0.5);
        assert_eq!(kept[0].cumulative_cpu_percent, 2.0);
        assert!(aggregate_functions(&file, &ranges, &cfg(3.0)).is_empty());
    }

    #[test]
    fn self_and_cumulative_are_summed_separately() {
        let file = FileMetrics::from([(2, line(10.0, 10.0)), (3, line(0.0, 40.0)), (9, line(5.0, 5.0))]);
        let out = aggregate_functions(&file, &[func("run", 1, 5)], &cfg(0.0));
        assert_eq!(out[0].self_cpu_percent, 10.0);
        assert_eq!(out[0].cumulative_cpu_percent, 50.0);
        assert_eq!((out[0].self_samples, out[0].cumulative_samples), (1, 2));
    }

    #[test]
    fn ranges_without_lines_are_dropped() {
        let file = FileMetrics::from([(30, line(50.0, 50.0))]);
        let out = aggregate_functions(&file, &[func("idle", 1, 10), func("busy", 25, 35)], &cfg(0.0));
        let names: Vec<&str> = out.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["busy"]);
    }

    #[test]
    fn nested_policy_controls_double_counting() {
        let file = FileMetrics::from([(3, line(10.0, 10.0)), (6, line(20.0, 20.0))]);
        let ranges = [func("outer", 1, 10), func("inner", 5, 8)];

        let independent = aggregate_functions(&file, &ranges, &cfg(0.0));
        assert_eq!(independent[0].self_cpu_percent, 30.0);
        assert_eq!(independent[1].self_cpu_percent, 20.0);

        let exclusive = AggregationConfig {
            nested: NestedPolicy::Exclusive,
            ..cfg(0.0)
        };
        let out = aggregate_functions(&file, &ranges, &exclusive);
        assert_eq!(out[0].name, "outer");
        assert_eq!(out[0].self_cpu_percent, 10.0);
        assert_eq!(out[1].self_cpu_percent, 20.0);
    }

    #[test]
    fn anonymous_functions_get_placeholder_or_are_dropped() {
        let file = FileMetrics::from([(4, line(5.0, 5.0))]);
        let ranges = [func("  ", 1, 6)];
        let out = aggregate_functions(&file, &ranges, &cfg(0.0));
        assert_eq!(out[0].name, ANONYMOUS_FUNCTION);

        let no_anon = AggregationConfig {
            include_anonymous: false,
            ..cfg(0.0)
        };
        assert!(aggregate_functions(&file, &ranges, &no_anon).is_empty());
    }

    #[test]
    fn outline_keeps_callables_and_recurses() {
        let json = r#"[
            {"name": "Server", "kind": "class", "range": {"start": 1, "end": 40}, "children": [
                {"name": "new", "kind": "constructor", "range": {"start": 2, "end": 8}},
                {"name": "addr", "kind": "field", "range": {"start": 9, "end": 9}},
                {"name": "serve", "kind": "method", "range": {"start": 10, "end": 39}, "children": [
                    {"name": "", "kind": "function", "range": {"start": 12, "end": 15}}
                ]}
            ]},
            {"name": "main", "kind": "function", "range": {"start": 42, "end": 50}},
            {"name": "VERSION", "kind": "constant", "range": {"start": 52, "end": 52}}
        ]"#;
        let outline: Vec<OutlineSymbol> = serde_json::from_str(json).expect("outline");
        assert_eq!(outline[1].kind, SymbolKind::Function);
        assert_eq!(outline[2].kind, SymbolKind::Other);
        let ranges = function_ranges(&outline);
        let names: Vec<&str> = ranges.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["new", "serve", "", "main"]);
    }
}
