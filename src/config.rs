//! `pprof-lens.toml` config loading.

use serde::{Deserialize, Serialize};

use std::path::{Path, PathBuf};

/// Placeholder substituted with each workspace root inside path mappings.
pub const WORKSPACE_VAR: &str = "${workspaceFolder}";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Roots searched when resolving profiled file paths.
    #[serde(default = "default_workspace_roots")]
    pub workspace_roots: Vec<PathBuf>,

    /// Prefix rewrites applied before any filesystem probing.
    #[serde(default)]
    pub path_mappings: Vec<PathMapping>,

    #[serde(default)]
    pub resolution_mode: ResolutionMode,

    #[serde(default)]
    pub basename_policy: BasenamePolicy,

    /// Minimum percent a function needs on any metric to be reported.
    #[serde(default = "default_threshold")]
    pub threshold: f64,

    #[serde(default = "default_include_anonymous")]
    pub include_anonymous: bool,

    #[serde(default)]
    pub nested_functions: NestedPolicy,

    /// How a (file, line) seen several times in one stack is counted.
    #[serde(default)]
    pub repeated_lines: RepeatedLines,

    /// Glob patterns (relative to a workspace root) that are never indexed.
    #[serde(default)]
    pub exclude: Vec<String>,

    #[serde(default)]
    pub walk_limits: WalkLimits,

    /// Samples processed between cooperative yields.
    #[serde(default = "default_yield_every")]
    pub yield_every: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathMapping {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionMode {
    #[default]
    Indexed,
    Sequential,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BasenamePolicy {
    /// Several files sharing the basename leave the path unresolved.
    #[default]
    Strict,
    /// Pick the lexicographically first candidate.
    FirstMatch,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NestedPolicy {
    /// Every range sums all of its lines, nested or not.
    #[default]
    Independent,
    /// Lines owned by a nested function are left out of the enclosing one.
    Exclusive,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepeatedLines {
    /// Every frame adds to the cumulative fields, so recursion can push a
    /// line past 100%.
    #[default]
    EveryFrame,
    /// A line counts once per sample however often its stack repeats it.
    OncePerSample,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalkLimits {
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default = "default_max_files")]
    pub max_files: usize,
}

impl Default for WalkLimits {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            max_files: default_max_files(),
        }
    }
}

/// Settings the function aggregator needs, split out of [`Config`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregationConfig {
    pub threshold: f64,
    pub include_anonymous: bool,
    pub nested: NestedPolicy,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            include_anonymous: default_include_anonymous(),
            nested: NestedPolicy::default(),
        }
    }
}

fn default_workspace_roots() -> Vec<PathBuf> {
    vec![PathBuf::from(".")]
}

fn default_threshold() -> f64 {
    1.0
}

fn default_include_anonymous() -> bool {
    true
}

fn default_max_depth() -> usize {
    32
}

fn default_max_files() -> usize {
    200_000
}

fn default_yield_every() -> usize {
    1000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace_roots: default_workspace_roots(),
            path_mappings: Vec::new(),
            resolution_mode: ResolutionMode::default(),
            basename_policy: BasenamePolicy::default(),
            threshold: default_threshold(),
            include_anonymous: default_include_anonymous(),
            nested_functions: NestedPolicy::default(),
            repeated_lines: RepeatedLines::default(),
            exclude: Vec::new(),
            walk_limits: WalkLimits::default(),
            yield_every: default_yield_every(),
        }
    }
}

impl Config {
    pub fn load_optional(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(s) => match toml::from_str::<Config>(&s) {
                Ok(cfg) => cfg,
                Err(err) => {
                    tracing::warn!("failed to parse config {}: {err}", path.display());
                    Self::default()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(err) => {
                tracing::warn!("failed to read config {}: {err}", path.display());
                Self::default()
            }
        }
    }

    pub fn aggregation(&self) -> AggregationConfig {
        AggregationConfig {
            threshold: self.threshold,
            include_anonymous: self.include_anonymous,
            nested: self.nested_functions,
        }
    }

    /// Expands `${workspaceFolder}` in every mapping. A mapping that uses the
    /// variable yields one entry per workspace root; others pass through once.
    pub fn expanded_mappings(&self) -> Vec<PathMapping> {
        let mut out = Vec::new();
        for mapping in &self.path_mappings {
            let uses_var = mapping.from.contains(WORKSPACE_VAR) || mapping.to.contains(WORKSPACE_VAR);
            if !uses_var {
                out.push(mapping.clone());
                continue;
            }
            for root in &self.workspace_roots {
                let root = root.to_string_lossy();
                let expanded = PathMapping {
                    from: mapping.from.replace(WORKSPACE_VAR, &root),
                    to: mapping.to.replace(WORKSPACE_VAR, &root),
                };
                if !out.contains(&expanded) {
                    out.push(expanded);
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_missing_fields() {
        let cfg: Config = toml::from_str("threshold = 2.5").expect("parse");
        assert_eq!(cfg.threshold, 2.5);
        assert_eq!(cfg.resolution_mode, ResolutionMode::Indexed);
        assert_eq!(cfg.basename_policy, BasenamePolicy::Strict);
        assert_eq!(cfg.nested_functions, NestedPolicy::Independent);
        assert_eq!(cfg.repeated_lines, RepeatedLines::EveryFrame);
        assert!(cfg.include_anonymous);
        assert_eq!(cfg.yield_every, 1000);
        assert_eq!(cfg.workspace_roots, vec![PathBuf::from(".")]);
    }

    #[test]
    fn parses_mappings_and_modes() {
        let cfg: Config = toml::from_str(
            r#"
            workspace_roots = ["/ws"]
            resolution_mode = "sequential"
            basename_policy = "first_match"
            nested_functions = "exclusive"
            repeated_lines = "once_per_sample"

            [[path_mappings]]
            from = "/build/src"
            to = "${workspaceFolder}/src"

            [walk_limits]
            max_depth = 4
            "#,
        )
        .expect("parse");
        assert_eq!(cfg.resolution_mode, ResolutionMode::Sequential);
        assert_eq!(cfg.basename_policy, BasenamePolicy::FirstMatch);
        assert_eq!(cfg.nested_functions, NestedPolicy::Exclusive);
        assert_eq!(cfg.repeated_lines, RepeatedLines::OncePerSample);
        assert_eq!(cfg.walk_limits.max_depth, 4);
        assert_eq!(cfg.walk_limits.max_files, 200_000);
        assert_eq!(
            cfg.expanded_mappings(),
            vec![PathMapping {
                from: "/build/src".to_string(),
                to: "/ws/src".to_string(),
            }]
        );
    }

    #[test]
    fn workspace_variable_expands_per_root() {
        let cfg = Config {
            workspace_roots: vec![PathBuf::from("/a"), PathBuf::from("/b")],
            path_mappings: vec![
                PathMapping {
                    from: "/remote".to_string(),
                    to: "${workspaceFolder}".to_string(),
                },
                PathMapping {
                    from: "/x".to_string(),
                    to: "/y".to_string(),
                },
            ],
            ..Config::default()
        };
        let mapped = cfg.expanded_mappings();
        assert_eq!(mapped.len(), 3);
        assert_eq!(mapped[0].to, "/a");
        assert_eq!(mapped[1].to, "/b");
        assert_eq!(mapped[2].from, "/x");
    }

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = Config::load_optional(Path::new("/definitely/not/here/pprof-lens.toml"));
        assert_eq!(cfg.threshold, 1.0);
    }
}
