//! Filesystem seam and bounded workspace enumeration.

use globset::{Glob, GlobSet, GlobSetBuilder};

use std::ops::ControlFlow;
use std::path::Path;

use walkdir::WalkDir;

use crate::{Config, LensError, LensResult, WalkLimits};

/// Everything path resolution asks of the disk. Tests swap in a fake.
pub trait FileSystem: Send + Sync {
    fn is_file(&self, path: &Path) -> bool;

    /// Calls `visit` for each regular file under `root` that passes `filter`,
    /// stopping when `visit` breaks or a limit is reached.
    fn walk_files(
        &self,
        root: &Path,
        filter: &WalkFilter,
        visit: &mut dyn FnMut(&Path) -> ControlFlow<()>,
    ) -> LensResult<WalkStats>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkStats {
    pub files: usize,
    /// A limit cut the walk short.
    pub truncated: bool,
    /// `visit` asked to stop.
    pub stopped: bool,
}

#[derive(Debug, Clone)]
pub struct WalkFilter {
    exclude: GlobSet,
    pub limits: WalkLimits,
}

impl Default for WalkFilter {
    fn default() -> Self {
        Self {
            exclude: GlobSet::empty(),
            limits: WalkLimits::default(),
        }
    }
}

impl WalkFilter {
    pub fn from_config(config: &Config) -> LensResult<Self> {
        Ok(Self {
            exclude: compile_globset(&config.exclude)?,
            limits: config.walk_limits,
        })
    }

    /// `rel` is relative to the walk root.
    pub fn skips_dir(&self, rel: &Path) -> bool {
        should_skip_dir(rel) || self.exclude.is_match(rel)
    }

    pub fn skips_file(&self, rel: &Path) -> bool {
        self.exclude.is_match(rel)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFs;

impl FileSystem for LocalFs {
    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn walk_files(
        &self,
        root: &Path,
        filter: &WalkFilter,
        visit: &mut dyn FnMut(&Path) -> ControlFlow<()>,
    ) -> LensResult<WalkStats> {
        let mut stats = WalkStats::default();
        // Symlinks are not followed, so every directory is entered at most once.
        let walker = WalkDir::new(root)
            .follow_links(false)
            .max_depth(filter.limits.max_depth)
            .into_iter()
            .filter_entry(|e| {
                if e.depth() == 0 || !e.file_type().is_dir() {
                    return true;
                }
                let rel = e.path().strip_prefix(root).unwrap_or(e.path());
                !filter.skips_dir(rel)
            });
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    // Unreadable subtrees are skipped; a missing root is an error.
                    if err.depth() == 0 {
                        let msg = err.to_string();
                        return Err(LensError::Io(
                            err.into_io_error()
                                .unwrap_or_else(|| std::io::Error::other(msg)),
                        ));
                    }
                    tracing::debug!("skipping unreadable entry: {err}");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
            if filter.skips_file(rel) {
                continue;
            }
            if stats.files >= filter.limits.max_files {
                tracing::warn!(
                    root = %root.display(),
                    max_files = filter.limits.max_files,
                    "workspace walk hit file limit"
                );
                stats.truncated = true;
                break;
            }
            stats.files += 1;
            if visit(entry.path()).is_break() {
                stats.stopped = true;
                break;
            }
        }
        Ok(stats)
    }
}

/// Hidden directories and well-known build/dependency output.
pub fn should_skip_dir(rel: &Path) -> bool {
    rel.file_name()
        .and_then(|s| s.to_str())
        .is_some_and(|name| {
            name.starts_with('.') || matches!(name, "target" | "node_modules")
        })
}

fn compile_globset(patterns: &[String]) -> LensResult<GlobSet> {
    let mut b = GlobSetBuilder::new();
    for p in patterns {
        let g = Glob::new(p)
            .map_err(|e| LensError::Config(format!("invalid exclude glob {p:?}: {e}")))?;
        b.add(g);
    }
    b.build()
        .map_err(|e| LensError::Config(format!("invalid exclude globset: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::temp_dir;
    use std::path::PathBuf;

    fn touch(root: &Path, rel: &str) -> PathBuf {
        let p = root.join(rel);
        std::fs::create_dir_all(p.parent().expect("parent")).expect("mkdir");
        std::fs::write(&p, b"x").expect("write");
        p
    }

    fn collect(root: &Path, filter: &WalkFilter) -> (Vec<PathBuf>, WalkStats) {
        let mut out = Vec::new();
        let stats = LocalFs
            .walk_files(root, filter, &mut |p| {
                out.push(p.strip_prefix(root).expect("rel").to_path_buf());
                ControlFlow::Continue(())
            })
            .expect("walk");
        out.sort();
        (out, stats)
    }

    #[test]
    fn walk_skips_hidden_and_build_dirs() {
        let root = temp_dir("walk-skip");
        touch(&root, "src/main.go");
        touch(&root, ".git/config");
        touch(&root, "target/debug/out.go");
        touch(&root, "node_modules/x/index.js");
        let (files, stats) = collect(&root, &WalkFilter::default());
        assert_eq!(files, vec![PathBuf::from("src/main.go")]);
        assert!(!stats.truncated);
    }

    #[test]
    fn walk_honors_exclude_globs() {
        let root = temp_dir("walk-exclude");
        touch(&root, "src/a.go");
        touch(&root, "vendor/lib/a.go");
        touch(&root, "src/a_test.go");
        let cfg = Config {
            exclude: vec!["vendor".to_string(), "**/*_test.go".to_string()],
            ..Config::default()
        };
        let filter = WalkFilter::from_config(&cfg).expect("filter");
        let (files, _) = collect(&root, &filter);
        assert_eq!(files, vec![PathBuf::from("src/a.go")]);
    }

    #[test]
    fn walk_stops_at_file_limit() {
        let root = temp_dir("walk-limit");
        for i in 0..5 {
            touch(&root, &format!("f{i}.go"));
        }
        let mut filter = WalkFilter::default();
        filter.limits.max_files = 3;
        let (files, stats) = collect(&root, &filter);
        assert_eq!(files.len(), 3);
        assert!(stats.truncated);
    }

    #[test]
    fn walk_respects_max_depth() {
        let root = temp_dir("walk-depth");
        touch(&root, "a/b/c/deep.go");
        touch(&root, "a/shallow.go");
        let mut filter = WalkFilter::default();
        filter.limits.max_depth = 2;
        let (files, _) = collect(&root, &filter);
        assert_eq!(files, vec![PathBuf::from("a/shallow.go")]);
    }

    #[test]
    fn visitor_can_stop_walk() {
        let root = temp_dir("walk-stop");
        for i in 0..4 {
            touch(&root, &format!("f{i}.go"));
        }
        let mut seen = 0;
        let stats = LocalFs
            .walk_files(&root, &WalkFilter::default(), &mut |_| {
                seen += 1;
                if seen == 2 {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            })
            .expect("walk");
        assert_eq!(seen, 2);
        assert!(stats.stopped);
    }

    #[test]
    fn missing_root_is_io_error() {
        let err = LocalFs
            .walk_files(
                Path::new("/no/such/workspace/root"),
                &WalkFilter::default(),
                &mut |_| ControlFlow::Continue(()),
            )
            .expect_err("must fail");
        assert!(matches!(err, LensError::Io(_)));
    }

    #[test]
    fn invalid_glob_is_config_error() {
        let cfg = Config {
            exclude: vec!["a[".to_string()],
            ..Config::default()
        };
        assert!(matches!(
            WalkFilter::from_config(&cfg),
            Err(LensError::Config(_))
        ));
    }
}
