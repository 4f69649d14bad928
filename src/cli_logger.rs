use anyhow::Result;
use pprof_lens::{Diagnostic, FunctionsReport, LinesReport, LoadStatus};
use serde::Serialize;
use serde_json::Value;

pub struct CliLogger {
    json: bool,
    no_color: bool,
}

impl CliLogger {
    pub fn new(json: bool, no_color: bool) -> Self {
        Self { json, no_color }
    }

    pub fn print_serialized<T: Serialize>(&self, value: &T) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string(value)?);
            return Ok(());
        }

        let rendered = render_value(&serde_json::to_value(value)?, 0);
        println!("{rendered}");
        Ok(())
    }

    pub fn print_lines(&self, report: &LinesReport) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string(report)?);
            return Ok(());
        }

        let mut out = String::new();
        out.push_str(&format!(
            "{} {} {}\n",
            self.style("pprof-lens", "36;1"),
            self.style("lines", "37;1"),
            self.status(report.status)
        ));
        out.push_str(&format!(
            "{} samples={} frames={} resolved={} unresolved={}\n",
            self.style("profile", "90"),
            report.stats.samples,
            report.stats.frames,
            report.stats.resolved_frames,
            report.stats.unresolved_frames
        ));
        out.push_str(&format!(
            "{} unique={} resolved={} cache_hits={} cache_misses={}\n",
            self.style("paths", "90"),
            report.stats.unique_paths,
            report.stats.resolved_paths,
            report.stats.cache_hits,
            report.stats.cache_misses
        ));

        if !report.lines.is_empty() {
            out.push_str(&format!(
                "{}\n",
                self.style("  self%   cum%   mem%  location", "90")
            ));
            for row in &report.lines {
                out.push_str(&format!(
                    "{:>7.2} {:>6.2} {:>6.2}  {}:{}\n",
                    row.metrics.self_cpu_percent,
                    row.metrics.cumulative_cpu_percent,
                    row.metrics.cumulative_memory_percent,
                    row.file.display(),
                    row.line
                ));
            }
        }
        out.push_str(&self.render_diagnostics(&report.diagnostics));

        println!("{}", out.trim_end());
        Ok(())
    }

    pub fn print_functions(&self, report: &FunctionsReport) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string(report)?);
            return Ok(());
        }

        let mut out = String::new();
        out.push_str(&format!(
            "{} {} {}\n",
            self.style("pprof-lens", "36;1"),
            self.style("functions", "37;1"),
            self.status(report.status)
        ));
        if let Some(file) = &report.file {
            out.push_str(&format!("{} {}\n", self.style("file", "90"), file.display()));
        }
        for f in &report.functions {
            out.push_str(&format!(
                "{} {}-{}\n  cpu self={:.2}% cum={:.2}%  mem self={:.2}% cum={:.2}%  samples={}\n",
                self.style(&f.name, "37;1"),
                f.range.start,
                f.range.end,
                f.self_cpu_percent,
                f.cumulative_cpu_percent,
                f.self_memory_percent,
                f.cumulative_memory_percent,
                f.cumulative_samples
            ));
        }
        out.push_str(&self.render_diagnostics(&report.diagnostics));

        println!("{}", out.trim_end());
        Ok(())
    }

    pub fn print_error(&self, msg: &str) {
        if self.json {
            let out = serde_json::json!({
                "status": "error",
                "code": "error",
                "message": msg,
            });
            println!("{out}");
            return;
        }
        eprintln!("{} {msg}", self.style("error", "31;1"));
    }

    pub fn print_warning(&self, msg: &str) {
        if self.json {
            let out = serde_json::json!({
                "status": "warning",
                "code": "warning",
                "message": msg,
            });
            eprintln!("{out}");
            return;
        }
        eprintln!("{} {msg}", self.style("warn", "33;1"));
    }

    fn status(&self, status: LoadStatus) -> String {
        match status {
            LoadStatus::Loaded => self.style("LOADED", "32;1"),
            LoadStatus::NoFilesMatched => self.style("NO FILES MATCHED", "33;1"),
        }
    }

    fn render_diagnostics(&self, diagnostics: &[Diagnostic]) -> String {
        if diagnostics.is_empty() {
            return String::new();
        }
        let mut out = format!("{}\n", self.style("diagnostics", "33;1"));
        for d in diagnostics {
            let line = match d {
                Diagnostic::UnresolvedPath { path } => format!("unresolved {path}"),
                Diagnostic::AmbiguousBasename { path, candidates } => {
                    format!("ambiguous {path} ({candidates} candidates)")
                }
                Diagnostic::LowConfidenceMatch { path, resolved } => {
                    format!("matched by name {path} -> {}", resolved.display())
                }
                Diagnostic::WalkTruncated { root } => {
                    format!("walk truncated under {}", root.display())
                }
            };
            out.push_str(&format!("  - {line}\n"));
        }
        out
    }

    fn style(&self, text: &str, ansi: &str) -> String {
        if self.no_color {
            return text.to_string();
        }
        format!("\x1b[{ansi}m{text}\x1b[0m")
    }
}

fn render_value(value: &Value, indent: usize) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(v) => v.to_string(),
        Value::Number(v) if v.is_f64() => v.as_f64().map_or_else(|| v.to_string(), |f| format!("{f:.2}")),
        Value::Number(v) => v.to_string(),
        Value::String(v) => v.clone(),
        Value::Array(items) => render_array(items, indent),
        Value::Object(map) => render_object(map, indent),
    }
}

fn render_array(items: &[Value], indent: usize) -> String {
    if items.is_empty() {
        return "[]".to_string();
    }

    let pad = " ".repeat(indent);
    let mut out = String::new();
    for item in items {
        match item {
            Value::Object(_) | Value::Array(_) => {
                out.push_str(&format!("{pad}-\n{}\n", render_value(item, indent + 2)));
            }
            _ => out.push_str(&format!("{pad}- {}\n", render_value(item, indent + 2))),
        }
    }
    out.trim_end().to_string()
}

fn render_object(map: &serde_json::Map<String, Value>, indent: usize) -> String {
    if map.is_empty() {
        return "{}".to_string();
    }

    let pad = " ".repeat(indent);
    let mut out = String::new();
    for (key, value) in map {
        match value {
            Value::Object(_) | Value::Array(_) => {
                out.push_str(&format!(
                    "{pad}{key}:\n{}\n",
                    render_value(value, indent + 2)
                ));
            }
            _ => out.push_str(&format!(
                "{pad}{key}: {}\n",
                render_value(value, indent + 2)
            )),
        }
    }
    out.trim_end().to_string()
}
