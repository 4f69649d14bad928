//! Fixtures shared by unit tests: a protobuf encoder for synthesizing
//! profiles and an in-memory filesystem that counts probes.

use flate2::Compression;
use flate2::write::GzEncoder;

use std::collections::{BTreeSet, HashMap};
use std::io::Write as _;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::{FileSystem, LensResult, WalkFilter, WalkStats};

pub fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("pprof-lens-{name}-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("mkdir");
    dir
}

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(data).expect("write");
    enc.finish().expect("finish")
}

#[derive(Debug, Default)]
pub struct ProtoWriter {
    buf: Vec<u8>,
}

impl ProtoWriter {
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn varint(&mut self, mut value: u64) {
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            if value == 0 {
                self.buf.push(byte);
                return;
            }
            self.buf.push(byte | 0x80);
        }
    }

    fn key(&mut self, field: u32, wire_type: u8) {
        self.varint(u64::from(field) << 3 | u64::from(wire_type));
    }

    pub fn uint64(&mut self, field: u32, value: u64) {
        if value == 0 {
            return;
        }
        self.key(field, 0);
        self.varint(value);
    }

    pub fn int64(&mut self, field: u32, value: i64) {
        self.uint64(field, value as u64);
    }

    pub fn bytes(&mut self, field: u32, data: &[u8]) {
        self.key(field, 2);
        self.varint(data.len() as u64);
        self.buf.extend_from_slice(data);
    }

    pub fn string(&mut self, field: u32, s: &str) {
        self.bytes(field, s.as_bytes());
    }

    pub fn packed_u64(&mut self, field: u32, values: &[u64]) {
        if values.is_empty() {
            return;
        }
        let mut inner = ProtoWriter::default();
        for v in values {
            inner.varint(*v);
        }
        self.bytes(field, &inner.buf);
    }

    pub fn packed_i64(&mut self, field: u32, values: &[i64]) {
        let as_u64: Vec<u64> = values.iter().map(|v| *v as u64).collect();
        self.packed_u64(field, &as_u64);
    }

    pub fn message(&mut self, field: u32, body: impl FnOnce(&mut ProtoWriter)) {
        let mut inner = ProtoWriter::default();
        body(&mut inner);
        self.bytes(field, &inner.buf);
    }
}

/// Builds a profile and encodes it to the pprof wire format. Ids start at 1.
#[derive(Debug, Default)]
pub struct ProfileBuilder {
    strings: Vec<String>,
    index: HashMap<String, i64>,
    sample_types: Vec<(i64, i64)>,
    functions: Vec<(u64, i64, i64, i64)>,
    locations: Vec<(u64, Vec<(u64, i64)>)>,
    samples: Vec<(Vec<u64>, Vec<i64>)>,
    time_nanos: i64,
    duration_nanos: i64,
    period_type: Option<(i64, i64)>,
    period: i64,
    comments: Vec<i64>,
    default_sample_type: i64,
    frames: HashMap<(String, String, i64), u64>,
}

impl ProfileBuilder {
    pub fn new(sample_types: &[(&str, &str)]) -> Self {
        let mut b = Self::default();
        b.intern("");
        for (ty, unit) in sample_types {
            let pair = (b.intern(ty), b.intern(unit));
            b.sample_types.push(pair);
        }
        b
    }

    pub fn intern(&mut self, s: &str) -> i64 {
        if let Some(idx) = self.index.get(s) {
            return *idx;
        }
        let idx = self.strings.len() as i64;
        self.strings.push(s.to_string());
        self.index.insert(s.to_string(), idx);
        idx
    }

    pub fn function(&mut self, name: &str, filename: &str, start_line: i64) -> u64 {
        let id = self.functions.len() as u64 + 1;
        let (name, filename) = (self.intern(name), self.intern(filename));
        self.functions.push((id, name, filename, start_line));
        id
    }

    pub fn location(&mut self, lines: &[(u64, i64)]) -> u64 {
        let id = self.locations.len() as u64 + 1;
        self.locations.push((id, lines.to_vec()));
        id
    }

    /// A single-line location for `function` at `line`, reused on repeat calls.
    pub fn frame(&mut self, filename: &str, function: &str, line: i64) -> u64 {
        let key = (filename.to_string(), function.to_string(), line);
        if let Some(id) = self.frames.get(&key) {
            return *id;
        }
        let fid = self.function(function, filename, 1);
        let loc = self.location(&[(fid, line)]);
        self.frames.insert(key, loc);
        loc
    }

    pub fn sample(&mut self, location_ids: &[u64], values: &[i64]) {
        self.samples.push((location_ids.to_vec(), values.to_vec()));
    }

    pub fn time_nanos(&mut self, t: i64) {
        self.time_nanos = t;
    }

    pub fn duration_nanos(&mut self, d: i64) {
        self.duration_nanos = d;
    }

    pub fn period(&mut self, ty: &str, unit: &str, period: i64) {
        self.period_type = Some((self.intern(ty), self.intern(unit)));
        self.period = period;
    }

    pub fn comment(&mut self, text: &str) {
        let idx = self.intern(text);
        self.comments.push(idx);
    }

    pub fn default_sample_type(&mut self, ty: &str) {
        self.default_sample_type = self.intern(ty);
    }

    /// Strings go first so a truncated tail always cuts into a record.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = ProtoWriter::default();
        for s in &self.strings {
            w.string(6, s);
        }
        for (ty, unit) in &self.sample_types {
            w.message(1, |m| {
                m.int64(1, *ty);
                m.int64(2, *unit);
            });
        }
        for (locations, values) in &self.samples {
            w.message(2, |m| {
                m.packed_u64(1, locations);
                m.packed_i64(2, values);
            });
        }
        for (id, lines) in &self.locations {
            w.message(4, |m| {
                m.uint64(1, *id);
                for (function_id, line) in lines {
                    m.message(4, |l| {
                        l.uint64(1, *function_id);
                        l.int64(2, *line);
                    });
                }
            });
        }
        for (id, name, filename, start_line) in &self.functions {
            w.message(5, |m| {
                m.uint64(1, *id);
                m.int64(2, *name);
                m.int64(3, *name);
                m.int64(4, *filename);
                m.int64(5, *start_line);
            });
        }
        w.int64(9, self.time_nanos);
        w.int64(10, self.duration_nanos);
        if let Some((ty, unit)) = self.period_type {
            w.message(11, |m| {
                m.int64(1, ty);
                m.int64(2, unit);
            });
        }
        w.int64(12, self.period);
        for c in &self.comments {
            w.int64(13, *c);
        }
        w.int64(14, self.default_sample_type);
        w.into_bytes()
    }
}

/// In-memory filesystem that counts every probe it answers.
#[derive(Debug, Default)]
pub struct MemFs {
    files: BTreeSet<PathBuf>,
    probes: AtomicUsize,
    walks: AtomicUsize,
}

impl MemFs {
    pub fn with_files<I, P>(files: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            files: files.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn walks(&self) -> usize {
        self.walks.load(Ordering::SeqCst)
    }
}

impl FileSystem for MemFs {
    fn is_file(&self, path: &Path) -> bool {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.files.contains(path)
    }

    fn walk_files(
        &self,
        root: &Path,
        filter: &WalkFilter,
        visit: &mut dyn FnMut(&Path) -> ControlFlow<()>,
    ) -> LensResult<WalkStats> {
        self.walks.fetch_add(1, Ordering::SeqCst);
        let mut stats = WalkStats::default();
        'files: for file in &self.files {
            let Ok(rel) = file.strip_prefix(root) else {
                continue;
            };
            if rel.components().count() > filter.limits.max_depth {
                continue;
            }
            let mut dir = PathBuf::new();
            if let Some(parent) = rel.parent() {
                for component in parent.components() {
                    dir.push(component);
                    if filter.skips_dir(&dir) {
                        continue 'files;
                    }
                }
            }
            if filter.skips_file(rel) {
                continue;
            }
            if stats.files >= filter.limits.max_files {
                stats.truncated = true;
                break;
            }
            stats.files += 1;
            if visit(file).is_break() {
                stats.stopped = true;
                break;
            }
        }
        Ok(stats)
    }
}
