//! Profile data model and decoder for the pprof `profile.proto` schema.
//!
//! Decoding is done in two passes over the top-level message. The first pass
//! collects the string table and the raw bytes of every record; the second
//! decodes each record with the string table in hand, because the schema
//! allows the table to appear after the records that index into it.
//!
//! [`profile.proto`]: https://github.com/google/pprof/blob/main/proto/profile.proto

use serde::{Deserialize, Serialize};

use std::collections::{BTreeSet, HashMap};

use crate::wire::{Field, WireReader};
use crate::{LensError, LensResult, decompress};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueType {
    #[serde(rename = "type")]
    pub r#type: String,
    pub unit: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Function {
    pub id: u64,
    pub name: String,
    pub system_name: String,
    pub filename: String,
    pub start_line: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Line {
    pub function_id: u64,
    pub line: i64,
    pub column: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Location {
    pub id: u64,
    pub mapping_id: u64,
    pub address: u64,
    /// Innermost inlined function first.
    pub lines: Vec<Line>,
    pub is_folded: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mapping {
    pub id: u64,
    pub memory_start: u64,
    pub memory_limit: u64,
    pub file_offset: u64,
    pub filename: String,
    pub build_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Label {
    pub key: String,
    pub str_value: String,
    pub num: i64,
    pub num_unit: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sample {
    /// Innermost (leaf) location first.
    pub location_ids: Vec<u64>,
    /// One value per entry of [`ParsedProfile::sample_types`].
    pub values: Vec<i64>,
    pub labels: Vec<Label>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedProfile {
    pub sample_types: Vec<ValueType>,
    pub samples: Vec<Sample>,
    pub mappings: HashMap<u64, Mapping>,
    pub locations: HashMap<u64, Location>,
    pub functions: HashMap<u64, Function>,
    pub drop_frames: String,
    pub keep_frames: String,
    pub time_nanos: i64,
    pub duration_nanos: i64,
    pub period_type: Option<ValueType>,
    pub period: i64,
    pub comments: Vec<String>,
    pub default_sample_type: Option<String>,
}

/// One (function, line) pair of a sample's stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackFrame<'p> {
    pub filename: &'p str,
    pub line: i64,
    pub function_name: &'p str,
    /// Position of the owning location in the sample; 0 is the leaf.
    pub depth_index: usize,
}

impl StackFrame<'_> {
    pub fn is_self(&self) -> bool {
        self.depth_index == 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileSummary {
    #[serde(rename = "sampleTypes")]
    pub sample_types: Vec<String>,
    #[serde(rename = "sampleCount")]
    pub sample_count: usize,
    #[serde(rename = "functionCount")]
    pub function_count: usize,
    #[serde(rename = "locationCount")]
    pub location_count: usize,
    #[serde(rename = "capturedAt", skip_serializing_if = "Option::is_none")]
    pub captured_at: Option<String>,
    #[serde(rename = "durationMs")]
    pub duration_ms: f64,
    #[serde(rename = "period", skip_serializing_if = "Option::is_none")]
    pub period: Option<String>,
    #[serde(rename = "danglingReferences")]
    pub dangling_references: usize,
    #[serde(rename = "uniqueFiles")]
    pub unique_files: usize,
}

/// Decompresses (if needed) and decodes raw profile bytes.
pub fn parse_profile(raw: &[u8]) -> LensResult<ParsedProfile> {
    let bytes = decompress(raw)?;
    ParsedProfile::decode(&bytes)
}

#[derive(Default)]
struct RawSections<'a> {
    sample_types: Vec<&'a [u8]>,
    samples: Vec<&'a [u8]>,
    mappings: Vec<&'a [u8]>,
    locations: Vec<&'a [u8]>,
    functions: Vec<&'a [u8]>,
    period_type: Option<&'a [u8]>,
    strings: Vec<&'a str>,
    drop_frames: i64,
    keep_frames: i64,
    comments: Vec<i64>,
    default_sample_type: i64,
    time_nanos: i64,
    duration_nanos: i64,
    period: i64,
}

struct StringTable<'a> {
    strings: Vec<&'a str>,
}

impl<'a> StringTable<'a> {
    fn get(&self, index: i64, section: &'static str) -> LensResult<String> {
        // An absent table still has its implicit empty entry.
        if index == 0 && self.strings.is_empty() {
            return Ok(String::new());
        }
        usize::try_from(index)
            .ok()
            .and_then(|i| self.strings.get(i))
            .map(|s| s.to_string())
            .ok_or_else(|| {
                LensError::decode(
                    section,
                    format!(
                        "string index {index} out of range (table has {} entries)",
                        self.strings.len()
                    ),
                )
            })
    }
}

impl ParsedProfile {
    pub fn decode(bytes: &[u8]) -> LensResult<Self> {
        let mut raw = RawSections::default();
        for field in WireReader::new(bytes, "profile") {
            let field = field?;
            match field.number {
                1 => raw.sample_types.push(field.as_bytes("sample_type")?),
                2 => raw.samples.push(field.as_bytes("sample")?),
                3 => raw.mappings.push(field.as_bytes("mapping")?),
                4 => raw.locations.push(field.as_bytes("location")?),
                5 => raw.functions.push(field.as_bytes("function")?),
                6 => raw.strings.push(field.as_str("string_table")?),
                7 => raw.drop_frames = field.as_i64("profile")?,
                8 => raw.keep_frames = field.as_i64("profile")?,
                9 => raw.time_nanos = field.as_i64("profile")?,
                10 => raw.duration_nanos = field.as_i64("profile")?,
                12 => raw.period = field.as_i64("profile")?,
                11 => raw.period_type = Some(field.as_bytes("period_type")?),
                13 => field.extend_i64("profile", &mut raw.comments)?,
                14 => raw.default_sample_type = field.as_i64("profile")?,
                _ => tracing::trace!(field = field.number, "skipping unknown profile field"),
            }
        }
        if raw.strings.first().is_some_and(|s| !s.is_empty()) {
            return Err(LensError::decode(
                "string_table",
                "first string table entry must be empty",
            ));
        }

        let strings = StringTable {
            strings: std::mem::take(&mut raw.strings),
        };
        let mut profile = ParsedProfile {
            time_nanos: raw.time_nanos,
            duration_nanos: raw.duration_nanos,
            period: raw.period,
            ..ParsedProfile::default()
        };

        for buf in raw.sample_types {
            profile.sample_types.push(decode_value_type(buf, &strings, "sample_type")?);
        }
        for buf in raw.functions {
            let function = decode_function(buf, &strings)?;
            profile.functions.insert(function.id, function);
        }
        for buf in raw.locations {
            let location = decode_location(buf)?;
            profile.locations.insert(location.id, location);
        }
        for buf in raw.mappings {
            let mapping = decode_mapping(buf, &strings)?;
            profile.mappings.insert(mapping.id, mapping);
        }
        for buf in raw.samples {
            let sample = decode_sample(buf, &strings)?;
            if sample.values.len() != profile.sample_types.len() {
                return Err(LensError::decode(
                    "sample",
                    format!(
                        "sample has {} values but profile declares {} sample types",
                        sample.values.len(),
                        profile.sample_types.len()
                    ),
                ));
            }
            profile.samples.push(sample);
        }
        if let Some(buf) = raw.period_type {
            profile.period_type = Some(decode_value_type(buf, &strings, "period_type")?);
        }
        profile.drop_frames = strings.get(raw.drop_frames, "profile")?;
        profile.keep_frames = strings.get(raw.keep_frames, "profile")?;
        for idx in raw.comments {
            profile.comments.push(strings.get(idx, "profile")?);
        }
        if raw.default_sample_type != 0 {
            profile.default_sample_type = Some(strings.get(raw.default_sample_type, "profile")?);
        }

        let dangling = profile.dangling_references();
        if dangling > 0 {
            tracing::warn!(dangling, "profile references missing locations or functions");
        }
        tracing::debug!(
            samples = profile.samples.len(),
            locations = profile.locations.len(),
            functions = profile.functions.len(),
            "decoded profile"
        );
        Ok(profile)
    }

    /// Flattens a sample's stack into frames, leaf first. Dangling location
    /// or function ids are skipped.
    pub fn frames<'p>(&'p self, sample: &'p Sample) -> impl Iterator<Item = StackFrame<'p>> + 'p {
        sample
            .location_ids
            .iter()
            .enumerate()
            .filter_map(move |(depth_index, id)| {
                self.locations.get(id).map(|location| (depth_index, location))
            })
            .flat_map(move |(depth_index, location)| {
                location.lines.iter().filter_map(move |line| {
                    let function = self.functions.get(&line.function_id)?;
                    Some(StackFrame {
                        filename: function.filename.as_str(),
                        line: line.line,
                        function_name: function.name.as_str(),
                        depth_index,
                    })
                })
            })
    }

    /// Distinct non-empty filenames reachable from any sample.
    pub fn unique_filenames(&self) -> BTreeSet<&str> {
        let mut seen_locations = BTreeSet::new();
        let mut out = BTreeSet::new();
        for sample in &self.samples {
            for id in &sample.location_ids {
                if !seen_locations.insert(*id) {
                    continue;
                }
                let Some(location) = self.locations.get(id) else {
                    continue;
                };
                for line in &location.lines {
                    if let Some(function) = self.functions.get(&line.function_id)
                        && !function.filename.is_empty()
                    {
                        out.insert(function.filename.as_str());
                    }
                }
            }
        }
        out
    }

    /// Count of location or function ids referenced but not defined.
    pub fn dangling_references(&self) -> usize {
        let missing_locations = self
            .samples
            .iter()
            .flat_map(|s| s.location_ids.iter())
            .filter(|id| !self.locations.contains_key(id))
            .count();
        let missing_functions = self
            .locations
            .values()
            .flat_map(|l| l.lines.iter())
            .filter(|line| !self.functions.contains_key(&line.function_id))
            .count();
        missing_locations + missing_functions
    }

    pub fn summary(&self) -> ProfileSummary {
        let captured_at = (self.time_nanos != 0)
            .then(|| {
                time::OffsetDateTime::from_unix_timestamp_nanos(i128::from(self.time_nanos))
                    .ok()
                    .and_then(|t| t.format(&time::format_description::well_known::Rfc3339).ok())
            })
            .flatten();
        ProfileSummary {
            sample_types: self
                .sample_types
                .iter()
                .map(|vt| format!("{}/{}", vt.r#type, vt.unit))
                .collect(),
            sample_count: self.samples.len(),
            function_count: self.functions.len(),
            location_count: self.locations.len(),
            captured_at,
            duration_ms: self.duration_nanos as f64 / 1_000_000.0,
            period: self
                .period_type
                .as_ref()
                .map(|pt| format!("{} {}/{}", self.period, pt.r#type, pt.unit)),
            dangling_references: self.dangling_references(),
            unique_files: self.unique_filenames().len(),
        }
    }
}

fn decode_value_type(
    buf: &[u8],
    strings: &StringTable<'_>,
    section: &'static str,
) -> LensResult<ValueType> {
    let (mut ty, mut unit) = (0i64, 0i64);
    for field in WireReader::new(buf, section) {
        let field = field?;
        match field.number {
            1 => ty = field.as_i64(section)?,
            2 => unit = field.as_i64(section)?,
            _ => {}
        }
    }
    Ok(ValueType {
        r#type: strings.get(ty, section)?,
        unit: strings.get(unit, section)?,
    })
}

fn decode_function(buf: &[u8], strings: &StringTable<'_>) -> LensResult<Function> {
    const SECTION: &str = "function";
    let (mut id, mut name, mut system_name, mut filename, mut start_line) = (0, 0, 0, 0, 0);
    for field in WireReader::new(buf, SECTION) {
        let field = field?;
        match field.number {
            1 => id = field.as_u64(SECTION)?,
            2 => name = field.as_i64(SECTION)?,
            3 => system_name = field.as_i64(SECTION)?,
            4 => filename = field.as_i64(SECTION)?,
            5 => start_line = field.as_i64(SECTION)?,
            _ => {}
        }
    }
    Ok(Function {
        id,
        name: strings.get(name, SECTION)?,
        system_name: strings.get(system_name, SECTION)?,
        filename: strings.get(filename, SECTION)?,
        start_line,
    })
}

fn decode_line(field: &Field<'_>) -> LensResult<Line> {
    const SECTION: &str = "line";
    let mut line = Line::default();
    for inner in WireReader::new(field.as_bytes(SECTION)?, SECTION) {
        let inner = inner?;
        match inner.number {
            1 => line.function_id = inner.as_u64(SECTION)?,
            2 => line.line = inner.as_i64(SECTION)?,
            3 => line.column = inner.as_i64(SECTION)?,
            _ => {}
        }
    }
    Ok(line)
}

fn decode_location(buf: &[u8]) -> LensResult<Location> {
    const SECTION: &str = "location";
    let mut location = Location::default();
    for field in WireReader::new(buf, SECTION) {
        let field = field?;
        match field.number {
            1 => location.id = field.as_u64(SECTION)?,
            2 => location.mapping_id = field.as_u64(SECTION)?,
            3 => location.address = field.as_u64(SECTION)?,
            4 => location.lines.push(decode_line(&field)?),
            5 => location.is_folded = field.as_bool(SECTION)?,
            _ => {}
        }
    }
    Ok(location)
}

fn decode_mapping(buf: &[u8], strings: &StringTable<'_>) -> LensResult<Mapping> {
    const SECTION: &str = "mapping";
    let mut mapping = Mapping::default();
    let (mut filename, mut build_id) = (0i64, 0i64);
    for field in WireReader::new(buf, SECTION) {
        let field = field?;
        match field.number {
            1 => mapping.id = field.as_u64(SECTION)?,
            2 => mapping.memory_start = field.as_u64(SECTION)?,
            3 => mapping.memory_limit = field.as_u64(SECTION)?,
            4 => mapping.file_offset = field.as_u64(SECTION)?,
            5 => filename = field.as_i64(SECTION)?,
            6 => build_id = field.as_i64(SECTION)?,
            // has_functions / has_filenames / has_line_numbers / has_inline_frames
            _ => {}
        }
    }
    mapping.filename = strings.get(filename, SECTION)?;
    mapping.build_id = strings.get(build_id, SECTION)?;
    Ok(mapping)
}

fn decode_label(field: &Field<'_>, strings: &StringTable<'_>) -> LensResult<Label> {
    const SECTION: &str = "label";
    let (mut key, mut str_value, mut num, mut num_unit) = (0i64, 0i64, 0i64, 0i64);
    for inner in WireReader::new(field.as_bytes(SECTION)?, SECTION) {
        let inner = inner?;
        match inner.number {
            1 => key = inner.as_i64(SECTION)?,
            2 => str_value = inner.as_i64(SECTION)?,
            3 => num = inner.as_i64(SECTION)?,
            4 => num_unit = inner.as_i64(SECTION)?,
            _ => {}
        }
    }
    Ok(Label {
        key: strings.get(key, SECTION)?,
        str_value: strings.get(str_value, SECTION)?,
        num,
        num_unit: strings.get(num_unit, SECTION)?,
    })
}

fn decode_sample(buf: &[u8], strings: &StringTable<'_>) -> LensResult<Sample> {
    const SECTION: &str = "sample";
    let mut sample = Sample::default();
    for field in WireReader::new(buf, SECTION) {
        let field = field?;
        match field.number {
            1 => field.extend_u64(SECTION, &mut sample.location_ids)?,
            2 => field.extend_i64(SECTION, &mut sample.values)?,
            3 => sample.labels.push(decode_label(&field, strings)?),
            _ => {}
        }
    }
    Ok(sample)
}
