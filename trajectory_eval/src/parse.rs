//! Row parsers for raw trajectory sources.
//!
//! Malformed rows are counted and dropped, never fatal.

use anyhow::{bail, Context, Result};
use csv::{ReaderBuilder, StringRecord, Trim};

use crate::schema::{normalize_header, ColumnMap, CsvSchema};
use crate::types::Float;

/// One pose row as read from disk, timestamp still in its source unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawPose {
    pub timestamp: Float,
    pub position: [Float; 3],
    /// Quaternion as (x, y, z, w).
    pub quaternion: [Float; 4],
}

/// Parsed rows plus the number of rows that were rejected.
#[derive(Debug, Clone, Default)]
pub struct ParseReport {
    pub poses: Vec<RawPose>,
    pub dropped: usize,
}

/// Input layout of a trajectory source.
#[derive(Debug, Clone)]
pub enum SourceLayout {
    /// Whitespace separated `timestamp tx ty tz qx qy qz qw`, identified positionally.
    Tum,
    /// Comma separated with a header row resolved through a schema.
    Csv(CsvSchema),
}

impl SourceLayout {
    pub fn parse(&self, text: &str) -> Result<ParseReport> {
        match self {
            SourceLayout::Tum => Ok(parse_tum(text)),
            SourceLayout::Csv(schema) => parse_csv(text, schema),
        }
    }
}

fn is_comment_or_blank(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('%')
}

/// Parse a TUM-style 8-column whitespace file.
pub fn parse_tum(text: &str) -> ParseReport {
    let mut report = ParseReport::default();

    for line in text.lines() {
        if is_comment_or_blank(line) {
            continue;
        }
        let values: Option<Vec<Float>> = line
            .split_whitespace()
            .take(8)
            .map(|field| field.parse::<Float>().ok().filter(|v| v.is_finite()))
            .collect();

        match values {
            Some(v) if v.len() == 8 => report.poses.push(RawPose {
                timestamp: v[0],
                position: [v[1], v[2], v[3]],
                quaternion: [v[4], v[5], v[6], v[7]],
            }),
            _ => report.dropped += 1,
        }
    }
    report
}

/// Parse a comma separated log whose columns are located through `schema`.
///
/// The first record is the header (a leading `#` is allowed). A header that
/// does not satisfy the schema is an error; bad data rows are dropped.
pub fn parse_csv(text: &str, schema: &CsvSchema) -> Result<ParseReport> {
    let mut reader = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .from_reader(text.as_bytes());

    let header = reader.headers().context("cannot read CSV header row")?;
    if header.iter().all(|cell| cell.is_empty()) {
        bail!("empty CSV source, no header row");
    }
    let columns: Vec<String> = header.iter().map(normalize_header).collect();
    let map = schema.resolve(&columns)?;

    let mut report = ParseReport::default();
    for record in reader.records() {
        let Ok(record) = record else {
            report.dropped += 1;
            continue;
        };
        if record.get(0).map(|f| f.starts_with('#')).unwrap_or(false) {
            continue;
        }
        match row_from_record(&record, &map) {
            Some(pose) => report.poses.push(pose),
            None => report.dropped += 1,
        }
    }
    Ok(report)
}

fn row_from_record(record: &StringRecord, map: &ColumnMap) -> Option<RawPose> {
    let get = |idx: usize| -> Option<Float> {
        record.get(idx)?.parse::<Float>().ok().filter(|v| v.is_finite())
    };
    let [tx, ty, tz, qx, qy, qz, qw] = map.fields;
    Some(RawPose {
        timestamp: get(map.timestamp)?,
        position: [get(tx)?, get(ty)?, get(tz)?],
        quaternion: [get(qx)?, get(qy)?, get(qz)?, get(qw)?],
    })
}
