//! Reading raw sources and writing canonical trajectory files.
//!
//! The canonical format is one pose per line,
//! `timestamp tx ty tz qx qy qz qw`, space separated, timestamps in seconds
//! with 9 decimal digits.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};

use crate::normalize::{normalize, NormalizeReport};
use crate::parse::{parse_tum, SourceLayout};
use crate::timestamp::TimestampUnit;
use crate::trajectory::{Pose, Trajectory};

/// Format a pose as one canonical line (without newline).
pub fn format_pose(pose: &Pose) -> String {
    let q = pose.orientation.quaternion();
    format!(
        "{:.9} {:.9} {:.9} {:.9} {:.9} {:.9} {:.9} {:.9}",
        pose.timestamp,
        pose.position.x,
        pose.position.y,
        pose.position.z,
        q.i,
        q.j,
        q.k,
        q.w
    )
}

/// Write `trajectory` in canonical format, creating parent directories.
pub fn write_canonical(path: &Path, trajectory: &Trajectory) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Cannot create directory: {}", parent.display()))?;
    }
    let file = File::create(path)
        .with_context(|| format!("Cannot create trajectory file: {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    for pose in trajectory.iter() {
        writeln!(writer, "{}", format_pose(pose))?;
    }
    writer.flush()?;
    Ok(())
}

/// Read a file already in canonical format.
pub fn read_canonical(path: &Path) -> Result<Trajectory> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Cannot open trajectory file: {}", path.display()))?;
    let parsed = parse_tum(&text);
    Ok(normalize(&parsed.poses, TimestampUnit::Seconds).trajectory)
}

/// Read any supported source and normalize it.
///
/// Dropped rows from parsing and normalization are summed into the report.
pub fn load_normalized(path: &Path, layout: &SourceLayout, hint: TimestampUnit) -> Result<NormalizeReport> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Cannot open trajectory source: {}", path.display()))?;
    let parsed = layout
        .parse(&text)
        .with_context(|| format!("Cannot parse trajectory source: {}", path.display()))?;
    let mut report = normalize(&parsed.poses, hint);
    report.dropped += parsed.dropped;
    Ok(report)
}
