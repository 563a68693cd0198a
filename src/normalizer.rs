//! Rewrites captured trajectories and ground-truth logs in canonical form.

use std::fs;
use std::path::{Path, PathBuf};

use trajectory_eval::io::{load_normalized, write_canonical};
use trajectory_eval::parse::SourceLayout;
use trajectory_eval::TimestampUnit;

use crate::error::{IoContext, StageError, StageResult};

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedTrajectory {
    pub path: PathBuf,
    pub poses: usize,
    /// Rows dropped as malformed, degenerate or duplicated.
    pub dropped: usize,
}

pub struct TrajectoryNormalizer;

impl TrajectoryNormalizer {
    /// Normalize `source` into `destination`.
    ///
    /// `Ok(None)` when the source does not exist or holds no valid pose. A
    /// source that cannot be parsed at all (for example a CSV header that
    /// does not match the schema) is a unit skip.
    pub fn normalize_file(
        source: &Path,
        layout: &SourceLayout,
        hint: TimestampUnit,
        destination: &Path,
    ) -> StageResult<Option<NormalizedTrajectory>> {
        if !source.is_file() {
            return Ok(None);
        }

        let report = load_normalized(source, layout, hint).map_err(|e| StageError::skip(format!("{:#}", e)))?;
        if report.trajectory.is_empty() {
            log::warn!(
                "[Normalizer] No valid pose in {} ({} rows dropped)",
                source.display(),
                report.dropped
            );
            return Ok(None);
        }

        // Written aside then renamed so an interrupted batch never leaves a truncated file.
        let partial = destination.with_extension("partial");
        write_canonical(&partial, &report.trajectory).map_err(|e| StageError::skip(format!("{:#}", e)))?;
        fs::rename(&partial, destination).at_path(destination)?;

        if report.dropped > 0 {
            log::info!(
                "[Normalizer] {}: {} poses, {} rows dropped",
                destination.display(),
                report.trajectory.len(),
                report.dropped
            );
        } else {
            log::debug!("[Normalizer] {}: {} poses", destination.display(), report.trajectory.len());
        }

        Ok(Some(NormalizedTrajectory {
            path: destination.to_path_buf(),
            poses: report.trajectory.len(),
            dropped: report.dropped,
        }))
    }
}
