//! Trajectory normalization: raw rows in any timestamp unit to canonical poses.

use crate::parse::RawPose;
use crate::timestamp::TimestampUnit;
use crate::trajectory::{Pose, Trajectory};
use crate::types::{Quaternion, UnitQuaternion, Vector3, UNIT_NORM_EPSILON};

/// Result of normalizing one source.
#[derive(Debug, Clone, Default)]
pub struct NormalizeReport {
    pub trajectory: Trajectory,
    /// Rows rejected for a degenerate orientation or a repeated timestamp.
    pub dropped: usize,
}

/// Convert raw rows to a canonical trajectory (seconds, unit quaternions,
/// strictly increasing timestamps).
pub fn normalize(raw: &[RawPose], hint: TimestampUnit) -> NormalizeReport {
    let mut poses = Vec::with_capacity(raw.len());
    let mut rejected = 0usize;

    for row in raw {
        let [qx, qy, qz, qw] = row.quaternion;
        let quaternion = Quaternion::new(qw, qx, qy, qz);
        let orientation = match UnitQuaternion::try_new(quaternion, UNIT_NORM_EPSILON) {
            Some(q) => q,
            None => {
                rejected += 1;
                continue;
            }
        };

        let timestamp = hint.to_seconds(row.timestamp);
        if !timestamp.is_finite() {
            rejected += 1;
            continue;
        }

        let [x, y, z] = row.position;
        poses.push(Pose::new(timestamp, Vector3::new(x, y, z), orientation));
    }

    let kept = poses.len();
    let trajectory = Trajectory::new(poses);
    let dropped = rejected + (kept - trajectory.len());
    if dropped > 0 {
        log::debug!("[Normalizer] dropped {} of {} rows", dropped, raw.len());
    }

    NormalizeReport { trajectory, dropped }
}
