use crate::types::{Float, Isometry3, UnitQuaternion, Vector3};

/// A single timestamped pose, timestamp in seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct Pose {
    pub timestamp: Float,
    pub position: Vector3,
    pub orientation: UnitQuaternion,
}

impl Pose {
    pub fn new(timestamp: Float, position: Vector3, orientation: UnitQuaternion) -> Self {
        Pose { timestamp, position, orientation }
    }

    /// World-from-body transform of this pose.
    pub fn isometry(&self) -> Isometry3 {
        Isometry3::from_parts(self.position.into(), self.orientation)
    }
}

/// Ordered poses with strictly increasing timestamps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Trajectory {
    poses: Vec<Pose>,
}

impl Trajectory {
    /// Build a trajectory, sorting by timestamp and dropping repeated timestamps
    /// (the first occurrence wins).
    pub fn new(mut poses: Vec<Pose>) -> Self {
        poses.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        poses.dedup_by(|later, earlier| later.timestamp <= earlier.timestamp);
        Trajectory { poses }
    }

    pub fn poses(&self) -> &[Pose] {
        &self.poses
    }

    pub fn len(&self) -> usize {
        self.poses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.poses.is_empty()
    }

    pub fn timestamps(&self) -> Vec<Float> {
        self.poses.iter().map(|p| p.timestamp).collect()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Pose> {
        self.poses.iter()
    }
}
