pub mod timestamp;
pub mod trajectory;
pub mod parse;
pub mod schema;
pub mod normalize;
pub mod io;
pub mod associate;
pub mod align;
pub mod metrics;

// Re-export commonly used types for convenience
pub use associate::{associate, Association};
pub use metrics::{drift_errors, local_consistency_errors, ErrorStatistics};
pub use normalize::{normalize, NormalizeReport};
pub use schema::{CsvSchema, PoseField};
pub use timestamp::{normalize_unit, TimestampUnit};
pub use trajectory::{Pose, Trajectory};


pub mod types {

    use nalgebra as na;

    /// Float type for trajectory computations.
    pub type Float = f64;

    pub type Vector3 = na::Vector3<Float>;
    pub type Matrix3x3 = na::Matrix3<Float>;
    pub type Quaternion = na::Quaternion<Float>;
    pub type UnitQuaternion = na::UnitQuaternion<Float>;
    pub type Isometry3 = na::Isometry3<Float>;

    /// Tolerance used when checking that an orientation is unit norm.
    pub const UNIT_NORM_EPSILON: Float = 1e-6;

}
