//! Least-squares similarity alignment (Umeyama, 1991).

use crate::types::{Float, Isometry3, Matrix3x3, UnitQuaternion, Vector3};
use nalgebra as na;

/// Minimum per-point variance of the source cloud for a well-posed alignment.
const MIN_SOURCE_VARIANCE: Float = 1e-12;

/// Similarity transform `x -> scale * rotation * x + translation`.
#[derive(Debug, Clone, PartialEq)]
pub struct Similarity {
    pub rotation: Matrix3x3,
    pub translation: Vector3,
    pub scale: Float,
}

impl Similarity {
    pub fn identity() -> Self {
        Similarity {
            rotation: Matrix3x3::identity(),
            translation: Vector3::zeros(),
            scale: 1.0,
        }
    }

    pub fn apply_point(&self, p: &Vector3) -> Vector3 {
        self.scale * (self.rotation * p) + self.translation
    }

    /// Apply to a pose: the position is scaled, the orientation only rotated.
    pub fn apply_pose(&self, pose: &Isometry3) -> Isometry3 {
        let rotation = UnitQuaternion::from_rotation_matrix(&na::Rotation3::from_matrix_unchecked(self.rotation));
        let position = self.apply_point(&pose.translation.vector);
        Isometry3::from_parts(position.into(), rotation * pose.rotation)
    }
}

/// Find the similarity that maps `source` onto `target` in the least-squares sense.
///
/// Returns `None` with fewer than three correspondences, mismatched inputs,
/// or a degenerate (single point) source cloud. With `with_scale == false` the
/// result is a rigid transform.
pub fn umeyama(source: &[Vector3], target: &[Vector3], with_scale: bool) -> Option<Similarity> {
    let n = source.len();
    if n < 3 || target.len() != n {
        return None;
    }
    let inv_n = 1.0 / n as Float;

    let mean_src = source.iter().fold(Vector3::zeros(), |acc, p| acc + p) * inv_n;
    let mean_tgt = target.iter().fold(Vector3::zeros(), |acc, p| acc + p) * inv_n;

    let mut covariance = Matrix3x3::zeros();
    let mut variance_src = 0.0;
    for (s, t) in source.iter().zip(target.iter()) {
        let ds = s - mean_src;
        let dt = t - mean_tgt;
        covariance += dt * ds.transpose();
        variance_src += ds.norm_squared();
    }
    covariance *= inv_n;
    variance_src *= inv_n;

    if variance_src < MIN_SOURCE_VARIANCE {
        return None;
    }

    let svd = covariance.svd(true, true);
    let u = svd.u?;
    let v_t = svd.v_t?;
    let d = svd.singular_values;

    // Reflection guard: flip the axis with the smallest singular value.
    let mut signs = Vector3::new(1.0, 1.0, 1.0);
    if u.determinant() * v_t.determinant() < 0.0 {
        signs[d.imin()] = -1.0;
    }

    let rotation = u * Matrix3x3::from_diagonal(&signs) * v_t;
    let scale = if with_scale {
        d.component_mul(&signs).sum() / variance_src
    } else {
        1.0
    };
    let translation = mean_tgt - scale * (rotation * mean_src);

    Some(Similarity { rotation, translation, scale })
}
