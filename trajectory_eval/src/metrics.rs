//! Drift (absolute) and local-consistency (relative) translation errors.
//!
//! Both metrics follow the conventions of the evo toolbox: similarity
//! alignment over the associated positions, translation part only, and for
//! the relative metric every start index `i` paired with `i + delta`.

use serde::{Deserialize, Serialize};

use crate::align::{umeyama, Similarity};
use crate::associate::Association;
use crate::trajectory::Trajectory;
use crate::types::{Float, Isometry3, Vector3};

/// Summary statistics of a set of errors.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorStatistics {
    pub rmse: Float,
    pub mean: Float,
    pub median: Float,
    pub std: Float,
    pub min: Float,
    pub max: Float,
    pub sse: Float,
    pub count: usize,
}

impl ErrorStatistics {
    /// Compute statistics from a list of errors. `None` when empty.
    pub fn from_errors(errors: &[Float]) -> Option<Self> {
        if errors.is_empty() {
            return None;
        }

        let count = errors.len();
        let n = count as Float;

        let sum: Float = errors.iter().sum();
        let mean = sum / n;

        let sse: Float = errors.iter().map(|e| e * e).sum();
        let rmse = (sse / n).sqrt();

        let variance = errors.iter().map(|e| (e - mean).powi(2)).sum::<Float>() / n;
        let std = variance.sqrt();

        let min = errors.iter().cloned().fold(Float::INFINITY, Float::min);
        let max = errors.iter().cloned().fold(Float::NEG_INFINITY, Float::max);

        let mut sorted = errors.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let median = if count % 2 == 0 {
            (sorted[count / 2 - 1] + sorted[count / 2]) / 2.0
        } else {
            sorted[count / 2]
        };

        Some(Self { rmse, mean, median, std, min, max, sse, count })
    }

    /// Format as a single-line summary.
    pub fn summary(&self) -> String {
        format!(
            "rmse: {:.4}, mean: {:.4}, median: {:.4}, std: {:.4}, min: {:.4}, max: {:.4}",
            self.rmse, self.mean, self.median, self.std, self.min, self.max
        )
    }
}

/// Associated pose pairs as isometries, the estimate mapped onto the
/// reference by a similarity when `align` is set.
fn aligned_pairs(
    reference: &Trajectory,
    estimate: &Trajectory,
    association: &Association,
    align: bool,
) -> Option<Vec<(Isometry3, Isometry3)>> {
    let gt = reference.poses();
    let est = estimate.poses();

    let alignment = if align {
        let source: Vec<Vector3> = association.pairs.iter().map(|&(e, _)| est[e].position).collect();
        let target: Vec<Vector3> = association.pairs.iter().map(|&(_, g)| gt[g].position).collect();
        umeyama(&source, &target, true)?
    } else {
        Similarity::identity()
    };

    Some(
        association
            .pairs
            .iter()
            .map(|&(e, g)| (gt[g].isometry(), alignment.apply_pose(&est[e].isometry())))
            .collect(),
    )
}

/// Per-pose translation error after similarity alignment.
///
/// `None` when there are no associated pairs or the alignment is degenerate.
pub fn drift_errors(
    reference: &Trajectory,
    estimate: &Trajectory,
    association: &Association,
    align: bool,
) -> Option<Vec<Float>> {
    if association.is_empty() {
        return None;
    }
    let pairs = aligned_pairs(reference, estimate, association, align)?;
    Some(
        pairs
            .iter()
            .map(|(gt, est)| (gt.translation.vector - est.translation.vector).norm())
            .collect(),
    )
}

/// Translation error of the relative motion between associated poses `i` and
/// `i + delta`, for every valid `i`.
///
/// `None` when fewer than `delta + 1` pairs are associated.
pub fn local_consistency_errors(
    reference: &Trajectory,
    estimate: &Trajectory,
    association: &Association,
    delta: usize,
    align: bool,
) -> Option<Vec<Float>> {
    if delta == 0 || association.len() <= delta {
        return None;
    }
    let pairs = aligned_pairs(reference, estimate, association, align)?;

    let errors = (0..pairs.len() - delta)
        .map(|i| {
            let (gt_i, est_i) = &pairs[i];
            let (gt_j, est_j) = &pairs[i + delta];
            let gt_rel = gt_i.inverse() * gt_j;
            let est_rel = est_i.inverse() * est_j;
            (gt_rel.inverse() * est_rel).translation.vector.norm()
        })
        .collect();
    Some(errors)
}
