//! Time association between an estimate and a reference trajectory.

use crate::trajectory::Trajectory;
use crate::types::Float;

/// Matched index pairs `(estimate, reference)`, both increasing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Association {
    pub pairs: Vec<(usize, usize)>,
    pub estimate_len: usize,
}

impl Association {
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Fraction of estimate poses that found a reference partner.
    pub fn fraction(&self) -> Float {
        if self.estimate_len == 0 {
            0.0
        } else {
            self.pairs.len() as Float / self.estimate_len as Float
        }
    }
}

/// Pair every estimate pose with the closest reference pose whose timestamp
/// differs by less than `max_diff` seconds. Reference poses are used at most
/// once and pairs keep temporal order.
pub fn associate(estimate: &Trajectory, reference: &Trajectory, max_diff: Float) -> Association {
    let ref_times = reference.timestamps();
    let mut pairs = Vec::new();
    let mut next_free = 0usize;

    for (est_idx, pose) in estimate.iter().enumerate() {
        let t = pose.timestamp;
        let insert = ref_times.partition_point(|&r| r < t);

        let best = [insert.checked_sub(1), Some(insert)]
            .into_iter()
            .flatten()
            .filter(|&j| j >= next_free && j < ref_times.len())
            .min_by(|&a, &b| (ref_times[a] - t).abs().total_cmp(&(ref_times[b] - t).abs()));

        if let Some(j) = best {
            if (ref_times[j] - t).abs() < max_diff {
                pairs.push((est_idx, j));
                next_free = j + 1;
            }
        }
    }

    Association { pairs, estimate_len: estimate.len() }
}
