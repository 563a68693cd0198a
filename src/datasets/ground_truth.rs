use std::path::{Path, PathBuf};

use crate::config::ResultsLayout;
use crate::datasets::Sequence;
use crate::error::StageResult;
use crate::normalizer::TrajectoryNormalizer;

/// Extracts each sequence's ground truth once into a canonical cache file.
pub struct GroundTruthExtractor {
    results: ResultsLayout,
}

impl GroundTruthExtractor {
    pub fn new(results: ResultsLayout) -> Self {
        GroundTruthExtractor { results }
    }

    pub fn cache_path(&self, sequence: &Sequence) -> PathBuf {
        self.results.ground_truth(sequence.family, &sequence.name)
    }

    /// Canonical ground truth of `sequence`.
    ///
    /// `Ok(None)` when the sequence has no ground-truth source or the source
    /// holds no valid pose. An existing cache file is reused as is.
    pub fn extract(&self, sequence: &Sequence) -> StageResult<Option<PathBuf>> {
        let Some(source) = sequence.ground_truth.as_deref() else {
            return Ok(None);
        };

        let cache = self.cache_path(sequence);
        if cache.is_file() {
            log::debug!("[Catalog] Reusing ground truth cache {}", cache.display());
            return Ok(Some(cache));
        }

        self.extract_from(sequence, source, &cache)
    }

    fn extract_from(&self, sequence: &Sequence, source: &Path, cache: &Path) -> StageResult<Option<PathBuf>> {
        let layout = sequence.layout();
        let parsed = layout.ground_truth_layout(source);
        let normalized = TrajectoryNormalizer::normalize_file(source, &parsed, layout.ground_truth_unit, cache)?;
        if let Some(n) = &normalized {
            log::info!(
                "[Catalog] Ground truth for {}: {} poses from {}",
                sequence.name,
                n.poses,
                source.display()
            );
        }
        Ok(normalized.map(|n| n.path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasets::DatasetFamily;
    use std::fs;
    use tempfile::TempDir;
    use trajectory_eval::io::read_canonical;

    fn euroc_sequence(root: &Path, gt: Option<&str>) -> Sequence {
        let gt_path = gt.map(|content| {
            let path = root.join("mav0/state_groundtruth_estimate0/data.csv");
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, content).unwrap();
            path
        });
        Sequence {
            name: "MH_01".to_string(),
            family: DatasetFamily::Euroc,
            root: root.to_path_buf(),
            frames_dir: root.join("mav0/cam0/data"),
            frame_index: root.join("times.txt"),
            ground_truth: gt_path,
        }
    }

    const EUROC_GT: &str = "#timestamp, p_RS_R_x [m], p_RS_R_y [m], p_RS_R_z [m], q_RS_w [], q_RS_x [], q_RS_y [], q_RS_z [], v_RS_R_x [m s^-1]\n\
1403636580838555648,4.688319,-1.786938,0.783338,0.534108,-0.153029,-0.827383,-0.082152,-0.027876\n\
1403636580843555328,4.688177,-1.786770,0.787350,0.534640,-0.152990,-0.826976,-0.082863,-0.029272\n";

    #[test]
    fn test_euroc_csv_is_extracted_in_seconds_and_cached() {
        let data = TempDir::new().unwrap();
        let results = TempDir::new().unwrap();
        let sequence = euroc_sequence(data.path(), Some(EUROC_GT));
        let extractor = GroundTruthExtractor::new(ResultsLayout::new(results.path()));

        let cache = extractor.extract(&sequence).unwrap().unwrap();
        assert_eq!(cache, results.path().join("ground_truth/euroc/MH_01.tum"));

        let trajectory = read_canonical(&cache).unwrap();
        assert_eq!(trajectory.len(), 2);
        let first = &trajectory.poses()[0];
        assert!((first.timestamp - 1403636580.838555648).abs() < 1e-6);
        assert!((first.position.x - 4.688319).abs() < 1e-9);
        assert!((first.orientation.quaternion().w - 0.534108).abs() < 1e-3);

        // Source removed: the cache is still served.
        fs::remove_file(sequence.ground_truth.as_ref().unwrap()).unwrap();
        assert_eq!(extractor.extract(&sequence).unwrap(), Some(cache));
    }

    #[test]
    fn test_same_name_in_two_families_keeps_separate_caches() {
        let data = TempDir::new().unwrap();
        let results = TempDir::new().unwrap();
        let euroc = euroc_sequence(&data.path().join("euroc/MH_01"), Some(EUROC_GT));

        let tum_root = data.path().join("tum/MH_01");
        fs::create_dir_all(&tum_root).unwrap();
        fs::write(tum_root.join("groundtruth.txt"), "1305031102.0 9 9 9 0 0 0 1\n").unwrap();
        let tum = Sequence {
            family: DatasetFamily::Tum,
            root: tum_root.clone(),
            frames_dir: tum_root.join("rgb"),
            frame_index: tum_root.join("rgb.txt"),
            ground_truth: Some(tum_root.join("groundtruth.txt")),
            ..euroc.clone()
        };

        let extractor = GroundTruthExtractor::new(ResultsLayout::new(results.path()));
        let from_euroc = extractor.extract(&euroc).unwrap().unwrap();
        let from_tum = extractor.extract(&tum).unwrap().unwrap();
        assert_ne!(from_euroc, from_tum);
        assert_eq!(read_canonical(&from_euroc).unwrap().len(), 2);
        let tum_poses = read_canonical(&from_tum).unwrap();
        assert_eq!(tum_poses.len(), 1);
        assert!((tum_poses.poses()[0].position.x - 9.0).abs() < 1e-9);
    }

    #[test]
    fn test_sequence_without_ground_truth_is_absent() {
        let data = TempDir::new().unwrap();
        let results = TempDir::new().unwrap();
        let sequence = euroc_sequence(data.path(), None);
        let extractor = GroundTruthExtractor::new(ResultsLayout::new(results.path()));
        assert_eq!(extractor.extract(&sequence).unwrap(), None);
    }

    #[test]
    fn test_unmatched_header_is_a_skip() {
        let data = TempDir::new().unwrap();
        let results = TempDir::new().unwrap();
        let sequence = euroc_sequence(data.path(), Some("#timestamp,foo,bar\n1,2,3\n"));
        let extractor = GroundTruthExtractor::new(ResultsLayout::new(results.path()));
        let err = extractor.extract(&sequence).unwrap_err();
        assert!(!err.is_fatal());
    }
}
