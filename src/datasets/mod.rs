pub mod family;
pub mod ground_truth;

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, Trim};

pub use family::{DatasetFamily, FamilyLayout, IndexFormat};
pub use ground_truth::GroundTruthExtractor;

use crate::error::{IoContext, StageError, StageResult};

/// One dataset sequence. Read-only once discovered.
#[derive(Debug, Clone, PartialEq)]
pub struct Sequence {
    pub name: String,
    pub family: DatasetFamily,
    pub root: PathBuf,
    pub frames_dir: PathBuf,
    /// Frame index the engine reads; may live in the catalog cache.
    pub frame_index: PathBuf,
    pub ground_truth: Option<PathBuf>,
}

impl Sequence {
    pub fn layout(&self) -> &'static FamilyLayout {
        self.family.layout()
    }
}

/// A sequence the catalog could not use, with the reason.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedSequence {
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct CatalogListing {
    pub sequences: Vec<Sequence>,
    pub skipped: Vec<SkippedSequence>,
}

pub struct SequenceCatalog {
    /// Where synthesized frame indices are written. The dataset tree is never written to.
    cache_dir: PathBuf,
}

impl SequenceCatalog {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        SequenceCatalog { cache_dir: cache_dir.into() }
    }

    /// Enumerate the sequences of one family.
    ///
    /// With `explicit_names` empty every subdirectory of `root` is a candidate,
    /// in name order. Otherwise the names are used verbatim and in the given
    /// order. A missing root is fatal; a sequence whose frame index cannot be
    /// found or synthesized is reported in `skipped`.
    pub fn list_sequences(
        &self,
        family: DatasetFamily,
        root: &Path,
        explicit_names: &[String],
    ) -> StageResult<CatalogListing> {
        if !root.is_dir() {
            return Err(StageError::fatal(format!(
                "{} dataset root does not exist: {}",
                family,
                root.display()
            )));
        }

        let names = if explicit_names.is_empty() {
            discover(root)?
        } else {
            explicit_names.to_vec()
        };

        let mut listing = CatalogListing::default();
        for name in names {
            match self.resolve(family, root, &name) {
                Ok(sequence) => {
                    log::debug!(
                        "[Catalog] {} ({}), ground truth: {}",
                        sequence.name,
                        family,
                        sequence
                            .ground_truth
                            .as_ref()
                            .map(|p| p.display().to_string())
                            .unwrap_or_else(|| "none".to_string())
                    );
                    listing.sequences.push(sequence);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    log::warn!("[Catalog] Skipping sequence {}: {}", name, e);
                    listing.skipped.push(SkippedSequence { name, reason: e.to_string() });
                }
            }
        }

        log::info!(
            "[Catalog] {} {} sequences, {} skipped",
            listing.sequences.len(),
            family,
            listing.skipped.len()
        );
        Ok(listing)
    }

    fn resolve(&self, family: DatasetFamily, root: &Path, name: &str) -> StageResult<Sequence> {
        let layout = family.layout();
        let seq_root = root.join(name);
        if !seq_root.is_dir() {
            return Err(StageError::skip(format!("sequence directory not found: {}", seq_root.display())));
        }

        let frames_dir = seq_root.join(layout.frames_dir);
        if !frames_dir.is_dir() {
            return Err(StageError::skip(format!("frame directory not found: {}", frames_dir.display())));
        }

        let ground_truth = layout
            .ground_truth_candidates
            .iter()
            .map(|candidate| seq_root.join(candidate))
            .find(|path| path.is_file());

        let frame_index = self.frame_index(layout, name, &seq_root, &frames_dir)?;

        Ok(Sequence {
            name: name.to_string(),
            family,
            root: seq_root,
            frames_dir,
            frame_index,
            ground_truth,
        })
    }

    /// The dataset's own index when present, otherwise one synthesized into the cache.
    fn frame_index(
        &self,
        layout: &FamilyLayout,
        name: &str,
        seq_root: &Path,
        frames_dir: &Path,
    ) -> StageResult<PathBuf> {
        let in_tree = seq_root.join(layout.frame_index);
        if in_tree.is_file() {
            return Ok(in_tree);
        }

        let cached = self.cache_dir.join(layout.family.name()).join(name).join(layout.frame_index);
        if cached.is_file() {
            return Ok(cached);
        }

        let lines = match layout.index_source {
            Some(source) => timestamps_from_csv(&seq_root.join(source))?,
            None => index_from_frame_names(layout, frames_dir)?,
        };
        if lines.is_empty() {
            return Err(StageError::skip(format!(
                "no frames to build {} from in {}",
                layout.frame_index,
                seq_root.display()
            )));
        }

        write_lines(&cached, &lines)?;
        log::info!("[Catalog] Synthesized {} ({} frames) for {}", cached.display(), lines.len(), name);
        Ok(cached)
    }
}

/// Immediate subdirectories of `root`, sorted by name.
fn discover(root: &Path) -> StageResult<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(root).at_path(root)? {
        let entry = entry.at_path(root)?;
        if entry.path().is_dir() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

/// First column of a `#timestamp [ns],filename` CSV, one timestamp per line.
fn timestamps_from_csv(path: &Path) -> StageResult<Vec<String>> {
    if !path.is_file() {
        return Err(StageError::skip(format!("frame list not found: {}", path.display())));
    }
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .comment(Some(b'#'))
        .trim(Trim::All)
        .flexible(true)
        .from_path(path)
        .map_err(|e| StageError::skip(format!("cannot open {}: {}", path.display(), e)))?;

    let mut out = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| StageError::skip(format!("unreadable {}: {}", path.display(), e)))?;
        let first = record.get(0).unwrap_or("");
        if !first.is_empty() && first.bytes().all(|b| b.is_ascii_digit()) {
            out.push(first.to_string());
        }
    }
    Ok(out)
}

/// `timestamp frames_dir/file` lines for every frame whose stem is a timestamp.
fn index_from_frame_names(layout: &FamilyLayout, frames_dir: &Path) -> StageResult<Vec<String>> {
    let mut frames: Vec<(f64, String, String)> = Vec::new();
    for entry in fs::read_dir(frames_dir).at_path(frames_dir)? {
        let entry = entry.at_path(frames_dir)?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
            continue;
        };
        if let Ok(ts) = stem.parse::<f64>() {
            let file = entry.file_name().to_string_lossy().into_owned();
            frames.push((ts, stem, file));
        }
    }
    frames.sort_by(|a, b| a.0.total_cmp(&b.0));

    let lines = match layout.index_format {
        IndexFormat::TimestampAndFile => frames
            .into_iter()
            .map(|(_, stem, file)| format!("{} {}/{}", stem, layout.frames_dir, file))
            .collect(),
        IndexFormat::TimestampOnly => frames.into_iter().map(|(_, stem, _)| stem).collect(),
    };
    Ok(lines)
}

fn write_lines(path: &Path, lines: &[String]) -> StageResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).at_path(parent)?;
    }
    let file = File::create(path).at_path(path)?;
    let mut writer = BufWriter::new(file);
    for line in lines {
        writeln!(writer, "{}", line).at_path(path)?;
    }
    writer.flush().at_path(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn tum_sequence(root: &Path, name: &str, with_index: bool, with_gt: bool) {
        let seq = root.join(name);
        touch(&seq.join("rgb/1305031102.175304.png"), "a");
        touch(&seq.join("rgb/1305031102.211214.png"), "b");
        if with_index {
            touch(&seq.join("rgb.txt"), "# color images\n1305031102.175304 rgb/1305031102.175304.png\n");
        }
        if with_gt {
            touch(&seq.join("groundtruth.txt"), "1305031102.1 0 0 0 0 0 0 1\n");
        }
    }

    #[test]
    fn test_discovery_is_sorted_and_resolves_ground_truth() {
        let data = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        tum_sequence(data.path(), "seq_b", true, false);
        tum_sequence(data.path(), "seq_a", true, true);

        let listing = SequenceCatalog::new(cache.path())
            .list_sequences(DatasetFamily::Tum, data.path(), &[])
            .unwrap();
        let names: Vec<_> = listing.sequences.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["seq_a", "seq_b"]);
        assert!(listing.sequences[0].ground_truth.is_some());
        assert!(listing.sequences[1].ground_truth.is_none());
        assert_eq!(listing.sequences[0].frame_index, data.path().join("seq_a/rgb.txt"));
    }

    #[test]
    fn test_explicit_names_keep_order_and_report_missing() {
        let data = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        tum_sequence(data.path(), "seq_a", true, false);
        tum_sequence(data.path(), "seq_b", true, false);

        let names = vec!["seq_b".to_string(), "ghost".to_string(), "seq_a".to_string()];
        let listing = SequenceCatalog::new(cache.path())
            .list_sequences(DatasetFamily::Tum, data.path(), &names)
            .unwrap();
        let found: Vec<_> = listing.sequences.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(found, vec!["seq_b", "seq_a"]);
        assert_eq!(listing.skipped.len(), 1);
        assert_eq!(listing.skipped[0].name, "ghost");
    }

    #[test]
    fn test_tum_index_is_synthesized_into_cache() {
        let data = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        tum_sequence(data.path(), "seq_a", false, false);

        let listing = SequenceCatalog::new(cache.path())
            .list_sequences(DatasetFamily::Tum, data.path(), &[])
            .unwrap();
        let index = &listing.sequences[0].frame_index;
        assert!(index.starts_with(cache.path()));
        assert!(!data.path().join("seq_a/rgb.txt").exists());
        let text = fs::read_to_string(index).unwrap();
        assert_eq!(
            text,
            "1305031102.175304 rgb/1305031102.175304.png\n1305031102.211214 rgb/1305031102.211214.png\n"
        );
    }

    #[test]
    fn test_euroc_times_from_csv_and_skip_without_source() {
        let data = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        let good = data.path().join("MH_01");
        touch(&good.join("mav0/cam0/data/1403636579763555584.png"), "x");
        touch(
            &good.join("mav0/cam0/data.csv"),
            "#timestamp [ns],filename\n1403636579763555584,1403636579763555584.png\n1403636579813555456,1403636579813555456.png\n",
        );
        touch(&good.join("mav0/state_groundtruth_estimate0/data.csv"), "#timestamp\n");
        let bad = data.path().join("MH_02");
        touch(&bad.join("mav0/cam0/data/1.png"), "x");

        let listing = SequenceCatalog::new(cache.path())
            .list_sequences(DatasetFamily::Euroc, data.path(), &[])
            .unwrap();
        assert_eq!(listing.sequences.len(), 1);
        let seq = &listing.sequences[0];
        assert_eq!(seq.name, "MH_01");
        assert!(seq.ground_truth.is_some());
        assert_eq!(
            fs::read_to_string(&seq.frame_index).unwrap(),
            "1403636579763555584\n1403636579813555456\n"
        );
        assert_eq!(listing.skipped.len(), 1);
        assert_eq!(listing.skipped[0].name, "MH_02");
    }

    #[test]
    fn test_missing_root_is_fatal() {
        let err = SequenceCatalog::new("/tmp/cache")
            .list_sequences(DatasetFamily::Tum, Path::new("/nonexistent/tum"), &[])
            .unwrap_err();
        assert!(err.is_fatal());
    }
}
